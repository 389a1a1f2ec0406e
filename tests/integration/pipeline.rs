//! Full crawl pipeline: category discovery → product listing → detail
//!
//! A wiremock server plays the grocery site; storage is in-memory SQLite.

use std::sync::{Arc, Mutex};

use trolley::config::Config;
use trolley::crawler::CrawlRunner;
use trolley::events::tracing_sink;
use trolley::queue::{CrawlQueue, SharedStorage};
use trolley::state::{CrawlStatus, CrawlType, QueueStatus, QueueType};
use trolley::storage::{SqliteStorage, Storage};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEED_PATH: &str = "/dept/fresh-fruit/1215135760597";
const BANANAS_PATH: &str = "/product/bananas/1000000000101";
const APPLES_PATH: &str = "/product/gala-apples/1000000000102";

fn test_config(base_url: &str, seed_url: &str) -> Config {
    toml::from_str(&format!(
        r#"
[site]
base-url = "{base_url}"
seed-categories = ["{seed_url}"]

[crawler]
max-attempts = 2
batch-size = 10
detail-batch-size = 10
inter-batch-delay-ms = 1
max-pages-per-category = 1
error-threshold = 1.0

[rate-limit]
max-requests = 1000
window-secs = 1
capacity = 1000

[retry]
max-attempts = 2
initial-delay-ms = 1
backoff = 1.0
jitter = false

[session]
user-agent = "TrolleyTest/1.0"
timeout-secs = 5
max-restarts = 2
human-delay-ms = [0, 0]

[output]
database-path = "./unused.db"
"#
    ))
    .expect("valid test config")
}

fn shared_storage() -> SharedStorage {
    Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()))
}

/// Category page: a heading, three product tiles (one without a link)
fn listing_page() -> String {
    format!(
        r#"<html><body>
<h1 data-testid="category-heading">Fresh Fruit</h1>
<div class="product-tile"><h3><a href="{BANANAS_PATH}">Bananas</a></h3><span class="price">£1.10</span></div>
<div class="product-tile"><h3><a href="{APPLES_PATH}">Gala Apples</a></h3><span class="price">£2.50</span></div>
<div class="product-tile"><h3><span>Seasonal Mystery Box</span></h3></div>
</body></html>"#
    )
}

fn bananas_page() -> &'static str {
    r#"<html><body>
<div data-testid="product-description">Fresh ripe bananas.</div>
<div data-testid="product-storage">Store at room temperature.</div>
<div data-testid="nutrition-table"><table>
<tr><th>Typical Values</th><th>Per 100g</th></tr>
<tr><td>Energy kcal</td><td>89</td></tr>
<tr><td>Fat</td><td>0.3g</td></tr>
<tr><td>of which saturates</td><td>0.1g</td></tr>
<tr><td>Salt</td><td>&lt;0.5g</td></tr>
</table></div>
</body></html>"#
}

fn apples_page() -> &'static str {
    r#"<html><body>
<div data-testid="product-unavailable-message">This product is currently unavailable</div>
</body></html>"#
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SEED_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(BANANAS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(bananas_page()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(APPLES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(apples_page()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn category_stage_seeds_listing_queue() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let storage = shared_storage();
    let seed_url = format!("{}{}", server.uri(), SEED_PATH);
    let config = test_config(&server.uri(), &seed_url);
    let runner = CrawlRunner::new(Arc::clone(&storage), config, tracing_sink());

    let report = runner.run(CrawlType::Category, false).await.unwrap();
    assert_eq!(report.status, CrawlStatus::Completed);
    assert_eq!(report.processed_items, 1);
    assert_eq!(report.failed_items, 0);

    // Level-0 category row with the heading's display name
    let category = {
        let guard = storage.lock().unwrap();
        guard.get_category_by_url(&seed_url).unwrap().unwrap()
    };
    assert_eq!(category.name, "Fresh Fruit");
    assert_eq!(category.level, 0);
    assert_eq!(category.parent_id, None);

    // Exactly one listing queue entry, scored 50 base + 30 level + 20 keyword
    let list_queue = CrawlQueue::new(Arc::clone(&storage), QueueType::ProductList);
    let claimed = list_queue.claim(10).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].url, seed_url);
    assert_eq!(claimed[0].priority, 100);
    assert_eq!(claimed[0].category_id, Some(category.id));
}

#[tokio::test]
async fn full_pipeline_builds_products_and_nutrition() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let storage = shared_storage();
    let seed_url = format!("{}{}", server.uri(), SEED_PATH);
    let config = test_config(&server.uri(), &seed_url);
    let runner = CrawlRunner::new(Arc::clone(&storage), config, tracing_sink());

    let report = runner.run(CrawlType::Both, false).await.unwrap();
    assert_eq!(report.status, CrawlStatus::Completed);
    assert_eq!(report.failed_items, 0);

    let guard = storage.lock().unwrap();

    // Three tiles on the page, but only the two with product links become rows
    assert_eq!(guard.count_products().unwrap(), 2);

    let bananas = guard
        .get_product_by_site_id("1000000000101")
        .unwrap()
        .unwrap();
    assert_eq!(bananas.name, "Bananas");
    assert_eq!(bananas.price, Some(1.10));
    assert!(bananas.is_available);
    assert!(bananas.nutrition_scraped);
    assert_eq!(bananas.description.as_deref(), Some("Fresh ripe bananas."));
    assert_eq!(
        bananas.storage.as_deref(),
        Some("Store at room temperature.")
    );

    let nutrition = guard.get_nutrition(bananas.id).unwrap().unwrap();
    assert_eq!(nutrition.energy_kcal, Some(89.0));
    assert_eq!(nutrition.fat, Some(0.3));
    assert_eq!(nutrition.saturated_fat, Some(0.1));
    // "<0.5g" halves to 0.25
    assert_eq!(nutrition.salt, Some(0.25));
    assert_eq!(nutrition.serving_size.as_deref(), Some("100g"));

    // The unavailable product is flipped off and left unscraped
    let apples = guard
        .get_product_by_site_id("1000000000102")
        .unwrap()
        .unwrap();
    assert!(!apples.is_available);
    assert!(!apples.nutrition_scraped);
    assert!(guard.get_nutrition(apples.id).unwrap().is_none());

    // Both queues drained: one listing item, two detail items, all completed
    for (queue_type, completed) in [(QueueType::ProductList, 1), (QueueType::ProductDetail, 2)] {
        assert_eq!(
            guard
                .count_queue_items(queue_type, QueueStatus::Completed)
                .unwrap(),
            completed
        );
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Failed,
        ] {
            assert_eq!(guard.count_queue_items(queue_type, status).unwrap(), 0);
        }
    }

    // Terminal session state is stamped exactly once with counters persisted
    let session = guard.get_session(report.session_id).unwrap();
    assert_eq!(session.status, CrawlStatus::Completed);
    assert!(session.completed_at.is_some());
    assert_eq!(session.processed_items, report.processed_items);
}

#[tokio::test]
async fn failing_listing_item_retries_then_fails_terminally() {
    let server = MockServer::start().await;
    // Every category fetch is a server error
    Mock::given(method("GET"))
        .and(path(SEED_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let storage = shared_storage();
    let seed_url = format!("{}{}", server.uri(), SEED_PATH);
    let config = test_config(&server.uri(), &seed_url);

    // Seed the listing queue directly; the category stage is not under test
    let list_queue = CrawlQueue::new(Arc::clone(&storage), QueueType::ProductList);
    list_queue.push(&seed_url, 50, 2, None, None).unwrap();

    let runner = CrawlRunner::new(Arc::clone(&storage), config, tracing_sink());
    let report = runner.run(CrawlType::ProductList, false).await.unwrap();

    // The session completes; the item burned its attempts and failed terminally
    assert_eq!(report.status, CrawlStatus::Completed);
    assert_eq!(report.failed_items, 2);

    let guard = storage.lock().unwrap();
    assert_eq!(
        guard
            .count_queue_items(QueueType::ProductList, QueueStatus::Failed)
            .unwrap(),
        1
    );
    assert_eq!(
        guard
            .count_queue_items(QueueType::ProductList, QueueStatus::Pending)
            .unwrap(),
        0
    );

    let session = guard.get_session(report.session_id).unwrap();
    assert!(session.error_log.contains(&seed_url));
}
