//! Category page extraction
//!
//! Discovers department/category links from navigation DOM, names categories
//! from a selector fallback chain (else the URL slug), and scores queue
//! priorities from level and name keywords.

use scraper::{Html, Selector};
use url::Url;

use super::resolve_link;

/// URL path segments that identify category-style pages
const CATEGORY_URL_PATTERNS: &[&str] = &["/dept/", "/cat/", "/aisle/"];

/// URL fragments that disqualify a link from category discovery
const DENY_URL_PATTERNS: &[&str] = &[
    "/product/",
    "/search",
    "/login",
    "/register",
    "/basket",
    "/checkout",
    "/account",
    "/help",
    "/customer-service",
    "javascript:",
    ".pdf",
];

/// Selector chain tried in order when naming a category from its page
const NAME_SELECTORS: &[&str] = &[
    "h1[data-testid='category-heading']",
    "h1.category-title",
    ".breadcrumb li:last-child",
    "h1",
];

/// A discovered category link
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryLink {
    pub name: String,
    pub url: String,
}

/// Whether a URL looks like a category page
///
/// The path must contain one of the allow-list segments and none of the
/// deny-list fragments.
pub fn is_category_url(url: &str) -> bool {
    let lower = url.to_lowercase();

    if DENY_URL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    if lower.contains('#') {
        return false;
    }

    CATEGORY_URL_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Extracts a display name for the current category page
///
/// Tries each selector in the fallback chain; when none matches, callers
/// should fall back to [`name_from_slug`].
pub fn extract_category_name(document: &Html) -> Option<String> {
    for selector_str in NAME_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Derives a readable name from the last URL path segment
///
/// Trailing numeric ID segments are skipped, hyphens become spaces, and each
/// word is capitalized: `/dept/fresh-food-bakery/1215135760597` becomes
/// "Fresh Food Bakery".
pub fn name_from_slug(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);

    let slug = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| !segment.chars().all(|c| c.is_ascii_digit()))
        .next_back()
        .unwrap_or("");

    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Discovers category links in a page
///
/// Scans every anchor, resolves it against the base URL, and keeps those
/// passing [`is_category_url`]. Link text names the category, else the slug.
/// Duplicate URLs are collapsed, keeping the first occurrence.
pub fn category_links(document: &Html, base_url: &Url) -> Vec<CategoryLink> {
    let mut links = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let Ok(anchor_selector) = Selector::parse("a[href]") else {
        return links;
    };

    for element in document.select(&anchor_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve_link(href, base_url) else {
            continue;
        };
        if !is_category_url(&url) || !seen.insert(url.clone()) {
            continue;
        }

        let text = element.text().collect::<String>().trim().to_string();
        let name = if text.is_empty() {
            name_from_slug(&url)
        } else {
            text
        };
        if name.is_empty() {
            continue;
        }

        links.push(CategoryLink { name, url });
    }

    links
}

/// Queue priority for a category: base 50 plus level and keyword bonuses
///
/// Level 0 is the most urgent tier. Fresh produce outranks offers, which
/// outrank meat/fish/dairy; keyword groups do not stack.
pub fn category_priority(level: u32, name: &str) -> i64 {
    let mut priority = 50;

    priority += match level {
        0 => 30,
        1 => 20,
        _ => 10,
    };

    let name_lower = name.to_lowercase();
    if ["fresh", "fruit", "veg"].iter().any(|k| name_lower.contains(k)) {
        priority += 20;
    } else if ["offer", "deal", "save"].iter().any(|k| name_lower.contains(k)) {
        priority += 15;
    } else if ["meat", "fish", "dairy"].iter().any(|k| name_lower.contains(k)) {
        priority += 10;
    }

    priority
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://groceries.example.com/").unwrap()
    }

    #[test]
    fn test_is_category_url() {
        assert!(is_category_url("https://x.com/dept/fresh-food/1215660378320"));
        assert!(is_category_url("https://x.com/cat/fruit/91234"));
        assert!(is_category_url("https://x.com/aisle/bananas/9999"));

        assert!(!is_category_url("https://x.com/product/bananas/1000000001"));
        assert!(!is_category_url("https://x.com/search?q=milk"));
        assert!(!is_category_url("https://x.com/login"));
        assert!(!is_category_url("https://x.com/checkout"));
        assert!(!is_category_url("https://x.com/dept/fresh#top"));
        assert!(!is_category_url("https://x.com/dept/leaflet.pdf"));
        assert!(!is_category_url("https://x.com/about-us"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        // Contains /cat/ but is a product deep-link
        assert!(!is_category_url("https://x.com/cat/fruit/product/123456789012"));
    }

    #[test]
    fn test_name_from_slug() {
        assert_eq!(
            name_from_slug("https://x.com/dept/fresh-food-bakery/1215135760597"),
            "Fresh Food Bakery"
        );
        assert_eq!(name_from_slug("https://x.com/cat/fruit"), "Fruit");
        assert_eq!(
            name_from_slug("https://x.com/cat/fruit?page=2"),
            "Fruit"
        );
    }

    #[test]
    fn test_extract_category_name_fallback_chain() {
        let html = Html::parse_document(
            r#"<html><body><h1 data-testid="category-heading">Fresh Fruit</h1>
               <h1>Other Heading</h1></body></html>"#,
        );
        assert_eq!(
            extract_category_name(&html),
            Some("Fresh Fruit".to_string())
        );

        let html = Html::parse_document(r#"<html><body><h1>Plain Heading</h1></body></html>"#);
        assert_eq!(
            extract_category_name(&html),
            Some("Plain Heading".to_string())
        );

        let html = Html::parse_document(r#"<html><body><p>nothing</p></body></html>"#);
        assert_eq!(extract_category_name(&html), None);
    }

    #[test]
    fn test_category_links_filters_and_dedups() {
        let html = Html::parse_document(
            r#"<html><body>
                <a href="/dept/fresh-food/1215660378320">Fresh Food</a>
                <a href="/dept/fresh-food/1215660378320">Fresh Food again</a>
                <a href="/product/bananas/1000000001">Bananas</a>
                <a href="/login">Sign in</a>
                <a href="/cat/fruit/91234"></a>
            </body></html>"#,
        );

        let links = category_links(&html, &base());
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].name, "Fresh Food");
        assert_eq!(
            links[0].url,
            "https://groceries.example.com/dept/fresh-food/1215660378320"
        );
        // Empty anchor text falls back to the slug
        assert_eq!(links[1].name, "Fruit");
    }

    #[test]
    fn test_category_priority_levels() {
        assert_eq!(category_priority(0, "Household"), 80);
        assert_eq!(category_priority(1, "Household"), 70);
        assert_eq!(category_priority(2, "Household"), 60);
        assert_eq!(category_priority(5, "Household"), 60);
    }

    #[test]
    fn test_category_priority_keywords() {
        assert_eq!(category_priority(0, "Fresh Fruit"), 100);
        assert_eq!(category_priority(0, "Special Offers"), 95);
        assert_eq!(category_priority(0, "Meat & Fish"), 90);
        // Keyword groups do not stack; fresh wins
        assert_eq!(category_priority(0, "Fresh Meat"), 100);
    }
}
