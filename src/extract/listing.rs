//! Product listing extraction
//!
//! A "tile" is any listing element that carries a product deep-link with a
//! valid site product ID. Tiles are found by filtering anchors rather than
//! site-specific container classes, so layout changes rarely break discovery.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::resolve_link;

/// Trailing numeric product ID, at least 10 digits
static SITE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/(\d{10,})/?$").unwrap()
});

/// Sterling price anywhere in a text blob
static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"£(\d+\.?\d*)").unwrap()
});

/// Anchor texts that are navigation chrome, not product names
const NAME_BLACKLIST: &[&str] = &[
    "add to trolley",
    "view all",
    "shop now",
    "see more",
    "quick view",
];

/// One product tile parsed from a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ProductTile {
    pub site_id: String,
    pub name: String,
    pub url: String,
    pub price: Option<f64>,
    pub image_url: Option<String>,
}

/// Extracts the site product ID from a product URL
///
/// The ID is the trailing path segment and must be at least 10 digits.
pub fn site_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    SITE_ID_RE
        .captures(path)
        .map(|captures| captures[1].to_string())
}

/// Parses a sterling price out of arbitrary text: "now £1.48" -> 1.48
pub fn parse_price(text: &str) -> Option<f64> {
    PRICE_RE
        .captures(text)
        .and_then(|captures| captures[1].parse().ok())
}

/// Rewrites a listing URL to point at a given page number
pub fn with_page(url: &Url, page: u32) -> Url {
    let mut paged = url.clone();
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    paged.set_query(None);
    {
        let mut pairs = paged.query_pairs_mut();
        for (key, value) in &others {
            pairs.append_pair(key, value);
        }
        if page > 1 {
            pairs.append_pair("page", &page.to_string());
        }
    }
    if paged.query() == Some("") {
        paged.set_query(None);
    }
    paged
}

/// Finds all product tiles on a listing page
///
/// Every anchor whose resolved href carries a valid site ID counts as one
/// tile; duplicates by site ID collapse to the first occurrence. Anchors with
/// blacklisted or empty names are dropped.
pub fn product_tiles(document: &Html, base_url: &Url) -> Vec<ProductTile> {
    let mut tiles = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let Ok(anchor_selector) = Selector::parse("a[href]") else {
        return tiles;
    };

    for element in document.select(&anchor_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve_link(href, base_url) else {
            continue;
        };
        if !url.contains("/product/") {
            continue;
        }
        let Some(site_id) = site_id_from_url(&url) else {
            continue;
        };
        if !seen.insert(site_id.clone()) {
            continue;
        }

        let Some(name) = tile_name(&element) else {
            seen.remove(&site_id);
            continue;
        };

        let container = tile_container(&element);
        let price = container
            .as_ref()
            .and_then(|c| parse_price(&c.text().collect::<String>()));
        let image_url = container
            .as_ref()
            .and_then(|c| tile_image(c, base_url));

        tiles.push(ProductTile {
            site_id,
            name,
            url,
            price,
            image_url,
        });
    }

    tiles
}

/// Name from anchor text, falling back to the title attribute
fn tile_name(element: &ElementRef<'_>) -> Option<String> {
    let text = element.text().collect::<String>().trim().to_string();
    let name = if text.is_empty() {
        element.value().attr("title")?.trim().to_string()
    } else {
        text
    };

    if name.len() < 3 {
        return None;
    }
    let lower = name.to_lowercase();
    if NAME_BLACKLIST.iter().any(|b| lower == *b) {
        return None;
    }

    Some(name)
}

/// Climbs to the nearest ancestor likely to hold the whole tile
///
/// Two levels is enough for anchor-in-heading-in-card markup without
/// swallowing neighboring tiles.
fn tile_container<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    let mut current = *element;
    for _ in 0..2 {
        match current.parent().and_then(ElementRef::wrap) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Some(current)
}

fn tile_image(container: &ElementRef<'_>, base_url: &Url) -> Option<String> {
    let selector = Selector::parse("img[src]").ok()?;
    let img = container.select(&selector).next()?;
    resolve_link(img.value().attr("src")?, base_url)
}
