//! HTML extraction for category, listing and product detail pages
//!
//! All functions here are pure: they take parsed HTML plus a base URL and
//! return structured data. Failures at the level of a single element are
//! expressed as `None`/skipped entries, never as errors, so one bad tile
//! cannot sink a whole page.

mod category;
mod listing;
mod nutrition;

pub use category::{
    category_links, category_priority, extract_category_name, is_category_url, name_from_slug,
    CategoryLink,
};
pub use listing::{
    parse_price, product_tiles, site_id_from_url, with_page, ProductTile,
};
pub use nutrition::{
    extract_nutrition, extract_product_details, is_unavailable, parse_nutrition_value,
    parse_serving_size, NutritionFacts, ProductDetails,
};

use url::Url;

/// Resolves an href to an absolute HTTP(S) URL
///
/// Returns None for empty hrefs, fragment-only anchors, special schemes
/// (javascript:, mailto:, tel:, data:) and anything that fails to resolve.
pub(crate) fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) => {
            if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
                Some(absolute_url.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://groceries.example.com/cat/fruit").unwrap()
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve_link("/dept/fresh", &base()),
            Some("https://groceries.example.com/dept/fresh".to_string())
        );
    }

    #[test]
    fn test_resolve_skips_special_schemes() {
        assert_eq!(resolve_link("javascript:void(0)", &base()), None);
        assert_eq!(resolve_link("mailto:a@b.c", &base()), None);
        assert_eq!(resolve_link("#reviews", &base()), None);
        assert_eq!(resolve_link("", &base()), None);
    }
}
