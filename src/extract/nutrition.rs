//! Product detail and nutrition table extraction
//!
//! Nutrition containers vary a lot between product pages, so location uses a
//! selector fallback chain plus a keyword sanity check on the matched text.
//! Row values come through [`parse_nutrition_value`], which approximates
//! "less than" amounts as half the bound.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

use crate::storage::NutritionRecord;

/// "<0.5g" style bound
static LESS_THAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\s*(\d+\.?\d*)").unwrap()
});

/// First bare number in a value cell
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+\.?\d*)").unwrap()
});

/// "Per 100g" / "Per 30 g" in a table header
static SERVING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)per\s+(\d+\s*\w+)").unwrap()
});

/// Container selectors tried in order when locating the nutrition table
const CONTAINER_SELECTORS: &[&str] = &[
    "[data-testid='nutrition-table']",
    "table.nutrition",
    "div.nutrition-table",
    "section.nutrition",
    "table",
];

/// Words that confirm a candidate container really holds nutrition data
const NUTRITION_KEYWORDS: &[&str] = &["nutrition", "energy", "kcal", "typical values"];

/// Page markers meaning the product is gone from sale
const UNAVAILABLE_MARKERS: &[&str] = &[
    "currently unavailable",
    "out of stock",
    "no longer available",
    "item is unavailable",
];

/// Parsed nutrition table before it is attached to a product
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NutritionFacts {
    pub energy_kj: Option<f64>,
    pub energy_kcal: Option<f64>,
    pub fat: Option<f64>,
    pub saturated_fat: Option<f64>,
    pub carbohydrates: Option<f64>,
    pub sugars: Option<f64>,
    pub fibre: Option<f64>,
    pub protein: Option<f64>,
    pub salt: Option<f64>,
    pub serving_size: Option<String>,
    /// Nutrients without a canonical column, keyed by their raw name
    pub other: BTreeMap<String, f64>,
}

impl NutritionFacts {
    /// Whether any value at all was extracted
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Converts to a storage row for the given product
    pub fn into_record(self, product_id: i64) -> NutritionRecord {
        let other_nutrients = if self.other.is_empty() {
            None
        } else {
            serde_json::to_string(&self.other).ok()
        };

        NutritionRecord {
            product_id,
            energy_kj: self.energy_kj,
            energy_kcal: self.energy_kcal,
            fat: self.fat,
            saturated_fat: self.saturated_fat,
            carbohydrates: self.carbohydrates,
            sugars: self.sugars,
            fibre: self.fibre,
            protein: self.protein,
            salt: self.salt,
            serving_size: self.serving_size,
            other_nutrients,
        }
    }
}

/// Free-text fields from a product detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductDetails {
    pub description: Option<String>,
    pub ingredients: Option<String>,
    pub storage: Option<String>,
}

/// Parses one nutrition value cell
///
/// `"<0.5g"` approximates to `0.25`; `"1.8g"` to `1.8`; `"131"` to `131.0`;
/// text without a number yields `None`.
pub fn parse_nutrition_value(text: &str) -> Option<f64> {
    let text = text.trim();

    if text.starts_with('<') {
        if let Some(captures) = LESS_THAN_RE.captures(text) {
            let bound: f64 = captures[1].parse().ok()?;
            return Some(bound / 2.0);
        }
    }

    NUMBER_RE
        .captures(text)
        .and_then(|captures| captures[1].parse().ok())
}

/// Pulls a serving size like "100g" out of header text such as "Per 100g"
pub fn parse_serving_size(text: &str) -> Option<String> {
    SERVING_RE
        .captures(text)
        .map(|captures| captures[1].trim().to_string())
}

/// Whether the page signals the product is unavailable
pub fn is_unavailable(document: &Html) -> bool {
    if let Ok(selector) = Selector::parse("[data-testid='product-unavailable-message']") {
        if document.select(&selector).next().is_some() {
            return true;
        }
    }

    let text = document
        .root_element()
        .text()
        .collect::<String>()
        .to_lowercase();
    UNAVAILABLE_MARKERS.iter().any(|m| text.contains(m))
}

/// Extracts description, ingredients and storage from a detail page
pub fn extract_product_details(document: &Html) -> ProductDetails {
    ProductDetails {
        description: select_text(document, "[data-testid='product-description']"),
        ingredients: select_text(document, "[data-testid='product-ingredients']"),
        storage: select_text(document, "[data-testid='product-storage']"),
    }
}

fn select_text(document: &Html, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Extracts the nutrition table from a product detail page
///
/// Returns `None` when no plausible container exists or it yields no values.
pub fn extract_nutrition(document: &Html) -> Option<NutritionFacts> {
    let container = find_container(document)?;
    let mut facts = NutritionFacts::default();

    let row_selector = Selector::parse("tr, .nutrition-row").ok()?;
    let cell_selector = Selector::parse("td, th, .nutrition-cell").ok()?;

    for row in container.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() < 2 {
            continue;
        }

        let name = cells[0].clone();
        if name.is_empty() {
            continue;
        }

        if facts.serving_size.is_none() {
            if let Some(serving) = parse_serving_size(&cells[1]) {
                facts.serving_size = Some(serving);
                continue;
            }
        }

        let Some(value) = parse_nutrition_value(&cells[1]) else {
            continue;
        };
        assign_nutrient(&mut facts, &name, value);
    }

    if facts.is_empty() {
        None
    } else {
        Some(facts)
    }
}

/// Finds the first container that matches a selector and nutrition keywords
fn find_container(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in CONTAINER_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for candidate in document.select(&selector) {
            let text = candidate.text().collect::<String>().to_lowercase();
            if NUTRITION_KEYWORDS.iter().any(|k| text.contains(k)) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Routes a raw nutrient name to its canonical field, else `other`
///
/// Names are lowercased and any "of which " prefix is stripped before lookup,
/// so "of which saturates" and "Saturated Fat" land in the same column.
fn assign_nutrient(facts: &mut NutritionFacts, raw_name: &str, value: f64) {
    let clean = raw_name.to_lowercase();
    let clean = clean.strip_prefix("of which ").unwrap_or(&clean);

    let slot = match clean {
        "energy kj" | "energy (kj)" => &mut facts.energy_kj,
        "energy kcal" | "energy (kcal)" | "calories" => &mut facts.energy_kcal,
        "fat" | "total fat" => &mut facts.fat,
        "saturates" | "saturated fat" => &mut facts.saturated_fat,
        "carbohydrate" | "carbohydrates" => &mut facts.carbohydrates,
        "sugars" | "sugar" => &mut facts.sugars,
        "fibre" | "fiber" => &mut facts.fibre,
        "protein" => &mut facts.protein,
        "salt" => &mut facts.salt,
        _ => {
            facts.other.insert(raw_name.to_string(), value);
            return;
        }
    };

    if slot.is_none() {
        *slot = Some(value);
    }
}
