use crate::models::{RawListingItem, SellerInfo};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardCondition {
    New,
    LikeNew,
    VeryGood,
    Good,
    Acceptable,
    Poor,
}

impl StandardCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StandardCondition::New => "NEW",
            StandardCondition::LikeNew => "LIKE_NEW",
            StandardCondition::VeryGood => "VERY_GOOD",
            StandardCondition::Good => "GOOD",
            StandardCondition::Acceptable => "ACCEPTABLE",
            StandardCondition::Poor => "POOR",
        }
    }
}

// Order matters: "like new" must win over "new", "very good" over "good".
static CONDITION_PATTERNS: Lazy<Vec<(Regex, StandardCondition)>> = Lazy::new(|| {
    [
        (r"\blike new\b", StandardCondition::LikeNew),
        (r"\bbrand new\b", StandardCondition::New),
        (r"\bnew\b", StandardCondition::New),
        (r"\bvery good\b", StandardCondition::VeryGood),
        (r"\bgood\b", StandardCondition::Good),
        (r"\bacceptable\b", StandardCondition::Acceptable),
        (r"\bpoor\b|\bhas flaws\b", StandardCondition::Poor),
    ]
    .into_iter()
    .filter_map(|(pattern, condition)| Regex::new(pattern).ok().map(|re| (re, condition)))
    .collect()
});

/// Maps free-text marketplace condition labels onto [`StandardCondition`],
/// defaulting to `Good`.
pub fn normalize_condition(raw: &str) -> StandardCondition {
    let lowered = raw.to_lowercase().replace(['_', '-'], " ");
    CONDITION_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(&lowered))
        .map(|(_, condition)| *condition)
        .unwrap_or(StandardCondition::Good)
}

pub const KNOWN_BRANDS: &[&str] = &[
    "Nike",
    "Adidas",
    "Apple",
    "Samsung",
    "Sony",
    "Nintendo",
    "Dyson",
    "Canon",
    "Bose",
    "Lego",
];

static BRAND_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    KNOWN_BRANDS
        .iter()
        .filter_map(|brand| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(brand)))
                .ok()
                .map(|re| (re, *brand))
        })
        .collect()
});

pub fn find_brand(text: &str) -> Option<&'static str> {
    BRAND_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, brand)| *brand)
}

/// Explicit brand first, then the title, then the description.
pub fn extract_brand(explicit: Option<&str>, title: &str, description: &str) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|brand| !brand.is_empty())
        .map(str::to_string)
        .or_else(|| find_brand(title).map(str::to_string))
        .or_else(|| find_brand(description).map(str::to_string))
}

/// Listing as returned by the Mercari item endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MercariListing {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub seller_username: Option<String>,
    #[serde(default)]
    pub seller_rating: Option<f64>,
    #[serde(default)]
    pub seller_total_sales: Option<u32>,
    #[serde(default)]
    pub seller_join_date: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

pub fn extract_seller_info(listing: &MercariListing) -> SellerInfo {
    SellerInfo {
        seller_name: listing
            .seller_username
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        seller_rating: listing.seller_rating,
        total_sales: listing.seller_total_sales.unwrap_or(0),
        joined_date: listing.seller_join_date.clone(),
    }
}

pub fn normalize_mercari_listing(listing: &MercariListing) -> RawListingItem {
    let title = listing.title.clone().unwrap_or_default();
    let description = listing.description.clone().unwrap_or_default();
    let condition = normalize_condition(listing.condition.as_deref().unwrap_or("Unknown"));
    RawListingItem {
        external_id: listing.id.clone().unwrap_or_default(),
        brand: extract_brand(listing.brand.as_deref(), &title, &description),
        title,
        description,
        price: listing.price.unwrap_or(0.0),
        category: Some(
            listing
                .category
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
        ),
        condition: Some(condition.as_str().to_string()),
        location: None,
        url: listing.listing_url.clone(),
        image_urls: listing.image_urls.clone(),
        posted_at: listing.created,
        seller: Some(extract_seller_info(listing)),
        shipping_cost: Some(listing.shipping_cost.unwrap_or(0.0)),
        shipping_method: Some(
            listing
                .shipping_method
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_labels_map_to_standard_values() {
        let cases = [
            ("Brand New", StandardCondition::New),
            ("New with tags", StandardCondition::New),
            ("Like New", StandardCondition::LikeNew),
            ("Very Good Condition", StandardCondition::VeryGood),
            ("Good", StandardCondition::Good),
            ("Acceptable", StandardCondition::Acceptable),
            ("Poor, Has Flaws", StandardCondition::Poor),
            ("LIKE_NEW", StandardCondition::LikeNew),
            ("very-good", StandardCondition::VeryGood),
            ("mystery", StandardCondition::Good),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_condition(input), expected, "{input}");
        }
    }

    #[test]
    fn brand_prefers_explicit_then_title_then_description() {
        assert_eq!(
            extract_brand(Some("Patagonia"), "Nike jacket", ""),
            Some("Patagonia".into())
        );
        assert_eq!(
            extract_brand(None, "Nike Air Max 90", "sony box"),
            Some("Nike".into())
        );
        assert_eq!(
            extract_brand(Some("  "), "running shoes", "came with a SONY remote"),
            Some("Sony".into())
        );
        assert_eq!(extract_brand(None, "pineapple slicer", ""), None);
    }

    #[test]
    fn seller_info_defaults() {
        let info = extract_seller_info(&MercariListing::default());
        assert_eq!(info.seller_name, "Unknown");
        assert_eq!(info.total_sales, 0);
        assert!(info.seller_rating.is_none());
    }

    #[test]
    fn normalizes_complete_listing() {
        let raw: MercariListing = serde_json::from_value(serde_json::json!({
            "id": "mercari_123456",
            "title": "Nike Air Max Running Shoes - Like New",
            "description": "Gently used Nike Air Max in excellent condition",
            "price": 79.99,
            "image_urls": ["https://example.com/shoe1.jpg", "https://example.com/shoe2.jpg"],
            "condition": "Like New",
            "seller_username": "shoe_seller",
            "seller_rating": 4.9,
            "seller_total_sales": 500,
            "seller_join_date": "2022-06-01",
            "category": "Shoes",
            "shipping_cost": 5.99,
            "shipping_method": "USPS Priority",
            "listing_url": "https://mercari.com/listing/123456"
        }))
        .expect("listing json");

        let item = normalize_mercari_listing(&raw);
        assert_eq!(item.external_id, "mercari_123456");
        assert_eq!(item.price, 79.99);
        assert_eq!(item.condition.as_deref(), Some("LIKE_NEW"));
        assert_eq!(item.brand.as_deref(), Some("Nike"));
        assert_eq!(item.category.as_deref(), Some("Shoes"));
        assert_eq!(item.image_urls.len(), 2);
        assert_eq!(item.seller.as_ref().map(|s| s.total_sales), Some(500));
        assert_eq!(item.shipping_method.as_deref(), Some("USPS Priority"));
    }
}
