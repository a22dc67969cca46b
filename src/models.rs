use crate::analysis::SellabilityResult;
use crate::estimate::{EstimationResult, ResaleDifficulty};
use crate::market_value::MarketValueResult;
use crate::normalize::MercariListing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    #[default]
    Ebay,
    Mercari,
    FacebookMarketplace,
    Craigslist,
    Offerup,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ebay => "EBAY",
            Platform::Mercari => "MERCARI",
            Platform::FacebookMarketplace => "FACEBOOK_MARKETPLACE",
            Platform::Craigslist => "CRAIGSLIST",
            Platform::Offerup => "OFFERUP",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "EBAY" => Some(Platform::Ebay),
            "MERCARI" => Some(Platform::Mercari),
            "FACEBOOK" | "FACEBOOK_MARKETPLACE" => Some(Platform::FacebookMarketplace),
            "CRAIGSLIST" => Some(Platform::Craigslist),
            "OFFERUP" => Some(Platform::Offerup),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerInfo {
    pub seller_name: String,
    pub seller_rating: Option<f64>,
    #[serde(default)]
    pub total_sales: u32,
    pub joined_date: Option<String>,
}

/// One scraped or fetched listing, consumed once per pipeline run.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListingItem {
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seller: Option<SellerInfo>,
    #[serde(default)]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub shipping_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistorySample {
    pub product_name: String,
    pub platform: Platform,
    pub sold_price: f64,
    pub sold_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Heuristic,
    Verified,
}

/// Fields written for a listing judged to be an opportunity.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub platform: Platform,
    pub external_id: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub asking_price: f64,
    pub url: Option<String>,
    pub image_urls: Vec<String>,
    pub location: Option<String>,
    pub category: String,
    pub condition: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub estimated_value: f64,
    pub estimated_low: f64,
    pub estimated_high: f64,
    pub profit_low: f64,
    pub profit_high: f64,
    pub value_score: u8,
    pub discount_percent: i32,
    pub resale_difficulty: ResaleDifficulty,
    pub tags: Vec<String>,
    pub comparable_urls: Vec<String>,
    pub decided_by: DecisionSource,
    pub sellability: Option<SellabilityResult>,
    pub market_value: Option<MarketValueResult>,
    pub updated_at: DateTime<Utc>,
}

impl ListingRecord {
    pub fn from_estimate(
        platform: Platform,
        owner_id: &str,
        item: &RawListingItem,
        category: &str,
        condition: &str,
        estimate: &EstimationResult,
    ) -> Self {
        Self {
            platform,
            external_id: item.external_id.clone(),
            owner_id: owner_id.to_string(),
            title: item.title.clone(),
            description: item.description.clone(),
            asking_price: item.price,
            url: item.url.clone(),
            image_urls: item.image_urls.clone(),
            location: item.location.clone(),
            category: category.to_string(),
            condition: condition.to_string(),
            posted_at: item.posted_at,
            estimated_value: estimate.estimated_value,
            estimated_low: estimate.estimated_low,
            estimated_high: estimate.estimated_high,
            profit_low: estimate.profit_low,
            profit_high: estimate.profit_high,
            value_score: estimate.value_score,
            discount_percent: estimate.discount_percent,
            resale_difficulty: estimate.resale_difficulty,
            tags: estimate.tags.clone(),
            comparable_urls: estimate
                .comparables
                .iter()
                .map(|link| link.url.clone())
                .collect(),
            decided_by: DecisionSource::Heuristic,
            sellability: None,
            market_value: None,
            updated_at: Utc::now(),
        }
    }

    /// Upsert identity.
    pub fn key(&self) -> (Platform, &str, &str) {
        (self.platform, &self.external_id, &self.owner_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub scraped: u32,
    pub analyzed: u32,
    pub skipped: u32,
    pub saved: u32,
    pub errors: u32,
}

impl JobSummary {
    pub fn summary_line(&self) -> String {
        format!(
            "{} scraped, {} analyzed, {} skipped, {} saved, {} errors",
            self.scraped, self.analyzed, self.skipped, self.saved, self.errors
        )
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperJob {
    pub id: Uuid,
    pub platform: Platform,
    pub owner_id: String,
    pub location: Option<String>,
    pub category: Option<String>,
    pub status: JobStatus,
    pub listings_found: u32,
    pub opportunities_found: u32,
    pub summary: JobSummary,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub platform: Platform,
    pub owner_id: String,
    pub location: Option<String>,
    pub category: Option<String>,
}

/// Terminal transition of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub listings_found: u32,
    pub opportunities_found: u32,
    pub summary: JobSummary,
    pub error_message: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub keywords: String,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    #[serde(default)]
    pub include_sold: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub listings: Option<Vec<RawListingItem>>,
    /// Scraped Mercari payloads, normalized before the scan.
    #[serde(default)]
    pub mercari_listings: Option<Vec<MercariListing>>,
    #[serde(default)]
    pub search: Option<SearchParams>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_loose_spellings() {
        assert_eq!(Platform::parse("ebay"), Some(Platform::Ebay));
        assert_eq!(Platform::parse("Facebook Marketplace"), Some(Platform::FacebookMarketplace));
        assert_eq!(Platform::parse("offer-up"), None);
        assert_eq!(Platform::Mercari.to_string(), "MERCARI");
    }

    #[test]
    fn raw_listing_accepts_minimal_payload() {
        let item: RawListingItem = serde_json::from_value(serde_json::json!({
            "external_id": "m-1",
            "title": "Nintendo Switch OLED",
            "price": 180.0
        }))
        .expect("minimal listing");
        assert!(item.description.is_empty());
        assert!(item.image_urls.is_empty());
        assert!(item.category.is_none());
    }

    #[test]
    fn summary_line_reads_naturally() {
        let summary = JobSummary {
            scraped: 10,
            analyzed: 4,
            skipped: 1,
            saved: 2,
            errors: 0,
        };
        assert_eq!(
            summary.summary_line(),
            "10 scraped, 4 analyzed, 1 skipped, 2 saved, 0 errors"
        );
    }
}
