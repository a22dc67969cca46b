use crate::models::{Confidence, Platform};
use crate::store::{PriceHistoryStore, StoreError};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Fewer samples than this, before or after outlier removal, yields no value.
pub const MIN_SAMPLES: usize = 3;

const IQR_FENCE: f64 = 1.5;
const HIGH_CONFIDENCE_MIN_SAMPLES: usize = 10;
const LOW_CONFIDENCE_MAX_SAMPLES: usize = 5;
const LOW_VARIATION_CV: f64 = 0.15;
const HIGH_VARIATION_CV: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlierReport {
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketValueResult {
    pub verified_market_value: f64,
    pub confidence: Confidence,
    pub data_points: usize,
    pub price_range: PriceRange,
    pub outliers: OutlierReport,
    pub data_source: String,
}

pub struct MarketValueCalculator {
    history: Arc<dyn PriceHistoryStore>,
}

impl MarketValueCalculator {
    pub fn new(history: Arc<dyn PriceHistoryStore>) -> Self {
        Self { history }
    }

    /// Verified value from stored sold prices. `Ok(None)` means there is not
    /// enough recent data, which is an expected outcome.
    pub async fn calculate(
        &self,
        product_key: &str,
        platform: Platform,
        max_age_days: Option<u32>,
    ) -> Result<Option<MarketValueResult>, StoreError> {
        if product_key.trim().is_empty() {
            return Ok(None);
        }
        let samples = self
            .history
            .find_sold_prices(product_key, platform, max_age_days)
            .await?;
        let cutoff = max_age_days.map(|days| Utc::now() - Duration::days(i64::from(days)));
        let prices: Vec<f64> = samples
            .iter()
            .filter(|sample| cutoff.is_none_or(|cutoff| sample.sold_at >= cutoff))
            .map(|sample| sample.sold_price)
            .collect();

        let result = summarize(&prices, &format!("price_history:{}", platform.as_str()));
        if result.is_none() {
            debug!(
                target = "flipscout.market",
                product = product_key,
                platform = %platform,
                samples = prices.len(),
                "market_value_insufficient_data"
            );
        }
        Ok(result)
    }
}

/// IQR-filtered summary of sold prices. Negative or non-finite prices are ignored.
pub fn summarize(prices: &[f64], data_source: &str) -> Option<MarketValueResult> {
    let mut sorted: Vec<f64> = prices
        .iter()
        .copied()
        .filter(|price| price.is_finite() && *price >= 0.0)
        .collect();
    if sorted.len() < MIN_SAMPLES {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - IQR_FENCE * iqr;
    let upper = q3 + IQR_FENCE * iqr;

    let kept: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|price| *price >= lower && *price <= upper)
        .collect();
    let removed = sorted.len() - kept.len();
    if kept.len() < MIN_SAMPLES {
        return None;
    }

    let median = median_of_sorted(&kept);
    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    let variance = kept.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / kept.len() as f64;
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

    let confidence = if kept.len() >= HIGH_CONFIDENCE_MIN_SAMPLES && cv <= LOW_VARIATION_CV {
        Confidence::High
    } else if kept.len() < LOW_CONFIDENCE_MAX_SAMPLES || cv > HIGH_VARIATION_CV {
        Confidence::Low
    } else {
        Confidence::Medium
    };

    Some(MarketValueResult {
        verified_market_value: round_cents(median),
        confidence,
        data_points: kept.len(),
        price_range: PriceRange {
            min: kept[0],
            max: kept[kept.len() - 1],
            median: round_cents(median),
            average: round_cents(mean),
        },
        outliers: OutlierReport { removed },
        data_source: data_source.to_string(),
    })
}

/// Percent by which `asking_price` sits below `market_value`. Negative when
/// the asking price is above market; 0 when there is no market value.
pub fn true_discount(market_value: f64, asking_price: f64) -> i32 {
    if market_value <= 0.0 || !market_value.is_finite() {
        return 0;
    }
    ((market_value - asking_price) / market_value * 100.0).round() as i32
}

/// Linear interpolation between closest ranks.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let pos = (sorted.len() - 1) as f64 * p;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceHistorySample;
    use crate::store::MemoryStore;

    const BASE: [f64; 9] = [300.0, 320.0, 330.0, 340.0, 350.0, 360.0, 370.0, 380.0, 400.0];

    async fn store_with(prices: &[f64], days_ago: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for price in prices {
            store
                .record_sale(PriceHistorySample {
                    product_name: "Apple iPhone 13 128GB".into(),
                    platform: Platform::Ebay,
                    sold_price: *price,
                    sold_at: Utc::now() - Duration::days(days_ago),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn blank_key_has_no_market_value() {
        let calc = MarketValueCalculator::new(store_with(&BASE, 1).await);
        assert!(calc.calculate("", Platform::Ebay, None).await.unwrap().is_none());
        assert!(calc.calculate("   ", Platform::Ebay, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nine_clean_samples_yield_median() {
        let calc = MarketValueCalculator::new(store_with(&BASE, 1).await);
        let result = calc
            .calculate("iphone 13", Platform::Ebay, None)
            .await
            .unwrap()
            .expect("enough data");
        assert_eq!(result.verified_market_value, 350.0);
        assert_eq!(result.data_points, 9);
        assert_eq!(result.outliers.removed, 0);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn extreme_prices_are_dropped() {
        let mut prices = BASE.to_vec();
        prices.extend([100.0, 800.0]);
        let calc = MarketValueCalculator::new(store_with(&prices, 1).await);
        let result = calc
            .calculate("iphone 13", Platform::Ebay, Some(30))
            .await
            .unwrap()
            .expect("enough data");
        assert_eq!(result.outliers.removed, 2);
        assert_eq!(result.data_points, 9);
        assert!(result.price_range.min >= 300.0);
        assert!(result.price_range.max <= 400.0);
        assert_eq!(result.verified_market_value, 350.0);
    }

    #[tokio::test]
    async fn stale_samples_do_not_count() {
        let calc = MarketValueCalculator::new(store_with(&BASE, 120).await);
        let result = calc
            .calculate("iphone 13", Platform::Ebay, Some(90))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn other_platform_has_no_data() {
        let calc = MarketValueCalculator::new(store_with(&BASE, 1).await);
        let result = calc
            .calculate("iphone 13", Platform::Mercari, None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn fewer_than_three_samples_is_no_result() {
        assert!(summarize(&[], "t").is_none());
        assert!(summarize(&[10.0], "t").is_none());
        assert!(summarize(&[10.0, 12.0], "t").is_none());
        assert!(summarize(&[10.0, 12.0, -5.0], "t").is_none());
    }

    #[test]
    fn collapsed_quartiles_keep_only_the_cluster() {
        let result = summarize(&[10.0, 100.0, 100.0, 100.0, 1000.0], "t").expect("three survive");
        assert_eq!(result.outliers.removed, 2);
        assert_eq!(result.data_points, 3);
        assert_eq!(result.verified_market_value, 100.0);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn tight_large_sample_is_high_confidence() {
        let prices: Vec<f64> = (0..12).map(|i| 100.0 + i as f64).collect();
        let result = summarize(&prices, "t").expect("data");
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.verified_market_value, 105.5);
    }

    #[test]
    fn few_samples_are_low_confidence() {
        let result = summarize(&[100.0, 110.0, 120.0, 130.0], "t").expect("data");
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn median_matches_filtered_set_for_generated_inputs() {
        let mut seed: u64 = 0x5eed;
        for round in 0..200 {
            let len = 3 + (round % 17);
            let prices: Vec<f64> = (0..len)
                .map(|_| {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    ((seed >> 33) % 1000) as f64
                })
                .collect();
            let Some(result) = summarize(&prices, "gen") else {
                continue;
            };
            let mut sorted = prices.clone();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let q1 = quantile(&sorted, 0.25);
            let q3 = quantile(&sorted, 0.75);
            let iqr = q3 - q1;
            let kept: Vec<f64> = sorted
                .into_iter()
                .filter(|p| *p >= q1 - 1.5 * iqr && *p <= q3 + 1.5 * iqr)
                .collect();
            assert_eq!(result.data_points, kept.len());
            assert_eq!(result.price_range.median, round_cents(median_of_sorted(&kept)));
            assert!(result.price_range.min <= result.price_range.median);
            assert!(result.price_range.median <= result.price_range.max);
        }
    }

    #[test]
    fn true_discount_properties() {
        assert_eq!(true_discount(800.0, 600.0), 25);
        for m in [1.0, 99.99, 350.0, 10_000.0] {
            assert_eq!(true_discount(m, m), 0);
        }
        for x in [0.0, 5.0, 1_000.0] {
            assert_eq!(true_discount(0.0, x), 0);
        }
        assert!(true_discount(100.0, 150.0) < 0);
    }
}
