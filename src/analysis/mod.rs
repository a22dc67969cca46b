//! Externally verified analysis of a single listing.
//!
//! Four stages run in order and each can end the analysis early:
//! identify the item, fetch market prices, a local quick-discount check, and
//! the full sellability assessment. Every external call goes through the
//! shared [`TtlCache`]s and the [`RateLimiter`] and is bounded by a timeout.
//! Failures surface as [`AnalysisUnavailable`] so the caller can fall back to
//! the heuristic estimate.

pub mod identify;
pub mod market;
pub mod sellability;

pub use identify::LlmIdentifier;
pub use market::EbayMarketSource;
pub use sellability::LlmSellabilityAnalyzer;

use crate::cache::TtlCache;
use crate::config::Thresholds;
use crate::llm::LlmError;
use crate::market_value::{summarize, true_discount};
use crate::models::{Confidence, RawListingItem};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, sync::Arc};
use thiserror::Error;
use tokio::time::{Duration, timeout};
use tracing::debug;

/// Network identity used when the pipeline itself calls external services.
pub const PIPELINE_IDENTITY: &str = "pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Identify,
    MarketPrice,
    Sellability,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Identify => "identify",
            AnalysisStage::MarketPrice => "market_price",
            AnalysisStage::Sellability => "sellability",
        }
    }

    /// Rate limiter bucket for calls made by this stage.
    pub fn endpoint(&self) -> &'static str {
        match self {
            AnalysisStage::Identify => "/external/identify",
            AnalysisStage::MarketPrice => "/external/market",
            AnalysisStage::Sellability => "/external/sellability",
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    Timeout,
    RateLimited,
    Upstream,
    InvalidResponse,
    Disabled,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::Timeout => "timeout",
            UnavailableReason::RateLimited => "rate_limited",
            UnavailableReason::Upstream => "upstream",
            UnavailableReason::InvalidResponse => "invalid_response",
            UnavailableReason::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{stage} unavailable ({}): {detail}", .reason.as_str())]
pub struct AnalysisUnavailable {
    pub stage: AnalysisStage,
    pub reason: UnavailableReason,
    pub detail: String,
}

impl AnalysisUnavailable {
    pub fn new(stage: AnalysisStage, reason: UnavailableReason, detail: impl Into<String>) -> Self {
        Self {
            stage,
            reason,
            detail: detail.into(),
        }
    }

    pub fn from_llm(stage: AnalysisStage, err: &LlmError) -> Self {
        let reason = match err {
            LlmError::MissingGateway => UnavailableReason::Disabled,
            LlmError::Status(429) => UnavailableReason::RateLimited,
            LlmError::Http(_) | LlmError::Status(_) => UnavailableReason::Upstream,
            LlmError::InvalidResponse(_) => UnavailableReason::InvalidResponse,
        };
        Self::new(stage, reason, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationResult {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub worth_investigating: bool,
    pub search_query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Identified(IdentificationResult),
    NotWorthInvestigating,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MarketPriceSnapshot {
    pub sold: Vec<f64>,
    pub active: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarketPrices {
    Found(MarketPriceSnapshot),
    NoMarketData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellabilityResult {
    pub verified_market_value: f64,
    pub true_discount_percent: i32,
    pub sellability_score: u8,
    pub demand_level: DemandLevel,
    pub expected_days_to_sell: u32,
    pub authenticity_risk: RiskLevel,
    pub recommended_offer_price: f64,
    pub recommended_list_price: f64,
    pub resale_strategy: String,
    pub confidence: Confidence,
    pub meets_threshold: bool,
}

/// Final verdict of a completed analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Verified(SellabilityResult),
    NotWorthInvestigating,
    NoMarketData,
    DiscountTooSmall { estimated_discount: i32 },
}

#[derive(Debug, Clone, Copy)]
pub struct IdentifyRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub asking_price: f64,
    pub detected_category: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct SellabilityRequest<'a> {
    pub title: &'a str,
    pub asking_price: f64,
    pub identification: &'a IdentificationResult,
    pub market: &'a MarketPriceSnapshot,
    pub market_signal: f64,
}

#[async_trait]
pub trait ItemIdentifier: Send + Sync {
    /// `Ok(None)` means the identifier could not recognise the item.
    async fn identify(
        &self,
        request: &IdentifyRequest<'_>,
    ) -> Result<Option<IdentificationResult>, AnalysisUnavailable>;
}

#[async_trait]
pub trait MarketPriceSource: Send + Sync {
    async fn fetch_prices(
        &self,
        query: &str,
        category: Option<&str>,
    ) -> Result<MarketPriceSnapshot, AnalysisUnavailable>;
}

#[async_trait]
pub trait SellabilityAnalyzer: Send + Sync {
    async fn assess(
        &self,
        request: &SellabilityRequest<'_>,
    ) -> Result<SellabilityResult, AnalysisUnavailable>;
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerSettings {
    pub timeout: Duration,
    pub quick_discount_min_pct: f64,
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
}

impl AnalyzerSettings {
    pub fn new(thresholds: &Thresholds, timeout: Duration, cache_max_entries: usize, cache_ttl: Duration) -> Self {
        Self {
            timeout,
            quick_discount_min_pct: thresholds.quick_discount_min_pct,
            cache_max_entries,
            cache_ttl,
        }
    }
}

pub struct Analyzer {
    identifier: Arc<dyn ItemIdentifier>,
    market: Arc<dyn MarketPriceSource>,
    sellability: Arc<dyn SellabilityAnalyzer>,
    limiter: Arc<RateLimiter>,
    identify_cache: TtlCache<String, Option<IdentificationResult>>,
    market_cache: TtlCache<String, MarketPriceSnapshot>,
    sellability_cache: TtlCache<String, SellabilityResult>,
    settings: AnalyzerSettings,
}

impl Analyzer {
    pub fn new(
        identifier: Arc<dyn ItemIdentifier>,
        market: Arc<dyn MarketPriceSource>,
        sellability: Arc<dyn SellabilityAnalyzer>,
        limiter: Arc<RateLimiter>,
        settings: AnalyzerSettings,
    ) -> Self {
        let (max_entries, ttl) = (settings.cache_max_entries, settings.cache_ttl);
        Self {
            identifier,
            market,
            sellability,
            limiter,
            identify_cache: TtlCache::new(max_entries, ttl),
            market_cache: TtlCache::new(max_entries, ttl),
            sellability_cache: TtlCache::new(max_entries, ttl),
            settings,
        }
    }

    pub async fn analyze(
        &self,
        item: &RawListingItem,
        detected_category: &str,
        owner_id: &str,
    ) -> Result<AnalysisOutcome, AnalysisUnavailable> {
        let identification = match self.identify(item, detected_category, owner_id).await? {
            Identification::Identified(found) => found,
            Identification::NotWorthInvestigating => {
                return Ok(AnalysisOutcome::NotWorthInvestigating);
            }
        };

        let snapshot = match self.market_prices(&identification, owner_id).await? {
            MarketPrices::Found(snapshot) => snapshot,
            MarketPrices::NoMarketData => return Ok(AnalysisOutcome::NoMarketData),
        };

        let Some(signal) = market_signal(&snapshot.sold) else {
            return Ok(AnalysisOutcome::NoMarketData);
        };
        if !passes_quick_check(item.price, signal, self.settings.quick_discount_min_pct) {
            let estimated_discount = true_discount(signal, item.price);
            debug!(
                target = "flipscout.analysis",
                external_id = %item.external_id,
                market_signal = signal,
                estimated_discount,
                "quick_discount_check_failed"
            );
            return Ok(AnalysisOutcome::DiscountTooSmall { estimated_discount });
        }

        let request = SellabilityRequest {
            title: &item.title,
            asking_price: item.price,
            identification: &identification,
            market: &snapshot,
            market_signal: signal,
        };
        let key = format!("{}|{:.2}", identification.search_query.to_lowercase(), item.price);
        let mut result = self
            .sellability_cache
            .get_or_try_insert_with(key, || {
                self.guarded(AnalysisStage::Sellability, owner_id, self.sellability.assess(&request))
            })
            .await?;
        result.true_discount_percent = true_discount(result.verified_market_value, item.price);
        Ok(AnalysisOutcome::Verified(result))
    }

    async fn identify(
        &self,
        item: &RawListingItem,
        detected_category: &str,
        owner_id: &str,
    ) -> Result<Identification, AnalysisUnavailable> {
        let request = IdentifyRequest {
            title: &item.title,
            description: &item.description,
            asking_price: item.price,
            detected_category,
        };
        let key = format!(
            "{}|{:.2}|{}",
            item.title.trim().to_lowercase(),
            item.price,
            detected_category
        );
        let found = self
            .identify_cache
            .get_or_try_insert_with(key, || {
                self.guarded(AnalysisStage::Identify, owner_id, self.identifier.identify(&request))
            })
            .await?;
        Ok(match found {
            Some(result) if result.worth_investigating && !result.search_query.trim().is_empty() => {
                Identification::Identified(result)
            }
            _ => Identification::NotWorthInvestigating,
        })
    }

    async fn market_prices(
        &self,
        identification: &IdentificationResult,
        owner_id: &str,
    ) -> Result<MarketPrices, AnalysisUnavailable> {
        let query = identification.search_query.trim();
        let category = identification.category.as_deref();
        let key = format!("{}|{}", query.to_lowercase(), category.unwrap_or(""));
        let snapshot = self
            .market_cache
            .get_or_try_insert_with(key, || {
                self.guarded(
                    AnalysisStage::MarketPrice,
                    owner_id,
                    self.market.fetch_prices(query, category),
                )
            })
            .await?;
        Ok(if snapshot.sold.is_empty() {
            MarketPrices::NoMarketData
        } else {
            MarketPrices::Found(snapshot)
        })
    }

    /// Admission through the limiter, then the call under a timeout.
    async fn guarded<T, Fut>(
        &self,
        stage: AnalysisStage,
        owner_id: &str,
        call: Fut,
    ) -> Result<T, AnalysisUnavailable>
    where
        Fut: Future<Output = Result<T, AnalysisUnavailable>>,
    {
        let decision = self
            .limiter
            .check(PIPELINE_IDENTITY, stage.endpoint(), Some(owner_id))
            .await;
        if !decision.allowed {
            return Err(AnalysisUnavailable::new(
                stage,
                UnavailableReason::RateLimited,
                format!("retry in {}s", decision.retry_after().as_secs()),
            ));
        }
        match timeout(self.settings.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisUnavailable::new(
                stage,
                UnavailableReason::Timeout,
                format!("no reply within {}s", self.settings.timeout.as_secs()),
            )),
        }
    }
}

/// Representative sold price: the outlier-filtered median when there is
/// enough data, else the plain median.
pub fn market_signal(sold: &[f64]) -> Option<f64> {
    if let Some(summary) = summarize(sold, "external") {
        return Some(summary.verified_market_value);
    }
    let mut prices: Vec<f64> = sold
        .iter()
        .copied()
        .filter(|price| price.is_finite() && *price > 0.0)
        .collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort_by(|a, b| a.total_cmp(b));
    let mid = prices.len() / 2;
    Some(if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    })
}

pub fn passes_quick_check(asking_price: f64, market_signal: f64, min_discount_pct: f64) -> bool {
    market_signal > 0.0 && asking_price <= market_signal * (1.0 - min_discount_pct / 100.0)
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct FakeIdentifier {
        pub result: Option<IdentificationResult>,
        pub calls: AtomicUsize,
    }

    impl FakeIdentifier {
        pub fn worth(query: &str) -> Self {
            Self {
                result: Some(IdentificationResult {
                    brand: Some("Nintendo".into()),
                    model: Some("Switch OLED".into()),
                    variant: None,
                    condition: Some("good".into()),
                    category: Some("video_games".into()),
                    worth_investigating: true,
                    search_query: query.into(),
                }),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ItemIdentifier for FakeIdentifier {
        async fn identify(
            &self,
            _request: &IdentifyRequest<'_>,
        ) -> Result<Option<IdentificationResult>, AnalysisUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    pub struct FakeMarket {
        pub sold: Vec<f64>,
        pub fail: bool,
        pub delay: Option<Duration>,
        pub calls: AtomicUsize,
    }

    impl FakeMarket {
        pub fn sold(prices: &[f64]) -> Self {
            Self {
                sold: prices.to_vec(),
                fail: false,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketPriceSource for FakeMarket {
        async fn fetch_prices(
            &self,
            _query: &str,
            _category: Option<&str>,
        ) -> Result<MarketPriceSnapshot, AnalysisUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(AnalysisUnavailable::new(
                    AnalysisStage::MarketPrice,
                    UnavailableReason::Upstream,
                    "HTTP 503",
                ));
            }
            Ok(MarketPriceSnapshot {
                sold: self.sold.clone(),
                active: Vec::new(),
            })
        }
    }

    pub struct FakeSellability {
        pub meets_threshold: bool,
        pub calls: AtomicUsize,
    }

    impl FakeSellability {
        pub fn new(meets_threshold: bool) -> Self {
            Self {
                meets_threshold,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SellabilityAnalyzer for FakeSellability {
        async fn assess(
            &self,
            request: &SellabilityRequest<'_>,
        ) -> Result<SellabilityResult, AnalysisUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SellabilityResult {
                verified_market_value: request.market_signal,
                true_discount_percent: 0,
                sellability_score: 82,
                demand_level: DemandLevel::High,
                expected_days_to_sell: 5,
                authenticity_risk: RiskLevel::Low,
                recommended_offer_price: request.asking_price * 0.9,
                recommended_list_price: request.market_signal,
                resale_strategy: "List at market on eBay".into(),
                confidence: Confidence::High,
                meets_threshold: self.meets_threshold,
            })
        }
    }
}
