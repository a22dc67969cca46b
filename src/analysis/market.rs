use super::{AnalysisStage, AnalysisUnavailable, MarketPriceSnapshot, MarketPriceSource, UnavailableReason};
use crate::ebay::{EbayApiError, EbayMarketClient};
use async_trait::async_trait;
use tracing::warn;

/// Sold prices from Marketplace Insights plus active asking prices from Browse.
pub struct EbayMarketSource {
    client: EbayMarketClient,
}

impl EbayMarketSource {
    pub fn new(client: EbayMarketClient) -> Self {
        Self { client }
    }
}

pub(crate) fn unavailable(err: &EbayApiError) -> AnalysisUnavailable {
    let reason = match err {
        EbayApiError::MissingCredentials => UnavailableReason::Disabled,
        EbayApiError::Status(429) => UnavailableReason::RateLimited,
        EbayApiError::InvalidResponse(_) => UnavailableReason::InvalidResponse,
        EbayApiError::Auth(_) | EbayApiError::Http(_) | EbayApiError::Status(_) => {
            UnavailableReason::Upstream
        }
    };
    AnalysisUnavailable::new(AnalysisStage::MarketPrice, reason, err.to_string())
}

#[async_trait]
impl MarketPriceSource for EbayMarketSource {
    async fn fetch_prices(
        &self,
        query: &str,
        _category: Option<&str>,
    ) -> Result<MarketPriceSnapshot, AnalysisUnavailable> {
        let sold = self
            .client
            .sold_prices(query)
            .await
            .map_err(|err| unavailable(&err))?;
        // Active prices are context for the sellability stage only.
        let active = match self.client.active_prices(query).await {
            Ok(prices) => prices,
            Err(err) => {
                warn!(target = "flipscout.analysis", query, error = %err, "active_prices_unavailable");
                Vec::new()
            }
        };
        Ok(MarketPriceSnapshot { sold, active })
    }
}
