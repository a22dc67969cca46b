use super::{AppToken, EbayApiError, EbayConfig, get_app_access_token};
use reqwest::{Client, header};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

const BUY_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope",
    "https://api.ebay.com/oauth/api_scope/buy.marketplace.insights",
];
const PAGE_LIMIT: &str = "50";

/// Sold and active price lookups against the Buy APIs.
pub struct EbayMarketClient {
    http: Client,
    config: EbayConfig,
    token: Mutex<Option<AppToken>>,
}

impl EbayMarketClient {
    pub fn new(http: Client, config: EbayConfig) -> Self {
        Self {
            http,
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, EbayApiError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|token| token.is_fresh()) {
            return Ok(token.access_token.clone());
        }
        let token = get_app_access_token(&self.http, &self.config, BUY_SCOPES).await?;
        let access = token.access_token.clone();
        *guard = Some(token);
        Ok(access)
    }

    /// Recently sold prices from Marketplace Insights.
    pub async fn sold_prices(&self, query: &str) -> Result<Vec<f64>, EbayApiError> {
        let url = format!(
            "{}/buy/marketplace_insights/v1_beta/item_sales/search",
            self.config.root()
        );
        let payload: ItemSalesResponse = self.get_json(&url, query).await?;
        let prices = sold_prices_from(&payload);
        debug!(target = "flipscout.ebay", query, count = prices.len(), "ebay_sold_prices");
        Ok(prices)
    }

    /// Current asking prices from the Browse API.
    pub async fn active_prices(&self, query: &str) -> Result<Vec<f64>, EbayApiError> {
        let url = format!("{}/buy/browse/v1/item_summary/search", self.config.root());
        let payload: ItemSummaryResponse = self.get_json(&url, query).await?;
        let prices = active_prices_from(&payload);
        debug!(target = "flipscout.ebay", query, count = prices.len(), "ebay_active_prices");
        Ok(prices)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &str,
    ) -> Result<T, EbayApiError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .query(&search_params(query))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header("X-EBAY-C-MARKETPLACE-ID", &self.config.marketplace_id)
            .send()
            .await
            .map_err(|err| EbayApiError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(EbayApiError::Status(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|err| EbayApiError::InvalidResponse(err.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSalesResponse {
    #[serde(default)]
    pub item_sales: Vec<ItemSale>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSale {
    #[serde(default)]
    pub last_sold_price: Option<Amount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummaryResponse {
    #[serde(default)]
    pub item_summaries: Vec<ItemSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ItemSummary {
    #[serde(default)]
    pub price: Option<Amount>,
}

/// eBay encodes amounts as decimal strings.
#[derive(Debug, Deserialize)]
pub struct Amount {
    pub value: String,
}

impl Amount {
    fn as_price(&self) -> Option<f64> {
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|price| price.is_finite() && *price >= 0.0)
    }
}

/// Keyword-only search; internal category keys are not eBay category ids.
fn search_params(query: &str) -> [(&'static str, &str); 2] {
    [("q", query), ("limit", PAGE_LIMIT)]
}

pub fn sold_prices_from(payload: &ItemSalesResponse) -> Vec<f64> {
    payload
        .item_sales
        .iter()
        .filter_map(|sale| sale.last_sold_price.as_ref()?.as_price())
        .collect()
}

pub fn active_prices_from(payload: &ItemSummaryResponse) -> Vec<f64> {
    payload
        .item_summaries
        .iter()
        .filter_map(|item| item.price.as_ref()?.as_price())
        .collect()
}
