use super::{ListingSource, SourceError};
use crate::models::{RawListingItem, SearchParams};
use crate::normalize::normalize_condition;
use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use tracing::info;

pub const MERCARI_SEARCH_URL: &str = "https://api.mercari.com/v2/search";
const RESULT_LIMIT: &str = "100";

/// Keyword search against Mercari. Sold items are dropped.
pub struct MercariSearch {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    params: SearchParams,
}

impl MercariSearch {
    pub fn new(http: Client, api_key: Option<String>, params: SearchParams) -> Self {
        Self {
            http,
            base_url: MERCARI_SEARCH_URL.to_string(),
            api_key,
            params,
        }
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let params = &self.params;
        let mut query = vec![
            ("keyword", params.keywords.clone()),
            ("limit", RESULT_LIMIT.to_string()),
        ];
        if let Some(category) = params.category.as_deref().filter(|c| !c.is_empty()) {
            query.push(("category_id", category.to_string()));
        }
        if let Some(condition) = params.condition.as_deref().filter(|c| !c.is_empty()) {
            query.push(("condition", condition_code(condition)));
        }
        if let Some(min) = params.min_price {
            query.push(("price_min", min.to_string()));
        }
        if let Some(max) = params.max_price {
            query.push(("price_max", max.to_string()));
        }
        if !params.include_sold {
            query.push(("status", "on_sale".to_string()));
        }
        query
    }
}

/// Mercari condition ids; unknown labels pass through unchanged.
pub fn condition_code(condition: &str) -> String {
    match condition.to_lowercase().as_str() {
        "new" => "1".to_string(),
        "like_new" => "2".to_string(),
        "good" => "3".to_string(),
        "fair" => "4".to_string(),
        _ => condition.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub struct SearchItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub condition_description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl SearchItem {
    pub fn is_sold(&self) -> bool {
        self.status.as_deref() == Some("sold")
    }
}

pub fn listings_from(response: SearchResponse) -> Vec<RawListingItem> {
    response
        .items
        .into_iter()
        .filter(|item| !item.is_sold())
        .map(|item| RawListingItem {
            url: Some(format!("https://mercari.com/item/{}", item.id)),
            condition: item
                .condition_description
                .as_deref()
                .map(|label| normalize_condition(label).as_str().to_string()),
            external_id: item.id,
            title: item.name,
            description: String::new(),
            price: item.price,
            category: None,
            brand: None,
            location: None,
            image_urls: Vec::new(),
            posted_at: None,
            seller: None,
            shipping_cost: None,
            shipping_method: None,
        })
        .collect()
}

#[async_trait]
impl ListingSource for MercariSearch {
    fn name(&self) -> &'static str {
        "mercari"
    }

    async fn fetch(&self) -> Result<Vec<RawListingItem>, SourceError> {
        let mut request = self
            .http
            .get(&self.base_url)
            .query(&self.query_params())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| SourceError::Unreachable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }
        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|err| SourceError::InvalidPayload(err.to_string()))?;
        let total = payload.items.len();
        let listings = listings_from(payload);
        info!(
            target = "flipscout.mercari",
            keyword = %self.params.keywords,
            total,
            on_sale = listings.len(),
            "mercari_search_completed"
        );
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search(params: SearchParams) -> MercariSearch {
        MercariSearch::new(Client::new(), None, params)
    }

    #[test]
    fn query_includes_filters_and_on_sale_status() {
        let source = search(SearchParams {
            keywords: "nintendo switch".into(),
            category: Some("electronics".into()),
            condition: Some("LIKE_NEW".into()),
            min_price: Some(100.0),
            max_price: Some(300.0),
            include_sold: false,
        });
        let params = source.query_params();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("keyword"), Some("nintendo switch"));
        assert_eq!(get("limit"), Some("100"));
        assert_eq!(get("category_id"), Some("electronics"));
        assert_eq!(get("condition"), Some("2"));
        assert_eq!(get("price_min"), Some("100"));
        assert_eq!(get("price_max"), Some("300"));
        assert_eq!(get("status"), Some("on_sale"));
    }

    #[test]
    fn include_sold_drops_status_filter() {
        let source = search(SearchParams {
            keywords: "lego".into(),
            include_sold: true,
            ..Default::default()
        });
        assert!(source.query_params().iter().all(|(k, _)| *k != "status"));
        assert_eq!(condition_code("mint"), "mint");
    }

    #[test]
    fn sold_results_are_not_ingested() {
        let response: SearchResponse = serde_json::from_value(json!({
            "items": [
                {"id": "m1", "name": "Switch OLED", "price": 180.0,
                 "condition_description": "Like new", "status": "on_sale"},
                {"id": "m2", "name": "Switch Lite", "price": 90.0, "status": "sold"},
                {"id": "m3", "name": "Joy-Con pair", "price": 35.0}
            ]
        }))
        .unwrap();
        let listings = listings_from(response);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].url.as_deref(), Some("https://mercari.com/item/m1"));
        assert_eq!(listings[0].condition.as_deref(), Some("LIKE_NEW"));
        assert_eq!(listings[1].external_id, "m3");
        assert!(listings[1].condition.is_none());
    }
}
