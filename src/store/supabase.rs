use super::{JobStore, ListingStore, PriceHistoryStore, StoreError, UpsertOutcome};
use crate::config::SupabaseSettings;
use crate::models::{
    JobStatus, JobSummary, JobUpdate, ListingRecord, NewJob, Platform, PriceHistorySample,
    ScraperJob,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

/// PostgREST-backed store.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    base_url: String,
    service_key: String,
    http: Client,
}

impl SupabaseStore {
    pub fn new(http: Client, settings: &SupabaseSettings) -> Self {
        Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            service_key: settings.service_key.clone(),
            http,
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() || err.is_timeout() {
                    StoreError::Unavailable(err.to_string())
                } else {
                    StoreError::Request(err.to_string())
                }
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(status_error(status))
    }

    async fn first_row<T: DeserializeOwned>(response: Response) -> Result<Option<T>, StoreError> {
        let mut rows: Vec<T> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }
}

pub(crate) fn status_error(status: StatusCode) -> StoreError {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            StoreError::Unavailable(format!("HTTP {status}"))
        }
        _ => StoreError::Request(format!("HTTP {status}")),
    }
}

/// `ilike` pattern matching any product name containing `key`. PostgREST
/// reserves `*` and `,` inside filter values, so they are dropped.
fn clean_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '*' | ',' | '(' | ')'))
        .collect::<String>()
        .trim()
        .to_string()
}

pub(crate) fn contains_pattern(key: &str) -> String {
    format!("ilike.*{}*", clean_key(key))
}

pub(crate) fn price_history_query(
    product_key: &str,
    platform: Platform,
    cutoff: Option<DateTime<Utc>>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "product_name,platform,sold_price,sold_at".to_string()),
        ("product_name", contains_pattern(product_key)),
        ("platform", format!("eq.{}", platform.as_str())),
    ];
    if let Some(cutoff) = cutoff {
        query.push((
            "sold_at",
            format!("gte.{}", cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ));
    }
    query
}

#[derive(Serialize)]
struct JobPatch<'a> {
    status: JobStatus,
    listings_found: u32,
    opportunities_found: u32,
    summary: &'a JobSummary,
    error_message: Option<&'a str>,
    completed_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl ListingStore for SupabaseStore {
    async fn upsert_listing(&self, record: &ListingRecord) -> Result<UpsertOutcome, StoreError> {
        let request = self
            .http
            .post(self.table("listings"))
            .query(&[("on_conflict", "platform,external_id,owner_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[record]);
        let response = self.send(request).await?;
        debug!(
            target = "flipscout.store",
            external_id = %record.external_id,
            status = response.status().as_u16(),
            "supabase_listing_upserted"
        );
        Ok(if response.status() == StatusCode::CREATED {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }
}

#[async_trait]
impl JobStore for SupabaseStore {
    async fn create_job(&self, job: NewJob) -> Result<ScraperJob, StoreError> {
        let record = ScraperJob {
            id: Uuid::new_v4(),
            platform: job.platform,
            owner_id: job.owner_id,
            location: job.location,
            category: job.category,
            status: JobStatus::Running,
            listings_found: 0,
            opportunities_found: 0,
            summary: JobSummary::default(),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        let request = self
            .http
            .post(self.table("scraper_jobs"))
            .header("Prefer", "return=representation")
            .json(&[&record]);
        let response = self.send(request).await?;
        Ok(Self::first_row(response).await?.unwrap_or(record))
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<ScraperJob, StoreError> {
        let completed_at = (update.status != JobStatus::Running).then(Utc::now);
        let patch = JobPatch {
            status: update.status,
            listings_found: update.listings_found,
            opportunities_found: update.opportunities_found,
            summary: &update.summary,
            error_message: update.error_message.as_deref(),
            completed_at,
        };
        let request = self
            .http
            .patch(self.table("scraper_jobs"))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.send(request).await?;
        Self::first_row(response)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ScraperJob>, StoreError> {
        let request = self.http.get(self.table("scraper_jobs")).query(&[
            ("id", format!("eq.{id}")),
            ("select", "*".to_string()),
            ("limit", "1".to_string()),
        ]);
        let response = self.send(request).await?;
        Self::first_row(response).await
    }
}

#[async_trait]
impl PriceHistoryStore for SupabaseStore {
    async fn find_sold_prices(
        &self,
        product_key: &str,
        platform: Platform,
        max_age_days: Option<u32>,
    ) -> Result<Vec<PriceHistorySample>, StoreError> {
        // An empty pattern would match every row on the platform.
        if clean_key(product_key).is_empty() {
            return Ok(Vec::new());
        }
        let cutoff = max_age_days.map(|days| Utc::now() - Duration::days(i64::from(days)));
        let request = self
            .http
            .get(self.table("price_history"))
            .query(&price_history_query(product_key, platform, cutoff));
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn record_sale(&self, sample: PriceHistorySample) -> Result<(), StoreError> {
        if !sample.sold_price.is_finite() || sample.sold_price < 0.0 {
            return Err(StoreError::Request(format!(
                "sold_price must be >= 0, got {}",
                sample.sold_price
            )));
        }
        let request = self
            .http
            .post(self.table("price_history"))
            .header("Prefer", "return=minimal")
            .json(&json!([sample]));
        self.send(request).await?;
        Ok(())
    }
}
