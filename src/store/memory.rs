use super::{JobStore, ListingStore, PriceHistoryStore, StoreError, UpsertOutcome};
use crate::models::{
    JobStatus, JobSummary, JobUpdate, ListingRecord, NewJob, Platform, PriceHistorySample,
    ScraperJob,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

type ListingKey = (Platform, String, String);

/// Process-local store backing the service when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    listings: Mutex<HashMap<ListingKey, ListingRecord>>,
    jobs: Mutex<HashMap<Uuid, ScraperJob>>,
    history: Mutex<Vec<PriceHistorySample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn listing_count(&self) -> usize {
        self.listings.lock().await.len()
    }

    pub async fn listing(
        &self,
        platform: Platform,
        external_id: &str,
        owner_id: &str,
    ) -> Option<ListingRecord> {
        self.listings
            .lock()
            .await
            .get(&(platform, external_id.to_string(), owner_id.to_string()))
            .cloned()
    }

    pub async fn jobs(&self) -> Vec<ScraperJob> {
        self.jobs.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn upsert_listing(&self, record: &ListingRecord) -> Result<UpsertOutcome, StoreError> {
        let (platform, external_id, owner_id) = record.key();
        let key = (platform, external_id.to_string(), owner_id.to_string());
        let previous = self.listings.lock().await.insert(key, record.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }
}

#[async_trait]
impl JobStore for MemoryStore {
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
        self.jobs.lock().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<ScraperJob, StoreError> {
        let mut guard = self.jobs.lock().await;
        let job = guard
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.status = update.status;
        job.listings_found = update.listings_found;
        job.opportunities_found = update.opportunities_found;
        job.summary = update.summary;
        job.error_message = update.error_message;
        if update.status != JobStatus::Running {
            job.completed_at = Some(Utc::now());
        }
        Ok(job.clone())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ScraperJob>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }
}

#[async_trait]
impl PriceHistoryStore for MemoryStore {
    async fn find_sold_prices(
        &self,
        product_key: &str,
        platform: Platform,
        max_age_days: Option<u32>,
    ) -> Result<Vec<PriceHistorySample>, StoreError> {
        let needle = product_key.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let cutoff = max_age_days.map(|days| Utc::now() - Duration::days(i64::from(days)));
        let guard = self.history.lock().await;
        Ok(guard
            .iter()
            .filter(|sample| sample.platform == platform)
            .filter(|sample| sample.product_name.to_lowercase().contains(&needle))
            .filter(|sample| cutoff.is_none_or(|cutoff| sample.sold_at >= cutoff))
            .cloned()
            .collect())
    }

    async fn record_sale(&self, sample: PriceHistorySample) -> Result<(), StoreError> {
        if !sample.sold_price.is_finite() || sample.sold_price < 0.0 {
            return Err(StoreError::Request(format!(
                "sold_price must be >= 0, got {}",
                sample.sold_price
            )));
        }
        self.history.lock().await.push(sample);
        Ok(())
    }
}
