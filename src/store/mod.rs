pub mod memory;
pub mod supabase;

use crate::models::{JobUpdate, ListingRecord, NewJob, Platform, PriceHistorySample, ScraperJob};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store itself cannot be reached. Fatal for a running job.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Idempotent on `(platform, external_id, owner_id)`.
    async fn upsert_listing(&self, record: &ListingRecord) -> Result<UpsertOutcome, StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: NewJob) -> Result<ScraperJob, StoreError>;
    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<ScraperJob, StoreError>;
    async fn get_job(&self, id: Uuid) -> Result<Option<ScraperJob>, StoreError>;
}

#[async_trait]
pub trait PriceHistoryStore: Send + Sync {
    /// Samples whose product name contains `product_key` (case-insensitive),
    /// optionally limited to the last `max_age_days`.
    async fn find_sold_prices(
        &self,
        product_key: &str,
        platform: Platform,
        max_age_days: Option<u32>,
    ) -> Result<Vec<PriceHistorySample>, StoreError>;

    async fn record_sale(&self, sample: PriceHistorySample) -> Result<(), StoreError>;
}
