pub mod mercari;

pub use mercari::MercariSearch;

use crate::models::RawListingItem;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("listing source unreachable: {0}")]
    Unreachable(String),
    #[error("listing source returned status {0}")]
    Status(u16),
    #[error("invalid listing payload: {0}")]
    InvalidPayload(String),
}

/// Supplies the raw listings for one scan.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<Vec<RawListingItem>, SourceError>;
}

/// Listings submitted inline with the scan request.
pub struct StaticListings {
    items: Vec<RawListingItem>,
}

impl StaticListings {
    pub fn new(items: Vec<RawListingItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl ListingSource for StaticListings {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn fetch(&self) -> Result<Vec<RawListingItem>, SourceError> {
        Ok(self.items.clone())
    }
}
