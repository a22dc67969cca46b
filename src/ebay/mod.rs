pub mod auth;
pub mod config;
pub mod insights;

pub use auth::{AppToken, get_app_access_token};
pub use config::EbayConfig;
pub use insights::EbayMarketClient;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayApiError {
    #[error("missing ebay app credentials")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Auth(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("upstream status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
