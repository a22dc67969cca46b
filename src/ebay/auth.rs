use super::{EbayApiError, EbayConfig};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, header};
use serde::Deserialize;
use tokio::time::{Duration, Instant};

/// Refresh this long before eBay's stated expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AppToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl AppToken {
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    7200
}

pub(crate) fn basic_auth_header(config: &EbayConfig) -> Result<String, EbayApiError> {
    if !config.has_credentials() {
        return Err(EbayApiError::MissingCredentials);
    }
    let raw = format!("{}:{}", config.app_id.trim(), config.cert_id.trim());
    Ok(format!("Basic {}", BASE64.encode(raw)))
}

/// Client-credentials grant for application-level Buy API access.
pub async fn get_app_access_token(
    http: &Client,
    config: &EbayConfig,
    scopes: &[&str],
) -> Result<AppToken, EbayApiError> {
    let authorization = basic_auth_header(config)?;
    let scope = scopes.join(" ");
    let params = [("grant_type", "client_credentials"), ("scope", scope.as_str())];
    let response = http
        .post(config.oauth_token_url())
        .header(header::AUTHORIZATION, authorization)
        .form(&params)
        .send()
        .await
        .map_err(|err| EbayApiError::Auth(err.to_string()))?;

    if !response.status().is_success() {
        return Err(EbayApiError::Auth(format!("HTTP {}", response.status())));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| EbayApiError::Auth(err.to_string()))?;
    let lifetime = Duration::from_secs(payload.expires_in).saturating_sub(EXPIRY_MARGIN);
    Ok(AppToken {
        access_token: payload.access_token,
        expires_at: Instant::now() + lifetime,
    })
}
