use crate::config::HttpSettings;
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("flipscout-api/", env!("CARGO_PKG_VERSION"));

pub fn build_client(settings: &HttpSettings) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}
