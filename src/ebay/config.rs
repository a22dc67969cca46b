#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbayConfig {
    pub environment: String,
    pub app_id: String,
    pub cert_id: String,
    pub marketplace_id: String,
}

impl EbayConfig {
    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            environment: lookup("EBAY_ENV").unwrap_or_else(|| "SANDBOX".to_string()),
            app_id: lookup("EBAY_APP_ID_PRODUCTION").unwrap_or_default(),
            cert_id: lookup("EBAY_CERT_ID_PRODUCTION").unwrap_or_default(),
            marketplace_id: lookup("EBAY_MARKETPLACE_ID").unwrap_or_else(|| "EBAY_US".to_string()),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.cert_id.trim().is_empty()
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.trim();
        env.eq_ignore_ascii_case("PROD") || env.eq_ignore_ascii_case("PRODUCTION")
    }

    pub fn root(&self) -> &'static str {
        if self.is_production() {
            "https://api.ebay.com"
        } else {
            "https://api.sandbox.ebay.com"
        }
    }

    pub fn oauth_token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_follows_environment() {
        let mut config = EbayConfig::from_lookup(&|_: &str| None);
        assert_eq!(config.root(), "https://api.sandbox.ebay.com");
        assert!(!config.has_credentials());
        config.environment = "production".into();
        assert_eq!(
            config.oauth_token_url(),
            "https://api.ebay.com/identity/v1/oauth2/token"
        );
    }
}
