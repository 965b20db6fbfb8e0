//! Email service configuration and shared handler state.

use identity_store::Clock;
use identity_token::OutOfBandSigner;
use std::sync::Arc;

use crate::audit_client::AuditClient;
use crate::mail::Mailer;

#[derive(Clone, Debug)]
pub struct EmailConfig {
    client_url: String,
    sender_header: String,
}

impl EmailConfig {
    #[must_use]
    pub fn new(client_url: String, sender_header: String) -> Self {
        Self {
            client_url: client_url.trim_end_matches('/').to_string(),
            sender_header,
        }
    }

    #[must_use]
    pub fn client_url(&self) -> &str {
        &self.client_url
    }

    #[must_use]
    pub fn sender_header(&self) -> &str {
        &self.sender_header
    }

    #[must_use]
    pub fn verification_link(&self, token: &str) -> String {
        format!("{}/verify-email?token={token}", self.client_url)
    }

    #[must_use]
    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/reset-password?token={token}", self.client_url)
    }

    #[must_use]
    pub fn magic_link(&self, token: &str) -> String {
        format!("{}/magic-link?token={token}", self.client_url)
    }
}

pub struct EmailState {
    config: EmailConfig,
    oob: OutOfBandSigner,
    mailer: Mailer,
    audit: AuditClient,
    clock: Arc<dyn Clock>,
}

impl EmailState {
    pub fn new(
        config: EmailConfig,
        oob: OutOfBandSigner,
        mailer: Mailer,
        audit: AuditClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            oob,
            mailer,
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EmailConfig {
        &self.config
    }

    #[must_use]
    pub fn oob(&self) -> &OutOfBandSigner {
        &self.oob
    }

    #[must_use]
    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    #[must_use]
    pub fn audit(&self) -> &AuditClient {
        &self.audit
    }

    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}
