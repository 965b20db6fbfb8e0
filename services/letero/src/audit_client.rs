//! Fire-and-forget audit reporting to the auth service.
//!
//! Dispatch-related events (mail sent, request received) ride this channel;
//! state transitions that must commit atomically with their audit row are
//! written through the shared store instead.

use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const PEER_TIMEOUT: Duration = Duration::from_secs(5);
const INTERNAL_AUTH_HEADER: &str = "x-internal-auth";

/// One audit event as accepted by `POST /auth/internal/audit-log`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub user_id: Option<Uuid>,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: &'static str, user_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            action,
            resource: None,
            ip_address: None,
            user_agent: None,
            metadata: None,
            success: None,
            error_message: None,
        }
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn failure(mut self, message: impl Into<String>) -> Self {
        self.success = Some(false);
        self.error_message = Some(message.into());
        self
    }
}

#[derive(Clone)]
pub struct AuditClient {
    http: reqwest::Client,
    endpoint: String,
    secret: Arc<SecretString>,
}

impl AuditClient {
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(auth_service_url: &str, secret: SecretString) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(PEER_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/auth/internal/audit-log",
                auth_service_url.trim_end_matches('/')
            ),
            secret: Arc::new(secret),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post the event in the background; failures are logged, never surfaced.
    pub fn record(&self, event: AuditEvent) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(err) = client.post(&event).await {
                warn!(action = event.action, "failed to report audit event: {err}");
            }
        });
    }

    async fn post(&self, event: &AuditEvent) -> anyhow::Result<()> {
        let secret = HeaderValue::from_str(self.secret.expose_secret())
            .map_err(|_| anyhow::anyhow!("internal secret is not header-safe"))?;
        let response = self
            .http
            .post(&self.endpoint)
            .header(INTERNAL_AUTH_HEADER, secret)
            .json(event)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("audit ingestion returned {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoint_is_normalized() {
        let client = AuditClient::new(
            "http://sezamo.internal:8080/",
            SecretString::from("secret".to_string()),
        )
        .expect("client");
        assert_eq!(
            client.endpoint(),
            "http://sezamo.internal:8080/auth/internal/audit-log"
        );
    }

    #[test]
    fn event_serializes_camel_case_and_skips_empty() {
        let event = AuditEvent::new("RESET_EMAIL_SENT", Some(Uuid::nil()))
            .metadata(serde_json::json!({"template": "reset"}));
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["action"], "RESET_EMAIL_SENT");
        assert_eq!(value["userId"], serde_json::json!(Uuid::nil()));
        assert!(value.get("errorMessage").is_none());

        let failed = AuditEvent::new("EMAIL_UPDATE_FAILED", None).failure("boom");
        let value = serde_json::to_value(&failed).expect("json");
        assert_eq!(value["success"], serde_json::json!(false));
        assert_eq!(value["errorMessage"], serde_json::json!("boom"));
    }
}
