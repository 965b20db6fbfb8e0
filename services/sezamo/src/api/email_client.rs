//! HTTP client for the letero email service.
//!
//! Calls ride the private network with a short deadline; letero does the
//! minting and rendering for verification mail, while magic-link tokens are
//! minted here and only dispatched there.

use anyhow::{Context, Result, bail};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const PEER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct EmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl EmailClient {
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(PEER_TIMEOUT)
            .build()
            .context("failed to build email service client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask letero to mint a verification token and mail the link.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-2xx peer response.
    pub async fn send_verification(&self, user_id: Uuid, email: &str) -> Result<()> {
        self.post(
            "/email/send-verification",
            &json!({ "userId": user_id, "email": email }),
        )
        .await
    }

    /// Ask letero to dispatch an already-minted magic-link token.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-2xx peer response.
    pub async fn send_magic_link(
        &self,
        user_id: Uuid,
        email: &str,
        token: &str,
        is_new_user: bool,
    ) -> Result<()> {
        self.post(
            "/email/send-magic-link",
            &json!({
                "userId": user_id,
                "email": email,
                "token": token,
                "isNewUser": is_new_user,
            }),
        )
        .await
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("email service unreachable: {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("email service rejected {path}: {status} {detail}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn base_url_is_normalized() {
        let client = EmailClient::new("http://letero.internal:8081/").expect("client");
        assert_eq!(client.base_url(), "http://letero.internal:8081");
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error() {
        // Reserved TEST-NET address; nothing listens there.
        let client = EmailClient::new("http://192.0.2.1:9").expect("client");
        let result = client
            .send_verification(Uuid::new_v4(), "a@example.com")
            .await;
        assert!(result.is_err());
    }
}
