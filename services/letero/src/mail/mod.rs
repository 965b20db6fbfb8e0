//! SMTP delivery.
//!
//! One transport per process, created at startup and shared across requests.
//! Connectivity is probed once at boot; a failed probe is logged but does not
//! abort startup, the service keeps serving and individual sends surface
//! their own errors.

pub mod templates;

use anyhow::{Context, Result};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::info;

const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

/// SMTP settings from the environment. `host == None` selects the logging
/// transport for local development.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub host: Option<String>,
    pub port: u16,
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from_email: String,
    pub from_name: String,
}

impl MailConfig {
    #[must_use]
    pub fn sender_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }
}

/// A rendered message ready for the transport.
#[derive(Clone, Debug)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// The outbound transport: real SMTP, or a log-only stand-in for dev.
pub enum Mailer {
    Smtp(Box<SmtpMailer>),
    Log,
}

impl Mailer {
    /// Build from config; no SMTP host selects the logging transport.
    ///
    /// # Errors
    /// Returns an error if the SMTP relay parameters are invalid.
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        match &config.host {
            Some(host) => Ok(Self::Smtp(Box::new(SmtpMailer::new(host, config)?))),
            None => Ok(Self::Log),
        }
    }

    /// Deliver one message.
    ///
    /// # Errors
    /// Returns an error when the address fails to parse, the message cannot
    /// be assembled, or the transport rejects it.
    pub async fn send(&self, mail: &OutgoingEmail, sender: &str) -> Result<()> {
        match self {
            Self::Smtp(smtp) => smtp.send(mail, sender).await,
            Self::Log => {
                info!(
                    to = %mail.to,
                    subject = %mail.subject,
                    "mail transport stub, not sending"
                );
                Ok(())
            }
        }
    }

    /// Startup probe. Returns whether the transport is reachable.
    pub async fn probe(&self) -> bool {
        match self {
            Self::Smtp(smtp) => smtp.test_connection().await,
            Self::Log => true,
        }
    }
}

/// The lettre-backed transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    fn new(host: &str, config: &MailConfig) -> Result<Self> {
        // `secure` selects implicit TLS (smtps); otherwise STARTTLS.
        let mut builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .context("failed to configure SMTP relay")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .context("failed to configure SMTP STARTTLS relay")?
        };
        builder = builder
            .port(config.port)
            .timeout(Some(SMTP_TIMEOUT));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }

    async fn send(&self, mail: &OutgoingEmail, sender: &str) -> Result<()> {
        let message = Message::builder()
            .from(sender.parse().context("invalid sender address")?)
            .to(mail.to.parse().context("invalid recipient address")?)
            .subject(&mail.subject)
            .header(ContentType::TEXT_HTML)
            .body(mail.html.clone())
            .context("failed to assemble message")?;

        self.transport
            .send(message)
            .await
            .context("SMTP transport rejected message")?;
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        self.transport.test_connection().await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: Option<&str>) -> MailConfig {
        MailConfig {
            host: host.map(str::to_string),
            port: 587,
            secure: false,
            username: None,
            password: None,
            from_email: "noreply@sezamo.dev".to_string(),
            from_name: "Sezamo".to_string(),
        }
    }

    #[test]
    fn sender_header_format() {
        assert_eq!(
            config(None).sender_header(),
            "Sezamo <noreply@sezamo.dev>"
        );
    }

    #[tokio::test]
    async fn log_mailer_always_sends() {
        let mailer = Mailer::from_config(&config(None)).expect("mailer");
        assert!(matches!(mailer, Mailer::Log));
        assert!(mailer.probe().await);
        let mail = OutgoingEmail {
            to: "a@example.com".to_string(),
            subject: "hi".to_string(),
            html: "<p>hi</p>".to_string(),
        };
        mailer
            .send(&mail, "Sezamo <noreply@sezamo.dev>")
            .await
            .expect("log send");
    }

    #[test]
    fn smtp_mailer_builds_from_host() {
        let mailer = Mailer::from_config(&config(Some("smtp.example.com"))).expect("mailer");
        assert!(matches!(mailer, Mailer::Smtp(_)));
    }
}
