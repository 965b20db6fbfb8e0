//! Fixtures for email handler tests: log transport, deterministic secrets.

use identity_store::SystemClock;
use identity_token::OutOfBandSigner;
use secrecy::SecretString;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use crate::audit_client::AuditClient;
use crate::mail::{MailConfig, Mailer};

use super::state::{EmailConfig, EmailState};

pub(crate) fn email_state() -> Arc<EmailState> {
    let mail_config = MailConfig {
        host: None,
        port: 587,
        secure: false,
        username: None,
        password: None,
        from_email: "noreply@sezamo.dev".to_string(),
        from_name: "Sezamo".to_string(),
    };
    let config = EmailConfig::new(
        "http://localhost:3000".to_string(),
        mail_config.sender_header(),
    );
    let oob = OutOfBandSigner::new("email-secret").expect("signer");
    let mailer = Mailer::from_config(&mail_config).expect("mailer");
    let audit = AuditClient::new(
        "http://localhost:8080",
        SecretString::from("internal-test-secret".to_string()),
    )
    .expect("audit client");
    Arc::new(EmailState::new(
        config,
        oob,
        mailer,
        audit,
        Arc::new(SystemClock),
    ))
}

pub(crate) fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://postgres@localhost/postgres")
        .expect("lazy pool")
}
