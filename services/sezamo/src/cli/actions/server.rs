use crate::api;
use crate::api::handlers::auth::AuthConfig;
use anyhow::Result;
use chrono::Duration;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_access_secret: SecretString,
    pub jwt_refresh_secret: SecretString,
    pub email_token_secret: SecretString,
    pub access_token_expires: Duration,
    pub refresh_token_expires: Duration,
    pub magic_link_token_expiry: Duration,
    pub refresh_cookie_name: String,
    pub client_url: String,
    pub email_service_url: String,
    pub allowed_origins: Vec<String>,
    pub internal_auth_secret: SecretString,
    pub audit_log_retention_days: i64,
    pub sweep_interval_seconds: u64,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = AuthConfig::new(args.client_url, args.email_service_url)
        .with_cookie_name(args.refresh_cookie_name)
        .with_allowed_origins(args.allowed_origins)
        .with_audit_retention_days(args.audit_log_retention_days);

    api::ServeArgs {
        port: args.port,
        dsn: args.dsn,
        jwt_access_secret: args.jwt_access_secret,
        jwt_refresh_secret: args.jwt_refresh_secret,
        email_token_secret: args.email_token_secret,
        access_token_expires: args.access_token_expires,
        refresh_token_expires: args.refresh_token_expires,
        magic_link_token_expiry: args.magic_link_token_expiry,
        internal_auth_secret: args.internal_auth_secret,
        sweep_interval_seconds: args.sweep_interval_seconds,
        auth_config,
    }
    .serve()
    .await
}
