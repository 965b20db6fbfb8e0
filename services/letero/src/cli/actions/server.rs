use crate::api;
use crate::mail::MailConfig;
use anyhow::Result;
use chrono::Duration;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub client_url: String,
    pub auth_service_url: String,
    pub email_token_secret: SecretString,
    pub verification_token_expiry: Duration,
    pub reset_token_expiry: Duration,
    pub internal_auth_secret: SecretString,
    pub mail: MailConfig,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    api::ServeArgs {
        port: args.port,
        dsn: args.dsn,
        client_url: args.client_url,
        auth_service_url: args.auth_service_url,
        email_token_secret: args.email_token_secret,
        verification_token_expiry: args.verification_token_expiry,
        reset_token_expiry: args.reset_token_expiry,
        internal_auth_secret: args.internal_auth_secret,
        mail: args.mail,
    }
    .serve()
    .await
}
