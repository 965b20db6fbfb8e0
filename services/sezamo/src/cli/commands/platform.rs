//! Platform wiring: peer service, client origin, internal auth, retention.

use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("client-url")
                .long("client-url")
                .help("Base URL of the web client; drives links, CORS and cookie flags")
                .default_value("http://localhost:3000")
                .env("CLIENT_URL"),
        )
        .arg(
            Arg::new("email-service-url")
                .long("email-service-url")
                .help("Base URL of the letero email service")
                .default_value("http://localhost:8081")
                .env("EMAIL_SERVICE_URL"),
        )
        .arg(
            Arg::new("allowed-origins")
                .long("allowed-origins")
                .help("Comma-separated extra origins allowed by CORS")
                .env("ALLOWED_ORIGINS"),
        )
        .arg(
            Arg::new("internal-auth-secret")
                .long("internal-auth-secret")
                .help("Shared secret authenticating private-network service calls")
                .env("INTERNAL_AUTH_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("audit-log-retention-days")
                .long("audit-log-retention-days")
                .help("Days to keep audit rows before the sweeper removes them")
                .default_value("90")
                .env("AUDIT_LOG_RETENTION_DAYS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("sweep-interval-seconds")
                .long("sweep-interval-seconds")
                .help("Seconds between background maintenance passes")
                .default_value("300")
                .env("SEZAMO_SWEEP_INTERVAL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}
