//! SMTP transport arguments. No host selects the logging transport.

use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("smtp-host")
                .long("smtp-host")
                .help("SMTP relay hostname; omit to log mail instead of sending")
                .env("SMTP_HOST"),
        )
        .arg(
            Arg::new("smtp-port")
                .long("smtp-port")
                .help("SMTP relay port")
                .default_value("587")
                .env("SMTP_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("email-secure")
                .long("email-secure")
                .help("Use implicit TLS (smtps) instead of STARTTLS")
                .default_value("false")
                .env("EMAIL_SECURE")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new("smtp-username")
                .long("smtp-username")
                .help("SMTP authentication username")
                .env("SMTP_APP_USERNAME"),
        )
        .arg(
            Arg::new("smtp-password")
                .long("smtp-password")
                .help("SMTP authentication password")
                .env("SMTP_APP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("smtp-from-email")
                .long("smtp-from-email")
                .help("Sender address for outbound mail")
                .default_value("noreply@localhost")
                .env("SMTP_FROM_EMAIL"),
        )
        .arg(
            Arg::new("smtp-from-name")
                .long("smtp-from-name")
                .help("Sender display name for outbound mail")
                .default_value("Sezamo")
                .env("SMTP_FROM_NAME"),
        )
}
