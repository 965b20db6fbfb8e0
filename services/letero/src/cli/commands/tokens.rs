//! Out-of-band token arguments: secret and lifetimes.

use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-token-secret")
                .long("email-token-secret")
                .help("Secret for signing out-of-band tokens")
                .env("EMAIL_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("verification-token-expiry")
                .long("verification-token-expiry")
                .help("Verification token lifetime (e.g. 24h)")
                .default_value("24h")
                .env("VERIFICATION_TOKEN_EXPIRY"),
        )
        .arg(
            Arg::new("reset-token-expiry")
                .long("reset-token-expiry")
                .help("Password reset token lifetime (e.g. 1h)")
                .default_value("1h")
                .env("RESET_TOKEN_EXPIRY"),
        )
}
