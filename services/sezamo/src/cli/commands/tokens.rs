//! Token signing arguments: secrets, lifetimes, and the refresh cookie.

use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("jwt-access-secret")
                .long("jwt-access-secret")
                .help("Secret for signing access tokens")
                .env("JWT_ACCESS_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("jwt-refresh-secret")
                .long("jwt-refresh-secret")
                .help("Secret for signing refresh tokens")
                .env("JWT_REFRESH_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("email-token-secret")
                .long("email-token-secret")
                .help("Secret for signing out-of-band (magic link) tokens")
                .env("EMAIL_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("access-token-expires")
                .long("access-token-expires")
                .help("Access token lifetime (e.g. 15m, 1h)")
                .default_value("15m")
                .env("ACCESS_TOKEN_EXPIRES"),
        )
        .arg(
            Arg::new("refresh-token-expires")
                .long("refresh-token-expires")
                .help("Refresh token lifetime (e.g. 7d)")
                .default_value("7d")
                .env("REFRESH_TOKEN_EXPIRES"),
        )
        .arg(
            Arg::new("magic-link-token-expiry")
                .long("magic-link-token-expiry")
                .help("Magic-link token lifetime (e.g. 15m)")
                .default_value("15m")
                .env("MAGIC_LINK_TOKEN_EXPIRY"),
        )
        .arg(
            Arg::new("refresh-cookie-name")
                .long("refresh-cookie-name")
                .help("Name of the HTTP-only refresh token cookie")
                .default_value("jid")
                .env("REFRESH_COOKIE_NAME"),
        )
}
