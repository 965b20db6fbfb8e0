pub mod logging;
pub mod smtp;
pub mod tokens;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("letero")
        .about("Transactional email service")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8081")
                .env("LETERO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("DATABASE_URL")
                .required(true),
        )
        .arg(
            Arg::new("client-url")
                .long("client-url")
                .help("Base URL of the web client; drives links and CORS")
                .default_value("http://localhost:3000")
                .env("CLIENT_URL"),
        )
        .arg(
            Arg::new("auth-service-url")
                .long("auth-service-url")
                .help("Base URL of the sezamo auth service (audit ingestion)")
                .default_value("http://localhost:8080")
                .env("AUTH_SERVICE_URL"),
        )
        .arg(
            Arg::new("internal-auth-secret")
                .long("internal-auth-secret")
                .help("Shared secret authenticating private-network service calls")
                .env("INTERNAL_AUTH_SECRET")
                .hide_env_values(true)
                .required(true),
        );

    let command = tokens::with_args(command);
    let command = smtp::with_args(command);
    logging::with_args(command, "LETERO_LOG_LEVEL")
}
