use crate::cli::actions::{Action, server::Args};
use crate::mail::MailConfig;
use anyhow::{Context, Result, bail};
use chrono::Duration;
use secrecy::SecretString;

/// Parse a human lifetime such as `45s`, `15m`, `12h` or `7d`.
///
/// # Errors
/// Returns an error for empty input, unknown suffixes or non-positive values.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim();
    let Some(last) = trimmed.chars().last() else {
        bail!("empty duration");
    };

    let (number, unit): (&str, fn(i64) -> Duration) = match last {
        's' => (&trimmed[..trimmed.len() - 1], Duration::seconds),
        'm' => (&trimmed[..trimmed.len() - 1], Duration::minutes),
        'h' => (&trimmed[..trimmed.len() - 1], Duration::hours),
        'd' => (&trimmed[..trimmed.len() - 1], Duration::days),
        _ if last.is_ascii_digit() => (trimmed, Duration::seconds),
        _ => bail!("unknown duration suffix in {value:?}"),
    };

    let amount: i64 = number
        .parse()
        .with_context(|| format!("invalid duration {value:?}"))?;
    if amount <= 0 {
        bail!("duration must be positive: {value:?}");
    }
    Ok(unit(amount))
}

fn required_string(matches: &clap::ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

fn required_secret(matches: &clap::ArgMatches, name: &str) -> Result<SecretString> {
    let value = required_string(matches, name)?;
    if value.trim().is_empty() {
        bail!("--{name} must not be empty");
    }
    Ok(SecretString::from(value))
}

fn duration_arg(matches: &clap::ArgMatches, name: &str) -> Result<Duration> {
    let value = required_string(matches, name)?;
    parse_duration(&value).with_context(|| format!("invalid --{name}"))
}

/// Turn parsed matches into the server action.
///
/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let mail = MailConfig {
        host: matches.get_one::<String>("smtp-host").cloned(),
        port: matches.get_one::<u16>("smtp-port").copied().unwrap_or(587),
        secure: matches
            .get_one::<bool>("email-secure")
            .copied()
            .unwrap_or(false),
        username: matches.get_one::<String>("smtp-username").cloned(),
        password: matches
            .get_one::<String>("smtp-password")
            .cloned()
            .map(SecretString::from),
        from_email: required_string(matches, "smtp-from-email")?,
        from_name: required_string(matches, "smtp-from-name")?,
    };

    Ok(Action::Server(Box::new(Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8081),
        dsn: required_string(matches, "dsn")?,
        client_url: required_string(matches, "client-url")?,
        auth_service_url: required_string(matches, "auth-service-url")?,
        email_token_secret: required_secret(matches, "email-token-secret")?,
        verification_token_expiry: duration_arg(matches, "verification-token-expiry")?,
        reset_token_expiry: duration_arg(matches, "reset-token-expiry")?,
        internal_auth_secret: required_secret(matches, "internal-auth-secret")?,
        mail,
    })))
}
