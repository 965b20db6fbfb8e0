//! Small helpers shared by the auth handlers: input normalization, request
//! context capture, cookies, and password hashing.

use anyhow::{Context, Result};
use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
};
use base64::Engine;
use identity_store::models::RequestMeta;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;

use super::state::AuthConfig;

/// Hash cost for stored credentials.
pub(crate) const BCRYPT_COST: u32 = 12;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

pub(crate) fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, BCRYPT_COST).context("failed to hash password")
}

pub(crate) fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// A credential for accounts created by magic-link first touch. The user
/// never receives it; password login stays impossible until they set one.
pub(crate) fn generate_unusable_password() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random password")?;
    let password = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    hash_password(&password)
}

/// Extract a client IP from common proxy headers, then the socket address.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Best-effort user-agent classification. Substring checks cover the major
/// engines; anything else stays `None` rather than guessing.
pub(crate) fn parse_user_agent(user_agent: &str) -> (Option<String>, Option<String>, Option<String>) {
    let browser = if user_agent.contains("Edg/") {
        Some("Edge")
    } else if user_agent.contains("OPR/") || user_agent.contains("Opera") {
        Some("Opera")
    } else if user_agent.contains("Firefox/") {
        Some("Firefox")
    } else if user_agent.contains("Chrome/") {
        Some("Chrome")
    } else if user_agent.contains("Safari/") {
        Some("Safari")
    } else if user_agent.contains("curl/") {
        Some("curl")
    } else {
        None
    };

    let os = if user_agent.contains("Windows") {
        Some("Windows")
    } else if user_agent.contains("Android") {
        Some("Android")
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        Some("iOS")
    } else if user_agent.contains("Mac OS X") || user_agent.contains("Macintosh") {
        Some("macOS")
    } else if user_agent.contains("Linux") {
        Some("Linux")
    } else {
        None
    };

    let device = if user_agent.contains("Mobile")
        || user_agent.contains("iPhone")
        || user_agent.contains("Android")
    {
        Some("mobile")
    } else if user_agent.contains("iPad") || user_agent.contains("Tablet") {
        Some("tablet")
    } else if browser.is_some() {
        Some("desktop")
    } else {
        None
    };

    (
        browser.map(str::to_string),
        os.map(str::to_string),
        device.map(str::to_string),
    )
}

/// Capture the request context recorded on sessions and audit rows.
pub(crate) fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let user_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let (browser, os, device_type) = user_agent
        .as_deref()
        .map(parse_user_agent)
        .unwrap_or((None, None, None));

    RequestMeta {
        ip_address: extract_client_ip(headers),
        user_agent,
        browser,
        os,
        device_type,
    }
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

/// Build the `HttpOnly` refresh cookie. `SameSite=None; Secure` when the
/// client is served over HTTPS, `Lax` otherwise.
pub(crate) fn refresh_cookie(
    config: &AuthConfig,
    token: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let name = config.cookie_name();
    let mut cookie = format!("{name}={token}; Path=/; HttpOnly; Max-Age={max_age_seconds}");
    if config.cookie_secure() {
        cookie.push_str("; SameSite=None; Secure");
    } else {
        cookie.push_str("; SameSite=Lax");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_refresh_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let name = config.cookie_name();
    let mut cookie = format!("{name}=; Path=/; HttpOnly; Max-Age=0");
    if config.cookie_secure() {
        cookie.push_str("; SameSite=None; Secure");
    } else {
        cookie.push_str("; SameSite=Lax");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn dev_config() -> AuthConfig {
        AuthConfig::new(
            "http://localhost:3000".to_string(),
            "http://localhost:8081".to_string(),
        )
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("Str0ngPass!").expect("hash");
        assert!(verify_password("Str0ngPass!", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn verify_password_tolerates_bad_hash() {
        assert!(!verify_password("anything", "anonymized"));
    }

    #[test]
    fn unusable_password_is_a_bcrypt_hash() {
        let hash = generate_unusable_password().expect("hash");
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn client_ip_prefers_forwarded_chain_head() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));

        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn user_agent_classification() {
        let (browser, os, device) = parse_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        );
        assert_eq!(browser.as_deref(), Some("Chrome"));
        assert_eq!(os.as_deref(), Some("Windows"));
        assert_eq!(device.as_deref(), Some("desktop"));

        let (browser, os, device) = parse_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(browser.as_deref(), Some("Safari"));
        assert_eq!(os.as_deref(), Some("iOS"));
        assert_eq!(device.as_deref(), Some("mobile"));

        let (browser, os, device) = parse_user_agent("weird-bot/1.0");
        assert_eq!(browser, None);
        assert_eq!(os, None);
        assert_eq!(device, None);
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);

        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_extraction_by_name() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("a=1; jid=tok; b=2"));
        assert_eq!(extract_cookie(&headers, "jid"), Some("tok".to_string()));
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn refresh_cookie_flags_by_environment() {
        let dev = refresh_cookie(&dev_config(), "tok", 600).expect("cookie");
        let dev = dev.to_str().expect("ascii");
        assert!(dev.contains("jid=tok"));
        assert!(dev.contains("SameSite=Lax"));
        assert!(!dev.contains("Secure"));

        let prod_config = AuthConfig::new(
            "https://app.sezamo.dev".to_string(),
            "http://localhost:8081".to_string(),
        );
        let prod = refresh_cookie(&prod_config, "tok", 600).expect("cookie");
        let prod = prod.to_str().expect("ascii");
        assert!(prod.contains("SameSite=None; Secure"));

        let cleared = clear_refresh_cookie(&dev_config()).expect("cookie");
        assert!(cleared.to_str().expect("ascii").contains("Max-Age=0"));
    }
}
