//! Shared helpers for the email handlers.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use regex::Regex;

pub(crate) const BCRYPT_COST: u32 = 12;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

pub(crate) fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, BCRYPT_COST).context("failed to hash password")
}

/// Client IP for token consumption records: proxy headers, then nothing.
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

pub(crate) fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn email_normalization_and_validation() {
        assert_eq!(normalize_email(" Bob@Example.COM "), "bob@example.com");
        assert!(valid_email("bob@example.com"));
        assert!(!valid_email("bob"));
    }

    #[test]
    fn hash_password_produces_bcrypt() {
        let hash = hash_password("Str0ngPass!").expect("hash");
        assert!(hash.starts_with("$2"));
        assert!(bcrypt::verify("Str0ngPass!", &hash).unwrap_or(false));
    }

    #[test]
    fn client_ip_resolution_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("7.7.7.7, 8.8.8.8"));
        assert_eq!(extract_client_ip(&headers), Some("7.7.7.7".to_string()));
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }
}
