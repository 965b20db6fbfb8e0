//! # Letero (Transactional Email Service)
//!
//! `letero` owns outbound mail and the single-use tokens behind every
//! out-of-band flow: email verification, password reset, and magic-link
//! dispatch. It shares the identity Postgres with its sibling auth service
//! `sezamo` through the `identity_store` crate, and reports the audit events
//! for flows it completes back to sezamo over a private-network endpoint.
//!
//! Delivery goes through one SMTP transport configured from the environment;
//! when no SMTP host is configured the service logs rendered mail instead of
//! sending it, which keeps local development self-contained.

pub mod api;
pub mod audit_client;
pub mod cli;
pub mod mail;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
