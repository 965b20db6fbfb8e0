//! # Sezamo (Authentication Authority)
//!
//! `sezamo` owns the user record and everything credential-shaped around it:
//! password login with a sliding lockout, refresh-token rotation bound to
//! sessions, a per-user token-version epoch that mass-invalidates issued JWTs,
//! passwordless magic-link login (doubling as silent signup), role-based
//! admin surfaces, the append-only audit trail, and the GDPR rights that
//! operate on all of the above.
//!
//! Outbound mail is delegated to its sibling service `letero` over private
//! HTTP; both share one Postgres through the `identity_store` crate.
//!
//! ## Token model
//!
//! Access and refresh tokens are JWTs under independent secrets carrying
//! `(user id, role, token version)`. Possession is never enough: the bearer
//! middleware re-reads the user and rejects any token whose embedded version
//! trails the stored epoch, which is how a password reset terminates every
//! outstanding credential at once.

pub mod api;
pub mod cli;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
