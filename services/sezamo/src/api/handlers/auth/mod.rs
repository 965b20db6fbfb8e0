//! Auth handler modules.

pub mod admin;
pub mod audit_log;
pub mod gdpr;
pub mod lockout;
pub mod login;
pub mod magic_link;
pub mod me;
pub mod principal;
pub mod refresh;
pub mod register;
pub mod session_issue;
pub mod sessions;
pub mod state;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use principal::{Principal, require_admin, require_auth};
pub use state::{AuthConfig, AuthState};
