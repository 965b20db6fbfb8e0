//! Signed tokens for the identity platform.
//!
//! Three token families, each under its own secret:
//!
//! - **Access** and **refresh** tokens ([`TokenCodec`]) carry
//!   `(user id, role, token version)`. The token version is a per-user epoch;
//!   callers must compare it against the stored value after signature
//!   verification, which is how a password reset invalidates every token
//!   issued before it.
//! - **Out-of-band** tokens ([`OutOfBandSigner`]) back the email verification,
//!   password reset and magic-link flows. They carry `(user id, kind)` and are
//!   only valid together with their single-use database row.

mod codec;
mod error;
mod oob;

pub use codec::{SessionClaims, TokenCodec, TokenKind};
pub use error::Error;
pub use oob::{OutOfBandClaims, OutOfBandKind, OutOfBandSigner};
