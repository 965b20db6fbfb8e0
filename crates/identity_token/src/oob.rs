use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// The three single-use out-of-band flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutOfBandKind {
    Verification,
    PasswordReset,
    MagicLink,
}

impl OutOfBandKind {
    /// Default time to live for freshly minted tokens of this kind.
    #[must_use]
    pub fn default_ttl(self) -> Duration {
        match self {
            Self::Verification => Duration::hours(24),
            Self::PasswordReset => Duration::hours(1),
            Self::MagicLink => Duration::minutes(15),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verification => "VERIFICATION",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::MagicLink => "MAGIC_LINK",
        }
    }
}

/// Claims carried by an out-of-band token.
///
/// The token alone is not a credential: consumption always goes through the
/// matching database row, and the stored `user_id` must equal `sub`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutOfBandClaims {
    pub sub: Uuid,
    pub kind: OutOfBandKind,
    pub iat: i64,
    pub exp: i64,
}

/// Mints and checks out-of-band tokens under a secret of their own,
/// separate from the access/refresh secrets.
pub struct OutOfBandSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    verification_ttl: Duration,
    password_reset_ttl: Duration,
    magic_link_ttl: Duration,
}

impl OutOfBandSigner {
    /// # Errors
    /// Returns [`Error::InvalidSecret`] when the secret is empty.
    pub fn new(secret: &str) -> Result<Self, Error> {
        if secret.trim().is_empty() {
            return Err(Error::InvalidSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            verification_ttl: OutOfBandKind::Verification.default_ttl(),
            password_reset_ttl: OutOfBandKind::PasswordReset.default_ttl(),
            magic_link_ttl: OutOfBandKind::MagicLink.default_ttl(),
        })
    }

    #[must_use]
    pub fn with_ttl(mut self, kind: OutOfBandKind, ttl: Duration) -> Self {
        match kind {
            OutOfBandKind::Verification => self.verification_ttl = ttl,
            OutOfBandKind::PasswordReset => self.password_reset_ttl = ttl,
            OutOfBandKind::MagicLink => self.magic_link_ttl = ttl,
        }
        self
    }

    #[must_use]
    pub fn ttl(&self, kind: OutOfBandKind) -> Duration {
        match kind {
            OutOfBandKind::Verification => self.verification_ttl,
            OutOfBandKind::PasswordReset => self.password_reset_ttl,
            OutOfBandKind::MagicLink => self.magic_link_ttl,
        }
    }

    /// Mint a token; returns the token and its expiry instant.
    ///
    /// # Errors
    /// Returns [`Error::Signing`] if serialization fails.
    pub fn mint(
        &self,
        kind: OutOfBandKind,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), Error> {
        let expires_at = now + self.ttl(kind);
        let claims = OutOfBandClaims {
            sub: user_id,
            kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding).map_err(|_| Error::Signing)?;
        Ok((token, expires_at))
    }

    /// Verify signature and expiry and that the token is of the expected kind.
    ///
    /// # Errors
    /// [`Error::Malformed`], [`Error::BadSignature`], [`Error::Expired`] or
    /// [`Error::WrongKind`].
    pub fn verify(&self, token: &str, kind: OutOfBandKind) -> Result<OutOfBandClaims, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<OutOfBandClaims>(token, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => Error::Expired,
                ErrorKind::InvalidSignature => Error::BadSignature,
                _ => Error::Malformed,
            }
        })?;
        if data.claims.kind != kind {
            return Err(Error::WrongKind);
        }
        Ok(data.claims)
    }
}
