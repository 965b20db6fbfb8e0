use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Which of the two session token families a string claims to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// Claims embedded in access and refresh tokens.
///
/// `token_version` is compared against the stored per-user epoch after
/// signature verification; a mismatch invalidates the token regardless of
/// its own `exp`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub role: String,
    pub token_version: i32,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Result<Self, Error> {
        if secret.trim().is_empty() {
            return Err(Error::InvalidSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

/// Signs and verifies access and refresh tokens with independent secrets.
///
/// Secrets are loaded once at startup and never hot-swapped.
pub struct TokenCodec {
    access: KeyPair,
    refresh: KeyPair,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    /// # Errors
    /// Returns [`Error::InvalidSecret`] when either secret is empty.
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, Error> {
        Ok(Self {
            access: KeyPair::from_secret(access_secret)?,
            refresh: KeyPair::from_secret(refresh_secret)?,
            access_ttl,
            refresh_ttl,
        })
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign a token of the given kind; returns the token and its expiry.
    ///
    /// # Errors
    /// Returns [`Error::Signing`] if serialization fails.
    pub fn sign(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        role: &str,
        token_version: i32,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), Error> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let expires_at = now + ttl;
        let claims = SessionClaims {
            sub: user_id,
            role: role.to_string(),
            token_version,
            kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.keys(kind).encoding)
            .map_err(|_| Error::Signing)?;
        Ok((token, expires_at))
    }

    /// Verify signature and expiry, and that the token is of the expected kind.
    ///
    /// Callers must still compare `token_version` against the stored value.
    ///
    /// # Errors
    /// [`Error::Malformed`], [`Error::BadSignature`], [`Error::Expired`] or
    /// [`Error::WrongKind`].
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<SessionClaims, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<SessionClaims>(token, &self.keys(kind).decoding, &validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => Error::Expired,
                ErrorKind::InvalidSignature => Error::BadSignature,
                _ => Error::Malformed,
            })?;
        if data.claims.kind != kind {
            return Err(Error::WrongKind);
        }
        Ok(data.claims)
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            "access-secret",
            "refresh-secret",
            Duration::minutes(15),
            Duration::days(7),
        )
        .expect("codec")
    }

    #[test]
    fn rejects_empty_secret() {
        let result = TokenCodec::new("", "refresh", Duration::minutes(15), Duration::days(7));
        assert!(matches!(result, Err(Error::InvalidSecret)));
    }

    #[test]
    fn sign_and_verify_access() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let (token, expires_at) = codec
            .sign(TokenKind::Access, user_id, "USER", 3, now)
            .expect("sign");
        assert_eq!(expires_at, now + Duration::minutes(15));

        let claims = codec.verify(&token, TokenKind::Access).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, "USER");
        assert_eq!(claims.token_version, 3);
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn access_token_is_not_a_refresh_token() {
        let codec = codec();
        let (token, _) = codec
            .sign(TokenKind::Access, Uuid::new_v4(), "USER", 0, Utc::now())
            .expect("sign");
        // Different secret, so the refresh key rejects the signature.
        assert_eq!(
            codec.verify(&token, TokenKind::Refresh),
            Err(Error::BadSignature)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = codec();
        let past = Utc::now() - Duration::hours(2);
        let (token, _) = codec
            .sign(TokenKind::Access, Uuid::new_v4(), "USER", 0, past)
            .expect("sign");
        assert_eq!(codec.verify(&token, TokenKind::Access), Err(Error::Expired));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        assert_eq!(
            codec.verify("not-a-jwt", TokenKind::Access),
            Err(Error::Malformed)
        );
    }

    #[test]
    fn tampered_token_is_rejected() {
        let codec = codec();
        let (token, _) = codec
            .sign(TokenKind::Access, Uuid::new_v4(), "USER", 0, Utc::now())
            .expect("sign");
        let mut tampered = token.clone();
        tampered.pop();
        assert!(codec.verify(&tampered, TokenKind::Access).is_err());
    }

    #[test]
    fn token_kind_names() {
        assert_eq!(TokenKind::Access.as_str(), "access");
        assert_eq!(TokenKind::Refresh.as_str(), "refresh");
    }
}
