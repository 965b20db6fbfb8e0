//! Row types and enumerations shared by both services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access level of a user. Stored as text in the `users.role` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }

    /// Parse the stored text representation; unknown values map to `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(Self::User),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The identity root. Mirrors the `users` table.
#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub email_verified: bool,
    pub failed_login_attempts: i32,
    pub account_locked_until: Option<DateTime<Utc>>,
    pub token_version: i32,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the account is locked as of `now`.
    #[must_use]
    pub fn locked_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.account_locked_until.filter(|until| *until > now)
    }

    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
            email_verified: self.email_verified,
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        }
    }
}

/// The user shape handed out over HTTP. Never carries the password hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// One refresh-token-bearing login. Mirrors the `sessions` table.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub is_active: bool,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Device and network context captured from the incoming request when a
/// session is created or a token is consumed.
#[derive(Clone, Debug, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
}

/// Bare refresh-token credential row, kept alongside the session for fast
/// lookup and independent cleanup.
#[derive(Clone, Debug)]
pub struct RefreshTokenRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A single-use out-of-band credential row (verification, reset, magic link).
#[derive(Clone, Debug)]
pub struct OutOfBandRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The exhaustive catalog of audited state transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UserRegister,
    UserLogin,
    UserLogout,
    UserLogoutAllDevices,
    UserLogoutOtherDevices,
    EmailVerified,
    PasswordResetRequested,
    PasswordResetCompleted,
    TokenRefreshed,
    RoleChanged,
    UserDeleted,
    UsersBulkDeleted,
    SessionRevoked,
    AccountLocked,
    AccountUnlocked,
    LoginFailed,
    VerificationEmailSent,
    ResetEmailSent,
    MagicLinkRequested,
    MagicLinkSent,
    MagicLinkLogin,
    MagicLinkFailed,
    UserDataExported,
    UserDataAnonymized,
    UserPermanentlyDeleted,
    EmailUpdated,
    EmailUpdateFailed,
}

impl AuditAction {
    pub const ALL: [Self; 27] = [
        Self::UserRegister,
        Self::UserLogin,
        Self::UserLogout,
        Self::UserLogoutAllDevices,
        Self::UserLogoutOtherDevices,
        Self::EmailVerified,
        Self::PasswordResetRequested,
        Self::PasswordResetCompleted,
        Self::TokenRefreshed,
        Self::RoleChanged,
        Self::UserDeleted,
        Self::UsersBulkDeleted,
        Self::SessionRevoked,
        Self::AccountLocked,
        Self::AccountUnlocked,
        Self::LoginFailed,
        Self::VerificationEmailSent,
        Self::ResetEmailSent,
        Self::MagicLinkRequested,
        Self::MagicLinkSent,
        Self::MagicLinkLogin,
        Self::MagicLinkFailed,
        Self::UserDataExported,
        Self::UserDataAnonymized,
        Self::UserPermanentlyDeleted,
        Self::EmailUpdated,
        Self::EmailUpdateFailed,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRegister => "USER_REGISTER",
            Self::UserLogin => "USER_LOGIN",
            Self::UserLogout => "USER_LOGOUT",
            Self::UserLogoutAllDevices => "USER_LOGOUT_ALL_DEVICES",
            Self::UserLogoutOtherDevices => "USER_LOGOUT_OTHER_DEVICES",
            Self::EmailVerified => "EMAIL_VERIFIED",
            Self::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            Self::PasswordResetCompleted => "PASSWORD_RESET_COMPLETED",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::RoleChanged => "ROLE_CHANGED",
            Self::UserDeleted => "USER_DELETED",
            Self::UsersBulkDeleted => "USERS_BULK_DELETED",
            Self::SessionRevoked => "SESSION_REVOKED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::AccountUnlocked => "ACCOUNT_UNLOCKED",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::VerificationEmailSent => "VERIFICATION_EMAIL_SENT",
            Self::ResetEmailSent => "RESET_EMAIL_SENT",
            Self::MagicLinkRequested => "MAGIC_LINK_REQUESTED",
            Self::MagicLinkSent => "MAGIC_LINK_SENT",
            Self::MagicLinkLogin => "MAGIC_LINK_LOGIN",
            Self::MagicLinkFailed => "MAGIC_LINK_FAILED",
            Self::UserDataExported => "USER_DATA_EXPORTED",
            Self::UserDataAnonymized => "USER_DATA_ANONYMIZED",
            Self::UserPermanentlyDeleted => "USER_PERMANENTLY_DELETED",
            Self::EmailUpdated => "EMAIL_UPDATED",
            Self::EmailUpdateFailed => "EMAIL_UPDATE_FAILED",
        }
    }

    /// Parse the stored text representation; unknown values map to `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }
}

/// A new audit row, before insertion.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub action: AuditAction,
    pub resource: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEntry {
    /// A successful entry for the given user and action; callers extend it
    /// with context via the builder methods.
    #[must_use]
    pub fn new(action: AuditAction, user_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            performed_by: None,
            action,
            resource: None,
            ip_address: None,
            user_agent: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            success: true,
            error_message: None,
        }
    }

    #[must_use]
    pub fn performed_by(mut self, admin_id: Uuid) -> Self {
        self.performed_by = Some(admin_id);
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn request_meta(mut self, meta: &RequestMeta) -> Self {
        self.ip_address = meta.ip_address.clone();
        self.user_agent = meta.user_agent.clone();
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn failure(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }
}

/// A stored audit row.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogRow {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub action: String,
    pub resource: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn role_round_trips() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse(Role::Admin.as_str()), Some(Role::Admin));
        assert_eq!(Role::parse("ROOT"), None);
    }

    #[test]
    fn role_serializes_screaming() {
        assert_eq!(
            serde_json::to_value(Role::Admin).expect("json"),
            serde_json::json!("ADMIN")
        );
    }

    #[test]
    fn audit_action_catalog_round_trips() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("NOT_AN_ACTION"), None);
    }

    #[test]
    fn audit_entry_builders() {
        let admin = Uuid::new_v4();
        let entry = AuditEntry::new(AuditAction::RoleChanged, Some(Uuid::new_v4()))
            .performed_by(admin)
            .resource("user")
            .metadata(serde_json::json!({"oldRole": "USER", "newRole": "ADMIN"}))
            .failure("boom");
        assert_eq!(entry.performed_by, Some(admin));
        assert_eq!(entry.resource.as_deref(), Some("user"));
        assert!(!entry.success);
        assert_eq!(entry.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn locked_until_ignores_past_locks() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
            email_verified: true,
            failed_login_attempts: 5,
            account_locked_until: Some(now - Duration::minutes(1)),
            token_version: 0,
            last_login_at: None,
            last_login_ip: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(user.locked_until(now), None);

        let locked = User {
            account_locked_until: Some(now + Duration::minutes(10)),
            ..user
        };
        assert_eq!(locked.locked_until(now), Some(now + Duration::minutes(10)));
    }
}
