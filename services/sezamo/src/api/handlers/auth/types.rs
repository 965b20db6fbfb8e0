//! Request/response types for the auth endpoints.

use chrono::{DateTime, Utc};
use identity_store::models::{Session, UserSummary};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Optional role for the new account; defaults to USER.
    pub role: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<UserSummary> for UserPayload {
    fn from(summary: UserSummary) -> Self {
        Self {
            id: summary.id,
            email: summary.email,
            role: summary.role.as_str().to_string(),
            email_verified: summary.email_verified,
            created_at: summary.created_at,
            last_login_at: summary.last_login_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub user: UserPayload,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user: UserPayload,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LockedResponse {
    pub message: String,
    pub locked_until: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileResponse {
    pub user: UserPayload,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MagicLinkRequestBody {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MagicLinkVerifyRequest {
    pub token: String,
}

/// One active session as shown to its owner. Never carries the refresh token.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub id: Uuid,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Whether this row owns the refresh token presented with the request.
    pub current: bool,
}

impl SessionPayload {
    pub(crate) fn from_session(session: &Session, current_token: Option<&str>) -> Self {
        Self {
            id: session.id,
            device_name: session.device_name.clone(),
            device_type: session.device_type.clone(),
            browser: session.browser.clone(),
            os: session.os.clone(),
            ip_address: session.ip_address.clone(),
            country: session.country.clone(),
            city: session.city.clone(),
            last_activity_at: session.last_activity_at,
            created_at: session.created_at,
            expires_at: session.expires_at,
            current: current_token == Some(session.refresh_token.as_str()),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionPayload>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RevokedResponse {
    pub message: String,
    pub revoked_count: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangeRoleRequest {
    pub role: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BulkDeleteRequest {
    /// Must be the literal `DELETE_ALL_USERS`.
    pub confirmation: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeletedResponse {
    pub message: String,
    pub deleted_count: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AnonymizeRequest {
    /// Must be the literal `ANONYMIZE_MY_DATA`.
    pub confirmation: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmailRequest {
    pub new_email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UsersListResponse {
    pub users: Vec<UserPayload>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuditRowPayload {
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

impl From<identity_store::models::AuditLogRow> for AuditRowPayload {
    fn from(row: identity_store::models::AuditLogRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            performed_by: row.performed_by,
            action: row.action,
            resource: row.resource,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            metadata: row.metadata,
            success: row.success,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AuditLogsResponse {
    pub logs: Vec<AuditRowPayload>,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuditPageResponse {
    pub logs: Vec<AuditRowPayload>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

/// Admin audit query string.
#[derive(IntoParams, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Pagination for the admin user listing.
#[derive(IntoParams, Deserialize, Debug, Default)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Audit ingestion payload from the email service.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InternalAuditRequest {
    pub user_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub action: String,
    pub resource: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity_store::models::Role;

    #[test]
    fn user_payload_from_summary() {
        let now = Utc::now();
        let summary = UserSummary {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            role: Role::Admin,
            email_verified: true,
            created_at: now,
            last_login_at: None,
        };
        let payload = UserPayload::from(summary);
        assert_eq!(payload.role, "ADMIN");
        assert!(payload.email_verified);

        let value = serde_json::to_value(&payload).expect("json");
        assert_eq!(value["emailVerified"], serde_json::json!(true));
        assert!(value.get("passwordHash").is_none());
    }

    #[test]
    fn login_response_uses_camel_case() {
        let response = RefreshResponse {
            access_token: "tok".to_string(),
        };
        let value = serde_json::to_value(&response).expect("json");
        assert_eq!(value["accessToken"], serde_json::json!("tok"));
    }

    #[test]
    fn session_payload_marks_current() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            refresh_token: "secret-token".to_string(),
            device_name: None,
            device_type: Some("desktop".to_string()),
            browser: Some("Firefox".to_string()),
            os: Some("Linux".to_string()),
            ip_address: Some("1.2.3.4".to_string()),
            country: None,
            city: None,
            is_active: true,
            last_activity_at: now,
            created_at: now,
            expires_at: now,
        };

        let current = SessionPayload::from_session(&session, Some("secret-token"));
        assert!(current.current);
        let other = SessionPayload::from_session(&session, Some("different"));
        assert!(!other.current);

        // The raw token value must never serialize.
        let value = serde_json::to_value(&current).expect("json");
        assert!(value.get("refreshToken").is_none());
        assert!(!value.to_string().contains("secret-token"));
    }

    #[test]
    fn internal_audit_request_round_trips() {
        let body = serde_json::json!({
            "action": "RESET_EMAIL_SENT",
            "userId": Uuid::new_v4(),
            "metadata": {"template": "reset"},
        });
        let decoded: InternalAuditRequest = serde_json::from_value(body).expect("decode");
        assert_eq!(decoded.action, "RESET_EMAIL_SENT");
        assert!(decoded.user_id.is_some());
        assert!(decoded.success.is_none());
    }
}
