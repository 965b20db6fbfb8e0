//! Request/response types for the email endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendVerificationRequest {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendMagicLinkRequest {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
    pub is_new_user: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_magic_link_request_round_trips() {
        let body = serde_json::json!({
            "userId": Uuid::nil(),
            "email": "carol@example.com",
            "token": "tok",
            "isNewUser": true,
        });
        let decoded: SendMagicLinkRequest = serde_json::from_value(body).expect("decode");
        assert!(decoded.is_new_user);
        assert_eq!(decoded.email, "carol@example.com");
    }

    #[test]
    fn reset_password_request_uses_camel_case() {
        let body = serde_json::json!({ "token": "t", "newPassword": "Str0ngPass!" });
        let decoded: ResetPasswordRequest = serde_json::from_value(body).expect("decode");
        assert_eq!(decoded.new_password, "Str0ngPass!");
    }
}
