//! Magic-link dispatch. The auth service mints the token and owns the flow;
//! this endpoint only renders and delivers.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use crate::mail::{OutgoingEmail, templates};

use super::state::EmailState;
use super::types::{MessageResponse, SendMagicLinkRequest};
use super::utils::{normalize_email, valid_email};

#[utoipa::path(
    post,
    path = "/email/send-magic-link",
    request_body = SendMagicLinkRequest,
    responses(
        (status = 200, description = "Magic-link mail dispatched", body = MessageResponse),
        (status = 502, description = "Mail dispatch failed", body = String)
    ),
    tag = "email"
)]
pub async fn send_magic_link(
    state: Extension<Arc<EmailState>>,
    payload: Option<Json<SendMagicLinkRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email address".to_string()).into_response();
    }
    if request.token.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let link = state.config().magic_link(&request.token);
    let (subject, html) = templates::magic_link(
        &link,
        &templates::display_name(&email),
        request.is_new_user,
    );
    let mail = OutgoingEmail {
        to: email,
        subject,
        html,
    };

    if let Err(err) = state.mailer().send(&mail, state.config().sender_header()).await {
        error!("Failed to dispatch magic-link mail: {err}");
        return (
            StatusCode::BAD_GATEWAY,
            "Failed to send magic link".to_string(),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Magic link sent".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::email::test_support::email_state;
    use uuid::Uuid;

    #[tokio::test]
    async fn send_magic_link_missing_payload() {
        let response = send_magic_link(Extension(email_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_magic_link_with_log_mailer_succeeds() {
        let response = send_magic_link(
            Extension(email_state()),
            Some(Json(SendMagicLinkRequest {
                user_id: Uuid::new_v4(),
                email: "carol@example.com".to_string(),
                token: "signed-token".to_string(),
                is_new_user: true,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
