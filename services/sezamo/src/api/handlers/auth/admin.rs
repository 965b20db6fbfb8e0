//! Admin user management: listing, role changes, deletions.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry, Role};
use identity_store::{audit, users};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::principal::require_admin;
use super::state::AuthState;
use super::types::{
    BulkDeleteRequest, BulkDeletedResponse, ChangeRoleRequest, PageParams, UserPayload,
    UsersListResponse,
};
use super::utils::request_meta;

const BULK_DELETE_CONFIRMATION: &str = "DELETE_ALL_USERS";
const DEFAULT_PAGE_LIMIT: i64 = 20;

fn internal_error(message: &str) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

#[utoipa::path(
    get,
    path = "/auth/admin/users",
    params(PageParams),
    responses(
        (status = 200, description = "Paginated user listing", body = UsersListResponse),
        (status = 403, description = "Forbidden", body = String)
    ),
    tag = "admin"
)]
pub async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    params: Query<PageParams>,
) -> impl IntoResponse {
    if let Err(rejection) = require_admin(&headers, &pool, &state).await {
        return rejection.into_response();
    }

    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, 100);
    let offset = (page - 1) * limit;

    let result = async {
        let total = users::count_users(&pool).await?;
        let rows = users::list_users(&pool, limit, offset).await?;
        anyhow::Ok((total, rows))
    };

    match result.await {
        Ok((total, rows)) => (
            StatusCode::OK,
            Json(UsersListResponse {
                users: rows
                    .iter()
                    .map(|user| UserPayload::from(user.summary()))
                    .collect(),
                total,
                page,
                total_pages: (total + limit - 1) / limit,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to list users: {err}");
            internal_error("Failed to list users")
        }
    }
}

#[utoipa::path(
    patch,
    path = "/auth/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "Target user id")),
    request_body = ChangeRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = UserPayload),
        (status = 400, description = "Invalid role or self-change", body = String),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "admin"
)]
pub async fn change_role(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Path(target_id): Path<Uuid>,
    payload: Option<Json<ChangeRoleRequest>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let Some(new_role) = Role::parse(&request.role) else {
        return (StatusCode::BAD_REQUEST, "Invalid role".to_string()).into_response();
    };
    if target_id == admin.user_id {
        return (
            StatusCode::BAD_REQUEST,
            "Cannot change your own role".to_string(),
        )
            .into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start role-change transaction: {err}");
            return internal_error("Failed to change role");
        }
    };

    let user = match users::lock_user_by_id(&mut tx, target_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for role change: {err}");
            let _ = tx.rollback().await;
            return internal_error("Failed to change role");
        }
    };

    let apply = async {
        users::set_role(&mut tx, target_id, new_role, now).await?;
        let entry = AuditEntry::new(AuditAction::RoleChanged, Some(target_id))
            .performed_by(admin.user_id)
            .resource("user")
            .request_meta(&meta)
            .metadata(json!({
                "oldRole": user.role.as_str(),
                "newRole": new_role.as_str(),
            }));
        audit::append_audit(&mut tx, &entry, now).await?;
        anyhow::Ok(())
    };
    if let Err(err) = apply.await {
        error!("Failed to change role: {err}");
        let _ = tx.rollback().await;
        return internal_error("Failed to change role");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit role change: {err}");
        return internal_error("Failed to change role");
    }

    let mut updated = user;
    updated.role = new_role;
    (StatusCode::OK, Json(UserPayload::from(updated.summary()))).into_response()
}

#[utoipa::path(
    delete,
    path = "/auth/admin/users/{id}",
    params(("id" = Uuid, Path, description = "Target user id")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 400, description = "Self-deletion rejected", body = String),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "admin"
)]
pub async fn delete_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Path(target_id): Path<Uuid>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    if target_id == admin.user_id {
        return (
            StatusCode::BAD_REQUEST,
            "Cannot delete your own account".to_string(),
        )
            .into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start delete transaction: {err}");
            return internal_error("Failed to delete user");
        }
    };

    let target = match users::lock_user_by_id(&mut tx, target_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for deletion: {err}");
            let _ = tx.rollback().await;
            return internal_error("Failed to delete user");
        }
    };

    let apply = async {
        // Audit first; the FK sets user_id NULL when the row goes, the
        // metadata keeps the identifiers.
        let entry = AuditEntry::new(AuditAction::UserDeleted, Some(target_id))
            .performed_by(admin.user_id)
            .resource("user")
            .request_meta(&meta)
            .metadata(json!({ "deletedUserId": target_id, "email": target.email }));
        audit::append_audit(&mut tx, &entry, now).await?;
        users::delete_user(&mut tx, target_id).await?;
        anyhow::Ok(())
    };
    if let Err(err) = apply.await {
        error!("Failed to delete user: {err}");
        let _ = tx.rollback().await;
        return internal_error("Failed to delete user");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit user deletion: {err}");
        return internal_error("Failed to delete user");
    }

    StatusCode::OK.into_response()
}

#[utoipa::path(
    post,
    path = "/auth/admin/users/delete-non-admins",
    responses(
        (status = 200, description = "Non-admin accounts removed", body = BulkDeletedResponse),
        (status = 403, description = "Forbidden", body = String)
    ),
    tag = "admin"
)]
pub async fn delete_non_admins(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let meta = request_meta(&headers);
    let now = state.now();

    let result = async {
        let mut tx = pool.begin().await?;
        let deleted = users::delete_non_admin_users(&mut tx).await?;
        let entry = AuditEntry::new(AuditAction::UsersBulkDeleted, None)
            .performed_by(admin.user_id)
            .resource("user")
            .request_meta(&meta)
            .metadata(json!({ "scope": "non_admins", "deletedCount": deleted }));
        audit::append_audit(&mut tx, &entry, now).await?;
        tx.commit().await?;
        anyhow::Ok(deleted)
    };

    match result.await {
        Ok(deleted_count) => (
            StatusCode::OK,
            Json(BulkDeletedResponse {
                message: "Non-admin accounts removed".to_string(),
                deleted_count,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed bulk delete of non-admins: {err}");
            internal_error("Failed to delete users")
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/admin/users/delete-all",
    request_body = BulkDeleteRequest,
    responses(
        (status = 200, description = "All other accounts removed", body = BulkDeletedResponse),
        (status = 400, description = "Missing confirmation literal", body = String)
    ),
    tag = "admin"
)]
pub async fn delete_all_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<BulkDeleteRequest>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let confirmed = payload
        .as_ref()
        .is_some_and(|Json(request)| request.confirmation == BULK_DELETE_CONFIRMATION);
    if !confirmed {
        return (
            StatusCode::BAD_REQUEST,
            format!("Confirmation literal {BULK_DELETE_CONFIRMATION} required"),
        )
            .into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let result = async {
        let mut tx = pool.begin().await?;
        // The caller's own row is always excluded.
        let deleted = users::delete_users_except(&mut tx, admin.user_id).await?;
        let entry = AuditEntry::new(AuditAction::UsersBulkDeleted, None)
            .performed_by(admin.user_id)
            .resource("user")
            .request_meta(&meta)
            .metadata(json!({ "scope": "all_except_caller", "deletedCount": deleted }));
        audit::append_audit(&mut tx, &entry, now).await?;
        tx.commit().await?;
        anyhow::Ok(deleted)
    };

    match result.await {
        Ok(deleted_count) => (
            StatusCode::OK,
            Json(BulkDeletedResponse {
                message: "All other accounts removed".to_string(),
                deleted_count,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed bulk delete of all users: {err}");
            internal_error("Failed to delete users")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};

    #[tokio::test]
    async fn admin_endpoints_require_auth() {
        let response = list_users(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            Query(PageParams::default()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = delete_non_admins(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn confirmation_literal_is_exact() {
        assert_eq!(BULK_DELETE_CONFIRMATION, "DELETE_ALL_USERS");
    }
}
