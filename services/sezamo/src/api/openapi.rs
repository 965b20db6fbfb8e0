use super::handlers::{auth, health};
use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated spec.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::refresh::refresh))
        .routes(routes!(auth::refresh::logout))
        .routes(routes!(auth::me::profile))
        .routes(routes!(auth::me::audit_me))
        .routes(routes!(auth::magic_link::magic_link_request))
        .routes(routes!(auth::magic_link::magic_link_verify))
        .routes(routes!(auth::sessions::list_sessions))
        .routes(routes!(auth::sessions::revoke_session))
        .routes(routes!(auth::sessions::logout_other_devices))
        .routes(routes!(auth::sessions::logout_all_devices))
        .routes(routes!(auth::gdpr::export_data))
        .routes(routes!(auth::gdpr::anonymize))
        .routes(routes!(auth::gdpr::update_email))
        .routes(routes!(auth::admin::list_users))
        .routes(routes!(auth::admin::change_role))
        .routes(routes!(auth::admin::delete_user))
        .routes(routes!(auth::admin::delete_non_admins))
        .routes(routes!(auth::admin::delete_all_users))
        .routes(routes!(auth::gdpr::permanent_delete))
        .routes(routes!(auth::audit_log::admin_audit))
        .routes(routes!(auth::audit_log::internal_audit_log));

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Credential and magic-link authentication".to_string());
    let mut sessions_tag = Tag::new("sessions");
    sessions_tag.description = Some("Session registry and revocation".to_string());
    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Administrative user and audit surface".to_string());
    let mut gdpr_tag = Tag::new("gdpr");
    gdpr_tag.description = Some("Data subject rights".to_string());

    router.get_openapi_mut().tags = Some(vec![auth_tag, sessions_tag, admin_tag, gdpr_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    OpenApiBuilder::new().info(info).build()
}
