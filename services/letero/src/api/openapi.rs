use super::handlers::{email, health};
use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(email::verification::send_verification))
        .routes(routes!(email::verification::verify_email))
        .routes(routes!(email::verification::resend_verification))
        .routes(routes!(email::reset::forgot_password))
        .routes(routes!(email::reset::reset_password))
        .routes(routes!(email::magic::send_magic_link));

    let mut email_tag = Tag::new("email");
    email_tag.description =
        Some("Transactional delivery and out-of-band token flows".to_string());
    router.get_openapi_mut().tags = Some(vec![email_tag]);

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_covers_email_paths() {
        let spec = openapi();
        for path in [
            "/health",
            "/email/send-verification",
            "/email/verify-email",
            "/email/resend-verification",
            "/email/forgot-password",
            "/email/reset-password",
            "/email/send-magic-link",
        ] {
            assert!(
                spec.paths.paths.contains_key(path),
                "missing path {path} in OpenAPI spec"
            );
        }
    }
}
