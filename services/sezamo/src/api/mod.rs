use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use chrono::Duration as ChronoDuration;
use identity_store::{SystemClock, sweeper};
use identity_token::{OutOfBandKind, OutOfBandSigner, TokenCodec};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod email_client;
pub mod handlers;
mod openapi;

pub use openapi::openapi;

use handlers::auth::{AuthConfig, AuthState};

const REQUEST_DEADLINE: Duration = Duration::from_secs(30);
const POOL_MAX_CONNECTIONS: u32 = 20;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything needed to bring the auth service up.
pub struct ServeArgs {
    pub port: u16,
    pub dsn: String,
    pub jwt_access_secret: SecretString,
    pub jwt_refresh_secret: SecretString,
    pub email_token_secret: SecretString,
    pub access_token_expires: ChronoDuration,
    pub refresh_token_expires: ChronoDuration,
    pub magic_link_token_expiry: ChronoDuration,
    pub internal_auth_secret: SecretString,
    pub sweep_interval_seconds: u64,
    pub auth_config: AuthConfig,
}

impl ServeArgs {
    /// Start the server and block until shutdown.
    ///
    /// # Errors
    /// Returns an error if configuration is invalid, the database is
    /// unreachable, or the listener cannot bind.
    pub async fn serve(self) -> Result<()> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(POOL_MAX_CONNECTIONS)
            .test_before_acquire(true)
            .connect(&self.dsn)
            .await
            .context("Failed to connect to database")?;

        let codec = TokenCodec::new(
            self.jwt_access_secret.expose_secret(),
            self.jwt_refresh_secret.expose_secret(),
            self.access_token_expires,
            self.refresh_token_expires,
        )
        .context("Invalid JWT secrets")?;
        let oob = OutOfBandSigner::new(self.email_token_secret.expose_secret())
            .context("Invalid email token secret")?
            .with_ttl(OutOfBandKind::MagicLink, self.magic_link_token_expiry);
        let email = email_client::EmailClient::new(self.auth_config.email_service_url())?;

        let clock = Arc::new(SystemClock);
        let sweeper_config = sweeper::SweeperConfig::new()
            .with_interval_seconds(self.sweep_interval_seconds)
            .with_audit_retention_days(self.auth_config.audit_retention_days());

        let cors = cors_layer(&self.auth_config)?;
        let auth_state = Arc::new(AuthState::new(
            self.auth_config,
            codec,
            oob,
            email,
            self.internal_auth_secret,
            clock.clone(),
        ));

        // One maintenance task per process: expired tokens, stale sessions,
        // audit retention.
        sweeper::spawn_sweeper(pool.clone(), clock, sweeper_config);

        let (router, _openapi) = router().split_for_parts();
        let app = router.layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(TimeoutLayer::new(REQUEST_DEADLINE))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(pool.clone())),
        );

        let listener = TcpListener::bind(format!("::0:{}", self.port)).await?;
        info!("Listening on [::]:{}", self.port);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // Drained; release the pool before exit.
        pool.close().await;
        info!("Gracefully shutdown");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to install SIGINT handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight requests");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors_layer(config: &AuthConfig) -> Result<CorsLayer> {
    let mut origins = vec![origin_header(config.client_url())?];
    for extra in config.allowed_origins() {
        origins.push(origin_header(extra)?);
    }

    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

fn origin_header(base_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(base_url).with_context(|| format!("Invalid origin URL: {base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Origin URL must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_header_strips_path_and_keeps_port() {
        let origin = origin_header("http://localhost:3000/app/").expect("origin");
        assert_eq!(origin.to_str().expect("ascii"), "http://localhost:3000");

        let origin = origin_header("https://app.sezamo.dev").expect("origin");
        assert_eq!(origin.to_str().expect("ascii"), "https://app.sezamo.dev");
    }

    #[test]
    fn origin_header_rejects_junk() {
        assert!(origin_header("not a url").is_err());
    }
}
