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
use identity_store::SystemClock;
use identity_token::{OutOfBandKind, OutOfBandSigner};
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

pub mod handlers;
mod openapi;

pub use openapi::openapi;

use crate::audit_client::AuditClient;
use crate::mail::{MailConfig, Mailer};
use handlers::email::{EmailConfig, EmailState};

const REQUEST_DEADLINE: Duration = Duration::from_secs(30);
const POOL_MAX_CONNECTIONS: u32 = 20;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything needed to bring the email service up.
pub struct ServeArgs {
    pub port: u16,
    pub dsn: String,
    pub client_url: String,
    pub auth_service_url: String,
    pub email_token_secret: SecretString,
    pub verification_token_expiry: ChronoDuration,
    pub reset_token_expiry: ChronoDuration,
    pub internal_auth_secret: SecretString,
    pub mail: MailConfig,
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

        let oob = OutOfBandSigner::new(self.email_token_secret.expose_secret())
            .context("Invalid email token secret")?
            .with_ttl(OutOfBandKind::Verification, self.verification_token_expiry)
            .with_ttl(OutOfBandKind::PasswordReset, self.reset_token_expiry);

        let mailer = Mailer::from_config(&self.mail)?;
        // Probe the transport once; a failure is operator information, not a
        // startup abort.
        if mailer.probe().await {
            info!("SMTP transport verified");
        } else {
            warn!("SMTP transport verification failed; sends will be retried per request");
        }

        let audit = AuditClient::new(&self.auth_service_url, self.internal_auth_secret)?;
        let email_config = EmailConfig::new(self.client_url.clone(), self.mail.sender_header());
        let email_state = Arc::new(EmailState::new(
            email_config,
            oob,
            mailer,
            audit,
            Arc::new(SystemClock),
        ));

        let cors = cors_layer(&self.client_url)?;

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
                .layer(Extension(email_state))
                .layer(Extension(pool.clone())),
        );

        let listener = TcpListener::bind(format!("::0:{}", self.port)).await?;
        info!("Listening on [::]:{}", self.port);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

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

fn cors_layer(client_url: &str) -> Result<CorsLayer> {
    let parsed =
        Url::parse(client_url).with_context(|| format!("Invalid client URL: {client_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Client URL must include a valid host: {client_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    let origin = HeaderValue::from_str(&origin).context("Failed to build origin header")?;

    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_layer_accepts_valid_client_url() {
        assert!(cors_layer("http://localhost:3000").is_ok());
        assert!(cors_layer("not a url").is_err());
    }
}
