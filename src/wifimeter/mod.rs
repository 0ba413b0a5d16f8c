use crate::{
    auth::{AuthConfig, AuthProtocol, Credentials, TokenService},
    catalog::PlanCatalog,
    clock::Clock,
    ledger::Ledger,
    metering::{ActiveSessions, MeterConfig, Metering, QuotaMeter},
    notify::Notifier,
    registration::Registrations,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{delete, get, post, put},
    Extension, Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal, sync::broadcast};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::ApiDoc;

use handlers::{auth, health, plans, register, usage, wallet};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Everything the handlers need, wired over one ledger, one clock and one
/// set of active metering sessions.
pub struct Services {
    pub auth: Arc<AuthProtocol>,
    pub registrations: Arc<Registrations>,
    pub catalog: Arc<PlanCatalog>,
    pub metering: Arc<Metering>,
    pub ledger: Arc<dyn Ledger>,
    pub sessions: Arc<ActiveSessions>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        tokens: TokenService,
        auth_config: AuthConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        credentials: Credentials,
    ) -> Self {
        let sessions = Arc::new(ActiveSessions::new());

        let auth = AuthProtocol::new(
            auth_config,
            tokens,
            ledger.clone(),
            sessions.clone(),
            notifier,
            clock.clone(),
        )
        .with_credentials(credentials.clone());

        let registrations =
            Registrations::new(ledger.clone(), clock.clone()).with_credentials(credentials);

        Self {
            auth: Arc::new(auth),
            registrations: Arc::new(registrations),
            catalog: Arc::new(PlanCatalog::new(ledger.clone(), clock.clone())),
            metering: Arc::new(Metering::new(ledger.clone(), sessions.clone(), clock.clone())),
            ledger,
            sessions,
            clock,
        }
    }

    /// Background meter over the same sessions and ledger.
    #[must_use]
    pub fn quota_meter(&self, config: MeterConfig) -> QuotaMeter {
        QuotaMeter::new(
            self.ledger.clone(),
            self.sessions.clone(),
            self.clock.clone(),
            config,
        )
    }
}

/// API routes with their service extensions, without transport layers.
pub fn router(services: &Services) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/register", post(register::register))
        .route("/isp/registrations", get(register::list_pending))
        .route("/isp/registrations/:id/approve", post(register::approve))
        .route("/isp/registrations/:id", delete(register::reject))
        .route("/login", post(auth::login))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/verify-token", post(auth::verify_token))
        .route("/logout", post(auth::logout))
        .route("/update-wallet", post(wallet::update_wallet))
        .route("/wifi-plans", get(plans::list_plans).post(plans::create_plan))
        .route(
            "/wifi-plans/:id",
            put(plans::update_plan).delete(plans::delete_plan),
        )
        .route("/purchase-plan", post(usage::purchase_plan))
        .route(
            "/data-usage",
            get(usage::usage_history).post(usage::log_usage),
        )
        .route("/isp/data-usage", get(usage::usage_timeline))
        .route("/isp/log-data-usage", post(usage::log_usage_for))
        .layer(Extension(services.auth.clone()))
        .layer(Extension(services.registrations.clone()))
        .layer(Extension(services.catalog.clone()))
        .layer(Extension(services.metering.clone()))
        .layer(Extension(services.ledger.clone()))
}

/// Serve the API until ctrl-c or SIGTERM, running the quota meter alongside.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn new(port: u16, services: Services, meter_config: MeterConfig) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any);

    let app = router(&services)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let meter = Arc::new(services.quota_meter(meter_config)).spawn(shutdown_rx);

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // The meter may already be gone; a send error only means no receiver.
    let _ = shutdown_tx.send(());
    if let Err(err) = meter.await {
        error!("quota meter task failed: {err}");
    }

    served?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }

    info!("Gracefully shutdown");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{password::tests::cheap, protocol::tests::RecordingNotifier, token::tests::service},
        clock::ManualClock,
        ledger::{MemoryLedger, NewPurchase},
    };
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn bind_failure_leaves_no_meter_running() {
        let Ok(taken) = TcpListener::bind("[::]:0").await else {
            return;
        };
        let port = taken.local_addr().unwrap().port();

        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let services = Services::new(
            ledger.clone(),
            service(),
            AuthConfig::new(),
            Arc::new(RecordingNotifier::default()),
            clock.clone(),
            cheap(),
        );
        let identity = Uuid::new_v4();
        ledger
            .create_purchase(NewPurchase {
                identity_id: identity,
                plan_id: Uuid::new_v4(),
                capacity: 1000.0,
                price: 1.0,
                purchased_at: clock.now(),
            })
            .await
            .unwrap();
        services.sessions.insert(identity).await;
        let sessions = services.sessions.clone();

        let config = MeterConfig::new().with_interval(Duration::from_millis(20));
        assert!(new(port, services, config).await.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ledger.usage_history(identity).await.unwrap().is_empty());
        assert!(sessions.contains(identity).await);
    }

    #[test]
    fn user_agent_carries_name_and_version() {
        assert_eq!(
            APP_USER_AGENT,
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        );
    }
}
