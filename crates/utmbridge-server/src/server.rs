use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use utmbridge_crm::{
    CrmClient, CrmError, FileCredentialStore, LeadApi, OAuthRefresher, TokenRefresher,
};

use crate::{config::AppConfig, handlers, reconcile::ReconcileEngine, webhook};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconcileEngine>,
}

impl AppState {
    pub fn new(engine: ReconcileEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Wires the CRM client, credential file and optional refresher from config.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, CrmError> {
        let crm: Arc<dyn LeadApi> = Arc::new(CrmClient::new(cfg.crm_client_config())?);
        let store = Arc::new(FileCredentialStore::new(cfg.credentials.path.clone()));
        let refresher = match cfg.oauth_client_config() {
            Some(oauth) => Some(Arc::new(OAuthRefresher::new(oauth)?) as Arc<dyn TokenRefresher>),
            None => None,
        };

        let engine = ReconcileEngine::new(crm, store, refresher, cfg.reconcile_policy());
        Ok(Self::new(engine))
    }
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(&cfg.server.webhook_path, post(webhook::receive))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct UtmbridgeServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn build(self) -> Result<UtmbridgeServer, CrmError> {
        let state = AppState::from_config(&self.config)?;
        tracing::info!(
            refresh_enabled = state.engine.can_refresh(),
            max_attempts = state.engine.policy().max_attempts,
            poll_interval_ms = state.engine.policy().poll_interval.as_millis() as u64,
            webhook_path = %self.config.server.webhook_path,
            "Reconciliation engine ready"
        );

        Ok(UtmbridgeServer {
            addr: self.config.addr(),
            app: build_app(&self.config, state),
        })
    }
}

impl UtmbridgeServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
