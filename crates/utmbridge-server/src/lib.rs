pub mod config;
pub mod handlers;
pub mod observability;
pub mod reconcile;
pub mod server;
pub mod webhook;

pub use config::AppConfig;
pub use observability::init_tracing;
pub use reconcile::{ReconcileEngine, ReconcileError, ReconcilePolicy, Reconciled};
pub use server::{AppState, ServerBuilder, UtmbridgeServer, build_app};
pub use webhook::{Submission, WebhookError, parse_submission};
