pub mod accounts;
pub mod error;
pub mod files;
pub mod ws;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::accounts::DbAccountStore;
use crate::config::SyncConfig;
use crate::publish::TopicHub;
use crate::store::blob::BlobStore;
use crate::store::DbIngestionStore;
use crate::sync::scheduler::SyncScheduler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<DbAccountStore>,
    pub store: Arc<DbIngestionStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub scheduler: Arc<SyncScheduler>,
    pub hub: Arc<TopicHub>,
    pub sync: SyncConfig,
}

async fn log_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let res = next.run(req).await;
    tracing::info!("{} {} -> {}", method, uri, res.status());
    res
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/accounts", post(accounts::register))
        .route(
            "/accounts/:id/sync",
            post(accounts::trigger_sync).get(accounts::sync_status),
        )
        .route("/files/:id", get(files::download))
        .route("/ws/msg", get(ws::subscribe))
        .layer(middleware::from_fn(log_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
