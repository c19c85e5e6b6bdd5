//! Axum + Askama front end for Find My Lab: public pages, editor preview and
//! the JSON API over the Opportunities collection.

pub mod api;
pub mod cache;
pub mod config;
pub mod listing;
pub mod views;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use findmylab_store::Collection;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use cache::{CachedPage, PageCache};
pub use config::WebConfig;
pub use listing::{load_listing, ListingCard, ListingError};

pub const CRATE_NAME: &str = "findmylab-web";

#[derive(Clone)]
pub struct AppState {
    pub collection: Arc<Collection>,
    pub cache: Arc<PageCache>,
    pub config: WebConfig,
}

impl AppState {
    pub fn new(collection: Arc<Collection>, cache: Arc<PageCache>, config: WebConfig) -> Self {
        Self {
            collection,
            cache,
            config,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(views::home_handler))
        .route("/opportunities", get(views::listing_handler))
        .route("/opportunity/{slug}", get(views::detail_handler))
        .route("/next/preview", get(views::preview_handler))
        .route(
            "/api/opportunities",
            get(api::list_opportunities).post(api::create_opportunity),
        )
        .route(
            "/api/opportunities/{id}",
            get(api::get_opportunity)
                .patch(api::update_opportunity)
                .delete(api::delete_opportunity),
        )
        .route("/api/opportunities/{id}/autosave", post(api::autosave_opportunity))
        .route("/api/opportunities/{id}/publish", post(api::publish_opportunity))
        .route("/api/opportunities/{id}/unpublish", post(api::unpublish_opportunity))
        .route("/api/opportunities/{id}/versions", get(api::list_versions))
        .route(
            "/api/opportunities/{id}/versions/{version_id}/restore",
            post(api::restore_version),
        )
        .route("/api/opportunities/{id}/schedule", post(api::schedule_opportunity))
        .route("/api/schema/opportunities", get(api::opportunities_schema))
        .route("/api/departments", get(api::list_departments))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serves until Ctrl-C, then lets in-flight requests finish.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    serve_until(state, shutdown_signal()).await
}

pub async fn serve_until<F>(state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = state.config.port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding web port {port}"))?;
    info!(port = listener.local_addr()?.port(), "findmylab web listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("findmylab web stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Serves an existing collection with configuration taken from the
/// environment and a fresh page cache.
pub async fn serve_from_env(collection: Arc<Collection>) -> anyhow::Result<()> {
    let state = AppState::new(collection, Arc::new(PageCache::new()), WebConfig::from_env());
    serve(state).await
}
