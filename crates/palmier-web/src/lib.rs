//! Axum control API: trigger a crawl, read run status and crawl logs, and
//! run the maintenance passes on demand.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use palmier_core::CrawlLog;
use palmier_storage::{decode, ListQuery, RecordStore, Sort, CRAWL_LOGS};
use palmier_sync::{run_status, RunCoordinator, RunStatus, SyncPipeline};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "palmier-web";

const RECENT_LOGS: u32 = 20;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PALMIER_WEB_HOST").unwrap_or(defaults.host),
            port: std::env::var("PALMIER_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub coordinator: Arc<RunCoordinator>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>, coordinator: Arc<RunCoordinator>) -> Self {
        Self {
            pipeline,
            coordinator,
        }
    }
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    message: String,
    job_id: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/crawl/trigger", post(trigger_handler))
        .route("/crawl/status", get(status_handler))
        .route("/crawl/logs", get(logs_handler))
        .route("/crawl/dedup", post(dedup_handler))
        .route("/crawl/check-urls", post(check_urls_handler))
        .with_state(Arc::new(state))
}

/// Serve the control API until the listener fails.
pub async fn serve(state: AppState, web: &WebConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((web.host.as_str(), web.port))
        .await
        .with_context(|| format!("binding {}:{}", web.host, web.port))?;
    info!(host = %web.host, port = web.port, "control API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn trigger_handler(State(state): State<Arc<AppState>>) -> Json<TriggerResponse> {
    let job_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    let Some(guard) = state.coordinator.try_start() else {
        return Json(TriggerResponse {
            message: "Crawl already in progress".to_string(),
            job_id,
        });
    };

    info!(%job_id, "crawl triggered");
    // Owned by the run task, not the request.
    let pipeline = Arc::clone(&state.pipeline);
    let run = tokio::spawn(async move {
        let summary = pipeline.run_once().await;
        guard.finish(run_status(&summary));
    });
    let message = match run.await {
        Ok(()) => "Crawl completed".to_string(),
        Err(err) => {
            warn!(%job_id, error = %err, "crawl task failed");
            format!("Crawl failed: {err}")
        }
    };
    Json(TriggerResponse { message, job_id })
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<RunStatus> {
    Json(state.coordinator.status())
}

async fn logs_handler(State(state): State<Arc<AppState>>) -> Response {
    let query = ListQuery::default()
        .page(1, RECENT_LOGS)
        .sorted(Sort::desc("started_at"));
    match state.pipeline.store().list(CRAWL_LOGS, &query).await {
        Ok(page) => {
            let logs: Vec<CrawlLog> = page
                .items
                .into_iter()
                .filter_map(|record| decode(record).ok())
                .collect();
            Json(logs).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn dedup_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.purge_duplicates().await {
        Ok(purged) => Json(json!({"message": format!("Purged {purged} duplicates")})).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn check_urls_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.check_urls().await {
        Ok(expired) => Json(json!({
            "message": format!("Expired {expired} events with dead URLs")
        }))
        .into_response(),
        Err(err) => server_error(err.into()),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
        .into_response()
}
