//! Status and control HTTP server
//!
//! Exposes job snapshots, recordings and recent log lines as JSON, plus
//! start/stop/restart endpoints that map onto the registry operations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::job::JobSnapshot;
use crate::logbook::{LogBook, LogChannel};
use crate::recordings::{list_recordings, Recording};
use crate::registry::{JobRegistry, RegistryError};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Shared state behind every handler.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub registry: Arc<JobRegistry>,
    pub logbook: Arc<LogBook>,
    pub output_root: PathBuf,
}

/// Registry errors as HTTP responses.
struct ApiError(RegistryError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RegistryError::UnknownJob(_) => StatusCode::NOT_FOUND,
            RegistryError::DuplicateJob(_) => StatusCode::CONFLICT,
            RegistryError::Preflight(_) => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::InvalidCompression(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    channel: Option<LogChannel>,
}

/// Handler for GET /jobs
async fn list_jobs(State(state): State<ApiState>) -> Json<Vec<JobSnapshot>> {
    Json(state.registry.snapshots().await)
}

/// Handler for GET /jobs/:name
async fn get_job(State(state): State<ApiState>, Path(name): Path<String>) -> Result<Json<JobSnapshot>, ApiError> {
    state
        .registry
        .snapshot(&name)
        .await
        .map(Json)
        .ok_or(ApiError(RegistryError::UnknownJob(name)))
}

/// Handler for GET /jobs/:name/recordings
async fn get_recordings(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Recording>>, ApiError> {
    if !state.registry.contains(&name).await {
        return Err(ApiError(RegistryError::UnknownJob(name)));
    }
    let root = state.output_root.clone();
    let recordings = tokio::task::spawn_blocking(move || list_recordings(&root, &name))
        .await
        .unwrap_or_default();
    Ok(Json(recordings))
}

async fn start_job(State(state): State<ApiState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    state.registry.start(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_job(State(state): State<ApiState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    state.registry.stop(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restart_job(State(state): State<ApiState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    state.registry.restart(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /logs?channel=app|process (defaults to app)
async fn get_logs(State(state): State<ApiState>, Query(query): Query<LogQuery>) -> Json<Vec<String>> {
    Json(state.logbook.recent(query.channel.unwrap_or(LogChannel::App)))
}

/// Creates the axum Router with all status and control endpoints
pub fn create_status_router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:name", get(get_job))
        .route("/jobs/:name/recordings", get(get_recordings))
        .route("/jobs/:name/start", post(start_job))
        .route("/jobs/:name/stop", post(stop_job))
        .route("/jobs/:name/restart", post(restart_job))
        .route("/logs", get(get_logs))
        .with_state(state)
}

/// Bind the status server's listener
///
/// Done before any job starts so a bad address fails startup.
pub async fn bind_status_listener(bind: &str) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serve on an already bound listener until `shutdown` is cancelled
pub async fn serve_status(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("status server listening on http://{}", addr);
    }
    axum::serve(listener, create_status_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Runs the status server until `shutdown` is cancelled
///
/// # Arguments
/// * `bind` - Address to listen on, e.g. `127.0.0.1:7879`
/// * `state` - Handler state
/// * `shutdown` - Cancelled when the daemon shuts down
///
/// # Returns
/// * `Ok(())` if server shuts down gracefully
/// * `Err(ServerError)` if the address is invalid or cannot be bound
pub async fn run_status_server(
    bind: &str,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = bind_status_listener(bind).await?;
    serve_status(listener, state, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::event_channel;
    use crate::job::JobState;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(root: &std::path::Path) -> ApiState {
        let mut config = Config::default();
        config.output.root = root.to_path_buf();
        config.capture.program = root.join("missing-capture").to_string_lossy().into_owned();
        config.supervisor.probe_timeout_secs = 2;
        let (sink, _rx) = event_channel();
        ApiState {
            registry: Arc::new(JobRegistry::new(&config, sink)),
            logbook: Arc::new(LogBook::default()),
            output_root: root.to_path_buf(),
        }
    }

    async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_list_jobs_returns_sorted_snapshots() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        state.registry.add("zeta", "https://example.com/z", 1).await.unwrap();
        state.registry.add("alpha", "https://example.com/a", 0).await.unwrap();

        let (status, body) = call(create_status_router(state), Method::GET, "/jobs").await;
        assert_eq!(status, StatusCode::OK);
        let jobs: Vec<JobSnapshot> = serde_json::from_slice(&body).unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(jobs[0].state, JobState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let dir = TempDir::new().unwrap();
        let app = create_status_router(state(dir.path()));

        for (method, uri) in [
            (Method::GET, "/jobs/nope"),
            (Method::GET, "/jobs/nope/recordings"),
            (Method::POST, "/jobs/nope/start"),
            (Method::POST, "/jobs/nope/stop"),
            (Method::POST, "/jobs/nope/restart"),
        ] {
            let (status, _) = call(app.clone(), method, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_start_with_missing_tool_is_503() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        state.registry.add("a", "https://example.com/a", 1).await.unwrap();
        let app = create_status_router(state.clone());

        let (status, body) = call(app.clone(), Method::POST, "/jobs/a/start").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(String::from_utf8(body).unwrap().contains("missing-capture"));
        assert_eq!(state.registry.snapshot("a").await.unwrap().state, JobState::Stopped);

        let (status, _) = call(app, Method::POST, "/jobs/a/stop").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_recordings_listed_for_job() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        state.registry.add("a", "https://example.com/a", 1).await.unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a").join("a_20240101_000000.mp4"), b"abc").unwrap();

        let (status, body) = call(create_status_router(state), Method::GET, "/jobs/a/recordings").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["file_name"], "a_20240101_000000.mp4");
        assert_eq!(json[0]["size_bytes"], 3);
        assert_eq!(json[0]["size"], "3.0 B");
    }

    #[tokio::test]
    async fn test_logs_by_channel() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        state.logbook.push(LogChannel::App, "Added stream: a");
        state.logbook.push(LogChannel::Process, "[a] hello");
        let app = create_status_router(state);

        let (status, body) = call(app.clone(), Method::GET, "/logs").await;
        assert_eq!(status, StatusCode::OK);
        let app_lines: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(app_lines.len(), 1);
        assert!(app_lines[0].ends_with("Added stream: a"));

        let (_, body) = call(app.clone(), Method::GET, "/logs?channel=process").await;
        let process_lines: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert!(process_lines[0].ends_with("[a] hello"));

        let (status, _) = call(app, Method::GET, "/logs?channel=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let listener = bind_status_listener("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve_status(listener, state(dir.path()), shutdown.clone()));
        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let dir = TempDir::new().unwrap();
        let err = run_status_server("not-an-address", state(dir.path()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress(_)));
    }
}
