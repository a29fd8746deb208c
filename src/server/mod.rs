//! HTTP/JSON submission surface.
//!
//! Routes:
//! - `POST   /api/jobs`              submit a [`GenerationRequest`], `202` with the job id
//! - `GET    /api/jobs`              list (`limit`, `cursor`, `owner` query params)
//! - `GET    /api/jobs/{id}`         poll one job
//! - `DELETE /api/jobs/{id}`         cancel a running job
//! - `GET    /files/{job}/{name}`    stored artifacts

use crate::jobs::{JobStatus, StoreError, SubmitError, TaskManager};
use crate::pipeline::request::GenerationRequest;
use crate::storage::LocalObjectStorage;

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Request bodies above this are refused before parsing.
const MAX_BODY_SIZE: u64 = 2 * 1024 * 1024;
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address '{0}'")]
    Address(String),
    #[error("failed to bind: {0}")]
    Bind(#[from] warp::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix for artifact URLs handed back to callers.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8420
}

fn default_public_base_url() -> String {
    format!("http://127.0.0.1:{}", default_port())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|_| ServerError::Address(format!("{}:{}", self.bind_address, self.port)))
    }
}

/// Everything a handler needs.
#[derive(Clone)]
pub struct AppState {
    pub manager: TaskManager,
    pub storage: Arc<LocalObjectStorage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobAck {
    job_id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    cursor: Option<String>,
    owner: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListBody {
    jobs: Vec<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
}

/// All routes, ready for `warp::serve` or `warp::test`.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_state = warp::any().map(move || state.clone());

    let submit = warp::path!("api" / "jobs")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_SIZE))
        .and(warp::body::json())
        .and(with_state.clone())
        .then(submit_job);

    let list = warp::path!("api" / "jobs")
        .and(warp::get())
        .and(warp::query::<ListQuery>())
        .and(with_state.clone())
        .then(list_jobs);

    let status = warp::path!("api" / "jobs" / String)
        .and(warp::get())
        .and(with_state.clone())
        .then(job_status);

    let cancel = warp::path!("api" / "jobs" / String)
        .and(warp::delete())
        .and(with_state.clone())
        .then(cancel_job);

    let files = warp::path!("files" / String / String)
        .and(warp::get())
        .and(with_state)
        .then(serve_file);

    submit
        .or(list)
        .unify()
        .or(status)
        .unify()
        .or(cancel)
        .unify()
        .or(files)
        .unify()
        .recover(handle_rejection)
        .unify()
        .with(warp::log::custom(|info| {
            tracing::debug!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                elapsed_ms = info.elapsed().as_millis() as u64,
                "request"
            );
        }))
}

/// Bind the listener and return its address plus the server future, which
/// resolves once `shutdown` fires and in-flight requests drain.
pub fn bind(
    config: &ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), ServerError> {
    let addr = config.socket_addr()?;
    let (bound, server) =
        warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    tracing::info!(address = %bound, "HTTP server listening");
    Ok((bound, server))
}

// ── Handlers ───────────────────────────────────────────

async fn submit_job(request: GenerationRequest, state: AppState) -> Response {
    match state.manager.submit(request).await {
        Ok(job_id) => json_reply(
            &JobAck {
                job_id,
                status: "submitted".to_string(),
            },
            StatusCode::ACCEPTED,
        ),
        Err(e) => {
            let code = match &e {
                SubmitError::Capacity(_) | SubmitError::ShuttingDown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SubmitError::Invalid(_) => StatusCode::BAD_REQUEST,
                SubmitError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if code == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!(error = %e, "job submission failed");
            }
            error_reply(code, e.to_string())
        }
    }
}

async fn list_jobs(query: ListQuery, state: AppState) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    match state
        .manager
        .list(query.owner.as_deref(), limit, query.cursor.as_deref())
        .await
    {
        Ok(page) => json_reply(
            &ListBody {
                jobs: page.jobs.iter().map(|job| job.status()).collect(),
                next_cursor: page.next_cursor,
            },
            StatusCode::OK,
        ),
        Err(e) => store_error_reply(e),
    }
}

async fn job_status(id: String, state: AppState) -> Response {
    match state.manager.get(&id).await {
        Ok(Some(job)) => json_reply(&job.status(), StatusCode::OK),
        Ok(None) => error_reply(StatusCode::NOT_FOUND, format!("job '{}' not found", id)),
        Err(e) => store_error_reply(e),
    }
}

async fn cancel_job(id: String, state: AppState) -> Response {
    match state.manager.cancel(&id).await {
        Ok(true) => json_reply(
            &JobAck {
                job_id: id,
                status: "cancelling".to_string(),
            },
            StatusCode::ACCEPTED,
        ),
        Ok(false) => error_reply(
            StatusCode::CONFLICT,
            format!("job '{}' has already finished", id),
        ),
        Err(e) => store_error_reply(e),
    }
}

/// Serve a stored artifact. Names that could leave the storage root are 404.
async fn serve_file(job_id: String, name: String, state: AppState) -> Response {
    let Some(path) = state.storage.resolve(&job_id, &name) else {
        return error_reply(StatusCode::NOT_FOUND, "not found");
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mut response = Response::new(bytes.into());
            let headers = response.headers_mut();
            headers.insert(
                warp::http::header::CONTENT_TYPE,
                warp::http::HeaderValue::from_static(content_type(&path)),
            );
            headers.insert(
                warp::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
                warp::http::HeaderValue::from_static("*"),
            );
            response
        }
        Err(_) => error_reply(StatusCode::NOT_FOUND, "not found"),
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

// ── Replies ────────────────────────────────────────────

fn json_reply<T: Serialize>(body: &T, code: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), code).into_response()
}

fn error_reply(code: StatusCode, message: impl Into<String>) -> Response {
    json_reply(
        &ErrorBody {
            error: message.into(),
        },
        code,
    )
}

fn store_error_reply(e: StoreError) -> Response {
    match e {
        StoreError::NotFound(id) => {
            error_reply(StatusCode::NOT_FOUND, format!("job '{}' not found", id))
        }
        other => {
            tracing::error!(error = %other, "job store error");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("malformed request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected a JSON body".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        tracing::warn!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(error_reply(code, message))
}
