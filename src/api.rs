//! Status and administration HTTP API
//!
//! - `GET /repos`: snapshot of tracked repositories, status-page order
//! - `POST /repos` `{ "repo": "<url>" }`: start tracking a repository
//! - `DELETE /repos` `{ "repo": "<url>" }`: stop tracking a repository
//!
//! Writes go through [`RepoStore`] and take effect on the next poll cycle.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::store::{status_order, Repo, RepoStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RepoStore>,
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => ApiError::BadRequest(msg),
            Error::NotFound(url) => ApiError::NotFound(format!("{} is not tracked", url)),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct RepoRequest {
    repo: String,
}

fn parse_request(body: &Bytes) -> ApiResult<RepoRequest> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed request body: {}", e)))
}

/// Create the API router
pub fn create_router(store: Arc<RepoStore>) -> Router {
    Router::new()
        .route("/repos", get(list_repos).post(add_repo).delete(remove_repo))
        .with_state(AppState { store })
        .layer(TraceLayer::new_for_http())
}

/// GET /repos
async fn list_repos(State(state): State<AppState>) -> Json<Vec<Repo>> {
    let mut repos = state.store.snapshot().await.repos;
    repos.sort_by(status_order);
    Json(repos)
}

/// POST /repos
async fn add_repo(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let request = parse_request(&body)?;
    tracing::info!("Adding repository: {}", request.repo);

    state.store.add(&request.repo).await?;
    Ok(Json(json!({})))
}

/// DELETE /repos
async fn remove_repo(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let request = parse_request(&body)?;
    tracing::info!("Removing repository: {}", request.repo);

    state.store.remove(&request.repo).await?;
    Ok(Json(json!({})))
}
