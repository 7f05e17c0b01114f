//! HTTP routes: one handler per `spec.md` §6 operation, each a direct call
//! into a core component.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::errors::CoreError;
use crate::screen::{KeystrokeRequest, ScreenMode};

use super::state::AppState;

/// Build the full router over `state`.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard))
        .route("/providers/{provider_id}/snapshot", get(get_provider_snapshot))
        .route("/panes/{pane_id}/diff-summary", get(get_diff_summary))
        .route("/panes/{pane_id}/diff-file", get(get_diff_file))
        .route("/panes/{pane_id}/commit-log", get(get_commit_log))
        .route("/panes/{pane_id}/commit-detail/{hash}", get(get_commit_detail))
        .route("/panes/{pane_id}/commit-file/{hash}", get(get_commit_file))
        .route("/panes/{pane_id}/screen", get(get_screen))
        .route("/panes/{pane_id}/keystrokes", post(send_keystroke))
        .route("/panes/{pane_id}/focus", post(focus_pane))
        .route("/panes/{pane_id}/kill", post(kill_pane))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match self.severity() {
            crate::core::errors::Severity::Warning => StatusCode::OK,
            crate::core::errors::Severity::Error => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "code": self.code(), "message": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct DashboardQuery {
    provider: Option<String>,
    #[serde(default)]
    force_refresh: bool,
}

async fn get_dashboard(State(state): State<AppState>, Query(q): Query<DashboardQuery>) -> impl IntoResponse {
    Json(state.dashboard.get_dashboard(q.provider.as_deref(), q.force_refresh).await)
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    #[serde(default)]
    force_refresh: bool,
    #[serde(default = "default_include_windows")]
    include_windows: bool,
}

const fn default_include_windows() -> bool {
    true
}

async fn get_provider_snapshot(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(q): Query<SnapshotQuery>,
) -> impl IntoResponse {
    Json(state.dashboard.get_snapshot(&provider_id, q.force_refresh, q.include_windows).await)
}

#[derive(Debug, Deserialize)]
struct WorktreeQuery {
    worktree_path: String,
}

async fn get_diff_summary(
    State(state): State<AppState>,
    Path(pane_id): Path<String>,
    Query(q): Query<WorktreeQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.git_cache.refresh(&pane_id, &q.worktree_path).await {
        return e.into_response();
    }
    Json(state.git_cache.diff_summary(&pane_id, &q.worktree_path).await).into_response()
}

#[derive(Debug, Deserialize)]
struct DiffFileQuery {
    worktree_path: String,
    path: String,
}

async fn get_diff_file(State(state): State<AppState>, Path(pane_id): Path<String>, Query(q): Query<DiffFileQuery>) -> impl IntoResponse {
    match state.git_cache.diff_file(&pane_id, &q.worktree_path, &q.path).await {
        Ok(file) => Json(file).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_commit_log(State(state): State<AppState>, Path(pane_id): Path<String>, Query(q): Query<WorktreeQuery>) -> impl IntoResponse {
    Json(state.git_cache.commit_log(&pane_id, &q.worktree_path).await).into_response()
}

async fn get_commit_detail(
    State(state): State<AppState>,
    Path((pane_id, hash)): Path<(String, String)>,
    Query(q): Query<WorktreeQuery>,
) -> impl IntoResponse {
    match state.git_cache.commit_detail(&pane_id, &q.worktree_path, &hash).await {
        Ok(commit) => Json(commit).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct CommitFileQuery {
    worktree_path: String,
    path: String,
}

async fn get_commit_file(
    State(state): State<AppState>,
    Path((pane_id, hash)): Path<(String, String)>,
    Query(q): Query<CommitFileQuery>,
) -> impl IntoResponse {
    match state.git_cache.commit_file(&pane_id, &q.worktree_path, &hash, &q.path).await {
        Ok(file) => Json(file).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ScreenQuery {
    #[serde(default)]
    #[expect(dead_code, reason = "mode always implied by scheduler-managed poll cadence today; kept for the wire contract")]
    mode: Option<ScreenMode>,
}

async fn get_screen(State(state): State<AppState>, Path(pane_id): Path<String>, Query(_q): Query<ScreenQuery>) -> impl IntoResponse {
    match state.screen_gateway.get_screen(&pane_id).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn send_keystroke(
    State(state): State<AppState>,
    Path(pane_id): Path<String>,
    Json(request): Json<KeystrokeRequest>,
) -> impl IntoResponse {
    match state.screen_gateway.send_keystroke(&pane_id, request).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn focus_pane(State(state): State<AppState>, Path(pane_id): Path<String>) -> impl IntoResponse {
    match state.multiplexer.activate_pane(&pane_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn kill_pane(State(state): State<AppState>, Path(pane_id): Path<String>) -> impl IntoResponse {
    match state.multiplexer.kill_pane(&pane_id).await {
        Ok(()) => {
            state.screen_gateway.forget(&pane_id).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => e.into_response(),
    }
}
