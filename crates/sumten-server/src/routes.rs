use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use sumten_core::protocol::{
    HighscoreResponse, HighscoreSubmission, LEADERBOARD_SIZE, LeaderboardEntry, ServerMessage,
};

use crate::db;
use crate::error::ServerError;
use crate::state::AppState;
use crate::ws;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Highscores ──────────────────────────────────────────────────────────

/// Record a score. Also pushes the refreshed leaderboard to live clients so
/// both surfaces see the same history.
pub async fn submit_highscore(
    State(state): State<Arc<AppState>>,
    body: Result<Json<HighscoreSubmission>, JsonRejection>,
) -> Result<Json<HighscoreResponse>, ServerError> {
    let Json(submission) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let submission = submission
        .validated()
        .ok_or_else(|| ServerError::BadRequest("nickname is required".into()))?;

    let highscore = db::record_score(&state.db, &submission.nickname, submission.score).await?;
    tracing::info!(
        nickname = %submission.nickname,
        score = submission.score,
        highscore,
        "highscore submitted over http"
    );

    let entries = db::get_top(&state.db, LEADERBOARD_SIZE).await?;
    state.broadcast_all(&ServerMessage::UpdateLeaderboard { entries });

    Ok(Json(HighscoreResponse {
        nickname: submission.nickname,
        highscore,
    }))
}

pub async fn get_highscore(
    State(state): State<Arc<AppState>>,
    Path(nickname): Path<String>,
) -> Result<Json<HighscoreResponse>, ServerError> {
    let highscore = db::get_highscore(&state.db, &nickname)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("no highscore for {}", nickname)))?;

    Ok(Json(HighscoreResponse {
        nickname,
        highscore,
    }))
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LeaderboardEntry>>, ServerError> {
    Ok(Json(db::get_top(&state.db, LEADERBOARD_SIZE).await?))
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    // The slot is held from here; `handle_socket` frees it via `deregister`.
    if !state.try_reserve_slot() {
        tracing::warn!(max = state.max_connections, "rejecting websocket: at capacity");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let on_failed = state.clone();
    Ok(ws
        .on_failed_upgrade(move |err| {
            tracing::debug!(error = %err, "websocket upgrade failed");
            on_failed.release_slot();
        })
        .on_upgrade(move |socket| ws::handle_socket(state, socket)))
}
