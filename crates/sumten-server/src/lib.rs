pub mod config;
pub mod db;
pub mod error;
pub mod registry;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::error::ServerError;
use crate::state::AppState;

/// Build a fully configured Router + shared state.
pub async fn build_app(config: &Config) -> Result<(Router, Arc<AppState>), ServerError> {
    let pool = db::connect(&config.database_url, config.db_pool_size).await?;
    db::init_db(&pool).await?;

    let state = Arc::new(AppState::new(pool, config.max_connections));

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/highscore", post(routes::submit_highscore))
        .route("/highscore/{nickname}", get(routes::get_highscore))
        .route("/highscores", get(routes::leaderboard))
        .route("/ws", get(routes::ws_upgrade))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    Ok((app, state))
}
