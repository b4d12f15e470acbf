use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use sumten_core::protocol::LeaderboardEntry;

/// Open the pool. At least one connection is kept alive so an in-memory
/// database outlives idle periods.
pub async fn connect(url: &str, pool_size: u32) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(pool_size.max(1))
        .min_connections(1)
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect(url)
        .await
}

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS highscores (
            nickname TEXT PRIMARY KEY,
            score INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Keep the larger of the stored and submitted score. Returns the best score
/// now on record.
///
/// Done in one statement so concurrent submissions for the same nickname
/// commute.
pub async fn record_score(
    pool: &SqlitePool,
    nickname: &str,
    score: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query(
        "INSERT INTO highscores (nickname, score)
         VALUES (?1, ?2)
         ON CONFLICT(nickname) DO UPDATE SET
            score = MAX(score, excluded.score),
            updated_at = CASE WHEN excluded.score > score
                THEN CURRENT_TIMESTAMP ELSE updated_at END",
    )
    .bind(nickname)
    .bind(score)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT score FROM highscores WHERE nickname = ?1")
        .bind(nickname)
        .fetch_one(pool)
        .await?;

    Ok(row.get::<i64, _>("score"))
}

/// Best score for one nickname.
pub async fn get_highscore(pool: &SqlitePool, nickname: &str) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query("SELECT score FROM highscores WHERE nickname = ?1")
        .bind(nickname)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get::<i64, _>("score")))
}

/// Get top nicknames by score, ties broken by nickname.
pub async fn get_top(pool: &SqlitePool, limit: usize) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT nickname, score FROM highscores
         ORDER BY score DESC, nickname ASC
         LIMIT ?1",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| LeaderboardEntry {
            nickname: r.get("nickname"),
            score: r.get("score"),
        })
        .collect())
}
