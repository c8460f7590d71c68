//! Applies the engine-owned SQL migrations (`_workflow_instances`,
//! `_webhook_logs`) against an already-connected pool. Entity tables
//! themselves are registry-described and never created here.
//!
//! Mirrors the root package's own file-based runner: one `schema_migrations`
//! row per applied `*.sql` file, naive `;`-split transactional apply.

use std::path::{Path, PathBuf};
use std::fs;

use chrono::Utc;
use sqlx::{Executor, PgPool};

use crate::error::PersistenceError;

pub async fn run_pending_migrations(pool: &PgPool, migrations_dir: &str) -> Result<(), PersistenceError> {
    let dir = Path::new(migrations_dir);
    if !dir.exists() {
        log::warn!("migrations directory '{migrations_dir}' not found, skipping");
        return Ok(());
    }

    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version TEXT PRIMARY KEY,\
           applied_at TIMESTAMPTZ NOT NULL\
         )",
    )
    .await
    .map_err(PersistenceError::from)?;

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| PersistenceError::Unknown(e.to_string()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|e| e == "sql").unwrap_or(false))
        .collect();
    files.sort();

    for file in files {
        let version = file.file_name().unwrap().to_string_lossy().to_string();
        let already: Option<(String,)> = sqlx::query_as("SELECT version FROM schema_migrations WHERE version = $1")
            .bind(&version)
            .fetch_optional(pool)
            .await
            .map_err(PersistenceError::from)?;
        if already.is_some() {
            continue;
        }

        let sql = fs::read_to_string(&file).map_err(|e| PersistenceError::Unknown(e.to_string()))?;
        if sql.trim().is_empty() {
            continue;
        }

        log::info!("applying migration {version}");
        let mut tx = pool.begin().await.map_err(PersistenceError::from)?;
        for statement in sql.split(';') {
            let stmt = statement.trim();
            if stmt.is_empty() {
                continue;
            }
            tx.execute(sqlx::query(stmt)).await.map_err(PersistenceError::from)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES ($1, $2)")
            .bind(&version)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::from)?;
        tx.commit().await.map_err(PersistenceError::from)?;
    }

    Ok(())
}
