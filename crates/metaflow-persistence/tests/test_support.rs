//! Shared helper for Postgres-backed integration tests: builds a pool from
//! `DATABASE_URL` when one is set, so every test in this directory can skip
//! cleanly instead of failing when no database is available.

use metaflow_persistence::{create_pool, init_dotenv, DbConfig, PgPool};

pub async fn test_pool() -> Option<PgPool> {
    init_dotenv();
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }
    let config = DbConfig::from_env();
    match create_pool(&config).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            eprintln!("could not build test pool: {e}");
            None
        }
    }
}
