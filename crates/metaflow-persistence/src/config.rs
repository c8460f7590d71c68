//! Connection configuration loaded from the environment, plus pool
//! construction. Grounded on the root package's `config.rs`: a lazily
//! loaded `.env`, a `DATABASE_URL` + pool-size convention, and a
//! create-database-if-missing retry on connect (a fresh dev database
//! commonly doesn't exist yet).

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);
        Self {
            url,
            min_connections,
            max_connections,
        }
    }
}

/// Builds a Postgres pool, creating the target database on first connect
/// if it doesn't exist yet (error code `3D000`).
pub async fn create_pool(config: &DbConfig) -> Result<sqlx::Pool<sqlx::Postgres>, sqlx::Error> {
    match PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
    {
        Ok(pool) => Ok(pool),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("3D000") => {
            log::warn!("target database not found, attempting to create it");
            ensure_database_exists(&config.url).await?;
            PgPoolOptions::new()
                .min_connections(config.min_connections)
                .max_connections(config.max_connections)
                .connect(&config.url)
                .await
        }
        Err(e) => Err(e),
    }
}

async fn ensure_database_exists(full_url: &str) -> Result<(), sqlx::Error> {
    let Some(pos) = full_url.rfind('/') else {
        return Ok(());
    };
    let (base, tail) = full_url.split_at(pos);
    let db_part = &tail[1..];
    let db_name = db_part.split('?').next().unwrap_or(db_part);
    if db_name.is_empty() {
        return Ok(());
    }

    let admin_url = if base.ends_with("/postgres") || db_name == "postgres" {
        full_url.to_string()
    } else {
        format!("{base}/postgres")
    };

    let Ok(admin_pool) = PgPoolOptions::new().max_connections(1).connect(&admin_url).await else {
        return Ok(());
    };
    let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pg_database WHERE datname = $1")
        .bind(db_name)
        .fetch_one(&admin_pool)
        .await?;
    if exists.0 == 0 {
        if db_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            let create_stmt = format!("CREATE DATABASE \"{}\"", db_name.replace('"', ""));
            admin_pool.execute(create_stmt.as_str()).await?;
            log::info!("database '{db_name}' created automatically");
        } else {
            log::error!("refusing to auto-create database with unsafe name: {db_name}");
        }
    }
    Ok(())
}
