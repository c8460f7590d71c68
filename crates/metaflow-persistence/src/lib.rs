//! Postgres implementation of the storage collaborators `metaflow-core`,
//! `metaflow-webhooks` and `metaflow-workflow` are generic over.
//!
//! Modules:
//! - `config`: `.env`-driven connection config and pool construction.
//! - `migrations`: file-based SQL migration runner for the engine-owned
//!   tables (`_workflow_instances`, `_webhook_logs`).
//! - `entity_store`: `PgEntityStore`, implementing `metaflow_core::EntityStore`
//!   against registry-described tables via dynamic SQL.
//! - `workflow_store`: `PgWorkflowStore`, implementing
//!   `metaflow_workflow::{WorkflowInstanceStore, WorkflowFieldStore}`.
//! - `webhook_store`: `PgWebhookLogStore`, implementing
//!   `metaflow_webhooks::WebhookLogStore`.
//! - `error`: `PersistenceError`, convertible into each consuming crate's
//!   own error type.

pub mod config;
pub mod entity_store;
pub mod error;
pub mod migrations;
pub mod webhook_store;
pub mod workflow_store;

pub use config::{create_pool, init_dotenv, DbConfig};
pub use entity_store::PgEntityStore;
pub use error::PersistenceError;
pub use migrations::run_pending_migrations;
pub use webhook_store::PgWebhookLogStore;
pub use workflow_store::PgWorkflowStore;

pub type PgPool = sqlx::PgPool;
