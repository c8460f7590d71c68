//! metaflow-workflow: the step-driven workflow engine (§4.9) and its
//! timeout scheduler (§4.10) — the long-lived orchestrator that outlives a
//! single write-pipeline request through approval pauses, condition
//! branching, and deadline timeouts.
//!
//! Components:
//! - `engine`: `WorkflowEngine`, implementing `metaflow_core::WorkflowTrigger`
//!   (`trigger`) plus `advance` and `resolve_action`.
//! - `scheduler`: `TimeoutScheduler`, ticking every 60 s to advance
//!   instances past an expired approval deadline.
//! - `registry`: `WorkflowRegistry`, the definition-lookup seam.
//! - `store`: `WorkflowInstanceStore` (the `_workflow_instances` table) and
//!   `WorkflowFieldStore` (the `set_field` action's write path).
//! - `context`: dot-path context resolution and the approval timeout
//!   duration grammar.
//! - `error`: `WorkflowError`, convertible into `metaflow_core::EngineError`.

pub mod context;
pub mod engine;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use context::{build_trigger_context, parse_duration, resolve_dot_path};
pub use engine::WorkflowEngine;
pub use error::WorkflowError;
pub use registry::WorkflowRegistry;
pub use scheduler::TimeoutScheduler;
pub use store::{WorkflowFieldStore, WorkflowInstanceStore};
