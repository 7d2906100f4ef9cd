//! Runtime for template-driven update entities.
//!
//! This crate provides:
//! - `TemplateEvaluator` / `ActionExecutor` traits for the host collaborators
//! - Minijinja evaluator backed by an in-memory host `StateStore`
//! - `ActionDispatcher` that renders and submits install actions
//! - `UpdateEntity`: the per-entity state machine
//! - `EntityRegistry` that keeps runtimes in step with reloaded declarations
//! - HTTP and dry-run action executors

pub mod dispatcher;
pub mod entity;
pub mod http;
pub mod registry;
pub mod states;
pub mod templating;
pub mod traits;

pub use dispatcher::{ActionDispatcher, InstallRequest};
pub use entity::{RuntimeOptions, UpdateEntity};
pub use http::HttpActionExecutor;
pub use registry::{EntityRegistry, SyncSummary};
pub use states::{HostState, StateStore};
pub use templating::MiniJinjaEvaluator;
pub use traits::{ActionCall, ActionExecutor, DryRunExecutor, TemplateEvaluator};
