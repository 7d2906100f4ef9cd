//! Host collaborator traits and the shared action call type.

use serde_json::{Map, Value};
use template_update_core::{ContextMap, UpdateError};

/// Renders template expressions against a context.
///
/// Implementations may read live host state but must not cache results;
/// the entity runtime re-evaluates every field on every refresh.
#[async_trait::async_trait]
pub trait TemplateEvaluator: Send + Sync {
    /// Render `source` with `context`.
    ///
    /// Fails with [`UpdateError::Template`] for syntax or runtime faults and
    /// [`UpdateError::UndefinedReference`] for missing variables/entities.
    async fn evaluate(&self, source: &str, context: &ContextMap) -> Result<String, UpdateError>;

    /// Check syntax without evaluating.
    fn validate(&self, source: &str) -> Result<(), UpdateError>;

    /// Human-readable name for logs (e.g., "minijinja").
    fn evaluator_name(&self) -> &str;
}

/// A fully rendered action, ready for the executor.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ActionCall {
    /// Object id of the entity that requested the action.
    pub entity: String,
    /// The rendered `domain.service` identifier.
    pub action: String,
    pub domain: String,
    pub service: String,
    pub target: Option<Map<String, Value>>,
    pub data: Map<String, Value>,
}

/// Executes rendered actions on the host.
#[async_trait::async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Submit the call once. Retrying is the action's own business.
    async fn invoke(&self, call: &ActionCall) -> Result<(), UpdateError>;

    /// Human-readable name for this executor (e.g., "http", "dry-run").
    fn executor_name(&self) -> &str;
}

/// Executor that logs calls and reports success without contacting a host.
#[derive(Debug, Default)]
pub struct DryRunExecutor;

#[async_trait::async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn invoke(&self, call: &ActionCall) -> Result<(), UpdateError> {
        let data = Value::Object(call.data.clone());
        tracing::info!(
            entity = %call.entity,
            action = %call.action,
            target = ?call.target,
            data = %data,
            "dry-run: action not sent"
        );
        Ok(())
    }

    fn executor_name(&self) -> &str {
        "dry-run"
    }
}
