//! Renders install actions and hands them to the executor.
//!
//! The dispatcher resolves the action identifier and every templated value
//! in `target` and `data` against the entity context, merges in the install
//! arguments and invokes the host exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use template_update_core::{ContextMap, Result, TemplateRef, UpdateError};
use template_update_declarations::{ActionTemplate, PayloadTemplate};

use crate::templating::render_template;
use crate::traits::{ActionCall, ActionExecutor, TemplateEvaluator};

/// Default bound on one template evaluation.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Arguments of one install request.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    /// Version to install. `None` means the current latest version.
    pub version: Option<String>,
    pub backup: bool,
    /// Extra keyword arguments forwarded into the action data.
    pub extra: Map<String, Value>,
}

impl InstallRequest {
    pub fn new() -> Self {
        Self {
            version: None,
            backup: true,
            extra: Map::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl Default for InstallRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders [`ActionTemplate`]s and invokes them through an [`ActionExecutor`].
pub struct ActionDispatcher {
    executor: Arc<dyn ActionExecutor>,
    evaluator: Arc<dyn TemplateEvaluator>,
    eval_timeout: Duration,
    /// Bound on the executor call; `None` waits indefinitely.
    action_timeout: Option<Duration>,
}

impl ActionDispatcher {
    pub fn new(executor: Arc<dyn ActionExecutor>, evaluator: Arc<dyn TemplateEvaluator>) -> Self {
        Self {
            executor,
            evaluator,
            eval_timeout: DEFAULT_EVAL_TIMEOUT,
            action_timeout: None,
        }
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = timeout;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = Some(timeout);
        self
    }

    pub fn executor_name(&self) -> &str {
        self.executor.executor_name()
    }

    /// Render the action for `entity` and invoke it once.
    ///
    /// Rendering problems surface as [`UpdateError::Configuration`] or
    /// evaluation errors before anything is sent. Executor failures and
    /// timeouts surface as [`UpdateError::Dispatch`].
    pub async fn dispatch(
        &self,
        entity: &str,
        action: &ActionTemplate,
        context: &ContextMap,
        request: &InstallRequest,
    ) -> Result<ActionCall> {
        let call = self.resolve(entity, action, context, request).await?;

        let start = Instant::now();
        let result = match self.action_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.executor.invoke(&call))
                .await
                .unwrap_or_else(|_| {
                    Err(UpdateError::Dispatch(format!(
                        "action {} timed out after {}s",
                        call.action,
                        timeout.as_secs()
                    )))
                }),
            None => self.executor.invoke(&call).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::info!(
                    entity,
                    action = %call.action,
                    executor = self.executor.executor_name(),
                    duration_ms,
                    "install action dispatched"
                );
                Ok(call)
            }
            Err(e) => {
                let e = match e {
                    UpdateError::Dispatch(_) => e,
                    other => UpdateError::Dispatch(other.to_string()),
                };
                let data = Value::Object(call.data.clone());
                tracing::warn!(
                    entity,
                    action = %call.action,
                    target = ?call.target,
                    data = %data,
                    executor = self.executor.executor_name(),
                    error = %e,
                    duration_ms,
                    "install action failed"
                );
                Err(e)
            }
        }
    }

    /// Render the action into an [`ActionCall`] without invoking it.
    ///
    /// Data is built from `version`, `backup` and the extra arguments, then
    /// overlaid with the rendered `data` mapping, which wins on conflicts.
    pub async fn resolve(
        &self,
        entity: &str,
        action: &ActionTemplate,
        context: &ContextMap,
        request: &InstallRequest,
    ) -> Result<ActionCall> {
        let identifier = self
            .render(&action.action, context)
            .await
            .map_err(|e| UpdateError::Configuration(format!("unable to resolve action: {e}")))?;
        let identifier = identifier.trim().to_string();
        let (domain, service) = split_action(&identifier)?;

        let target = match &action.target {
            Some(target) => Some(expect_mapping(
                "target",
                self.render_payload(target, context).await?,
            )?),
            None => None,
        };

        let mut data = Map::new();
        if let Some(version) = &request.version {
            data.insert("version".into(), Value::String(version.clone()));
        }
        data.insert("backup".into(), Value::Bool(request.backup));
        data.extend(request.extra.clone());
        data.extend(expect_mapping(
            "data",
            self.render_payload(&action.data, context).await?,
        )?);

        Ok(ActionCall {
            entity: entity.to_string(),
            action: identifier,
            domain,
            service,
            target,
            data,
        })
    }

    async fn render(&self, template: &TemplateRef, context: &ContextMap) -> Result<String> {
        render_template(self.evaluator.as_ref(), template, context, self.eval_timeout).await
    }

    /// Render a payload tree; strings are rendered, other values pass through.
    fn render_payload<'a>(
        &'a self,
        payload: &'a PayloadTemplate,
        context: &'a ContextMap,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            match payload {
                PayloadTemplate::Template(t) => Ok(Value::String(self.render(t, context).await?)),
                PayloadTemplate::Literal(v) => Ok(v.clone()),
                PayloadTemplate::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.render_payload(item, context).await?);
                    }
                    Ok(Value::Array(out))
                }
                PayloadTemplate::Map(map) => {
                    let mut out = Map::new();
                    for (key, value) in map {
                        out.insert(key.clone(), self.render_payload(value, context).await?);
                    }
                    Ok(Value::Object(out))
                }
            }
        }
        .boxed()
    }
}

fn split_action(identifier: &str) -> Result<(String, String)> {
    match identifier.split_once('.') {
        Some((domain, service))
            if !domain.is_empty()
                && !service.is_empty()
                && !identifier.contains(char::is_whitespace) =>
        {
            Ok((domain.to_string(), service.to_string()))
        }
        _ => Err(UpdateError::Configuration(format!(
            "action must be of the form 'domain.service', got '{identifier}'"
        ))),
    }
}

fn expect_mapping(field: &str, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(UpdateError::Configuration(format!(
            "{field} must render to a mapping, got {other}"
        ))),
    }
}
