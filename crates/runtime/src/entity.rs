//! Per-entity runtime: template evaluation, state derivation and operations.
//!
//! Each [`UpdateEntity`] owns one [`EntitySpec`] and its mutable state. All
//! operations on an entity serialize through one async mutex, so a refresh
//! never observes a half-finished install and two installs never overlap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use template_update_core::{
    ContextMap, ContextValue, EntitySnapshot, Result, TemplateRef, UpdateError, UpdateState,
};
use template_update_declarations::EntitySpec;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{ActionDispatcher, InstallRequest, DEFAULT_EVAL_TIMEOUT};
use crate::templating::render_template;
use crate::traits::TemplateEvaluator;

/// Name under which the entity's own fields are exposed to templates.
pub const THIS_VARIABLE: &str = "this";

/// Availability results that mean "unavailable" (compared trimmed, lowercase).
const FALSY_VALUES: &[&str] = &["", "false", "off", "no", "0", "none", "unavailable", "unknown"];

/// Tuning shared by every entity runtime.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Bound on a single template evaluation.
    pub eval_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            eval_timeout: DEFAULT_EVAL_TIMEOUT,
        }
    }
}

/// Mutable half of an entity.
#[derive(Debug)]
struct EntityState {
    status: UpdateState,
    name: String,
    installed_version: Option<String>,
    latest_version: Option<String>,
    release_notes: Option<String>,
    title: Option<String>,
    entity_picture: Option<String>,
    skipped_version: Option<String>,
    /// Latest version at the time the last install failed.
    failed_version: Option<String>,
    last_error: Option<UpdateError>,
    last_refreshed: Option<DateTime<Utc>>,
}

impl EntityState {
    fn new(name: String) -> Self {
        Self {
            status: UpdateState::Unavailable,
            name,
            installed_version: None,
            latest_version: None,
            release_notes: None,
            title: None,
            entity_picture: None,
            skipped_version: None,
            failed_version: None,
            last_error: None,
            last_refreshed: None,
        }
    }

    /// Values rendered in earlier cycles are cleared, not kept stale.
    fn mark_unavailable(&mut self, error: Option<UpdateError>) {
        self.status = UpdateState::Unavailable;
        self.installed_version = None;
        self.latest_version = None;
        self.release_notes = None;
        self.title = None;
        self.entity_picture = None;
        self.last_error = error;
        self.last_refreshed = Some(Utc::now());
    }

    fn mark_install_failed(&mut self, error: UpdateError) {
        self.status = UpdateState::InstallFailed;
        self.failed_version = self.latest_version.clone();
        self.last_error = Some(error);
    }
}

/// Marks the entity failed if an install is dropped before it finishes.
struct InstallGuard<'a> {
    object_id: &'a str,
    state: &'a mut EntityState,
    armed: bool,
}

impl InstallGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(entity = %self.object_id, "install cancelled before the action completed");
            self.state.mark_install_failed(UpdateError::Dispatch(
                "install cancelled before the action completed".into(),
            ));
        }
    }
}

/// Whether an availability result counts as available.
pub fn is_truthy(rendered: &str) -> bool {
    let value = rendered.trim().to_ascii_lowercase();
    !FALSY_VALUES.contains(&value.as_str())
}

/// Runtime for one update entity.
pub struct UpdateEntity {
    spec: EntitySpec,
    evaluator: Arc<dyn TemplateEvaluator>,
    dispatcher: Arc<ActionDispatcher>,
    options: RuntimeOptions,
    state: Mutex<EntityState>,
}

impl UpdateEntity {
    /// Create a runtime. The entity starts `Unavailable` until the first refresh.
    pub fn new(
        spec: EntitySpec,
        evaluator: Arc<dyn TemplateEvaluator>,
        dispatcher: Arc<ActionDispatcher>,
        options: RuntimeOptions,
    ) -> Self {
        let name = spec
            .name
            .as_literal()
            .map(str::to_string)
            .unwrap_or_else(|| spec.object_id.clone());
        Self {
            spec,
            evaluator,
            dispatcher,
            options,
            state: Mutex::new(EntityState::new(name)),
        }
    }

    pub fn object_id(&self) -> &str {
        &self.spec.object_id
    }

    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> UpdateState {
        self.state.lock().await.status
    }

    /// Re-evaluate every template and derive the lifecycle state.
    ///
    /// Evaluation failures never escape: the entity becomes `Unavailable`
    /// and the error is kept for the next snapshot.
    pub async fn refresh(&self) -> UpdateState {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
        state.status
    }

    async fn refresh_locked(&self, state: &mut EntityState) {
        let base = self.base_context(state, None);

        if let Some(availability) = &self.spec.availability {
            match self.render(availability, &base).await {
                Ok(value) if is_truthy(&value) => {}
                Ok(value) => {
                    debug!(entity = %self.object_id(), value = %value.trim(), "availability is falsy");
                    state.mark_unavailable(None);
                    return;
                }
                Err(e) => {
                    self.log_eval_failure("availability", &e);
                    state.mark_unavailable(Some(e));
                    return;
                }
            }
        }

        match self.render(&self.spec.name, &base).await {
            Ok(name) if !name.trim().is_empty() => state.name = name.trim().to_string(),
            Ok(_) => {}
            Err(e) => self.log_eval_failure("name", &e),
        }

        let installed = match self.render(&self.spec.installed_version, &base).await {
            Ok(v) => v.trim().to_string(),
            Err(e) => {
                self.log_eval_failure("installed_version", &e);
                state.mark_unavailable(Some(e));
                return;
            }
        };
        let latest = match self.render(&self.spec.latest_version, &base).await {
            Ok(v) => v.trim().to_string(),
            Err(e) => {
                self.log_eval_failure("latest_version", &e);
                state.mark_unavailable(Some(e));
                return;
            }
        };

        state.release_notes = self
            .render_optional("release_notes", &self.spec.release_notes, &base)
            .await;
        state.title = self.render_optional("title", &self.spec.title, &base).await;
        state.entity_picture = self
            .render_optional("entity_picture", &self.spec.entity_picture, &base)
            .await;

        let previous = state.status;
        let next = if installed == latest {
            UpdateState::UpToDate
        } else if previous == UpdateState::InstallFailed
            && state.failed_version.as_deref() == Some(latest.as_str())
        {
            UpdateState::InstallFailed
        } else {
            UpdateState::UpdateAvailable
        };

        if next != UpdateState::InstallFailed {
            state.failed_version = None;
            state.last_error = None;
        }
        if previous != next {
            info!(
                entity = %self.object_id(),
                from = %previous,
                to = %next,
                installed = %installed,
                latest = %latest,
                "update state changed"
            );
        }

        state.status = next;
        state.installed_version = Some(installed);
        state.latest_version = Some(latest);
        state.last_refreshed = Some(Utc::now());
    }

    /// Install the requested version (default: the latest version).
    ///
    /// Allowed from `UpdateAvailable` and, as an explicit retry, from
    /// `InstallFailed`. The action is invoked exactly once; afterwards the
    /// entity is refreshed and the resulting state returned. A device that
    /// has not converged yet stays `UpdateAvailable`.
    pub async fn request_install(&self, request: InstallRequest) -> Result<UpdateState> {
        let Some(action) = &self.spec.install_action else {
            return Err(UpdateError::UnsupportedOperation(format!(
                "entity '{}' has no install_action configured",
                self.object_id()
            )));
        };

        let mut state = self.state.lock().await;
        match state.status {
            UpdateState::UpdateAvailable | UpdateState::InstallFailed => {}
            other => {
                return Err(UpdateError::InvalidState {
                    operation: "install",
                    state: other,
                })
            }
        }

        let request = InstallRequest {
            version: request.version.or_else(|| state.latest_version.clone()),
            ..request
        };
        let context = self.base_context(&state, Some(&request));

        info!(
            entity = %self.object_id(),
            version = ?request.version,
            backup = request.backup,
            action = %action.action.source(),
            "installing update"
        );
        state.status = UpdateState::Installing;

        let outcome = {
            let guard = InstallGuard {
                object_id: self.object_id(),
                state: &mut *state,
                armed: true,
            };
            let outcome = self
                .dispatcher
                .dispatch(self.object_id(), action, &context, &request)
                .await;
            guard.disarm();
            outcome
        };

        match outcome {
            Ok(call) => {
                debug!(entity = %self.object_id(), action = %call.action, "refreshing after install");
                self.refresh_locked(&mut state).await;
                if state.status == UpdateState::UpdateAvailable {
                    info!(
                        entity = %self.object_id(),
                        installed = ?state.installed_version,
                        latest = ?state.latest_version,
                        "install action accepted, device has not converged yet"
                    );
                }
                Ok(state.status)
            }
            Err(e) => {
                error!(
                    entity = %self.object_id(),
                    version = ?request.version,
                    action = %action.action.source(),
                    error = %e,
                    kind = e.kind(),
                    "install failed"
                );
                state.mark_install_failed(e.clone());
                Err(e)
            }
        }
    }

    /// Remember the current latest version as skipped.
    ///
    /// Not allowed for auto-updating entities. The lifecycle state is not
    /// changed; snapshots report `is_skipped` until the latest version moves.
    pub async fn skip(&self) -> Result<()> {
        if self.spec.auto_update {
            return Err(UpdateError::OperationNotAllowed(format!(
                "entity '{}' has auto_update enabled and cannot skip versions",
                self.object_id()
            )));
        }

        let mut state = self.state.lock().await;
        match state.status {
            UpdateState::UpdateAvailable | UpdateState::InstallFailed => {}
            other => {
                return Err(UpdateError::InvalidState {
                    operation: "skip",
                    state: other,
                })
            }
        }

        state.skipped_version = state.latest_version.clone();
        info!(entity = %self.object_id(), version = ?state.skipped_version, "version skipped");
        Ok(())
    }

    /// Forget any skipped version.
    pub async fn clear_skipped(&self) {
        let mut state = self.state.lock().await;
        if let Some(version) = state.skipped_version.take() {
            info!(entity = %self.object_id(), version = %version, "skipped version cleared");
        }
    }

    /// Read-only view for presentation layers.
    pub async fn snapshot(&self) -> EntitySnapshot {
        let state = self.state.lock().await;
        let is_skipped = state.skipped_version.is_some()
            && state.skipped_version == state.latest_version
            && state.status != UpdateState::UpToDate;
        EntitySnapshot {
            object_id: self.spec.object_id.clone(),
            name: state.name.clone(),
            state: state.status,
            installed_version: state.installed_version.clone(),
            latest_version: state.latest_version.clone(),
            release_notes: state.release_notes.clone(),
            title: state.title.clone(),
            entity_picture: state.entity_picture.clone(),
            device_class: self.spec.device_class.clone(),
            auto_update: self.spec.auto_update,
            in_progress: state.status == UpdateState::Installing,
            skipped_version: state.skipped_version.clone(),
            is_skipped,
            supported_features: self.spec.supported_features(),
            last_error: state.last_error.as_ref().map(ToString::to_string),
            last_error_kind: state.last_error.as_ref().map(|e| e.kind().to_string()),
            last_refreshed: state.last_refreshed,
        }
    }

    /// Context shared by every template of this entity: `this` plus,
    /// during an install, `version` and `backup`.
    fn base_context(&self, state: &EntityState, request: Option<&InstallRequest>) -> ContextMap {
        let mut this = ContextMap::new();
        this.insert("object_id".into(), ContextValue::String(self.spec.object_id.clone()));
        this.insert("name".into(), ContextValue::String(state.name.clone()));
        this.insert("state".into(), ContextValue::String(state.status.to_string()));
        if let Some(v) = &state.installed_version {
            this.insert("installed_version".into(), ContextValue::String(v.clone()));
        }
        if let Some(v) = &state.latest_version {
            this.insert("latest_version".into(), ContextValue::String(v.clone()));
        }

        let mut ctx = ContextMap::new();
        ctx.insert(THIS_VARIABLE.into(), ContextValue::Map(this));
        if let Some(request) = request {
            if let Some(version) = &request.version {
                ctx.insert("version".into(), ContextValue::String(version.clone()));
            }
            ctx.insert("backup".into(), ContextValue::Bool(request.backup));
        }
        ctx
    }

    async fn render(&self, template: &TemplateRef, base: &ContextMap) -> Result<String> {
        render_template(self.evaluator.as_ref(), template, base, self.options.eval_timeout).await
    }

    async fn render_optional(
        &self,
        field: &str,
        template: &Option<TemplateRef>,
        base: &ContextMap,
    ) -> Option<String> {
        let template = template.as_ref()?;
        match self.render(template, base).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.log_eval_failure(field, &e);
                None
            }
        }
    }

    fn log_eval_failure(&self, field: &str, err: &UpdateError) {
        match err {
            UpdateError::UndefinedReference(msg) => warn!(
                entity = %self.object_id(),
                field,
                error = %msg,
                "template references an undefined entity or variable"
            ),
            _ => warn!(
                entity = %self.object_id(),
                field,
                error = %err,
                "template evaluation failed"
            ),
        }
    }
}

impl std::fmt::Debug for UpdateEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEntity")
            .field("object_id", &self.spec.object_id)
            .field("evaluator", &self.evaluator.evaluator_name())
            .field("executor", &self.dispatcher.executor_name())
            .finish()
    }
}
