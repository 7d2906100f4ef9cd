//! Minijinja template evaluation for update entity fields.
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call. Undefined
//! variables are strict: referencing a missing `item` key or host entity is
//! an [`UpdateError::UndefinedReference`], never an empty string.

use std::sync::Arc;
use std::time::Duration;

use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use template_update_core::{ContextMap, Result, TemplateRef, UpdateError};

use crate::states::StateStore;
use crate::traits::TemplateEvaluator;

/// Evaluates templates with minijinja against a [`StateStore`].
///
/// Host functions available to templates:
/// - `states(entity_id)` - the entity's state string
/// - `state_attr(entity_id, name)` - one attribute, or `none`
/// - `is_state(entity_id, value)` - state comparison, false when missing
/// - `env(name)` - environment variable, empty when unset
///
/// Rendering runs on the blocking pool under a fuel budget; running out of
/// fuel is an [`UpdateError::Template`].
#[derive(Debug, Clone)]
pub struct MiniJinjaEvaluator {
    states: Arc<StateStore>,
    fuel: Option<u64>,
}

/// Instruction budget for one render.
pub const DEFAULT_FUEL: u64 = 500_000;

impl MiniJinjaEvaluator {
    pub fn new(states: Arc<StateStore>) -> Self {
        Self {
            states,
            fuel: Some(DEFAULT_FUEL),
        }
    }

    /// Override the instruction budget (`None` disables it).
    pub fn with_fuel(mut self, fuel: Option<u64>) -> Self {
        self.fuel = fuel;
        self
    }

    /// Build a configured minijinja environment with the host functions.
    fn build_env(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_fuel(self.fuel);

        let states = Arc::clone(&self.states);
        env.add_function(
            "states",
            move |entity_id: String| -> std::result::Result<String, minijinja::Error> {
                states
                    .get(&entity_id)
                    .map(|s| s.state)
                    .ok_or_else(|| unknown_entity(&entity_id))
            },
        );

        let states = Arc::clone(&self.states);
        env.add_function(
            "state_attr",
            move |entity_id: String, name: String| -> std::result::Result<Value, minijinja::Error> {
                let state = states
                    .get(&entity_id)
                    .ok_or_else(|| unknown_entity(&entity_id))?;
                Ok(state
                    .attributes
                    .get(&name)
                    .map(Value::from_serialize)
                    .unwrap_or_else(|| Value::from(())))
            },
        );

        let states = Arc::clone(&self.states);
        env.add_function("is_state", move |entity_id: String, expected: String| -> bool {
            states
                .get(&entity_id)
                .is_some_and(|s| s.state == expected)
        });

        env.add_function("env", env_function);
        env
    }
}

#[async_trait::async_trait]
impl TemplateEvaluator for MiniJinjaEvaluator {
    async fn evaluate(&self, source: &str, context: &ContextMap) -> Result<String> {
        let env = self.build_env();
        let source = source.to_string();
        let context = context.clone();
        tokio::task::spawn_blocking(move || {
            env.render_str(&source, context).map_err(map_render_error)
        })
        .await
        .map_err(|e| UpdateError::Template(format!("evaluation task failed: {e}")))?
    }

    fn validate(&self, source: &str) -> Result<()> {
        let env = self.build_env();
        env.template_from_str(source)
            .map_err(|e| UpdateError::Template(e.to_string()))?;
        Ok(())
    }

    fn evaluator_name(&self) -> &str {
        "minijinja"
    }
}

/// Render a stored template, short-circuiting literals.
///
/// The captured `item` binding is layered over `base`. Evaluation longer
/// than `timeout` fails with [`UpdateError::Template`].
pub async fn render_template(
    evaluator: &dyn TemplateEvaluator,
    template: &TemplateRef,
    base: &ContextMap,
    timeout: Duration,
) -> Result<String> {
    if let Some(literal) = template.as_literal() {
        return Ok(literal.to_string());
    }
    let context = template.context(base);
    match tokio::time::timeout(timeout, evaluator.evaluate(template.source(), &context)).await {
        Ok(result) => result,
        Err(_) => Err(UpdateError::Template(format!(
            "evaluation timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

fn unknown_entity(entity_id: &str) -> minijinja::Error {
    minijinja::Error::new(
        ErrorKind::UndefinedError,
        format!("entity '{entity_id}' does not exist"),
    )
}

fn map_render_error(err: minijinja::Error) -> UpdateError {
    match err.kind() {
        ErrorKind::UndefinedError => UpdateError::UndefinedReference(err.to_string()),
        ErrorKind::OutOfFuel => UpdateError::Template(format!("evaluation exceeded its budget: {err}")),
        _ => UpdateError::Template(err.to_string()),
    }
}

/// Global function: read an environment variable by name.
///
/// Returns the variable value, or an empty string if not found
/// (with a warning logged via tracing).
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::HostState;
    use template_update_core::ContextValue;

    fn evaluator() -> MiniJinjaEvaluator {
        let states = Arc::new(StateStore::new());
        states.set("sensor.hub_version", "1.0.0");
        states.insert(
            "sensor.hub_latest",
            HostState::new("ok").with_attribute("latest", "1.1.0"),
        );
        MiniJinjaEvaluator::new(states)
    }

    fn item_context(id: &str) -> ContextMap {
        let mut item = ContextMap::new();
        item.insert("device_id".into(), ContextValue::String(id.into()));
        let mut ctx = ContextMap::new();
        ctx.insert("item".into(), ContextValue::Map(item));
        ctx
    }

    #[tokio::test]
    async fn renders_host_state_functions() {
        let ev = evaluator();
        let ctx = ContextMap::new();
        assert_eq!(
            ev.evaluate("{{ states('sensor.hub_version') }}", &ctx).await.unwrap(),
            "1.0.0"
        );
        assert_eq!(
            ev.evaluate("{{ state_attr('sensor.hub_latest', 'latest') }}", &ctx)
                .await
                .unwrap(),
            "1.1.0"
        );
        assert_eq!(
            ev.evaluate("{{ is_state('sensor.hub_version', '1.0.0') }}", &ctx)
                .await
                .unwrap(),
            "true"
        );
        assert_eq!(
            ev.evaluate("{{ is_state('sensor.missing', 'x') }}", &ctx)
                .await
                .unwrap(),
            "false"
        );
    }

    #[tokio::test]
    async fn renders_item_fields() {
        let ev = evaluator();
        let out = ev
            .evaluate("{{ item.device_id }} Firmware", &item_context("2"))
            .await
            .unwrap();
        assert_eq!(out, "2 Firmware");
    }

    #[tokio::test]
    async fn missing_entity_is_undefined_reference() {
        let ev = evaluator();
        let err = ev
            .evaluate("{{ states('sensor.nope') }}", &ContextMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::UndefinedReference(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_item_key_is_undefined_reference() {
        let ev = evaluator();
        let err = ev
            .evaluate("{{ item.serial }}", &item_context("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::UndefinedReference(_)), "{err:?}");
    }

    #[tokio::test]
    async fn syntax_error_is_template_error() {
        let ev = evaluator();
        let err = ev.evaluate("{{ unclosed", &ContextMap::new()).await.unwrap_err();
        assert!(matches!(err, UpdateError::Template(_)), "{err:?}");
        assert!(ev.validate("{{ unclosed").is_err());
        assert!(ev.validate("{{ states('x') }}").is_ok());
    }

    #[tokio::test]
    async fn missing_attribute_renders_none() {
        let ev = evaluator();
        let out = ev
            .evaluate(
                "{{ state_attr('sensor.hub_latest', 'nope') is none }}",
                &ContextMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "true");
    }

    #[tokio::test]
    async fn env_function_reads_variables() {
        std::env::set_var("TEMPLATE_UPDATE_TEST_VAR", "from_env");
        let ev = evaluator();
        let out = ev
            .evaluate("{{ env('TEMPLATE_UPDATE_TEST_VAR') }}", &ContextMap::new())
            .await
            .unwrap();
        assert_eq!(out, "from_env");
        std::env::remove_var("TEMPLATE_UPDATE_TEST_VAR");
    }

    const RUNAWAY: &str =
        "{% for a in range(2000) %}{% for b in range(2000) %}{% for c in range(20) %}{% endfor %}{% endfor %}{% endfor %}1";

    #[tokio::test]
    async fn runaway_template_runs_out_of_fuel() {
        let ev = evaluator();
        let started = std::time::Instant::now();
        let err = render_template(
            &ev,
            &TemplateRef::new(RUNAWAY),
            &ContextMap::new(),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpdateError::Template(ref m) if m.contains("budget")), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cpu_bound_render_is_cut_off_by_timeout() {
        let ev = evaluator().with_fuel(None);
        let heavy = "{% for a in range(1000) %}{% for b in range(1000) %}{% endfor %}{% endfor %}1";
        let started = std::time::Instant::now();
        let err = render_template(
            &ev,
            &TemplateRef::new(heavy),
            &ContextMap::new(),
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpdateError::Template(ref m) if m.contains("timed out")), "{err:?}");
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn ordinary_templates_fit_the_fuel_budget() {
        let ev = evaluator();
        let out = ev
            .evaluate(
                "{% for n in range(100) %}{% endfor %}{{ states('sensor.hub_version') }}",
                &ContextMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "1.0.0");
    }

    #[tokio::test]
    async fn render_template_skips_evaluator_for_literals() {
        let ev = evaluator();
        let plain = TemplateRef::new("4.0");
        let out = render_template(&ev, &plain, &ContextMap::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "4.0");
    }

    #[tokio::test]
    async fn render_template_uses_bound_item() {
        let ev = evaluator();
        let mut item = ContextMap::new();
        item.insert("device_id".into(), ContextValue::String("3".into()));
        let t = TemplateRef::bound("{{ item.device_id }}", Arc::new(item));
        let out = render_template(&ev, &t, &ContextMap::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "3");
    }
}
