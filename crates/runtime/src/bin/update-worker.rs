//! update-worker: drives template update entities from a declaration file.
//!
//! Loads declarations, expands them into entity runtimes, refreshes every
//! runtime on an interval and hot-reloads when the declarations change.
//! One-shot subcommands inspect entities or trigger install/skip.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use template_update_core::{config::load_dotenv, Config, UpdateState};
use template_update_declarations::{DeclarationLoader, LoadReport, LoadStatus};
use template_update_runtime::{
    ActionDispatcher, ActionExecutor, DryRunExecutor, EntityRegistry, HttpActionExecutor,
    InstallRequest, MiniJinjaEvaluator, RuntimeOptions, StateStore, TemplateEvaluator,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Template update worker: version tracking and install actions for devices.
#[derive(Parser, Debug)]
#[command(name = "update-worker", version, about)]
struct Cli {
    /// Declaration file or directory (overrides DECLARATIONS_PATH).
    #[arg(long)]
    declarations: Option<PathBuf>,

    /// Host states file, YAML or JSON (overrides STATES_PATH).
    #[arg(long)]
    states: Option<PathBuf>,

    /// Host base URL (overrides HOST_URL).
    #[arg(long)]
    host_url: Option<String>,

    /// Log actions instead of sending them.
    #[arg(long, env = "UPDATE_WORKER_DRY_RUN")]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh every entity on an interval until Ctrl-C.
    Run {
        /// Refresh interval in seconds (overrides REFRESH_INTERVAL_SECS).
        #[arg(long)]
        interval: Option<u64>,

        /// Disable hot reload of declarations.
        #[arg(long)]
        no_watch: bool,
    },
    /// Load, refresh once and print every entity as JSON.
    Check,
    /// Refresh once and install an update.
    Install {
        object_id: String,

        /// Version to install (default: latest).
        #[arg(long)]
        version: Option<String>,

        /// Skip the pre-install backup.
        #[arg(long)]
        no_backup: bool,
    },
    /// Refresh once and skip the current latest version.
    Skip { object_id: String },
}

// ── Wiring ──────────────────────────────────────────────────────────

struct Worker {
    config: Config,
    states: Arc<StateStore>,
    evaluator: Arc<dyn TemplateEvaluator>,
    loader: DeclarationLoader,
    registry: EntityRegistry,
}

impl Worker {
    fn new(config: Config, dry_run: bool) -> anyhow::Result<Self> {
        let states = Arc::new(StateStore::new());
        let evaluator: Arc<dyn TemplateEvaluator> =
            Arc::new(MiniJinjaEvaluator::new(Arc::clone(&states)));
        let executor = build_executor(&config, dry_run)?;
        info!(executor = executor.executor_name(), "action executor ready");

        let dispatcher = Arc::new(
            ActionDispatcher::new(executor, Arc::clone(&evaluator))
                .with_eval_timeout(config.refresh.eval_timeout())
                .with_action_timeout(config.host.action_timeout()),
        );
        let registry = EntityRegistry::new(
            Arc::clone(&evaluator),
            dispatcher,
            RuntimeOptions {
                eval_timeout: config.refresh.eval_timeout(),
            },
        );
        let loader = DeclarationLoader::new(config.declarations.path.clone());

        Ok(Self {
            config,
            states,
            evaluator,
            loader,
            registry,
        })
    }

    /// Re-read the states file, keeping the previous states on error.
    fn reload_states(&self) {
        let Some(path) = &self.config.refresh.states_path else {
            return;
        };
        if let Err(e) = self.states.load_file(path) {
            warn!(path = %path.display(), error = %e, "failed to load host states, keeping previous");
        }
    }

    /// Load and expand declarations, then sync the registry.
    fn reload_declarations(&mut self) -> anyhow::Result<LoadReport> {
        let report = self.loader.load_all().with_context(|| {
            format!(
                "failed to load declarations from {}",
                self.loader.path().display()
            )
        })?;
        for spec in &report.specs {
            for template in spec_templates(spec) {
                if let Err(e) = self.evaluator.validate(template) {
                    warn!(entity = %spec.object_id, error = %e, "template does not parse");
                }
            }
        }
        self.registry.sync(report.specs.clone());
        info!(
            loaded = report.loaded(),
            failed = report.failed(),
            entities = self.registry.len(),
            "declarations loaded"
        );
        Ok(report)
    }

    async fn refresh(&self) {
        self.reload_states();
        let results = self.registry.refresh_all().await;
        let count = |s: UpdateState| results.iter().filter(|(_, state)| *state == s).count();
        info!(
            entities = results.len(),
            up_to_date = count(UpdateState::UpToDate),
            update_available = count(UpdateState::UpdateAvailable),
            install_failed = count(UpdateState::InstallFailed),
            unavailable = count(UpdateState::Unavailable),
            "refresh complete"
        );
    }

    async fn run(mut self, watch: bool) -> anyhow::Result<()> {
        self.reload_declarations()?;

        let reload = Arc::new(Notify::new());
        if watch {
            self.loader
                .watch(Arc::clone(&reload))
                .context("failed to watch declarations")?;
        }

        let mut ticker = tokio::time::interval(self.config.refresh.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval = ?self.config.refresh.interval(), watch, "update-worker running");
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            let reload_requested = tokio::select! {
                _ = ticker.tick() => false,
                _ = reload.notified() => true,
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            };
            if reload_requested {
                if let Err(e) = self.reload_declarations() {
                    error!(error = %e, "reload failed, keeping current entities");
                    continue;
                }
            }

            // A refresh pass in flight is abandoned on shutdown.
            tokio::select! {
                _ = self.refresh() => {}
                _ = &mut shutdown => {
                    info!("shutdown signal received during refresh");
                    break;
                }
            }
        }

        info!("update-worker exited cleanly");
        Ok(())
    }

    async fn check(mut self) -> anyhow::Result<()> {
        let report = self.reload_declarations()?;
        self.refresh().await;

        let failures: Vec<_> = report
            .results
            .iter()
            .filter_map(|r| match &r.status {
                LoadStatus::Failed { slug, error } => Some(serde_json::json!({
                    "path": r.path,
                    "slug": slug,
                    "error": error,
                })),
                _ => None,
            })
            .collect();
        let output = serde_json::json!({
            "config": self.config.redacted_summary(),
            "entities": self.registry.snapshots().await,
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    async fn install(mut self, object_id: &str, request: InstallRequest) -> anyhow::Result<()> {
        self.reload_declarations()?;
        self.reload_states();
        let entity = self
            .registry
            .get(object_id)
            .with_context(|| format!("unknown entity '{object_id}'"))?;

        entity.refresh().await;
        let result = entity.request_install(request).await;
        println!("{}", serde_json::to_string_pretty(&entity.snapshot().await)?);
        let state = result.with_context(|| format!("install of '{object_id}' failed"))?;
        info!(entity = %object_id, state = %state, "install finished");
        Ok(())
    }

    async fn skip(mut self, object_id: &str) -> anyhow::Result<()> {
        self.reload_declarations()?;
        self.reload_states();
        let entity = self
            .registry
            .get(object_id)
            .with_context(|| format!("unknown entity '{object_id}'"))?;

        entity.refresh().await;
        entity
            .skip()
            .await
            .with_context(|| format!("skip of '{object_id}' failed"))?;
        println!("{}", serde_json::to_string_pretty(&entity.snapshot().await)?);
        Ok(())
    }
}

fn build_executor(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn ActionExecutor>> {
    match (&config.host.base_url, dry_run) {
        (Some(url), false) => {
            let executor = HttpActionExecutor::new(
                url,
                config.host.token.as_deref(),
                config.host.action_timeout(),
            )
            .context("failed to configure HTTP action executor")?;
            Ok(Arc::new(executor))
        }
        (None, false) => {
            warn!("HOST_URL not set, install actions will only be logged");
            Ok(Arc::new(DryRunExecutor))
        }
        (_, true) => Ok(Arc::new(DryRunExecutor)),
    }
}

/// Every template source a spec carries, for syntax checks at load time.
fn spec_templates(spec: &template_update_declarations::EntitySpec) -> Vec<&str> {
    let mut out = vec![
        spec.name.source(),
        spec.installed_version.source(),
        spec.latest_version.source(),
    ];
    for optional in [
        &spec.release_notes,
        &spec.title,
        &spec.entity_picture,
        &spec.availability,
    ]
    .into_iter()
    .flatten()
    {
        out.push(optional.source());
    }
    if let Some(action) = &spec.install_action {
        out.push(action.action.source());
    }
    out.retain(|s| template_update_core::is_templated(s));
    out
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(path) = &cli.declarations {
        config.declarations.path = path.clone();
    }
    if let Some(path) = &cli.states {
        config.refresh.states_path = Some(path.clone());
    }
    if let Some(url) = &cli.host_url {
        config.host.base_url = Some(url.clone());
    }
    if let Command::Run {
        interval: Some(secs),
        ..
    } = &cli.command
    {
        config.refresh.interval_secs = *secs;
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    apply_overrides(&mut config, &cli);
    config.log_summary();
    info!(declarations = %config.declarations.path.display(), "update-worker starting");

    let watch = config.declarations.watch;
    let worker = Worker::new(config, cli.dry_run)?;

    match cli.command {
        Command::Run { no_watch, .. } => worker.run(watch && !no_watch).await,
        Command::Check => worker.check().await,
        Command::Install {
            object_id,
            version,
            no_backup,
        } => {
            let mut request = InstallRequest::new().with_backup(!no_backup);
            request.version = version;
            worker.install(&object_id, request).await
        }
        Command::Skip { object_id } => worker.skip(&object_id).await,
    }
}
