//! End-to-end flow over the example declarations and host states:
//! load, expand, refresh, install and skip.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use template_update_core::{UpdateError, UpdateState};
use template_update_declarations::DeclarationLoader;
use template_update_runtime::{
    ActionCall, ActionDispatcher, ActionExecutor, EntityRegistry, InstallRequest,
    MiniJinjaEvaluator, RuntimeOptions, StateStore, TemplateEvaluator,
};

fn workspace_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(relative)
}

#[derive(Default)]
struct CapturingExecutor {
    calls: Mutex<Vec<ActionCall>>,
}

#[async_trait::async_trait]
impl ActionExecutor for CapturingExecutor {
    async fn invoke(&self, call: &ActionCall) -> Result<(), UpdateError> {
        self.calls.lock().unwrap().push(call.clone());
        Ok(())
    }

    fn executor_name(&self) -> &str {
        "capturing"
    }
}

struct Setup {
    states: Arc<StateStore>,
    executor: Arc<CapturingExecutor>,
    registry: EntityRegistry,
}

fn setup() -> Setup {
    let states = Arc::new(StateStore::new());
    states
        .load_file(&workspace_path("data/states/example.yaml"))
        .expect("load example states");

    let evaluator: Arc<dyn TemplateEvaluator> =
        Arc::new(MiniJinjaEvaluator::new(Arc::clone(&states)));
    let executor = Arc::new(CapturingExecutor::default());
    let dispatcher = Arc::new(ActionDispatcher::new(executor.clone(), Arc::clone(&evaluator)));
    let mut registry = EntityRegistry::new(evaluator, dispatcher, RuntimeOptions::default());

    let report = DeclarationLoader::new(workspace_path("data/declarations/examples"))
        .load_all()
        .expect("load example declarations");
    registry.sync(report.specs);

    Setup {
        states,
        executor,
        registry,
    }
}

#[tokio::test]
async fn refresh_derives_states_from_host() {
    let s = setup();
    let results = s.registry.refresh_all().await;
    assert_eq!(
        results,
        vec![
            ("bulbs_0".to_string(), UpdateState::UpToDate),
            ("bulbs_1".to_string(), UpdateState::UpdateAvailable),
            ("thermostat".to_string(), UpdateState::UpToDate),
            ("hub_firmware".to_string(), UpdateState::UpdateAvailable),
        ]
    );

    let snapshots = s.registry.snapshots().await;
    assert_eq!(snapshots[0].name, "1 Firmware");
    assert_eq!(snapshots[1].name, "2 Firmware");
    assert_eq!(snapshots[1].title.as_deref(), Some("Bulb in the hallway"));
    assert_eq!(
        snapshots[3].release_notes.as_deref(),
        Some("Faster pairing and bug fixes.")
    );
}

#[tokio::test]
async fn offline_bulb_becomes_unavailable() {
    let s = setup();
    s.states.set("binary_sensor.bulb_2_online", "off");
    s.registry.refresh_all().await;
    let bulb = s.registry.get("bulbs_1").unwrap();
    assert_eq!(bulb.state().await, UpdateState::Unavailable);
    assert_eq!(
        s.registry.get("bulbs_0").unwrap().state().await,
        UpdateState::UpToDate
    );
}

#[tokio::test]
async fn bulb_install_renders_item_topic() {
    let s = setup();
    s.registry.refresh_all().await;

    let bulb = s.registry.get("bulbs_1").unwrap();
    let state = bulb.request_install(InstallRequest::new()).await.unwrap();
    // The device has not reported the new version yet.
    assert_eq!(state, UpdateState::UpdateAvailable);

    let calls = s.executor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].action, "mqtt.publish");
    assert_eq!(calls[0].data["topic"], "bulbs/2/ota");
    assert_eq!(calls[0].data["payload"], r#"{"version": "4.0"}"#);

    s.states.set("sensor.bulb_2_version", "4.0");
    assert_eq!(bulb.refresh().await, UpdateState::UpToDate);
}

#[tokio::test]
async fn thermostat_cannot_be_skipped_or_installed() {
    let s = setup();
    s.registry.refresh_all().await;
    let thermostat = s.registry.get("thermostat").unwrap();

    assert!(matches!(
        thermostat.skip().await,
        Err(UpdateError::OperationNotAllowed(_))
    ));
    assert!(matches!(
        thermostat.request_install(InstallRequest::new()).await,
        Err(UpdateError::UnsupportedOperation(_))
    ));
}

#[tokio::test]
async fn snapshots_serialize_for_the_host() {
    let s = setup();
    s.registry.refresh_all().await;
    let hub = s.registry.get("hub_firmware").unwrap();
    hub.skip().await.unwrap();

    let json = serde_json::to_value(hub.snapshot().await).unwrap();
    assert_eq!(json["state"], "update_available");
    assert_eq!(json["skipped_version"], "1.1.0");
    assert_eq!(json["is_skipped"], true);
    assert_eq!(json["supported_features"]["install"], true);
}
