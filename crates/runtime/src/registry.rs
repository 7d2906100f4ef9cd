//! Owns every live entity runtime and keeps it in step with the declarations.

use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use template_update_core::{EntitySnapshot, UpdateState};
use template_update_declarations::EntitySpec;

use crate::dispatcher::ActionDispatcher;
use crate::entity::{RuntimeOptions, UpdateEntity};
use crate::traits::TemplateEvaluator;

/// Counts from one [`EntityRegistry::sync`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub replaced: usize,
    pub kept: usize,
    pub removed: usize,
    /// Specs dropped because an earlier spec had the same object id.
    pub duplicates: usize,
}

/// Registry of [`UpdateEntity`] runtimes keyed by object id, in declaration order.
pub struct EntityRegistry {
    entities: IndexMap<String, Arc<UpdateEntity>>,
    evaluator: Arc<dyn TemplateEvaluator>,
    dispatcher: Arc<ActionDispatcher>,
    options: RuntimeOptions,
}

impl EntityRegistry {
    pub fn new(
        evaluator: Arc<dyn TemplateEvaluator>,
        dispatcher: Arc<ActionDispatcher>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            entities: IndexMap::new(),
            evaluator,
            dispatcher,
            options,
        }
    }

    /// Synchronize runtimes with a freshly expanded set of specs.
    ///
    /// - Adds runtimes for new object ids.
    /// - Replaces runtimes whose spec changed (their state starts over).
    /// - Keeps runtimes whose spec is identical (state, skip and errors survive).
    /// - Removes runtimes whose object id is gone.
    /// - Drops later specs that repeat an object id, with a warning.
    pub fn sync(&mut self, specs: Vec<EntitySpec>) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let mut previous = std::mem::take(&mut self.entities);

        for spec in specs {
            let id = spec.object_id.clone();
            if self.entities.contains_key(&id) {
                tracing::warn!(entity = %id, "duplicate object id, keeping the first spec");
                summary.duplicates += 1;
                continue;
            }
            let entity = match previous.shift_remove(&id) {
                Some(existing) if existing.spec() == &spec => {
                    summary.kept += 1;
                    existing
                }
                Some(_) => {
                    summary.replaced += 1;
                    self.build(spec)
                }
                None => {
                    summary.added += 1;
                    self.build(spec)
                }
            };
            self.entities.insert(id, entity);
        }

        summary.removed = previous.len();
        for id in previous.keys() {
            tracing::info!(entity = %id, "entity removed");
        }
        tracing::info!(
            added = summary.added,
            replaced = summary.replaced,
            kept = summary.kept,
            removed = summary.removed,
            duplicates = summary.duplicates,
            "entity registry synchronized"
        );
        summary
    }

    fn build(&self, spec: EntitySpec) -> Arc<UpdateEntity> {
        Arc::new(UpdateEntity::new(
            spec,
            Arc::clone(&self.evaluator),
            Arc::clone(&self.dispatcher),
            self.options.clone(),
        ))
    }

    pub fn get(&self, object_id: &str) -> Option<Arc<UpdateEntity>> {
        self.entities.get(object_id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<UpdateEntity>> {
        self.entities.values()
    }

    /// Refresh every entity concurrently.
    pub async fn refresh_all(&self) -> Vec<(String, UpdateState)> {
        let futures = self.entities.iter().map(|(id, entity)| async move {
            (id.clone(), entity.refresh().await)
        });
        join_all(futures).await
    }

    pub async fn snapshots(&self) -> Vec<EntitySnapshot> {
        join_all(self.entities.values().map(|e| e.snapshot())).await
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::StateStore;
    use crate::templating::MiniJinjaEvaluator;
    use crate::traits::DryRunExecutor;
    use template_update_declarations::{expand, parse_document};

    fn registry(states: Arc<StateStore>) -> EntityRegistry {
        let evaluator: Arc<dyn TemplateEvaluator> = Arc::new(MiniJinjaEvaluator::new(states));
        let dispatcher = Arc::new(ActionDispatcher::new(
            Arc::new(DryRunExecutor),
            Arc::clone(&evaluator),
        ));
        EntityRegistry::new(evaluator, dispatcher, RuntimeOptions::default())
    }

    fn specs(yaml: &str) -> Vec<EntitySpec> {
        let declarations: Vec<_> = parse_document(yaml)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.declaration.ok())
            .collect();
        expand(&declarations).specs
    }

    const BULBS: &str = r#"
- bulbs:
    for_each:
      - device_id: "1"
      - device_id: "2"
    update:
      installed_version: "{{ states('sensor.bulb_' ~ item.device_id) }}"
      latest_version: "4.0"
- hub:
    installed_version: "1.0"
    latest_version: "1.1"
"#;

    #[tokio::test]
    async fn sync_adds_and_refreshes_in_order() {
        let states = Arc::new(StateStore::new());
        states.set("sensor.bulb_1", "4.0");
        states.set("sensor.bulb_2", "3.0");
        let mut reg = registry(states);
        assert!(reg.is_empty());

        let summary = reg.sync(specs(BULBS));
        assert_eq!(summary.added, 3);
        assert_eq!(reg.ids().collect::<Vec<_>>(), vec!["bulbs_0", "bulbs_1", "hub"]);

        let results = reg.refresh_all().await;
        assert_eq!(
            results,
            vec![
                ("bulbs_0".to_string(), UpdateState::UpToDate),
                ("bulbs_1".to_string(), UpdateState::UpdateAvailable),
                ("hub".to_string(), UpdateState::UpdateAvailable),
            ]
        );
        assert_eq!(reg.snapshots().await.len(), 3);
    }

    #[tokio::test]
    async fn one_broken_entity_does_not_affect_others() {
        let states = Arc::new(StateStore::new());
        states.set("sensor.bulb_1", "4.0");
        let mut reg = registry(states);
        reg.sync(specs(BULBS));

        let results = reg.refresh_all().await;
        assert_eq!(results[0].1, UpdateState::UpToDate);
        assert_eq!(results[1].1, UpdateState::Unavailable);
        assert_eq!(results[2].1, UpdateState::UpdateAvailable);
    }

    #[tokio::test]
    async fn unchanged_specs_keep_their_runtime() {
        let mut reg = registry(Arc::new(StateStore::new()));
        reg.sync(specs(BULBS));
        let hub = reg.get("hub").unwrap();
        hub.refresh().await;
        hub.skip().await.unwrap();

        let changed = r#"
- bulbs:
    for_each:
      - device_id: "1"
    update:
      installed_version: "{{ states('sensor.bulb_' ~ item.device_id) }}"
      latest_version: "5.0"
- hub:
    installed_version: "1.0"
    latest_version: "1.1"
"#;
        let summary = reg.sync(specs(changed));
        assert_eq!(
            summary,
            SyncSummary {
                added: 0,
                replaced: 1,
                kept: 1,
                removed: 1,
                duplicates: 0,
            }
        );
        assert!(Arc::ptr_eq(&hub, &reg.get("hub").unwrap()));
        assert!(reg.get("hub").unwrap().snapshot().await.is_skipped);
        assert!(reg.get("bulbs_1").is_none());
    }

    #[tokio::test]
    async fn duplicate_object_ids_keep_the_first_spec() {
        let mut reg = registry(Arc::new(StateStore::new()));
        let mut all = specs(BULBS);
        let mut clash = all[2].clone();
        clash.object_id = "bulbs_0".into();
        all.push(clash);

        let summary = reg.sync(all);
        assert_eq!(summary.added, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(reg.len(), 3);
        assert_eq!(
            reg.get("bulbs_0").unwrap().spec().index,
            Some(0),
            "first spec wins"
        );
    }
}
