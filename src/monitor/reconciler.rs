use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::{ApplicationOffer, ControllerStats, MachineInfo, ModelCounts};
use crate::domain::errors::DomainError;
use crate::domain::repositories::{ControllerRepository, ModelRepository, OfferRepository};
use crate::domain::value_objects::Life;
use crate::jujuapi::params::{
    ApplicationDelta, Delta, MachineDelta, ModelDelta, OfferDelta, UnitDelta,
};

/// Pure fold of all-watcher deltas into per-model counts. One tracker per
/// controller stream; interleaving across controllers cannot interfere.
#[derive(Debug, Default)]
pub struct CountsTracker {
    models: HashMap<Uuid, TrackedModel>,
}

#[derive(Debug, Default)]
struct TrackedModel {
    machines: HashMap<String, i64>,
    units: HashSet<String>,
    applications: HashSet<String>,
}

impl CountsTracker {
    fn model(&mut self, uuid: Uuid) -> &mut TrackedModel {
        self.models.entry(uuid).or_default()
    }

    pub fn model_seen(&mut self, uuid: Uuid) {
        self.model(uuid);
    }

    pub fn model_removed(&mut self, uuid: &Uuid) {
        self.models.remove(uuid);
    }

    pub fn machine_changed(&mut self, uuid: Uuid, machine_id: &str, cores: i64) {
        self.model(uuid).machines.insert(machine_id.to_string(), cores);
    }

    pub fn machine_removed(&mut self, uuid: Uuid, machine_id: &str) {
        self.model(uuid).machines.remove(machine_id);
    }

    pub fn unit_changed(&mut self, uuid: Uuid, name: &str) {
        self.model(uuid).units.insert(name.to_string());
    }

    pub fn unit_removed(&mut self, uuid: Uuid, name: &str) {
        self.model(uuid).units.remove(name);
    }

    pub fn application_changed(&mut self, uuid: Uuid, name: &str) {
        self.model(uuid).applications.insert(name.to_string());
    }

    pub fn application_removed(&mut self, uuid: Uuid, name: &str) {
        self.model(uuid).applications.remove(name);
    }

    pub fn counts(&self, uuid: &Uuid) -> Option<ModelCounts> {
        self.models.get(uuid).map(|m| ModelCounts {
            machines: m.machines.len() as i64,
            units: m.units.len() as i64,
            applications: m.applications.len() as i64,
            cores: m.machines.values().sum(),
        })
    }

    pub fn model_uuids(&self) -> Vec<Uuid> {
        self.models.keys().copied().collect()
    }

    pub fn stats(&self) -> ControllerStats {
        let mut stats = ControllerStats {
            model_count: self.models.len() as i64,
            ..Default::default()
        };
        for model in self.models.values() {
            stats.machine_count += model.machines.len() as i64;
            stats.unit_count += model.units.len() as i64;
            stats.application_count += model.applications.len() as i64;
        }
        stats
    }
}

/// Applies one controller's delta stream to the database, in stream order.
pub struct Reconciler<'a> {
    controller: &'a str,
    models: &'a dyn ModelRepository,
    offers: &'a dyn OfferRepository,
    controllers: &'a dyn ControllerRepository,
    tracker: CountsTracker,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        controller: &'a str,
        models: &'a dyn ModelRepository,
        offers: &'a dyn OfferRepository,
        controllers: &'a dyn ControllerRepository,
    ) -> Self {
        Reconciler {
            controller,
            models,
            offers,
            controllers,
            tracker: CountsTracker::default(),
        }
    }

    pub async fn apply_batch(
        &mut self,
        deltas: &[Delta],
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        for delta in deltas {
            self.apply(delta).await?;
        }
        self.flush(now).await
    }

    async fn apply(&mut self, delta: &Delta) -> Result<(), DomainError> {
        match delta.kind() {
            "model" => {
                let doc: ModelDelta = serde_json::from_value(delta.2.clone())?;
                if delta.is_remove() {
                    // A dying model drops out of the stream; trim our view.
                    self.tracker.model_removed(&doc.model_uuid);
                    self.models
                        .set_life(self.controller, &doc.model_uuid, Life::Dead)
                        .await?;
                } else {
                    self.tracker.model_seen(doc.model_uuid);
                    let life = doc.life.parse().unwrap_or(Life::Alive);
                    self.models
                        .set_life(self.controller, &doc.model_uuid, life)
                        .await?;
                    if let Some(status) = &doc.status {
                        self.models
                            .set_status(&doc.model_uuid, Some(&status.current))
                            .await?;
                    }
                }
            }
            "machine" => {
                let doc: MachineDelta = serde_json::from_value(delta.2.clone())?;
                if delta.is_remove() {
                    self.tracker.machine_removed(doc.model_uuid, &doc.id);
                    self.models.remove_machine(&doc.model_uuid, &doc.id).await?;
                } else {
                    let cores = doc
                        .hardware
                        .as_ref()
                        .and_then(|hw| hw.cpu_cores)
                        .unwrap_or(0);
                    self.tracker.machine_changed(doc.model_uuid, &doc.id, cores);
                    self.models
                        .update_machine(&MachineInfo {
                            model_uuid: doc.model_uuid,
                            machine_id: doc.id.clone(),
                            instance_id: doc.instance_id.clone(),
                            display_name: doc.display_name.clone(),
                            agent_status: doc.agent_status.as_ref().map(|s| s.current.clone()),
                            life: doc.life.parse().unwrap_or(Life::Alive),
                            cores,
                        })
                        .await?;
                }
            }
            "unit" => {
                let doc: UnitDelta = serde_json::from_value(delta.2.clone())?;
                if delta.is_remove() {
                    self.tracker.unit_removed(doc.model_uuid, &doc.name);
                } else {
                    self.tracker.unit_changed(doc.model_uuid, &doc.name);
                }
            }
            "application" => {
                let doc: ApplicationDelta = serde_json::from_value(delta.2.clone())?;
                if delta.is_remove() {
                    self.tracker.application_removed(doc.model_uuid, &doc.name);
                } else {
                    self.tracker.application_changed(doc.model_uuid, &doc.name);
                }
            }
            "applicationOffer" => {
                let doc: OfferDelta = serde_json::from_value(delta.2.clone())?;
                if delta.is_remove() {
                    self.offers.remove(&doc.offer_uuid).await?;
                } else {
                    self.offers
                        .upsert(&ApplicationOffer {
                            uuid: doc.offer_uuid,
                            url: doc.offer_url.clone(),
                            model_uuid: doc.model_uuid,
                            application_name: doc.application_name.clone(),
                        })
                        .await?;
                }
            }
            // Other entity kinds carry nothing we index.
            _ => {}
        }
        Ok(())
    }

    async fn flush(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        for uuid in self.tracker.model_uuids() {
            if let Some(counts) = self.tracker.counts(&uuid) {
                self.models.update_counts(&uuid, &counts, now).await?;
            }
        }
        self.controllers
            .set_stats(self.controller, &self.tracker.stats())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_u128(n as u128)
    }

    fn machine_change(model: Uuid, id: &str, cores: i64) -> Delta {
        Delta(
            "machine".into(),
            "change".into(),
            json!({
                "model-uuid": model,
                "id": id,
                "hardware-characteristics": {"cpu-cores": cores},
            }),
        )
    }

    #[test]
    fn test_counts_equal_fold_of_deltas() {
        let model = uuid(1);
        let mut tracker = CountsTracker::default();
        tracker.model_seen(model);
        tracker.machine_changed(model, "0", 4);
        tracker.machine_changed(model, "1", 2);
        tracker.unit_changed(model, "app/0");
        tracker.unit_changed(model, "app/1");
        tracker.unit_removed(model, "app/0");
        tracker.application_changed(model, "app");
        // re-reporting the same machine must not double count
        tracker.machine_changed(model, "1", 2);

        let counts = tracker.counts(&model).unwrap();
        assert_eq!(counts.machines, 2);
        assert_eq!(counts.units, 1);
        assert_eq!(counts.applications, 1);
        assert_eq!(counts.cores, 6);

        tracker.machine_removed(model, "0");
        assert_eq!(tracker.counts(&model).unwrap().machines, 1);
        assert_eq!(tracker.counts(&model).unwrap().cores, 2);
    }

    #[test]
    fn test_interleaved_controllers_do_not_interfere() {
        // One tracker per controller stream, as the monitor runs them.
        let mut a = CountsTracker::default();
        let mut b = CountsTracker::default();
        let model_a = uuid(1);
        let model_b = uuid(2);

        // interleave applications of the two streams
        a.model_seen(model_a);
        b.model_seen(model_b);
        a.machine_changed(model_a, "0", 1);
        b.machine_changed(model_b, "0", 8);
        a.unit_changed(model_a, "x/0");
        b.machine_changed(model_b, "1", 8);

        assert_eq!(a.counts(&model_a).unwrap().machines, 1);
        assert_eq!(a.counts(&model_a).unwrap().cores, 1);
        assert_eq!(b.counts(&model_b).unwrap().machines, 2);
        assert_eq!(b.counts(&model_b).unwrap().cores, 16);
        assert!(a.counts(&model_b).is_none());
    }

    #[test]
    fn test_model_removal_trims_tracker() {
        let model = uuid(3);
        let mut tracker = CountsTracker::default();
        tracker.model_seen(model);
        tracker.machine_changed(model, "0", 2);
        tracker.model_removed(&model);
        assert!(tracker.counts(&model).is_none());
        let stats = tracker.stats();
        assert_eq!(stats.model_count, 0);
        assert_eq!(stats.machine_count, 0);
    }

    #[test]
    fn test_stats_aggregate_across_models() {
        let mut tracker = CountsTracker::default();
        let m1 = uuid(1);
        let m2 = uuid(2);
        tracker.model_seen(m1);
        tracker.model_seen(m2);
        tracker.machine_changed(m1, "0", 1);
        tracker.machine_changed(m2, "0", 1);
        tracker.machine_changed(m2, "1", 1);
        tracker.unit_changed(m2, "a/0");
        tracker.application_changed(m2, "a");

        let stats = tracker.stats();
        assert_eq!(stats.model_count, 2);
        assert_eq!(stats.machine_count, 3);
        assert_eq!(stats.unit_count, 1);
        assert_eq!(stats.application_count, 1);
    }

    #[test]
    fn test_machine_delta_parses_into_tracker_shape() {
        let model = uuid(9);
        let delta = machine_change(model, "0", 4);
        let doc: MachineDelta = serde_json::from_value(delta.2.clone()).unwrap();
        assert_eq!(doc.model_uuid, model);
        assert_eq!(doc.hardware.unwrap().cpu_cores, Some(4));
    }
}
