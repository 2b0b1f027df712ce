//! Secondary indexes over the VWA and HPA caches.
//!
//! kube-rs has no controller-runtime-style field indexer, so reverse
//! lookups are served by in-memory multi-maps maintained from the same
//! watcher streams that feed the caches. The maps are `DashMap`-backed so
//! the watch mappers can read them concurrently while the index streams
//! write. Five field indexes exist, matching the lookups the controller
//! performs:
//!
//! | field                          | on  |
//! |--------------------------------|-----|
//! | `spec.vpaReference.name`       | VWA |
//! | `status.scaleTargetRef.name`   | VWA |
//! | `status.scaleTargetRef.kind`   | VWA |
//! | `spec.scaleTargetRef.name`     | HPA |
//! | `spec.scaleTargetRef.kind`     | HPA |
//!
//! Compound lookups (name *and* kind) intersect two indexes. Lookup results
//! are sorted so callers see a deterministic order.

use dashmap::{DashMap, DashSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::runtime::watcher::Event;
use kube::ResourceExt;

use crate::crd::VerticalWorkloadAutoscaler;

/// One single-field index: (namespace, field value) → object names.
///
/// Objects whose extracted value is empty are not indexed; no lookup ever
/// queries the empty value. `assigned` remembers each object's current
/// value so an update or delete can drop the old entry.
#[derive(Default)]
struct FieldIndex {
    by_value: DashMap<(String, String), DashSet<String>>,
    assigned: DashMap<(String, String), String>,
}

impl FieldIndex {
    fn upsert(&self, namespace: &str, name: &str, value: &str) {
        self.remove(namespace, name);
        if value.is_empty() {
            return;
        }
        self.assigned.insert(
            (namespace.to_string(), name.to_string()),
            value.to_string(),
        );
        self.by_value
            .entry((namespace.to_string(), value.to_string()))
            .or_default()
            .insert(name.to_string());
    }

    fn remove(&self, namespace: &str, name: &str) {
        let assigned_key = (namespace.to_string(), name.to_string());
        if let Some((_, old)) = self.assigned.remove(&assigned_key) {
            let value_key = (namespace.to_string(), old);
            if let Some(members) = self.by_value.get(&value_key) {
                members.remove(name);
            }
            self.by_value.remove_if(&value_key, |_, members| members.is_empty());
        }
    }

    fn get(&self, namespace: &str, value: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_value
            .get(&(namespace.to_string(), value.to_string()))
            .map(|members| members.iter().map(|n| n.key().clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn contains(&self, namespace: &str, value: &str, name: &str) -> bool {
        self.by_value
            .get(&(namespace.to_string(), value.to_string()))
            .map(|members| members.contains(name))
            .unwrap_or(false)
    }

    fn clear(&self) {
        self.by_value.clear();
        self.assigned.clear();
    }
}

/// Registry of all field indexes, shared between the watch mappers and the
/// reconciler.
#[derive(Default)]
pub struct Indexes {
    vwa_by_vpa_ref: FieldIndex,
    vwa_by_target_name: FieldIndex,
    vwa_by_target_kind: FieldIndex,
    hpa_by_target_name: FieldIndex,
    hpa_by_target_kind: FieldIndex,
}

impl Indexes {
    /// Create an empty registry; the watch streams populate it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one VWA watcher event into the VWA indexes.
    pub fn apply_vwa_event(&self, event: &Event<VerticalWorkloadAutoscaler>) {
        match event {
            Event::Init => {
                self.vwa_by_vpa_ref.clear();
                self.vwa_by_target_name.clear();
                self.vwa_by_target_kind.clear();
            }
            Event::InitApply(vwa) | Event::Apply(vwa) => {
                let ns = vwa.namespace().unwrap_or_default();
                let name = vwa.name_any();
                self.vwa_by_vpa_ref
                    .upsert(&ns, &name, &vwa.spec.vpa_reference.name);
                let target = vwa
                    .status
                    .as_ref()
                    .and_then(|s| s.scale_target_ref.as_ref());
                let (target_name, target_kind) = match target {
                    Some(t) => (t.name.as_str(), t.kind.as_str()),
                    None => ("", ""),
                };
                self.vwa_by_target_name.upsert(&ns, &name, target_name);
                self.vwa_by_target_kind.upsert(&ns, &name, target_kind);
            }
            Event::InitDone => {}
            Event::Delete(vwa) => {
                let ns = vwa.namespace().unwrap_or_default();
                let name = vwa.name_any();
                self.vwa_by_vpa_ref.remove(&ns, &name);
                self.vwa_by_target_name.remove(&ns, &name);
                self.vwa_by_target_kind.remove(&ns, &name);
            }
        }
    }

    /// Feed one HPA watcher event into the HPA indexes.
    pub fn apply_hpa_event(&self, event: &Event<HorizontalPodAutoscaler>) {
        match event {
            Event::Init => {
                self.hpa_by_target_name.clear();
                self.hpa_by_target_kind.clear();
            }
            Event::InitApply(hpa) | Event::Apply(hpa) => {
                let ns = hpa.namespace().unwrap_or_default();
                let name = hpa.name_any();
                let (target_name, target_kind) = match hpa.spec.as_ref() {
                    Some(spec) => (
                        spec.scale_target_ref.name.as_str(),
                        spec.scale_target_ref.kind.as_str(),
                    ),
                    None => ("", ""),
                };
                self.hpa_by_target_name.upsert(&ns, &name, target_name);
                self.hpa_by_target_kind.upsert(&ns, &name, target_kind);
            }
            Event::InitDone => {}
            Event::Delete(hpa) => {
                let ns = hpa.namespace().unwrap_or_default();
                let name = hpa.name_any();
                self.hpa_by_target_name.remove(&ns, &name);
                self.hpa_by_target_kind.remove(&ns, &name);
            }
        }
    }

    /// Names of VWAs in `namespace` referencing the given VPA.
    pub fn vwas_referencing_vpa(&self, namespace: &str, vpa_name: &str) -> Vec<String> {
        self.vwa_by_vpa_ref.get(namespace, vpa_name)
    }

    /// Names of VWAs in `namespace` whose status targets the given workload.
    pub fn vwas_targeting(&self, namespace: &str, name: &str, kind: &str) -> Vec<String> {
        self.vwa_by_target_name
            .get(namespace, name)
            .into_iter()
            .filter(|vwa| self.vwa_by_target_kind.contains(namespace, kind, vwa))
            .collect()
    }

    /// Names of HPAs in `namespace` scaling the given workload.
    pub fn hpas_targeting(&self, namespace: &str, name: &str, kind: &str) -> Vec<String> {
        self.hpa_by_target_name
            .get(namespace, name)
            .into_iter()
            .filter(|hpa| self.hpa_by_target_kind.contains(namespace, kind, hpa))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{VerticalWorkloadAutoscalerSpec, VerticalWorkloadAutoscalerStatus};
    use k8s_openapi::api::autoscaling::v2::{
        CrossVersionObjectReference, HorizontalPodAutoscalerSpec,
    };
    use kube::api::ObjectMeta;

    fn vwa(ns: &str, name: &str, vpa: &str, target: Option<(&str, &str)>) -> VerticalWorkloadAutoscaler {
        let spec: VerticalWorkloadAutoscalerSpec =
            serde_json::from_value(serde_json::json!({"vpaReference": {"name": vpa}})).unwrap();
        let mut obj = VerticalWorkloadAutoscaler::new(name, spec);
        obj.metadata.namespace = Some(ns.to_string());
        if let Some((kind, tname)) = target {
            obj.status = Some(VerticalWorkloadAutoscalerStatus {
                scale_target_ref: Some(CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: kind.to_string(),
                    name: tname.to_string(),
                }),
                ..Default::default()
            });
        }
        obj
    }

    fn hpa(ns: &str, name: &str, target_kind: &str, target_name: &str) -> HorizontalPodAutoscaler {
        HorizontalPodAutoscaler {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: target_kind.to_string(),
                    name: target_name.to_string(),
                },
                max_replicas: 10,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn vpa_reference_lookup_is_namespace_scoped() {
        let indexes = Indexes::new();
        indexes.apply_vwa_event(&Event::Apply(vwa("shop", "web-vwa", "web-vpa", None)));
        indexes.apply_vwa_event(&Event::Apply(vwa("other", "web-vwa", "web-vpa", None)));

        assert_eq!(indexes.vwas_referencing_vpa("shop", "web-vpa"), vec!["web-vwa"]);
        assert_eq!(indexes.vwas_referencing_vpa("shop", "api-vpa"), Vec::<String>::new());
    }

    #[test]
    fn duplicate_references_are_both_visible() {
        let indexes = Indexes::new();
        indexes.apply_vwa_event(&Event::Apply(vwa("shop", "a", "web-vpa", None)));
        indexes.apply_vwa_event(&Event::Apply(vwa("shop", "b", "web-vpa", None)));

        let hits = indexes.vwas_referencing_vpa("shop", "web-vpa");
        assert_eq!(hits, vec!["a", "b"]);
    }

    #[test]
    fn target_lookup_intersects_name_and_kind() {
        let indexes = Indexes::new();
        indexes.apply_vwa_event(&Event::Apply(vwa(
            "shop",
            "web-vwa",
            "web-vpa",
            Some(("Deployment", "web")),
        )));
        indexes.apply_vwa_event(&Event::Apply(vwa(
            "shop",
            "web-sts-vwa",
            "web-sts-vpa",
            Some(("StatefulSet", "web")),
        )));

        // same target name, different kind: only the matching kind is returned
        assert_eq!(
            indexes.vwas_targeting("shop", "web", "Deployment"),
            vec!["web-vwa"]
        );
        assert_eq!(
            indexes.vwas_targeting("shop", "web", "StatefulSet"),
            vec!["web-sts-vwa"]
        );
    }

    #[test]
    fn updates_move_an_object_between_keys() {
        let indexes = Indexes::new();
        indexes.apply_vwa_event(&Event::Apply(vwa("shop", "web-vwa", "old-vpa", None)));
        indexes.apply_vwa_event(&Event::Apply(vwa("shop", "web-vwa", "new-vpa", None)));

        assert!(indexes.vwas_referencing_vpa("shop", "old-vpa").is_empty());
        assert_eq!(indexes.vwas_referencing_vpa("shop", "new-vpa"), vec!["web-vwa"]);
    }

    #[test]
    fn deletes_remove_all_entries() {
        let indexes = Indexes::new();
        let obj = vwa("shop", "web-vwa", "web-vpa", Some(("Deployment", "web")));
        indexes.apply_vwa_event(&Event::Apply(obj.clone()));
        indexes.apply_vwa_event(&Event::Delete(obj));

        assert!(indexes.vwas_referencing_vpa("shop", "web-vpa").is_empty());
        assert!(indexes.vwas_targeting("shop", "web", "Deployment").is_empty());
    }

    #[test]
    fn restart_resets_the_maps() {
        let indexes = Indexes::new();
        indexes.apply_vwa_event(&Event::Apply(vwa("shop", "stale", "stale-vpa", None)));
        indexes.apply_vwa_event(&Event::Init);
        indexes.apply_vwa_event(&Event::InitApply(vwa("shop", "fresh", "fresh-vpa", None)));
        indexes.apply_vwa_event(&Event::InitDone);

        assert!(indexes.vwas_referencing_vpa("shop", "stale-vpa").is_empty());
        assert_eq!(
            indexes.vwas_referencing_vpa("shop", "fresh-vpa"),
            vec!["fresh"]
        );
    }

    #[test]
    fn hpa_lookups_follow_the_scale_target() {
        let indexes = Indexes::new();
        indexes.apply_hpa_event(&Event::Apply(hpa("shop", "web-hpa", "Deployment", "web")));

        assert_eq!(
            indexes.hpas_targeting("shop", "web", "Deployment"),
            vec!["web-hpa"]
        );
        assert!(indexes.hpas_targeting("shop", "web", "StatefulSet").is_empty());

        indexes.apply_hpa_event(&Event::Delete(hpa("shop", "web-hpa", "Deployment", "web")));
        assert!(indexes.hpas_targeting("shop", "web", "Deployment").is_empty());
    }

    #[test]
    fn vwa_without_status_target_is_not_target_indexed() {
        let indexes = Indexes::new();
        indexes.apply_vwa_event(&Event::Apply(vwa("shop", "web-vwa", "web-vpa", None)));
        assert!(indexes.vwas_targeting("shop", "", "").is_empty());
    }

    /// Lookups from one thread stay consistent while another thread applies
    /// events, without any external locking.
    #[test]
    fn concurrent_reads_and_writes_do_not_block_each_other() {
        let indexes = std::sync::Arc::new(Indexes::new());
        let writer = {
            let indexes = indexes.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let name = format!("vwa-{i}");
                    indexes.apply_vwa_event(&Event::Apply(vwa("shop", &name, "web-vpa", None)));
                }
            })
        };
        for _ in 0..100 {
            let hits = indexes.vwas_referencing_vpa("shop", "web-vpa");
            assert!(hits.len() <= 100);
        }
        writer.join().unwrap();
        assert_eq!(indexes.vwas_referencing_vpa("shop", "web-vpa").len(), 100);
    }
}
