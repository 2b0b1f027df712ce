//! Target workload polymorphism.
//!
//! The controller mutates the pod template of six workload kinds. This
//! module wraps them in a tagged [`Workload`] variant with two capabilities:
//! read the ordered container sequence, and replace a container's resources.
//! CronJob nests its pod template one level deeper, under the job template;
//! everything else reads `spec.template.spec.containers`.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
use kube::ResourceExt;

use crate::quantity::quantities_equal;

/// Annotation recording when this controller last mutated the target.
pub const ANNOTATION_LAST_UPDATED: &str = "verticalworkloadautoscaler.kubernetes.io/lastUpdated";

/// Annotation recording which VWA performed the mutation.
pub const ANNOTATION_UPDATED_BY: &str = "verticalworkloadautoscaler.kubernetes.io/updatedBy";

/// ArgoCD hint so resource changes are not flagged as drift.
pub const ANNOTATION_ARGOCD_COMPARE: &str = "argocd.argoproj.io/compare-options";

/// Flux hint so resource changes are not reverted.
pub const ANNOTATION_FLUX_IGNORE: &str = "fluxcd.io/ignore";

/// A workload kind whose pod template this controller may mutate.
#[derive(Clone, Debug)]
pub enum Workload {
    /// An apps/v1 Deployment
    Deployment(Deployment),
    /// An apps/v1 StatefulSet
    StatefulSet(StatefulSet),
    /// An apps/v1 DaemonSet
    DaemonSet(DaemonSet),
    /// An apps/v1 ReplicaSet
    ReplicaSet(ReplicaSet),
    /// A batch/v1 Job
    Job(Job),
    /// A batch/v1 CronJob; its pod template nests under the job template
    CronJob(CronJob),
}

impl Workload {
    /// The Kubernetes kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Workload::Deployment(_) => "Deployment",
            Workload::StatefulSet(_) => "StatefulSet",
            Workload::DaemonSet(_) => "DaemonSet",
            Workload::ReplicaSet(_) => "ReplicaSet",
            Workload::Job(_) => "Job",
            Workload::CronJob(_) => "CronJob",
        }
    }

    /// Whether the given kind string names a supported workload.
    pub fn supports_kind(kind: &str) -> bool {
        matches!(
            kind,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" | "CronJob"
        )
    }

    /// The object name.
    pub fn name(&self) -> String {
        match self {
            Workload::Deployment(o) => o.name_any(),
            Workload::StatefulSet(o) => o.name_any(),
            Workload::DaemonSet(o) => o.name_any(),
            Workload::ReplicaSet(o) => o.name_any(),
            Workload::Job(o) => o.name_any(),
            Workload::CronJob(o) => o.name_any(),
        }
    }

    /// The object namespace, empty if unset.
    pub fn namespace(&self) -> String {
        match self {
            Workload::Deployment(o) => o.namespace().unwrap_or_default(),
            Workload::StatefulSet(o) => o.namespace().unwrap_or_default(),
            Workload::DaemonSet(o) => o.namespace().unwrap_or_default(),
            Workload::ReplicaSet(o) => o.namespace().unwrap_or_default(),
            Workload::Job(o) => o.namespace().unwrap_or_default(),
            Workload::CronJob(o) => o.namespace().unwrap_or_default(),
        }
    }

    /// The containers of the pod template, empty when the template is unset.
    pub fn containers(&self) -> &[Container] {
        self.containers_opt().map(Vec::as_slice).unwrap_or(&[])
    }

    fn containers_opt(&self) -> Option<&Vec<Container>> {
        match self {
            Workload::Deployment(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|p| &p.containers),
            Workload::StatefulSet(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|p| &p.containers),
            Workload::DaemonSet(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|p| &p.containers),
            Workload::ReplicaSet(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.as_ref())
                .and_then(|t| t.spec.as_ref())
                .map(|p| &p.containers),
            Workload::Job(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|p| &p.containers),
            Workload::CronJob(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .and_then(|j| j.template.spec.as_ref())
                .map(|p| &p.containers),
        }
    }

    fn containers_mut(&mut self) -> Option<&mut Vec<Container>> {
        match self {
            Workload::Deployment(o) => o
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .map(|p| &mut p.containers),
            Workload::StatefulSet(o) => o
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .map(|p| &mut p.containers),
            Workload::DaemonSet(o) => o
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .map(|p| &mut p.containers),
            Workload::ReplicaSet(o) => o
                .spec
                .as_mut()
                .and_then(|s| s.template.as_mut())
                .and_then(|t| t.spec.as_mut())
                .map(|p| &mut p.containers),
            Workload::Job(o) => o
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .map(|p| &mut p.containers),
            Workload::CronJob(o) => o
                .spec
                .as_mut()
                .and_then(|s| s.job_template.spec.as_mut())
                .and_then(|j| j.template.spec.as_mut())
                .map(|p| &mut p.containers),
        }
    }

    /// Snapshot of the current resource requirements per container.
    pub fn container_requirements(&self) -> BTreeMap<String, ResourceRequirements> {
        self.containers()
            .iter()
            .map(|c| (c.name.clone(), c.resources.clone().unwrap_or_default()))
            .collect()
    }

    /// Write the given requirements into matching containers.
    ///
    /// A container is rewritten only when one of its four tracked quantities
    /// (cpu/memory request, cpu/memory limit) differs from the new value.
    /// Returns whether anything changed; the caller persists the object with
    /// a single write.
    pub fn apply_requirements(
        &mut self,
        new: &BTreeMap<String, ResourceRequirements>,
    ) -> bool {
        let containers = match self.containers_mut() {
            Some(c) => c,
            None => return false,
        };

        let mut mutated = false;
        for container in containers.iter_mut() {
            let desired = match new.get(&container.name) {
                Some(d) => d,
                None => continue,
            };
            let current = container.resources.clone().unwrap_or_default();
            if !requirements_equal(&current, desired) {
                container.resources = Some(desired.clone());
                mutated = true;
            }
        }
        mutated
    }

    /// Merge annotations into the object metadata, overwriting on collision.
    pub fn merge_annotations(&mut self, annotations: BTreeMap<String, String>) {
        let target = match self {
            Workload::Deployment(o) => o.annotations_mut(),
            Workload::StatefulSet(o) => o.annotations_mut(),
            Workload::DaemonSet(o) => o.annotations_mut(),
            Workload::ReplicaSet(o) => o.annotations_mut(),
            Workload::Job(o) => o.annotations_mut(),
            Workload::CronJob(o) => o.annotations_mut(),
        };
        for (k, v) in annotations {
            target.insert(k, v);
        }
    }
}

/// Compare two requirements on the four quantities the controller manages.
pub fn requirements_equal(a: &ResourceRequirements, b: &ResourceRequirements) -> bool {
    for resource in ["cpu", "memory"] {
        let pairs = [
            (
                a.requests.as_ref().and_then(|m| m.get(resource)),
                b.requests.as_ref().and_then(|m| m.get(resource)),
            ),
            (
                a.limits.as_ref().and_then(|m| m.get(resource)),
                b.limits.as_ref().and_then(|m| m.get(resource)),
            ),
        ];
        for (left, right) in pairs {
            match (left, right) {
                (None, None) => {}
                (Some(l), Some(r)) if quantities_equal(l, r) => {}
                _ => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::batch::v1::{CronJobSpec, JobTemplateSpec, JobSpec};
    use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn requirements(req_cpu: &str, req_mem: &str) -> ResourceRequirements {
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), q(req_cpu));
        requests.insert("memory".to_string(), q(req_mem));
        ResourceRequirements {
            requests: Some(requests),
            ..Default::default()
        }
    }

    fn container(name: &str, resources: Option<ResourceRequirements>) -> Container {
        Container {
            name: name.to_string(),
            resources,
            ..Default::default()
        }
    }

    fn deployment(containers: Vec<Container>) -> Workload {
        Workload::Deployment(Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("shop".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn cronjob(containers: Vec<Container>) -> Workload {
        Workload::CronJob(CronJob {
            metadata: ObjectMeta {
                name: Some("report".to_string()),
                namespace: Some("shop".to_string()),
                ..Default::default()
            },
            spec: Some(CronJobSpec {
                job_template: JobTemplateSpec {
                    spec: Some(JobSpec {
                        template: PodTemplateSpec {
                            spec: Some(PodSpec {
                                containers,
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                schedule: "* * * * *".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn reads_containers_from_deployment_template() {
        let w = deployment(vec![container("web", Some(requirements("250m", "128Mi")))]);
        let current = w.container_requirements();
        assert_eq!(current.len(), 1);
        let req = current["web"].requests.as_ref().unwrap();
        assert_eq!(req["cpu"].0, "250m");
    }

    #[test]
    fn reads_containers_from_nested_cronjob_template() {
        let w = cronjob(vec![container("report", Some(requirements("100m", "64Mi")))]);
        assert_eq!(w.kind(), "CronJob");
        let current = w.container_requirements();
        assert!(current.contains_key("report"));
    }

    #[test]
    fn container_without_resources_maps_to_empty_requirements() {
        let w = deployment(vec![container("web", None)]);
        let current = w.container_requirements();
        assert!(current["web"].requests.is_none());
        assert!(current["web"].limits.is_none());
    }

    #[test]
    fn apply_mutates_only_on_difference() {
        let mut w = deployment(vec![container("web", Some(requirements("250m", "128Mi")))]);

        let mut new = BTreeMap::new();
        new.insert("web".to_string(), requirements("500m", "256Mi"));
        assert!(w.apply_requirements(&new));

        // same values expressed differently: no mutation (idempotence)
        let mut same = BTreeMap::new();
        same.insert("web".to_string(), requirements("0.5", "256Mi"));
        assert!(!w.apply_requirements(&same));
    }

    #[test]
    fn apply_skips_containers_absent_from_the_map() {
        let mut w = deployment(vec![
            container("web", Some(requirements("250m", "128Mi"))),
            container("sidecar", Some(requirements("50m", "32Mi"))),
        ]);

        let mut new = BTreeMap::new();
        new.insert("web".to_string(), requirements("500m", "256Mi"));
        assert!(w.apply_requirements(&new));

        let current = w.container_requirements();
        assert_eq!(current["sidecar"].requests.as_ref().unwrap()["cpu"].0, "50m");
    }

    #[test]
    fn annotations_merge_and_overwrite() {
        let mut w = deployment(vec![]);
        let mut first = BTreeMap::new();
        first.insert("team".to_string(), "a".to_string());
        w.merge_annotations(first);

        let mut second = BTreeMap::new();
        second.insert("team".to_string(), "b".to_string());
        second.insert(ANNOTATION_UPDATED_BY.to_string(), "web-vwa".to_string());
        w.merge_annotations(second);

        match &w {
            Workload::Deployment(d) => {
                let ann = d.metadata.annotations.as_ref().unwrap();
                assert_eq!(ann["team"], "b");
                assert_eq!(ann[ANNOTATION_UPDATED_BY], "web-vwa");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn requirements_equality_tracks_all_four_quantities() {
        let a = requirements("100m", "128Mi");
        assert!(requirements_equal(&a, &a.clone()));

        let mut b = a.clone();
        b.requests.as_mut().unwrap().insert("memory".to_string(), q("256Mi"));
        assert!(!requirements_equal(&a, &b));

        // a limit present on one side only is a difference
        let mut c = a.clone();
        let mut limits = BTreeMap::new();
        limits.insert("cpu".to_string(), q("100m"));
        c.limits = Some(limits);
        assert!(!requirements_equal(&a, &c));
    }

    #[test]
    fn supported_kinds_are_exactly_the_six() {
        for kind in ["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Job", "CronJob"] {
            assert!(Workload::supports_kind(kind));
        }
        assert!(!Workload::supports_kind("Pod"));
        assert!(!Workload::supports_kind("Node"));
    }
}
