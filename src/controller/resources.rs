//! Recommendation projection.
//!
//! Maps a VPA recommendation plus the target's current container resources
//! into the requirements to write, filtered by the VWA policy: QoS class,
//! per-resource tolerance, `avoidCPULimit`, and the ignore flags. Containers
//! absent from the recommendation are never touched.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::crd::{
    QualityOfService, RecommendedContainerResources, RecommendedPodResources,
    VerticalWorkloadAutoscalerSpec,
};
use crate::quantity::exceeds_tolerance;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// Compute the requirements to write for every container the recommendation
/// covers.
///
/// Starts from a copy of each container's current requirements so resources
/// the policy does not act on survive untouched.
pub fn project_resources(
    spec: &VerticalWorkloadAutoscalerSpec,
    current: &BTreeMap<String, ResourceRequirements>,
    recommendation: &RecommendedPodResources,
) -> BTreeMap<String, ResourceRequirements> {
    let mut projected = BTreeMap::new();
    for rec in &recommendation.container_recommendations {
        let base = current.get(&rec.container_name).cloned().unwrap_or_default();
        projected.insert(rec.container_name.clone(), project_container(spec, base, rec));
    }
    projected
}

fn project_container(
    spec: &VerticalWorkloadAutoscalerSpec,
    base: ResourceRequirements,
    rec: &RecommendedContainerResources,
) -> ResourceRequirements {
    let mut requests = base.requests.clone().unwrap_or_default();
    let mut limits = base.limits.clone().unwrap_or_default();

    for resource in [CPU, MEMORY] {
        if resource == CPU && spec.ignore_cpu_recommendations {
            continue;
        }
        if resource == MEMORY && spec.ignore_memory_recommendations {
            continue;
        }
        let tolerance = if resource == CPU {
            spec.cpu_tolerance_percent()
        } else {
            spec.memory_tolerance_percent()
        };

        match spec.quality_of_service {
            QualityOfService::Guaranteed => {
                let target = match rec.target.get(resource) {
                    Some(t) => t,
                    None => continue,
                };
                if should_change(requests.get(resource), target, tolerance) {
                    requests.insert(resource.to_string(), target.clone());
                    if resource == CPU && spec.avoid_cpu_limit {
                        limits.remove(CPU);
                    } else {
                        limits.insert(resource.to_string(), target.clone());
                    }
                }
            }
            QualityOfService::Burstable => {
                let lower = rec.lower_bound.get(resource);
                let upper = rec.upper_bound.get(resource);
                if let Some(lower) = lower {
                    if should_change(requests.get(resource), lower, tolerance) {
                        requests.insert(resource.to_string(), lower.clone());
                        if resource == CPU && spec.avoid_cpu_limit {
                            limits.remove(CPU);
                        } else if let Some(upper) = upper {
                            limits.insert(resource.to_string(), upper.clone());
                        }
                    }
                }
                // CPU limits also track the upper bound on their own
                if resource == CPU {
                    if let Some(upper) = upper {
                        if should_change(limits.get(CPU), upper, tolerance) {
                            if spec.avoid_cpu_limit {
                                limits.remove(CPU);
                            } else {
                                limits.insert(CPU.to_string(), upper.clone());
                            }
                        }
                    }
                }
            }
        }
    }

    ResourceRequirements {
        requests: if requests.is_empty() { None } else { Some(requests) },
        limits: if limits.is_empty() { None } else { Some(limits) },
        ..base
    }
}

/// A missing or zero current value always changes; otherwise the deviation
/// must reach the tolerance.
fn should_change(current: Option<&Quantity>, recommended: &Quantity, tolerance: i64) -> bool {
    match current {
        Some(cur) => exceeds_tolerance(cur, recommended, tolerance),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn resource_list(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
        let mut m = BTreeMap::new();
        m.insert("cpu".to_string(), q(cpu));
        m.insert("memory".to_string(), q(memory));
        m
    }

    fn spec(json: serde_json::Value) -> VerticalWorkloadAutoscalerSpec {
        let mut base = serde_json::json!({"vpaReference": {"name": "web-vpa"}});
        base.as_object_mut()
            .unwrap()
            .extend(json.as_object().unwrap().clone());
        serde_json::from_value(base).unwrap()
    }

    fn recommendation(rec: RecommendedContainerResources) -> RecommendedPodResources {
        RecommendedPodResources {
            container_recommendations: vec![rec],
        }
    }

    fn target_only(cpu: &str, memory: &str) -> RecommendedContainerResources {
        RecommendedContainerResources {
            container_name: "web".to_string(),
            target: resource_list(cpu, memory),
            ..Default::default()
        }
    }

    fn current(cpu: &str, memory: &str, limits: Option<(&str, &str)>) -> BTreeMap<String, ResourceRequirements> {
        let mut m = BTreeMap::new();
        m.insert(
            "web".to_string(),
            ResourceRequirements {
                requests: Some(resource_list(cpu, memory)),
                limits: limits.map(|(c, mem)| resource_list(c, mem)),
                ..Default::default()
            },
        );
        m
    }

    /// Guaranteed upscale with CPU limits enabled pins limits to requests.
    #[test]
    fn guaranteed_upscale_sets_requests_and_limits_to_target() {
        let spec = spec(serde_json::json!({"avoidCPULimit": false}));
        let new = project_resources(
            &spec,
            &current("250m", "128Mi", Some(("250m", "128Mi"))),
            &recommendation(target_only("500m", "256Mi")),
        );

        let web = &new["web"];
        let requests = web.requests.as_ref().unwrap();
        let limits = web.limits.as_ref().unwrap();
        assert_eq!(requests["cpu"].0, "500m");
        assert_eq!(requests["memory"].0, "256Mi");
        assert_eq!(limits["cpu"].0, "500m");
        assert_eq!(limits["memory"].0, "256Mi");
    }

    /// With the default policy the CPU limit is removed, never written.
    #[test]
    fn guaranteed_default_policy_drops_cpu_limit() {
        let spec = spec(serde_json::json!({}));
        let new = project_resources(
            &spec,
            &current("250m", "128Mi", Some(("250m", "128Mi"))),
            &recommendation(target_only("500m", "256Mi")),
        );

        let web = &new["web"];
        let limits = web.limits.as_ref().unwrap();
        assert!(!limits.contains_key("cpu"));
        assert_eq!(limits["memory"].0, "256Mi");
        assert_eq!(web.requests.as_ref().unwrap()["cpu"].0, "500m");
    }

    /// Burstable: requests follow the lower bound, limits the upper bound,
    /// with the CPU limit dropped under avoidCPULimit.
    #[test]
    fn burstable_with_avoid_cpu_limit() {
        let spec = spec(serde_json::json!({
            "qualityOfService": "Burstable",
            "avoidCPULimit": true
        }));
        let rec = RecommendedContainerResources {
            container_name: "web".to_string(),
            lower_bound: resource_list("100m", "200Mi"),
            upper_bound: resource_list("500m", "800Mi"),
            ..Default::default()
        };
        let new = project_resources(
            &spec,
            &current("50m", "100Mi", Some(("200m", "400Mi"))),
            &recommendation(rec),
        );

        let web = &new["web"];
        let requests = web.requests.as_ref().unwrap();
        let limits = web.limits.as_ref().unwrap();
        assert_eq!(requests["cpu"].0, "100m");
        assert_eq!(requests["memory"].0, "200Mi");
        assert!(!limits.contains_key("cpu"));
        assert_eq!(limits["memory"].0, "800Mi");
    }

    /// A recommendation within tolerance leaves the container untouched.
    #[test]
    fn change_within_tolerance_is_ignored() {
        let spec = spec(serde_json::json!({}));
        let before = current("100m", "128Mi", None);
        let new = project_resources(
            &spec,
            &before,
            &recommendation(target_only("105m", "128Mi")),
        );
        assert_eq!(new["web"], before["web"]);
    }

    #[test]
    fn custom_tolerance_widens_the_dead_band() {
        let spec = spec(serde_json::json!({"updateTolerance": {"cpu": 50}}));
        // +30% stays within a 50% tolerance
        let before = current("100m", "128Mi", None);
        let new = project_resources(
            &spec,
            &before,
            &recommendation(target_only("130m", "128Mi")),
        );
        assert_eq!(
            new["web"].requests.as_ref().unwrap()["cpu"].0,
            "100m"
        );
    }

    #[test]
    fn zero_current_request_is_always_set() {
        let spec = spec(serde_json::json!({}));
        let mut before = BTreeMap::new();
        before.insert("web".to_string(), ResourceRequirements::default());
        let new = project_resources(&spec, &before, &recommendation(target_only("100m", "64Mi")));
        let requests = new["web"].requests.as_ref().unwrap();
        assert_eq!(requests["cpu"].0, "100m");
        assert_eq!(requests["memory"].0, "64Mi");
    }

    #[test]
    fn ignore_flags_suppress_one_resource() {
        let spec = spec(serde_json::json!({"ignoreCPURecommendations": true}));
        let new = project_resources(
            &spec,
            &current("100m", "128Mi", None),
            &recommendation(target_only("500m", "512Mi")),
        );
        let requests = new["web"].requests.as_ref().unwrap();
        assert_eq!(requests["cpu"].0, "100m");
        assert_eq!(requests["memory"].0, "512Mi");
    }

    #[test]
    fn downscale_beyond_tolerance_is_applied() {
        let spec = spec(serde_json::json!({}));
        let new = project_resources(
            &spec,
            &current("500m", "512Mi", None),
            &recommendation(target_only("250m", "256Mi")),
        );
        let requests = new["web"].requests.as_ref().unwrap();
        assert_eq!(requests["cpu"].0, "250m");
        assert_eq!(requests["memory"].0, "256Mi");
    }

    /// Containers absent from the recommendation do not appear in the output.
    #[test]
    fn unrecommended_containers_are_not_projected() {
        let spec = spec(serde_json::json!({}));
        let mut before = current("100m", "128Mi", None);
        before.insert(
            "sidecar".to_string(),
            ResourceRequirements {
                requests: Some(resource_list("50m", "32Mi")),
                ..Default::default()
            },
        );
        let new = project_resources(&spec, &before, &recommendation(target_only("500m", "256Mi")));
        assert!(new.contains_key("web"));
        assert!(!new.contains_key("sidecar"));
    }

    /// Burstable CPU limit converges to the upper bound even when the
    /// request is already in place.
    #[test]
    fn burstable_cpu_limit_tracks_upper_bound() {
        let spec = spec(serde_json::json!({
            "qualityOfService": "Burstable",
            "avoidCPULimit": false
        }));
        let rec = RecommendedContainerResources {
            container_name: "web".to_string(),
            lower_bound: resource_list("100m", "200Mi"),
            upper_bound: resource_list("500m", "800Mi"),
            ..Default::default()
        };
        // request already at lower bound, limit far from upper bound
        let new = project_resources(
            &spec,
            &current("100m", "200Mi", Some(("150m", "800Mi"))),
            &recommendation(rec),
        );
        let limits = new["web"].limits.as_ref().unwrap();
        assert_eq!(limits["cpu"].0, "500m");
    }

    #[test]
    fn tolerance_zero_in_spec_behaves_as_default() {
        let spec = spec(serde_json::json!({"updateTolerance": {"cpu": 0, "memory": 0}}));
        let before = current("100m", "128Mi", None);
        let new = project_resources(
            &spec,
            &before,
            &recommendation(target_only("105m", "130Mi")),
        );
        // 5% cpu and ~1.5% memory deviations stay under the implied 10%
        assert_eq!(new["web"], before["web"]);
    }
}
