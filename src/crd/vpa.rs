//! Read-only model of the external VerticalPodAutoscaler.
//!
//! `k8s-openapi` ships no VPA bindings, so the fields this controller
//! consumes are modeled here: the target reference, the update mode, and the
//! per-container recommendation bounds. Everything else the VPA serves is
//! ignored on deserialization. The controller never writes VPAs.

use std::collections::BTreeMap;

use k8s_openapi::api::autoscaling::v2::CrossVersionObjectReference;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The update mode under which this controller is allowed to act.
///
/// Any other mode means the VPA Updater owns the pod template and this
/// controller must stand down.
pub const UPDATE_MODE_OFF: &str = "Off";

/// Specification subset of a VerticalPodAutoscaler
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "autoscaling.k8s.io",
    version = "v1",
    kind = "VerticalPodAutoscaler",
    plural = "verticalpodautoscalers",
    status = "VerticalPodAutoscalerStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerSpec {
    /// The workload whose pods the VPA recommends for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<CrossVersionObjectReference>,

    /// How the VPA applies its own recommendations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<PodUpdatePolicy>,
}

/// The VPA's update policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodUpdatePolicy {
    /// One of `Off`, `Initial`, `Recreate`, `Auto`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<String>,
}

/// Status subset of a VerticalPodAutoscaler
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerStatus {
    /// The most recent recommendation, absent until the recommender has data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RecommendedPodResources>,
}

/// Per-container recommendations
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPodResources {
    /// One entry per container the recommender has observed
    #[serde(default)]
    pub container_recommendations: Vec<RecommendedContainerResources>,
}

/// Recommendation bounds for a single container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedContainerResources {
    /// Name of the container within the pod template
    pub container_name: String,

    /// Recommended amount per resource
    #[serde(default)]
    pub target: BTreeMap<String, Quantity>,

    /// Minimum amount the recommender considers safe
    #[serde(default)]
    pub lower_bound: BTreeMap<String, Quantity>,

    /// Maximum amount the recommender considers useful
    #[serde(default)]
    pub upper_bound: BTreeMap<String, Quantity>,

    /// Recommendation before applying resource policy caps
    #[serde(default)]
    pub uncapped_target: BTreeMap<String, Quantity>,
}

impl VerticalPodAutoscaler {
    /// Whether the VPA's update mode is `Off`.
    ///
    /// Mutating the target while the VPA Updater is active would create two
    /// writers for the same pod template.
    pub fn update_mode_is_off(&self) -> bool {
        self.spec
            .update_policy
            .as_ref()
            .and_then(|p| p.update_mode.as_deref())
            == Some(UPDATE_MODE_OFF)
    }
}
