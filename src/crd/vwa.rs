//! VerticalWorkloadAutoscaler Custom Resource Definition
//!
//! The VWA CRD declares the policy under which VPA recommendations are
//! applied in-place to a target workload: update windows, update frequency,
//! QoS class, per-resource tolerance, and resources to ignore.

use std::collections::BTreeMap;

use chrono::Duration;
use k8s_openapi::api::autoscaling::v2::CrossVersionObjectReference;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Conflict, QualityOfService, UpdateTolerance, UpdateWindow, VpaReference};
use crate::Error;

/// Fallback applied when `updateFrequency` is unset or unparseable.
const DEFAULT_UPDATE_FREQUENCY_SECS: i64 = 300;

/// Tolerance applied when the per-resource value is unset or zero.
const DEFAULT_TOLERANCE_PERCENT: i64 = 10;

/// Specification for a VerticalWorkloadAutoscaler
///
/// At most one VWA per namespace may reference a given VPA; the controller
/// refuses duplicates at reconcile time.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "autoscaling.workload.io",
    version = "v1alpha1",
    kind = "VerticalWorkloadAutoscaler",
    plural = "verticalworkloadautoscalers",
    shortname = "vwa",
    status = "VerticalWorkloadAutoscalerStatus",
    namespaced,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".status.scaleTargetRef.name"}"#,
    printcolumn = r#"{"name":"Updates","type":"integer","jsonPath":".status.updateCount"}"#,
    printcolumn = r#"{"name":"LastUpdated","type":"date","jsonPath":".status.lastUpdated"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerticalWorkloadAutoscalerSpec {
    /// The VPA whose recommendations drive this autoscaler
    pub vpa_reference: VpaReference,

    /// Minimum interval between applied updates, as a Go-style duration
    /// (e.g. "30s", "5m", "1h30m"). Defaults to 5 minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(default = "default_update_frequency")]
    pub update_frequency: Option<String>,

    /// Time windows during which updates are permitted. Empty means always.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_update_windows: Vec<UpdateWindow>,

    /// Quality of service class applied to the managed workload
    #[serde(default)]
    pub quality_of_service: QualityOfService,

    /// Skip setting CPU limits so bursty workloads are not throttled
    #[serde(default = "default_true", rename = "avoidCPULimit")]
    pub avoid_cpu_limit: bool,

    /// Ignore CPU recommendations entirely. Also set by the controller when
    /// an HPA scales the target on CPU.
    #[serde(default, rename = "ignoreCPURecommendations")]
    pub ignore_cpu_recommendations: bool,

    /// Ignore memory recommendations entirely. Also set by the controller
    /// when an HPA scales the target on memory.
    #[serde(default)]
    pub ignore_memory_recommendations: bool,

    /// Percentage change below which a recommendation is not applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_tolerance: Option<UpdateTolerance>,

    /// Annotations copied onto the target object on every mutation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_annotations: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_update_frequency() -> Option<String> {
    Some("5m".to_string())
}

impl VerticalWorkloadAutoscalerSpec {
    /// The minimum interval between applied updates.
    pub fn update_frequency(&self) -> Duration {
        self.update_frequency
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_UPDATE_FREQUENCY_SECS))
    }

    /// Effective CPU tolerance in percent. Zero means "use the default".
    pub fn cpu_tolerance_percent(&self) -> i64 {
        effective_tolerance(self.update_tolerance.as_ref().and_then(|t| t.cpu))
    }

    /// Effective memory tolerance in percent. Zero means "use the default".
    pub fn memory_tolerance_percent(&self) -> i64 {
        effective_tolerance(self.update_tolerance.as_ref().and_then(|t| t.memory))
    }

    /// Validate the spec for admission
    pub fn validate(&self) -> Result<(), Error> {
        if self.vpa_reference.name.is_empty() {
            return Err(Error::validation_for_field(
                "spec.vpaReference.name",
                "must not be empty",
            ));
        }
        for window in &self.allowed_update_windows {
            window.validate()?;
        }
        Ok(())
    }
}

fn effective_tolerance(value: Option<u8>) -> i64 {
    match value {
        Some(v) if v > 0 => i64::from(v),
        _ => DEFAULT_TOLERANCE_PERCENT,
    }
}

/// Parse a Go-style duration string: concatenated `<number><unit>` tokens
/// with units `s`, `m`, `h`, `d` (e.g. "90s", "5m", "1h30m").
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let mut total = Duration::zero();
    let mut number = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let n: i64 = number.parse().ok()?;
        number.clear();
        total = total
            + match c {
                's' => Duration::seconds(n),
                'm' => Duration::minutes(n),
                'h' => Duration::hours(n),
                'd' => Duration::days(n),
                _ => return None,
            };
    }
    if !number.is_empty() {
        // trailing bare number has no unit
        return None;
    }
    Some(total)
}

/// Status for a VerticalWorkloadAutoscaler
///
/// Owned entirely by the controller and written through the status
/// subresource, never together with spec fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerticalWorkloadAutoscalerStatus {
    /// The workload being managed, mirrored from the VPA's targetRef
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_target_ref: Option<CrossVersionObjectReference>,

    /// When the target was last mutated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Time>,

    /// The requirements last written per container
    #[serde(default)]
    pub recommended_requests: BTreeMap<String, ResourceRequirements>,

    /// Whether the last pass skipped applying updates
    #[serde(default)]
    pub skipped_updates: bool,

    /// Why updates were skipped, when they were
    #[serde(default)]
    pub skip_reason: Option<String>,

    /// Number of applied updates; increases only on actual mutation
    #[serde(default)]
    pub update_count: i32,

    /// Current conditions, at most one per type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Resources whose scaling is deferred to another controller
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}
