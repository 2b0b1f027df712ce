//! HPA conflict detection.
//!
//! An HPA scaling the target workload on a resource metric owns that
//! resource: applying vertical recommendations to it would fight the
//! horizontal scaler. The scan derives per-resource ignore flags and the
//! conflict records mirrored into the VWA status. HPAs already in deletion
//! contribute nothing, so their flags release as soon as the delete is
//! requested.

use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;

use crate::crd::Conflict;

/// Metric type string for resource metrics in autoscaling/v2.
const RESOURCE_METRIC_TYPE: &str = "Resource";

/// Result of scanning the HPAs that target a workload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HpaScan {
    /// An HPA scales the target on CPU
    pub ignore_cpu: bool,
    /// An HPA scales the target on memory
    pub ignore_memory: bool,
    /// One record per contested resource
    pub conflicts: Vec<Conflict>,
}

/// Derive ignore flags and conflicts from the HPAs targeting a workload.
///
/// The caller is expected to have already narrowed `hpas` to those whose
/// `scaleTargetRef` matches the workload (via the field indexes).
pub fn scan_hpas(hpas: &[HorizontalPodAutoscaler]) -> HpaScan {
    let mut scan = HpaScan::default();

    for hpa in hpas {
        if hpa.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let metrics = hpa
            .spec
            .as_ref()
            .and_then(|s| s.metrics.as_ref())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for metric in metrics {
            if metric.type_ != RESOURCE_METRIC_TYPE {
                continue;
            }
            match metric.resource.as_ref().map(|r| r.name.as_str()) {
                Some("cpu") => scan.ignore_cpu = true,
                Some("memory") => scan.ignore_memory = true,
                _ => {}
            }
        }
    }

    if scan.ignore_cpu {
        scan.conflicts.push(Conflict::with_hpa("cpu"));
    }
    if scan.ignore_memory {
        scan.conflicts.push(Conflict::with_hpa("memory"));
    }
    scan
}
