//! Status condition bookkeeping.
//!
//! Conditions follow the Kubernetes convention: at most one per type, with
//! `lastTransitionTime` preserved when a write would not change status,
//! reason, or message. The reason codes are a closed set shared between
//! conditions and events.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use crate::clock::Clock;

/// VPA resolved, target resolved, recommendation present.
pub const CONDITION_READY: &str = "Ready";
/// The last pass applied (or intentionally skipped) without error.
pub const CONDITION_RECONCILED: &str = "Reconciled";
/// The last pass failed; the reason carries the taxonomy code.
pub const CONDITION_ERROR: &str = "Error";

/// Condition status string for a condition that holds.
pub const STATUS_TRUE: &str = "True";
/// Condition status string for a condition that does not hold.
pub const STATUS_FALSE: &str = "False";

/// Machine-readable reason codes (closed set).
pub mod reason {
    /// Another VWA already references the same VPA
    pub const VPA_REFERENCE_CONFLICT: &str = "VPAReferenceConflict";
    /// The referenced VPA does not exist
    pub const VPA_REFERENCE_NOT_FOUND: &str = "VPAReferenceNotFound";
    /// The VPA has not produced a recommendation yet
    pub const NO_RECOMMENDATION: &str = "NoRecommendation";
    /// The VPA Updater owns the pod template (updateMode is not Off)
    pub const UPDATE_MODE_NOT_OFF: &str = "UpdateModeNotOff";
    /// The VPA's target workload does not exist
    pub const TARGET_OBJECT_NOT_FOUND: &str = "TargetObjectNotFound";
    /// The VPA's target workload was resolved
    pub const TARGET_OBJECT_FOUND: &str = "TargetObjectFound";
    /// A Kubernetes API call failed
    pub const API_ERROR: &str = "APIError";
    /// The target workload was mutated
    pub const UPDATED_RESOURCES: &str = "UpdatedResources";
    /// Nothing to apply; waiting for recommendations to move
    pub const WAITING_FOR_RECOMMENDATIONS: &str = "WaitingForRecommendations";
    /// The referenced VPA was resolved
    pub const VPA_FOUND: &str = "VPAFound";
}

/// Build a condition stamped with the given clock.
pub fn new_condition(
    clock: &dyn Clock,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(clock.now()),
        observed_generation,
    }
}

/// Merge a condition into the set, keyed by type.
///
/// Returns whether the set changed. When the stored condition already has
/// the same status, reason, and message, it is kept as-is so
/// `lastTransitionTime` survives no-op reconciles.
pub fn merge_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status
                && existing.reason == new.reason
                && existing.message == new.message
            {
                false
            } else {
                *existing = new;
                true
            }
        }
        None => {
            conditions.push(new);
            true
        }
    }
}
