//! Kubernetes Events emitted during reconciliation.
//!
//! The reconciler reports progress through typed [`VwaEvent`] values rather
//! than loose reason/action strings; each variant knows its own event type,
//! reason, action, and note, so a call site cannot pair a Warning reason
//! with the wrong action string. Recording is best-effort: a rejected event
//! write is logged and otherwise ignored, since losing an event must not
//! affect the pass that produced it.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// A reconciliation milestone worth surfacing via `kubectl get events`.
#[derive(Clone, Debug, PartialEq)]
pub enum VwaEvent {
    /// The referenced VPA was resolved
    VpaFound {
        /// Name of the resolved VPA
        vpa: String,
    },
    /// A referenced external object does not exist; `reason` carries the
    /// matching condition reason code
    NotFound {
        /// Condition reason code (e.g. `VPAReferenceNotFound`)
        reason: String,
        /// What was looked up and missed
        message: String,
    },
    /// status.scaleTargetRef was synced from the VPA's targetRef
    ScaleTargetRefUpdated {
        /// Name of the new target workload
        target: String,
    },
    /// The pass was postponed by an update window
    UpdateDelayed {
        /// Time until the next window opens
        delay: Duration,
    },
    /// The ignore flags were synced from HPA conflicts
    IgnoreFlagsUpdated,
    /// The target workload's resources were updated
    ResourcesUpdated,
    /// Nothing to apply this pass
    WaitingForRecommendations,
    /// Writing the target workload failed
    UpdateFailed {
        /// The write error
        error: String,
    },
}

impl VwaEvent {
    /// Normal for milestones, Warning for operational failures.
    pub fn event_type(&self) -> EventType {
        match self {
            VwaEvent::UpdateFailed { .. } => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Machine-readable reason, shown under the REASON column.
    pub fn reason(&self) -> &str {
        match self {
            VwaEvent::VpaFound { .. } => "VPAFound",
            VwaEvent::NotFound { reason, .. } => reason,
            VwaEvent::ScaleTargetRefUpdated { .. } => "ScaleTargetRefUpdated",
            VwaEvent::UpdateDelayed { .. } => "UpdateDelayed",
            VwaEvent::IgnoreFlagsUpdated => "IgnoreFlagsUpdated",
            VwaEvent::ResourcesUpdated => "ResourcesUpdated",
            VwaEvent::WaitingForRecommendations => "WaitingForRecommendations",
            VwaEvent::UpdateFailed { .. } => "UpdateFailed",
        }
    }

    /// What the controller was doing when the event fired.
    pub fn action(&self) -> &'static str {
        match self {
            VwaEvent::ResourcesUpdated | VwaEvent::UpdateFailed { .. } => "Apply",
            _ => "Reconcile",
        }
    }

    /// Human-readable note, when the variant carries one.
    pub fn note(&self) -> Option<String> {
        match self {
            VwaEvent::VpaFound { vpa } => Some(format!("VPA '{vpa}' found")),
            VwaEvent::NotFound { message, .. } => Some(message.clone()),
            VwaEvent::ScaleTargetRefUpdated { target } => {
                Some(format!("ScaleTargetRef updated to '{target}'"))
            }
            VwaEvent::UpdateDelayed { delay } => {
                Some(format!("update delayed for {}s", delay.as_secs()))
            }
            VwaEvent::IgnoreFlagsUpdated => Some("ignore flags updated".to_string()),
            VwaEvent::ResourcesUpdated => Some("resources updated".to_string()),
            VwaEvent::WaitingForRecommendations => {
                Some("waiting for VPA recommendations".to_string())
            }
            VwaEvent::UpdateFailed { error } => Some(error.clone()),
        }
    }
}

/// Destination for reconciliation events.
///
/// `record` never fails from the caller's point of view; implementations
/// swallow and log delivery problems.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record one event against the given object.
    async fn record(&self, object: &ObjectReference, event: VwaEvent);
}

/// Publishes events through the API server so they show up in
/// `kubectl describe vwa`.
pub struct EventRecorder {
    recorder: Recorder,
}

impl EventRecorder {
    /// The controller name becomes the reportingComponent on each event.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for EventRecorder {
    async fn record(&self, object: &ObjectReference, event: VwaEvent) {
        let payload = Event {
            type_: event.event_type(),
            reason: event.reason().to_string(),
            note: event.note(),
            action: event.action().to_string(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&payload, object).await {
            warn!(reason = event.reason(), %error, "event not recorded");
        }
    }
}

/// Discards every event; used by tests.
pub struct SilentEvents;

#[async_trait]
impl EventSink for SilentEvents {
    async fn record(&self, _object: &ObjectReference, _event: VwaEvent) {}
}
