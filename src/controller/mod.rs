//! Controller implementation for the VerticalWorkloadAutoscaler CRD
//!
//! The reconciler follows the Kubernetes controller pattern with an
//! observe-decide-act loop: gates decide *whether* to update, the projector
//! decides *what* to write, and the mutator applies it idempotently with
//! status and event bookkeeping.

mod conditions;
mod delay;
mod events;
mod hpa;
mod kube_client;
mod resources;
mod runner;
mod vwa;

pub use conditions::{
    merge_condition, new_condition, reason, CONDITION_ERROR, CONDITION_READY,
    CONDITION_RECONCILED, STATUS_FALSE, STATUS_TRUE,
};
pub use delay::{delay_until_allowed, delay_until_frequency};
pub use events::{EventRecorder, EventSink, SilentEvents, VwaEvent};
pub use hpa::{scan_hpas, HpaScan};
pub use kube_client::{VwaKubeClient, VwaKubeClientImpl};
pub use resources::project_resources;
pub use runner::{map_workload_to_vwas, run, RecommendationFingerprints};
pub use vwa::{error_policy, reconcile, Context};
