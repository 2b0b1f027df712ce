//! Custom Resource Definitions for the VWA operator
//!
//! Contains the VerticalWorkloadAutoscaler CRD owned by this operator and a
//! read-only model of the external VerticalPodAutoscaler it coordinates with.

mod types;
mod vpa;
mod vwa;

pub use types::{
    parse_hh_mm, Conflict, DayOfWeek, QualityOfService, UpdateTolerance, UpdateWindow,
    VpaReference,
};
pub use vpa::{
    PodUpdatePolicy, RecommendedContainerResources, RecommendedPodResources,
    VerticalPodAutoscaler, VerticalPodAutoscalerSpec, VerticalPodAutoscalerStatus,
    UPDATE_MODE_OFF,
};
pub use vwa::{
    parse_duration, VerticalWorkloadAutoscaler, VerticalWorkloadAutoscalerSpec,
    VerticalWorkloadAutoscalerStatus,
};
