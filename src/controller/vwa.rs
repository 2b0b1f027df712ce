//! VerticalWorkloadAutoscaler controller implementation
//!
//! One reconcile pass walks a fixed decision pipeline: duplicate guard,
//! update-window gate, VPA resolution and validation, target resolution,
//! HPA conflict detection, frequency gate, recommendation projection, and
//! finally the target mutation with status bookkeeping. Every step either
//! continues, returns a requeue action, or records a condition and stops.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::autoscaling::v2::CrossVersionObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::crd::VerticalWorkloadAutoscaler;
use crate::index::Indexes;
use crate::workload::{
    Workload, ANNOTATION_ARGOCD_COMPARE, ANNOTATION_FLUX_IGNORE, ANNOTATION_LAST_UPDATED,
    ANNOTATION_UPDATED_BY,
};
use crate::Error;

use super::conditions::{
    merge_condition, new_condition, reason, CONDITION_ERROR, CONDITION_READY,
    CONDITION_RECONCILED, STATUS_FALSE, STATUS_TRUE,
};
use super::delay::{delay_until_allowed, delay_until_frequency};
use super::events::{EventRecorder, EventSink, VwaEvent};
use super::hpa::scan_hpas;
use super::kube_client::{VwaKubeClient, VwaKubeClientImpl};
use super::resources::project_resources;

/// Recorded as skipReason when a pass had nothing to apply.
const SKIP_REASON_NO_RECOMMENDATIONS: &str = "no new resource recommendations";

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds
/// resources that are expensive to create (the Kubernetes client) and
/// shared state (the field indexes maintained by the watch streams).
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn VwaKubeClient>,
    /// Destination for reconciliation events
    pub events: Arc<dyn EventSink>,
    /// Field indexes over the VWA and HPA caches
    pub indexes: Arc<Indexes>,
    /// Clock used by the window and frequency gates
    pub clock: Arc<dyn Clock>,
    /// Deadline for a single reconcile pass
    pub reconcile_timeout: Duration,
}

impl Context {
    /// Create a production context from a Kubernetes client.
    pub fn new(client: Client, indexes: Arc<Indexes>, reconcile_timeout: Duration) -> Self {
        Self {
            kube: Arc::new(VwaKubeClientImpl::new(client.clone())),
            events: Arc::new(EventRecorder::new(client, "vwa-controller")),
            indexes,
            clock: Arc::new(SystemClock),
            reconcile_timeout,
        }
    }

    /// Create a context for testing with a mock client and fixed clock.
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn VwaKubeClient>,
        indexes: Arc<Indexes>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kube,
            events: Arc::new(super::events::SilentEvents),
            indexes,
            clock,
            reconcile_timeout: Duration::from_secs(10),
        }
    }
}

/// Reconcile a VerticalWorkloadAutoscaler resource
///
/// Wraps the decision pipeline in the configured per-pass deadline and a
/// panic guard; both surface as retryable errors so the key is requeued
/// with backoff rather than taking the worker down.
#[instrument(skip(vwa, ctx), fields(vwa = %vwa.name_any()))]
pub async fn reconcile(
    vwa: Arc<VerticalWorkloadAutoscaler>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    use futures::FutureExt;

    let deadline = ctx.reconcile_timeout;
    let pass = std::panic::AssertUnwindSafe(tokio::time::timeout(
        deadline,
        reconcile_inner(&vwa, &ctx),
    ))
    .catch_unwind();
    match pass.await {
        Ok(Ok(result)) => result,
        Ok(Err(_elapsed)) => Err(Error::Timeout {
            timeout_secs: deadline.as_secs(),
        }),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::Panic { message })
        }
    }
}

async fn reconcile_inner(
    vwa: &VerticalWorkloadAutoscaler,
    ctx: &Context,
) -> Result<Action, Error> {
    let name = vwa.name_any();
    let namespace = vwa.namespace().unwrap_or_default();
    info!("reconciling");

    // Working copy of the status; conditions accumulate here across the
    // pass so a later patch never clobbers an earlier one.
    let mut status = vwa.status.clone().unwrap_or_default();

    // Refuse to act while another VWA claims the same VPA.
    let holders = ctx
        .indexes
        .vwas_referencing_vpa(&namespace, &vwa.spec.vpa_reference.name);
    if let Some(other) = holders.iter().find(|holder| **holder != name) {
        let err =
            Error::duplicate_vpa_reference(vwa.spec.vpa_reference.name.as_str(), other.as_str());
        return Err(fail(
            vwa,
            ctx,
            &mut status,
            reason::VPA_REFERENCE_CONFLICT,
            &err.to_string(),
            err,
        )
        .await);
    }

    // Update-window gate: postpone the whole pass until the next window.
    let now = ctx.clock.now();
    let (delay, gated) = delay_until_allowed(now, &vwa.spec.allowed_update_windows);
    if gated {
        info!(delay_secs = delay.as_secs(), "update delayed by window");
        ctx.events
            .record(&vwa.object_ref(&()), VwaEvent::UpdateDelayed { delay })
            .await;
        return Ok(Action::requeue(delay));
    }

    // Resolve the referenced VPA.
    let vpa = match ctx
        .kube
        .get_vpa(&namespace, &vwa.spec.vpa_reference.name)
        .await
    {
        Ok(Some(vpa)) => vpa,
        Ok(None) => {
            return handle_not_found(
                vwa,
                ctx,
                &mut status,
                reason::VPA_REFERENCE_NOT_FOUND,
                &format!("VPA '{}' not found", vwa.spec.vpa_reference.name),
            )
            .await;
        }
        Err(err) => {
            return Err(
                fail(vwa, ctx, &mut status, reason::API_ERROR, "failed to fetch VPA", err).await,
            )
        }
    };

    write_condition(
        vwa,
        ctx,
        &mut status,
        CONDITION_READY,
        STATUS_TRUE,
        reason::VPA_FOUND,
        "VPA found",
    )
    .await?;
    ctx.events
        .record(
            &vwa.object_ref(&()),
            VwaEvent::VpaFound {
                vpa: vpa.name_any(),
            },
        )
        .await;

    // Nothing to do until the recommender has produced data.
    let recommendation = match vpa.status.as_ref().and_then(|s| s.recommendation.clone()) {
        Some(r) => r,
        None => {
            debug!("VPA has no recommendations yet");
            write_condition(
                vwa,
                ctx,
                &mut status,
                CONDITION_READY,
                STATUS_FALSE,
                reason::NO_RECOMMENDATION,
                "VPA has no recommendations yet",
            )
            .await?;
            return Ok(Action::await_change());
        }
    };

    // With any other update mode the VPA Updater owns the pod template;
    // acting here would create dueling writers.
    if !vpa.update_mode_is_off() {
        debug!("VPA update mode is not Off, standing down");
        write_condition(
            vwa,
            ctx,
            &mut status,
            CONDITION_READY,
            STATUS_FALSE,
            reason::UPDATE_MODE_NOT_OFF,
            "VPA UpdatePolicy.UpdateMode is not Off",
        )
        .await?;
        return Ok(Action::await_change());
    }

    // Resolve the target workload from the VPA's targetRef.
    let target_ref = match vpa.spec.target_ref.clone() {
        Some(r) => r,
        None => {
            return handle_not_found(
                vwa,
                ctx,
                &mut status,
                reason::TARGET_OBJECT_NOT_FOUND,
                "VPA has no targetRef",
            )
            .await;
        }
    };
    if !Workload::supports_kind(&target_ref.kind) {
        let err = Error::unsupported_target_kind(target_ref.kind.as_str());
        return Err(fail(vwa, ctx, &mut status, reason::API_ERROR, &err.to_string(), err).await);
    }
    let mut workload = match ctx
        .kube
        .get_workload(&namespace, &target_ref.kind, &target_ref.name)
        .await
    {
        Ok(Some(w)) => w,
        Ok(None) => {
            return handle_not_found(
                vwa,
                ctx,
                &mut status,
                reason::TARGET_OBJECT_NOT_FOUND,
                &format!("target object '{}' not found", target_ref.name),
            )
            .await;
        }
        Err(err) => {
            return Err(fail(
                vwa,
                ctx,
                &mut status,
                reason::API_ERROR,
                "failed to fetch target object",
                err,
            )
            .await)
        }
    };

    sync_scale_target_ref(vwa, ctx, &mut status, &target_ref).await?;

    let current_resources = workload.container_requirements();

    // HPA conflicts: resources an HPA scales are off limits vertically.
    let scan = match collect_hpa_scan(ctx, &namespace, &target_ref).await {
        Ok(scan) => scan,
        Err(err) => {
            return Err(
                fail(vwa, ctx, &mut status, reason::API_ERROR, "failed to find HPA", err).await,
            )
        }
    };
    if scan.ignore_cpu != vwa.spec.ignore_cpu_recommendations
        || scan.ignore_memory != vwa.spec.ignore_memory_recommendations
    {
        info!(
            ignore_cpu = scan.ignore_cpu,
            ignore_memory = scan.ignore_memory,
            "syncing ignore flags from HPA conflicts"
        );
        ctx.kube
            .patch_ignore_flags(&namespace, &name, scan.ignore_cpu, scan.ignore_memory)
            .await?;
        ctx.events
            .record(&vwa.object_ref(&()), VwaEvent::IgnoreFlagsUpdated)
            .await;
        // The spec change re-enqueues this key; the next pass sees the flags.
        return Ok(Action::requeue(Duration::ZERO));
    }

    sync_conflicts(vwa, ctx, &mut status, &scan.conflicts).await?;

    // Frequency gate: enforce the minimum interval between applied updates.
    let last_updated = vwa.status.as_ref().and_then(|s| s.last_updated.as_ref());
    let (delay, gated) = delay_until_frequency(now, last_updated, vwa.spec.update_frequency());
    if gated {
        debug!(delay_secs = delay.as_secs(), "within update frequency interval");
        return Ok(Action::requeue(delay));
    }

    let new_resources = project_resources(&vwa.spec, &current_resources, &recommendation);

    let mutated = workload.apply_requirements(&new_resources);
    if mutated {
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(
            ANNOTATION_ARGOCD_COMPARE.to_string(),
            "IgnoreResourceRequests".to_string(),
        );
        annotations.insert(ANNOTATION_FLUX_IGNORE.to_string(), "true".to_string());
        annotations.extend(vwa.spec.custom_annotations.clone());
        annotations.insert(
            ANNOTATION_LAST_UPDATED.to_string(),
            now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        );
        annotations.insert(ANNOTATION_UPDATED_BY.to_string(), name.clone());
        workload.merge_annotations(annotations);

        if let Err(err) = ctx.kube.update_workload(&workload).await {
            ctx.events
                .record(
                    &vwa.object_ref(&()),
                    VwaEvent::UpdateFailed {
                        error: err.to_string(),
                    },
                )
                .await;
            return Err(fail(
                vwa,
                ctx,
                &mut status,
                reason::API_ERROR,
                "failed to update target resource",
                err,
            )
            .await);
        }
        info!(
            target = %workload.name(),
            kind = %workload.kind(),
            "updated target resources"
        );
    }

    if mutated {
        status.last_updated = Some(Time(now));
        status.update_count += 1;
        status.recommended_requests = new_resources;
        status.skipped_updates = false;
        status.skip_reason = None;
        status.conflicts = scan.conflicts;
        merge_condition(
            &mut status.conditions,
            new_condition(
                ctx.clock.as_ref(),
                CONDITION_RECONCILED,
                STATUS_TRUE,
                reason::UPDATED_RESOURCES,
                "updated resources",
                vwa.metadata.generation,
            ),
        );
        if let Err(err) = ctx.kube.patch_vwa_status(&namespace, &name, &status).await {
            return Err(fail(
                vwa,
                ctx,
                &mut status,
                reason::API_ERROR,
                "failed to update status",
                err,
            )
            .await);
        }
        ctx.events
            .record(&vwa.object_ref(&()), VwaEvent::ResourcesUpdated)
            .await;
    } else {
        let mut changed = merge_condition(
            &mut status.conditions,
            new_condition(
                ctx.clock.as_ref(),
                CONDITION_RECONCILED,
                STATUS_FALSE,
                reason::WAITING_FOR_RECOMMENDATIONS,
                "waiting for VPA recommendations",
                vwa.metadata.generation,
            ),
        );
        if new_resources.is_empty() && !status.skipped_updates {
            status.skipped_updates = true;
            status.skip_reason = Some(SKIP_REASON_NO_RECOMMENDATIONS.to_string());
            changed = true;
        }
        if changed {
            ctx.kube.patch_vwa_status(&namespace, &name, &status).await?;
        }
        ctx.events
            .record(&vwa.object_ref(&()), VwaEvent::WaitingForRecommendations)
            .await;
    }

    Ok(Action::await_change())
}

/// Mirror the VPA's targetRef into the VWA status when they diverge.
async fn sync_scale_target_ref(
    vwa: &VerticalWorkloadAutoscaler,
    ctx: &Context,
    status: &mut crate::crd::VerticalWorkloadAutoscalerStatus,
    target_ref: &CrossVersionObjectReference,
) -> Result<(), Error> {
    let namespace = vwa.namespace().unwrap_or_default();
    let name = vwa.name_any();
    let differs = status
        .scale_target_ref
        .as_ref()
        .map(|r| r.name != target_ref.name || r.kind != target_ref.kind)
        .unwrap_or(true);
    if !differs {
        return Ok(());
    }

    status.scale_target_ref = Some(target_ref.clone());
    merge_condition(
        &mut status.conditions,
        new_condition(
            ctx.clock.as_ref(),
            CONDITION_READY,
            STATUS_TRUE,
            reason::TARGET_OBJECT_FOUND,
            "target object found",
            vwa.metadata.generation,
        ),
    );
    ctx.kube.patch_vwa_status(&namespace, &name, status).await?;

    ctx.events
        .record(
            &vwa.object_ref(&()),
            VwaEvent::ScaleTargetRefUpdated {
                target: target_ref.name.clone(),
            },
        )
        .await;
    Ok(())
}

/// Fetch the HPAs targeting the workload (via the indexes) and scan them.
async fn collect_hpa_scan(
    ctx: &Context,
    namespace: &str,
    target_ref: &CrossVersionObjectReference,
) -> Result<super::hpa::HpaScan, Error> {
    let names = ctx
        .indexes
        .hpas_targeting(namespace, &target_ref.name, &target_ref.kind);
    let mut hpas = Vec::with_capacity(names.len());
    for hpa_name in names {
        if let Some(hpa) = ctx.kube.get_hpa(namespace, &hpa_name).await? {
            hpas.push(hpa);
        }
    }
    Ok(scan_hpas(&hpas))
}

/// Replace status.conflicts when the computed set differs.
async fn sync_conflicts(
    vwa: &VerticalWorkloadAutoscaler,
    ctx: &Context,
    status: &mut crate::crd::VerticalWorkloadAutoscalerStatus,
    conflicts: &[crate::crd::Conflict],
) -> Result<(), Error> {
    if status.conflicts == conflicts {
        return Ok(());
    }
    status.conflicts = conflicts.to_vec();
    ctx.kube
        .patch_vwa_status(&vwa.namespace().unwrap_or_default(), &vwa.name_any(), status)
        .await
}

/// Merge one condition into the working status, writing only when it
/// changed.
async fn write_condition(
    vwa: &VerticalWorkloadAutoscaler,
    ctx: &Context,
    status: &mut crate::crd::VerticalWorkloadAutoscalerStatus,
    type_: &str,
    status_value: &str,
    reason_code: &str,
    message: &str,
) -> Result<(), Error> {
    let condition = new_condition(
        ctx.clock.as_ref(),
        type_,
        status_value,
        reason_code,
        message,
        vwa.metadata.generation,
    );
    if merge_condition(&mut status.conditions, condition) {
        ctx.kube
            .patch_vwa_status(&vwa.namespace().unwrap_or_default(), &vwa.name_any(), status)
            .await?;
    }
    Ok(())
}

/// Record an Error condition and hand back the original error.
///
/// A failure to write the condition is logged but never masks the error
/// being reported.
async fn fail(
    vwa: &VerticalWorkloadAutoscaler,
    ctx: &Context,
    status: &mut crate::crd::VerticalWorkloadAutoscalerStatus,
    reason_code: &str,
    message: &str,
    err: Error,
) -> Error {
    if let Err(cond_err) = write_condition(
        vwa,
        ctx,
        status,
        CONDITION_ERROR,
        STATUS_TRUE,
        reason_code,
        message,
    )
    .await
    {
        warn!(error = %cond_err, "failed to record error condition");
    }
    err
}

/// Record a not-found outcome: event plus Error condition, success return.
///
/// Missing external objects are never fatal; a later watch event
/// re-triggers the pass.
async fn handle_not_found(
    vwa: &VerticalWorkloadAutoscaler,
    ctx: &Context,
    status: &mut crate::crd::VerticalWorkloadAutoscalerStatus,
    reason_code: &str,
    message: &str,
) -> Result<Action, Error> {
    info!(reason = reason_code, message, "external object not found");
    ctx.events
        .record(
            &vwa.object_ref(&()),
            VwaEvent::NotFound {
                reason: reason_code.to_string(),
                message: message.to_string(),
            },
        )
        .await;
    write_condition(
        vwa,
        ctx,
        status,
        CONDITION_ERROR,
        STATUS_TRUE,
        reason_code,
        message,
    )
    .await?;
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Retryable errors (API failures, write conflicts, deadline expiry,
/// fixable configuration) requeue with backoff; permanent errors await a
/// spec change.
pub fn error_policy(
    vwa: Arc<VerticalWorkloadAutoscaler>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        vwa = %vwa.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(5))
    } else {
        Action::await_change()
    }
}
