//! Controller wiring: index maintenance, watch mappers, and the main
//! reconcile loop.
//!
//! A change to any of VWA, VPA, HPA, or a target workload maps to the set
//! of VWA keys to re-enqueue. The mappers consult the shared field indexes;
//! VPA events are additionally filtered through a recommendation
//! fingerprint so only recommendation changes trigger work.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{info, warn};

use crate::crd::{VerticalPodAutoscaler, VerticalWorkloadAutoscaler};
use crate::index::Indexes;

use super::vwa::{error_policy, reconcile, Context};

/// Last-seen fingerprint of each VPA's recommendation.
///
/// The VPA watch must only trigger reconciles when `status.recommendation`
/// actually changes; everything else about a VPA is noise here. A VPA seen
/// for the first time always counts as changed so restarts re-enqueue every
/// bound VWA.
#[derive(Default)]
pub struct RecommendationFingerprints {
    seen: DashMap<(String, String), u64>,
}

impl RecommendationFingerprints {
    /// Record the VPA's current recommendation; report whether it differs
    /// from the last one seen.
    pub fn changed(&self, vpa: &VerticalPodAutoscaler) -> bool {
        let key = (vpa.namespace().unwrap_or_default(), vpa.name_any());
        let fingerprint = fingerprint_of(vpa);
        match self.seen.insert(key, fingerprint) {
            Some(previous) => previous != fingerprint,
            None => true,
        }
    }
}

fn fingerprint_of(vpa: &VerticalPodAutoscaler) -> u64 {
    let recommendation = vpa.status.as_ref().and_then(|s| s.recommendation.as_ref());
    let serialized =
        serde_json::to_string(&recommendation).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}

/// Mapper from a workload event to the VWAs whose status targets it.
pub fn map_workload_to_vwas<K: ResourceExt>(
    indexes: Arc<Indexes>,
    kind: &'static str,
) -> impl Fn(K) -> Vec<ObjectRef<VerticalWorkloadAutoscaler>> + Send + Sync + 'static {
    move |workload: K| {
        let namespace = workload.namespace().unwrap_or_default();
        indexes
            .vwas_targeting(&namespace, &workload.name_any(), kind)
            .into_iter()
            .map(|name| ObjectRef::new(&name).within(&namespace))
            .collect()
    }
}

/// Run the VWA controller until shutdown.
///
/// Spawns two index-maintenance watch streams alongside the controller; if
/// either terminates the whole loop ends, so the process can restart clean
/// rather than serve stale reverse lookups.
pub async fn run(client: Client, reconcile_timeout: Duration) {
    let indexes = Arc::new(Indexes::new());
    let ctx = Arc::new(Context::new(
        client.clone(),
        indexes.clone(),
        reconcile_timeout,
    ));

    let vwa_index_task = {
        let indexes = indexes.clone();
        let api: Api<VerticalWorkloadAutoscaler> = Api::all(client.clone());
        watcher(api, WatcherConfig::default()).for_each(move |event| {
            let indexes = indexes.clone();
            async move {
                match event {
                    Ok(event) => indexes.apply_vwa_event(&event),
                    Err(error) => warn!(%error, "VWA index watch error"),
                }
            }
        })
    };
    let hpa_index_task = {
        let indexes = indexes.clone();
        let api: Api<HorizontalPodAutoscaler> = Api::all(client.clone());
        watcher(api, WatcherConfig::default()).for_each(move |event| {
            let indexes = indexes.clone();
            async move {
                match event {
                    Ok(event) => indexes.apply_hpa_event(&event),
                    Err(error) => warn!(%error, "HPA index watch error"),
                }
            }
        })
    };

    let fingerprints = Arc::new(RecommendationFingerprints::default());
    let vpa_mapper = {
        let indexes = indexes.clone();
        let fingerprints = fingerprints.clone();
        move |vpa: VerticalPodAutoscaler| {
            if !fingerprints.changed(&vpa) {
                return Vec::new();
            }
            let namespace = vpa.namespace().unwrap_or_default();
            indexes
                .vwas_referencing_vpa(&namespace, &vpa.name_any())
                .into_iter()
                .map(|name| ObjectRef::new(&name).within(&namespace))
                .collect()
        }
    };
    let hpa_mapper = {
        let indexes = indexes.clone();
        move |hpa: HorizontalPodAutoscaler| {
            let namespace = hpa.namespace().unwrap_or_default();
            let target = match hpa.spec.as_ref() {
                Some(spec) => &spec.scale_target_ref,
                None => return Vec::new(),
            };
            indexes
                .vwas_targeting(&namespace, &target.name, &target.kind)
                .into_iter()
                .map(|name| ObjectRef::new(&name).within(&namespace))
                .collect()
        }
    };

    info!("starting VerticalWorkloadAutoscaler controller");
    let vwas: Api<VerticalWorkloadAutoscaler> = Api::all(client.clone());
    let controller = Controller::new(vwas, WatcherConfig::default())
        .watches(
            Api::<VerticalPodAutoscaler>::all(client.clone()),
            WatcherConfig::default(),
            vpa_mapper,
        )
        .watches(
            Api::<HorizontalPodAutoscaler>::all(client.clone()),
            WatcherConfig::default(),
            hpa_mapper,
        )
        .watches(
            Api::<Deployment>::all(client.clone()),
            WatcherConfig::default(),
            map_workload_to_vwas::<Deployment>(indexes.clone(), "Deployment"),
        )
        .watches(
            Api::<StatefulSet>::all(client.clone()),
            WatcherConfig::default(),
            map_workload_to_vwas::<StatefulSet>(indexes.clone(), "StatefulSet"),
        )
        .watches(
            Api::<DaemonSet>::all(client.clone()),
            WatcherConfig::default(),
            map_workload_to_vwas::<DaemonSet>(indexes.clone(), "DaemonSet"),
        )
        .watches(
            Api::<ReplicaSet>::all(client.clone()),
            WatcherConfig::default(),
            map_workload_to_vwas::<ReplicaSet>(indexes.clone(), "ReplicaSet"),
        )
        .watches(
            Api::<Job>::all(client.clone()),
            WatcherConfig::default(),
            map_workload_to_vwas::<Job>(indexes.clone(), "Job"),
        )
        .watches(
            Api::<CronJob>::all(client),
            WatcherConfig::default(),
            map_workload_to_vwas::<CronJob>(indexes, "CronJob"),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "reconciliation completed"),
                Err(error) => tracing::error!(?error, "reconciliation error"),
            }
        });

    tokio::select! {
        _ = controller => info!("controller stream completed"),
        _ = vwa_index_task => warn!("VWA index watcher terminated"),
        _ = hpa_index_task => warn!("HPA index watcher terminated"),
    }
}
