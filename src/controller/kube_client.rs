//! Kubernetes client operations for the VWA controller.
//!
//! The trait exists so reconcile logic can be tested against a mock while
//! production uses the real client. Status writes go through the status
//! subresource and are always separate from spec writes.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    VerticalPodAutoscaler, VerticalWorkloadAutoscaler, VerticalWorkloadAutoscalerStatus,
};
use crate::workload::Workload;
use crate::Error;

/// Field manager name stamped on patches.
const FIELD_MANAGER: &str = "vwa-controller";

/// Trait abstracting Kubernetes client operations for the reconciler.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VwaKubeClient: Send + Sync {
    /// Get a VPA by namespace and name; `None` when it does not exist.
    async fn get_vpa(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VerticalPodAutoscaler>, Error>;

    /// Get an HPA by namespace and name; `None` when it does not exist.
    async fn get_hpa(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HorizontalPodAutoscaler>, Error>;

    /// Get a target workload by kind, namespace, and name.
    ///
    /// Returns `Error::UnsupportedTargetKind` for kinds outside the six the
    /// controller can mutate, `None` when the object does not exist.
    async fn get_workload(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<Workload>, Error>;

    /// Persist a mutated workload with a single write.
    ///
    /// Uses replace so the API server rejects stale writes by resource
    /// version; the conflict surfaces as a retryable error.
    async fn update_workload(&self, workload: &Workload) -> Result<(), Error>;

    /// Patch the status subresource of a VWA.
    async fn patch_vwa_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VerticalWorkloadAutoscalerStatus,
    ) -> Result<(), Error>;

    /// Sync the ignore flags in a VWA spec.
    ///
    /// The only spec write this controller performs; the resulting spec
    /// change event drives the next pass.
    async fn patch_ignore_flags(
        &self,
        namespace: &str,
        name: &str,
        ignore_cpu: bool,
        ignore_memory: bool,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation.
pub struct VwaKubeClientImpl {
    client: Client,
}

impl VwaKubeClientImpl {
    /// Create a new client wrapper.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VwaKubeClient for VwaKubeClientImpl {
    async fn get_vpa(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VerticalPodAutoscaler>, Error> {
        let api: Api<VerticalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_hpa(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HorizontalPodAutoscaler>, Error> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_workload(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<Workload>, Error> {
        let client = self.client.clone();
        let workload = match kind {
            "Deployment" => Api::<Deployment>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::Deployment),
            "StatefulSet" => Api::<StatefulSet>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::StatefulSet),
            "DaemonSet" => Api::<DaemonSet>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::DaemonSet),
            "ReplicaSet" => Api::<ReplicaSet>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::ReplicaSet),
            "Job" => Api::<Job>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::Job),
            "CronJob" => Api::<CronJob>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .map(Workload::CronJob),
            other => return Err(Error::unsupported_target_kind(other)),
        };
        Ok(workload)
    }

    async fn update_workload(&self, workload: &Workload) -> Result<(), Error> {
        let namespace = workload.namespace();
        let name = workload.name();
        let params = PostParams::default();
        let client = self.client.clone();
        match workload {
            Workload::Deployment(o) => {
                Api::<Deployment>::namespaced(client, &namespace)
                    .replace(&name, &params, o)
                    .await?;
            }
            Workload::StatefulSet(o) => {
                Api::<StatefulSet>::namespaced(client, &namespace)
                    .replace(&name, &params, o)
                    .await?;
            }
            Workload::DaemonSet(o) => {
                Api::<DaemonSet>::namespaced(client, &namespace)
                    .replace(&name, &params, o)
                    .await?;
            }
            Workload::ReplicaSet(o) => {
                Api::<ReplicaSet>::namespaced(client, &namespace)
                    .replace(&name, &params, o)
                    .await?;
            }
            Workload::Job(o) => {
                Api::<Job>::namespaced(client, &namespace)
                    .replace(&name, &params, o)
                    .await?;
            }
            Workload::CronJob(o) => {
                Api::<CronJob>::namespaced(client, &namespace)
                    .replace(&name, &params, o)
                    .await?;
            }
        }
        Ok(())
    }

    async fn patch_vwa_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VerticalWorkloadAutoscalerStatus,
    ) -> Result<(), Error> {
        let api: Api<VerticalWorkloadAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn patch_ignore_flags(
        &self,
        namespace: &str,
        name: &str,
        ignore_cpu: bool,
        ignore_memory: bool,
    ) -> Result<(), Error> {
        let api: Api<VerticalWorkloadAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let spec_patch = serde_json::json!({
            "spec": {
                "ignoreCPURecommendations": ignore_cpu,
                "ignoreMemoryRecommendations": ignore_memory,
            }
        });

        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&spec_patch),
        )
        .await?;

        Ok(())
    }
}
