//! Narrow Kubernetes API surface used by the backup controller.
//!
//! The reconciler only ever fetches one policy, submits one job, and
//! persists one status record, so that is the whole interface. Keeping it
//! behind a trait lets tests run against an in-memory stand-in.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::crd::{MongoBackup, MongoBackupStatus};
use crate::error::Error;

/// Store operations the reconciliation loop depends on.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Fetch a backup policy by namespace and name. `None` means the
    /// record no longer exists.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<MongoBackup>, Error>;

    /// Submit a backup job for execution.
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error>;

    /// Persist the observed state of a backup policy.
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &MongoBackupStatus,
    ) -> Result<(), Error>;
}

/// API-server-backed store.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackupStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<MongoBackup>, Error> {
        let api: Api<MongoBackup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), job).await?;
        debug!(name = %job.name_any(), "Backup job created");
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &MongoBackupStatus,
    ) -> Result<(), Error> {
        let api: Api<MongoBackup> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        let pp = PatchParams::apply("mongosnap-operator");
        api.patch_status(name, &pp, &Patch::Merge(&patch)).await?;
        debug!(name = %name, "Backup status updated");
        Ok(())
    }
}
