//! Watch loop and reconciliation for MongoBackup resources.
//!
//! The operator's service account needs:
//! - mongobackups: get, list, watch, create, update, patch, delete
//! - mongobackups/status: get, update, patch
//! - mongobackups/finalizers: update
//! - jobs (batch): get, list, watch, create, update, patch, delete

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::crd::MongoBackup;
use crate::error::Error;
use crate::job;
use crate::metrics;
use crate::schedule;
use crate::store::{BackupStore, KubeStore};

/// Controller configuration, injected at construction time.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Deployment-wide prefix applied to the job name and to the backup
    /// PVC and script ConfigMap references.
    pub name_prefix: String,

    /// Re-poll interval used while a backup is not yet due.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name_prefix: String::new(),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Shared reconciliation context.
pub struct Context {
    pub store: Arc<dyn BackupStore>,
    pub config: ControllerConfig,
}

/// Backup controller
pub struct BackupController {
    client: Client,
    namespace: String,
    context: Arc<Context>,
}

impl BackupController {
    /// Create a new backup controller
    pub async fn new(namespace: String, config: ControllerConfig) -> Result<Self, Error> {
        let client = Client::try_default().await?;
        let context = Arc::new(Context {
            store: Arc::new(KubeStore::new(client.clone())),
            config,
        });

        Ok(Self {
            client,
            namespace,
            context,
        })
    }

    /// Run the backup controller until shutdown
    pub async fn run(&self) -> Result<(), Error> {
        info!("Starting backup controller");

        let backups: Api<MongoBackup> = if self.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        };

        KubeController::new(backups, Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::clone(&self.context))
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => {
                        metrics::record_reconciliation("success");
                        debug!(name = %obj.name, ?action, "Reconciliation successful");
                    }
                    Err(e) => {
                        metrics::record_reconciliation("failure");
                        error!(error = %e, "Reconciliation error");
                    }
                }
            })
            .await;

        Ok(())
    }
}

/// Reconcile one MongoBackup at the current instant.
async fn reconcile(backup: Arc<MongoBackup>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = backup.name_any();
    let namespace = backup.namespace().unwrap_or_default();

    let started = std::time::Instant::now();
    let result = reconcile_backup(&namespace, &name, &ctx, Utc::now()).await;
    metrics::observe_reconcile_duration(&namespace, started.elapsed().as_secs_f64());
    result
}

/// One reconciliation pass at a fixed instant.
///
/// The watched copy may be stale, so the record is re-fetched; a record
/// that no longer exists ends the pass without error. Any store failure
/// surfaces to the caller unmodified and is retried by the error policy.
async fn reconcile_backup(
    namespace: &str,
    name: &str,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<Action, Error> {
    let Some(backup) = ctx.store.get(namespace, name).await? else {
        debug!(name = %name, "MongoBackup no longer exists, nothing to do");
        return Ok(Action::await_change());
    };

    let last_run = backup.status.as_ref().and_then(|s| s.last_backup_time);
    if !schedule::is_due(&backup.spec.schedule, last_run, now) {
        return Ok(Action::requeue(ctx.config.poll_interval));
    }

    info!(name = %name, namespace = %namespace, "Backup due, creating job");
    let backup_job = job::backup_job(&backup, &ctx.config.name_prefix, now)?;
    ctx.store.create_job(namespace, &backup_job).await?;
    metrics::record_job_created(namespace);

    // Record the trigger. If this write fails the error surfaces and the
    // stale timestamp makes the next pass re-evaluate the same slot: the
    // trigger guarantee is at-least-once, not exactly-once.
    let mut status = backup.status.clone().unwrap_or_default();
    status.last_backup_time = Some(now);
    status.phase = Some("Triggered".to_string());
    ctx.store.update_status(namespace, name, &status).await?;

    Ok(Action::await_change())
}

/// Error policy for backup reconciliation
fn error_policy(backup: Arc<MongoBackup>, error: &Error, _ctx: Arc<Context>) -> Action {
    metrics::record_error("reconcile");
    warn!(name = %backup.name_any(), error = %error, "Reconciliation failed, will retry");
    Action::requeue(Duration::from_secs(60))
}
