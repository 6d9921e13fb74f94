//! Custom Resource Definitions for mongosnap

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MongoBackup declares a recurring backup of a MongoDB deployment
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "mongosnap.io",
    version = "v1alpha1",
    kind = "MongoBackup",
    plural = "mongobackups",
    shortname = "mbk",
    status = "MongoBackupStatus",
    namespaced,
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"LastBackup","type":"date","jsonPath":".status.lastBackupTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MongoBackupSpec {
    /// Cron expression (5 fields) controlling when backups run
    pub schedule: String,

    /// Connection URI of the MongoDB deployment to dump
    pub mongo_uri: String,

    /// How long finished backups are kept on storage, in days
    pub retention_days: Option<i32>,
}

/// Observed state of a MongoBackup
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MongoBackupStatus {
    /// Time of the last triggered backup
    pub last_backup_time: Option<DateTime<Utc>>,

    /// Free-form phase label
    pub phase: Option<String>,

    /// Conditions keyed by type, newest writer per type wins
    #[serde(default)]
    pub conditions: Vec<BackupCondition>,
}

/// A single status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: Option<DateTime<Utc>>,
}
