//! Backup Job construction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::MongoBackup;
use crate::error::Error;

/// Image every backup job runs.
const BACKUP_IMAGE: &str = "docker.io/bitnami/mongodb:7.0.12-debian-12-r0";

/// Dump script path inside the container.
const DUMP_SCRIPT: &str = "/usr/local/bin/mongodump.sh";

/// Job name for a trigger at `now`. Unique only to second resolution.
pub fn job_name(name_prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}mongosnap-backup-{}",
        name_prefix,
        now.format("%Y%m%d%H%M%S")
    )
}

/// Build the backup job for one trigger of `backup`.
///
/// The job is generated fresh on every trigger and owned by the policy,
/// so deleting the policy garbage-collects its jobs.
pub fn backup_job(
    backup: &MongoBackup,
    name_prefix: &str,
    now: DateTime<Utc>,
) -> Result<Job, Error> {
    let name = job_name(name_prefix, now);

    let owner_ref = backup
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("metadata.uid"))?;

    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "mongosnap-backup".to_string());
    labels.insert("job-name".to_string(), name.clone());

    let job = Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: backup.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![Container {
                        name: "mongodump".to_string(),
                        image: Some(BACKUP_IMAGE.to_string()),
                        command: Some(vec!["sh".to_string()]),
                        args: Some(vec![DUMP_SCRIPT.to_string()]),
                        env: Some(vec![EnvVar {
                            name: "MONGO_URI".to_string(),
                            value: Some(backup.spec.mongo_uri.clone()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "backups".to_string(),
                                mount_path: "/data".to_string(),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "mongodump-script".to_string(),
                                mount_path: DUMP_SCRIPT.to_string(),
                                sub_path: Some("mongodump.sh".to_string()),
                                read_only: Some(true),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![
                        Volume {
                            name: "backups".to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: format!("{}mongosnap-backup-pvc", name_prefix),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "mongodump-script".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: format!("{}mongodump-script", name_prefix),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::MongoBackupSpec;
    use chrono::TimeZone;

    fn backup() -> MongoBackup {
        let mut backup = MongoBackup::new(
            "nightly",
            MongoBackupSpec {
                schedule: "0 0 * * *".to_string(),
                mongo_uri: "mongodb://db:27017".to_string(),
                retention_days: None,
            },
        );
        backup.metadata.namespace = Some("default".to_string());
        backup.metadata.uid = Some("a1b2c3".to_string());
        backup
    }

    fn trigger_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 1).unwrap()
    }

    #[test]
    fn test_job_name_encodes_trigger_time() {
        assert_eq!(
            job_name("prod-", trigger_time()),
            "prod-mongosnap-backup-20240102000001"
        );
        assert_eq!(job_name("", trigger_time()), "mongosnap-backup-20240102000001");
    }

    #[test]
    fn test_job_is_owned_by_the_policy() {
        let job = backup_job(&backup(), "", trigger_time()).unwrap();
        let owners = job.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].api_version, "mongosnap.io/v1alpha1");
        assert_eq!(owners[0].kind, "MongoBackup");
        assert_eq!(owners[0].name, "nightly");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_job_without_uid_is_refused() {
        let mut backup = backup();
        backup.metadata.uid = None;
        assert!(matches!(
            backup_job(&backup, "", trigger_time()),
            Err(Error::MissingObjectKey(_))
        ));
    }

    #[test]
    fn test_job_pod_shape() {
        let job = backup_job(&backup(), "prod-", trigger_time()).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();

        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.containers.len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.name, "mongodump");
        assert_eq!(container.args.as_ref().unwrap()[0], DUMP_SCRIPT);

        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "MONGO_URI");
        assert_eq!(env[0].value.as_deref(), Some("mongodb://db:27017"));

        let volumes = pod.volumes.unwrap();
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
            "prod-mongosnap-backup-pvc"
        );
        assert_eq!(
            volumes[1].config_map.as_ref().unwrap().name,
            "prod-mongodump-script"
        );

        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/data");
        assert_eq!(mounts[1].read_only, Some(true));
    }
}
