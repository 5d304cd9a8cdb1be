//! Disaster-recovery switchover gate.
//!
//! Decides whether a mode change needs a replication audit first, builds the
//! connections the audit uses and maps its outcome onto the DR status record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info, instrument, warn};

use crate::auditor::AuditOutcome;
use crate::connection::{ClusterConnection, ConnectionError, TlsMaterial};
use crate::flow_config::{ConfigError, FlowSide, ReplicationFlowConfig};
use crate::{Error, Result};

pub const MODE_ACTIVE: &str = "active";

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_DONE: &str = "done";
pub const STATUS_FAILED: &str = "failed";

/// Requested DR settings of the Kafka service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasterRecoverySpec {
    pub mode: String,
    #[serde(default)]
    pub no_wait: bool,
    /// Whether mirror-maker replication runs at all
    #[serde(default)]
    pub replication_enabled: bool,
}

/// The persisted `{mode, status, message}` switchover record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrStatus {
    pub mode: String,
    pub status: String,
    pub message: String,
}

impl DrStatus {
    pub fn new(mode: impl Into<String>, status: &str, message: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            status: status.to_string(),
            message: message.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == STATUS_DONE
    }

    pub fn is_failed(&self) -> bool {
        self.status == STATUS_FAILED
    }
}

/// A switchover is in order when the requested mode differs from the
/// recorded one or the previous attempt did not settle.
pub fn switchover_needed(spec: &DisasterRecoverySpec, status: &DrStatus) -> bool {
    spec.mode != status.mode || status.status == STATUS_RUNNING || status.status == STATUS_FAILED
}

/// Only a switch to active with replication running, and without `no_wait`,
/// waits for the standby to catch up. A failed switch to active is audited
/// again.
pub fn audit_required(spec: &DisasterRecoverySpec, status: &DrStatus) -> bool {
    if spec.no_wait || !spec.replication_enabled {
        return false;
    }
    let spec_mode = spec.mode.to_lowercase();
    let status_mode = status.mode.to_lowercase();
    let previous = status.status.to_lowercase();
    spec_mode == MODE_ACTIVE && (status_mode != MODE_ACTIVE || previous == STATUS_FAILED)
}

/// Final status for an audited switchover
pub fn status_after_audit(mode: &str, audit: &Result<AuditOutcome>) -> DrStatus {
    match audit {
        Ok(AuditOutcome::TimedOut) => {
            DrStatus::new(mode, STATUS_FAILED, "timeout occurred during replication check")
        }
        Ok(_) => DrStatus::new(mode, STATUS_DONE, "replication has finished successfully"),
        Err(err) => DrStatus::new(
            mode,
            STATUS_FAILED,
            format!("Error is occurred during switching: {err}"),
        ),
    }
}

pub fn status_without_audit(mode: &str) -> DrStatus {
    DrStatus::new(
        mode,
        STATUS_DONE,
        "Switchover mode has been changed without replication check",
    )
}

/// Persists DR status records
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_status(&self, status: &DrStatus) -> Result<()>;
}

/// Run the switchover gate for one reconciliation.
///
/// Returns `None` when no switchover is pending. `audit` is only invoked when
/// the mode change requires a replication check. A failure to write the
/// `running` record aborts with [`Error::StatusUpdate`]; a failure to write
/// the final record is logged and the computed status is still returned.
#[instrument(skip_all, fields(mode = %spec.mode))]
pub async fn run_switchover<F, Fut>(
    spec: &DisasterRecoverySpec,
    previous: &DrStatus,
    writer: &dyn StatusWriter,
    audit: F,
) -> Result<Option<DrStatus>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<AuditOutcome>>,
{
    if !switchover_needed(spec, previous) {
        return Ok(None);
    }
    let check = audit_required(spec, previous);

    writer
        .write_status(&DrStatus::new(
            &spec.mode,
            STATUS_RUNNING,
            "The switchover process for Kafka has been started",
        ))
        .await
        .map_err(|err| Error::StatusUpdate(err.to_string()))?;

    let status = if check {
        status_after_audit(&spec.mode, &audit().await)
    } else {
        status_without_audit(&spec.mode)
    };
    info!(status = %status.status, message = %status.message, "Switchover finished");

    if let Err(err) = writer.write_status(&status).await {
        warn!(error = %err, "cannot persist switchover status");
    }
    Ok(Some(status))
}

/// Mirror-maker settings for one declared cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorClusterSpec {
    pub name: String,
    /// Empty means SCRAM-SHA-512
    #[serde(default)]
    pub sasl_mechanism: String,
    #[serde(default)]
    pub enable_ssl: bool,
    #[serde(default)]
    pub ssl_secret_name: Option<String>,
}

/// Cluster names in the properties and in the resource may differ in case
pub fn find_cluster<'a>(clusters: &'a [MirrorClusterSpec], name: &str) -> Result<&'a MirrorClusterSpec, ConfigError> {
    clusters
        .iter()
        .find(|cluster| cluster.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| ConfigError::ClusterNotFound {
            name: name.to_string(),
        })
}

/// Secret material the audit needs to reach both clusters
#[derive(Debug, Clone, Default)]
pub struct FlowSecrets {
    /// Mirror-maker secret holding `<cluster>-kafka-username` and
    /// `<cluster>-kafka-password`
    pub credentials: BTreeMap<String, String>,
    /// TLS material keyed by secret name
    pub tls: BTreeMap<String, TlsMaterial>,
}

impl FlowSecrets {
    /// Username and password for `cluster`, looked up by its lowercase name
    pub fn credentials_for(&self, cluster: &str) -> Result<(String, String), ConfigError> {
        let cluster = cluster.to_lowercase();
        let lookup = |suffix: &str| {
            let key = format!("{cluster}-kafka-{suffix}");
            self.credentials
                .get(&key)
                .cloned()
                .ok_or(ConfigError::CredentialMissing { key })
        };
        Ok((lookup("username")?, lookup("password")?))
    }
}

/// Connection settings for one side of `flow`
pub fn flow_connection(
    flow: &ReplicationFlowConfig,
    side: FlowSide,
    clusters: &[MirrorClusterSpec],
    secrets: &FlowSecrets,
) -> Result<ClusterConnection> {
    let cluster = find_cluster(clusters, flow.cluster(side))?;
    let (username, password) = secrets.credentials_for(flow.cluster(side))?;

    let tls = match (&cluster.ssl_secret_name, cluster.enable_ssl) {
        (Some(secret), true) if !secret.is_empty() => secrets.tls.get(secret).cloned().ok_or_else(|| {
            ConnectionError::TlsConfig(format!("TLS secret '{secret}' is not provided"))
        })?,
        _ => TlsMaterial::default(),
    };

    info!(cluster = %cluster.name, %side, brokers = ?flow.brokers(side), "Define Kafka client config");
    let connection = ClusterConnection::builder(flow.brokers(side).iter().cloned())
        .sasl(cluster.sasl_mechanism.clone(), username, password)
        .tls(cluster.enable_ssl, tls)
        .build()?;
    Ok(connection)
}
