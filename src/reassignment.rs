//! When a reconciliation runs partition reassignment, and the record it leaves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::constraints::RebalanceSettings;
use crate::ports::AdminPort;
use crate::rebalancer::{PartitionRebalancer, RebalanceReport};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReassignmentStatus {
    #[serde(rename = "Disabled")]
    Disabled,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Finished")]
    Finished,
    #[serde(rename = "Failed")]
    Failed,
}

impl ReassignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReassignmentStatus::Disabled => "Disabled",
            ReassignmentStatus::InProgress => "In Progress",
            ReassignmentStatus::Finished => "Finished",
            ReassignmentStatus::Failed => "Failed",
        }
    }

    /// Unknown and empty values read as no previous status
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Disabled" => Some(ReassignmentStatus::Disabled),
            "In Progress" => Some(ReassignmentStatus::InProgress),
            "Finished" => Some(ReassignmentStatus::Finished),
            "Failed" => Some(ReassignmentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ReassignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scaling section of the Kafka resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingSpec {
    /// Explicit switch; when unset reassignment follows scale-out
    #[serde(default)]
    pub reassign_partitions: Option<bool>,
    #[serde(default)]
    pub all_brokers_start_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub topic_reassignment_timeout_seconds: Option<u64>,
}

impl ScalingSpec {
    pub fn reassignment_enabled(&self, cluster_scaling: bool) -> bool {
        self.reassign_partitions.unwrap_or(cluster_scaling)
    }

    pub fn settings(&self, expected_broker_count: usize) -> RebalanceSettings {
        let mut settings = RebalanceSettings::for_scale_out(expected_broker_count);
        if let Some(secs) = self.all_brokers_start_timeout_seconds {
            settings = settings.with_all_brokers_start_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.topic_reassignment_timeout_seconds {
            settings = settings.with_topic_reassignment_timeout(Duration::from_secs(secs));
        }
        settings
    }
}

/// Scaling out means growing a cluster that already had brokers
pub fn is_cluster_scaling(current_replicas: usize, desired_replicas: usize) -> bool {
    current_replicas > 0 && current_replicas < desired_replicas
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignmentDecision {
    Disabled,
    Run,
    AlreadyFinished,
}

/// A scale-out always reassigns, even after an earlier run finished.
pub fn decide(
    scaling: &ScalingSpec,
    cluster_scaling: bool,
    previous: Option<ReassignmentStatus>,
) -> ReassignmentDecision {
    if !scaling.reassignment_enabled(cluster_scaling) {
        return ReassignmentDecision::Disabled;
    }
    if cluster_scaling || previous != Some(ReassignmentStatus::Finished) {
        ReassignmentDecision::Run
    } else {
        ReassignmentDecision::AlreadyFinished
    }
}

#[async_trait]
pub trait ReassignmentStatusWriter: Send + Sync {
    async fn write_reassignment_status(&self, status: ReassignmentStatus) -> Result<()>;
}

async fn record(writer: &dyn ReassignmentStatusWriter, status: ReassignmentStatus) -> Result<()> {
    writer
        .write_reassignment_status(status)
        .await
        .map_err(|err| Error::StatusUpdate(format!("{status}: {err}")))
}

/// Apply the gate, run the rebalancer if it says so and keep the status
/// record in step.
///
/// A failed run is recorded as `Failed` before its error is returned. Status
/// writes that fail surface as [`Error::StatusUpdate`], except the `Failed`
/// write, which only logs so the run's own error is kept.
#[instrument(skip(admin, scaling, writer))]
pub async fn reassign_partitions(
    admin: Arc<dyn AdminPort>,
    scaling: &ScalingSpec,
    expected_broker_count: usize,
    cluster_scaling: bool,
    previous: Option<ReassignmentStatus>,
    writer: &dyn ReassignmentStatusWriter,
) -> Result<Option<RebalanceReport>> {
    match decide(scaling, cluster_scaling, previous) {
        ReassignmentDecision::Disabled => {
            info!("Partitions reassignment is disabled");
            record(writer, ReassignmentStatus::Disabled).await?;
            Ok(None)
        }
        ReassignmentDecision::AlreadyFinished => {
            info!("Partitions are already reassigned. Skip reassignment");
            Ok(None)
        }
        ReassignmentDecision::Run => {
            let settings = scaling.settings(expected_broker_count);
            info!(
                all_brokers_start_timeout = ?settings.all_brokers_start_timeout,
                topic_reassignment_timeout = ?settings.topic_reassignment_timeout,
                "Partitions reassignment is enabled"
            );
            record(writer, ReassignmentStatus::InProgress).await?;

            match PartitionRebalancer::new(admin, settings).run().await {
                Ok(report) => {
                    record(writer, ReassignmentStatus::Finished).await?;
                    Ok(Some(report))
                }
                Err(err) => {
                    error!(error = %err, "Partitions reassignment failed");
                    if let Err(write_err) = record(writer, ReassignmentStatus::Failed).await {
                        warn!(error = %write_err, "cannot persist reassignment status");
                    }
                    Err(err)
                }
            }
        }
    }
}

/// Digest of a resource's spec and annotations.
///
/// Callers keep the fingerprint of the last reconciled version and pass it
/// back in to learn whether the resource changed since.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecFingerprint {
    pub spec: String,
    pub annotations: String,
}

impl SpecFingerprint {
    /// `spec` is the serialized spec; annotations are hashed in key order
    pub fn compute(spec: &[u8], annotations: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in annotations {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        Self {
            spec: hex::encode(Sha256::digest(spec)),
            annotations: hex::encode(hasher.finalize()),
        }
    }

    /// True on first sight or when either digest differs
    pub fn changed_since(&self, previous: Option<&SpecFingerprint>) -> bool {
        previous != Some(self)
    }
}
