mod common;

use async_trait::async_trait;
use std::sync::Mutex;

use common::{three_broker_topic, FakeAdmin};
use kafka_ops_core::reassignment::{
    reassign_partitions, ReassignmentStatus, ReassignmentStatusWriter, ScalingSpec,
};
use kafka_ops_core::{ConnectionError, Error, Result};

#[derive(Default)]
struct RecordingWriter {
    statuses: Mutex<Vec<ReassignmentStatus>>,
    /// Fails every write of this status
    failing: Option<ReassignmentStatus>,
}

impl RecordingWriter {
    fn statuses(&self) -> Vec<ReassignmentStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReassignmentStatusWriter for RecordingWriter {
    async fn write_reassignment_status(&self, status: ReassignmentStatus) -> Result<()> {
        if self.failing == Some(status) {
            return Err(ConnectionError::request("update status", "forbidden").into());
        }
        self.statuses.lock().unwrap().push(status);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_scale_out_runs_and_finishes() {
    let admin = FakeAdmin::new(4, vec![three_broker_topic("orders", 12)]);
    let writer = RecordingWriter::default();

    let report = reassign_partitions(admin.clone(), &ScalingSpec::default(), 4, true, None, &writer)
        .await
        .unwrap()
        .expect("rebalancer ran");

    assert!(report.balanced);
    assert_eq!(
        writer.statuses(),
        vec![ReassignmentStatus::InProgress, ReassignmentStatus::Finished]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_is_recorded() {
    let admin = FakeAdmin::new(3, vec![three_broker_topic("orders", 3)]);
    let writer = RecordingWriter::default();
    let scaling = ScalingSpec {
        all_brokers_start_timeout_seconds: Some(30),
        ..Default::default()
    };

    let err = reassign_partitions(admin, &scaling, 4, true, None, &writer)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::QuorumTimeout { expected: 4, live: 3 }));
    assert_eq!(
        writer.statuses(),
        vec![ReassignmentStatus::InProgress, ReassignmentStatus::Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disabled_without_scale_out() {
    let admin = FakeAdmin::new(4, vec![three_broker_topic("orders", 12)]);
    let writer = RecordingWriter::default();

    let report = reassign_partitions(admin.clone(), &ScalingSpec::default(), 4, false, None, &writer)
        .await
        .unwrap();

    assert!(report.is_none());
    assert_eq!(writer.statuses(), vec![ReassignmentStatus::Disabled]);
    assert_eq!(admin.state.lock().unwrap().describe_cluster_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_finished_run_not_repeated() {
    let admin = FakeAdmin::new(4, vec![three_broker_topic("orders", 12)]);
    let writer = RecordingWriter::default();
    let scaling = ScalingSpec {
        reassign_partitions: Some(true),
        ..Default::default()
    };

    let report = reassign_partitions(
        admin.clone(),
        &scaling,
        4,
        false,
        Some(ReassignmentStatus::Finished),
        &writer,
    )
    .await
    .unwrap();

    assert!(report.is_none());
    assert!(writer.statuses().is_empty());
    assert!(admin.alter_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_status_write_failure_stops_before_rebalancing() {
    let admin = FakeAdmin::new(4, vec![three_broker_topic("orders", 12)]);
    let writer = RecordingWriter {
        failing: Some(ReassignmentStatus::InProgress),
        ..Default::default()
    };

    let err = reassign_partitions(admin.clone(), &ScalingSpec::default(), 4, true, None, &writer)
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::StatusUpdate(ref message) if message.starts_with("In Progress")),
        "{err}"
    );
    assert_eq!(admin.state.lock().unwrap().describe_cluster_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_status_write_keeps_run_error() {
    let admin = FakeAdmin::new(3, vec![three_broker_topic("orders", 3)]);
    let writer = RecordingWriter {
        failing: Some(ReassignmentStatus::Failed),
        ..Default::default()
    };
    let scaling = ScalingSpec {
        all_brokers_start_timeout_seconds: Some(30),
        ..Default::default()
    };

    let err = reassign_partitions(admin, &scaling, 4, true, None, &writer)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::QuorumTimeout { .. }));
    assert_eq!(writer.statuses(), vec![ReassignmentStatus::InProgress]);
}
