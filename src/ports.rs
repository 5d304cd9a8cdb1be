//! Capability traits over the Kafka client library.
//!
//! The rebalancer only needs the administrative operations and the auditor
//! only needs the read operations, so the two are separate traits. Tests
//! substitute in-memory implementations; the `kafka` feature provides the
//! real ones.

use async_trait::async_trait;

use crate::connection::ConnectionError;
use crate::models::{ClusterDescription, PartitionId, ReplicaAssignment, TopicInfo, TopicName};

pub type PortResult<T> = Result<T, ConnectionError>;

/// Topic, broker and reassignment operations
#[async_trait]
pub trait AdminPort: Send + Sync {
    /// Live brokers with their racks, plus the controller id
    async fn describe_cluster(&self) -> PortResult<ClusterDescription>;

    async fn list_topics(&self) -> PortResult<Vec<TopicName>>;

    /// Partition and replica metadata for the given topics
    async fn describe_topics(&self, topics: &[TopicName]) -> PortResult<Vec<TopicInfo>>;

    /// Submit the full new assignment of one topic in a single request
    async fn alter_partition_reassignments(
        &self,
        topic: &str,
        assignment: &ReplicaAssignment,
    ) -> PortResult<()>;

    /// Partitions of `topic` among `partitions` that still have a
    /// reassignment in flight
    async fn list_partition_reassignments(
        &self,
        topic: &str,
        partitions: &[PartitionId],
    ) -> PortResult<Vec<PartitionId>>;
}

/// Earliest and latest offsets of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetRange {
    pub earliest: i64,
    pub latest: i64,
}

impl OffsetRange {
    pub fn new(earliest: i64, latest: i64) -> Self {
        Self { earliest, latest }
    }
}

/// Query-only operations used to count messages
#[async_trait]
pub trait ReadPort: Send + Sync {
    async fn list_topics(&self) -> PortResult<Vec<TopicName>>;

    async fn partitions(&self, topic: &str) -> PortResult<Vec<PartitionId>>;

    async fn offsets(&self, topic: &str, partition: PartitionId) -> PortResult<OffsetRange>;
}
