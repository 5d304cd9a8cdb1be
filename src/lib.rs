// Kafka cluster operational-safety core
// Partition rebalancing after scale-out and replication auditing before a DR switchover

pub mod models;
pub mod skew;
pub mod optimizer;
pub mod actions;
pub mod constraints;
pub mod connection;
pub mod ports;
pub mod rebalancer;
pub mod flow_config;
pub mod auditor;
pub mod switchover;
pub mod reassignment;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use models::{BrokerInfo, ClusterModel, ReplicaAssignment, TopicInfo, TopicPartition};
pub use optimizer::Optimizer;
pub use actions::{ReplicaMove, TopicReassignmentPlan};
pub use constraints::{AuditSettings, RebalanceSettings};
pub use connection::{ClusterConnection, ConnectionError, SaslMechanism, TlsMaterial};
pub use ports::{AdminPort, OffsetRange, ReadPort};
pub use rebalancer::{PartitionRebalancer, RebalanceReport};
pub use flow_config::{ConfigError, ReplicationFlowConfig};
pub use auditor::{AuditOutcome, ReplicationCompletenessAuditor};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kafka mirror maker config is invalid: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("not all brokers are started, timeout is expired: {live} of {expected} brokers are up")]
    QuorumTimeout { expected: usize, live: usize },

    #[error("cannot describe topics after {attempts} attempts: {source}")]
    DescribeTopics {
        attempts: u32,
        #[source]
        source: ConnectionError,
    },

    #[error("cannot reassign partitions for topic [{topic}]: {source}")]
    Reassign {
        topic: String,
        #[source]
        source: ConnectionError,
    },

    #[error("replication audit worker failed: {0}")]
    Audit(String),

    #[error("cannot update disaster recovery status: {0}")]
    StatusUpdate(String),
}
