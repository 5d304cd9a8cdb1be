// Type aliases used across models
pub type BrokerId = i32;
pub type TopicName = String;
pub type PartitionId = i32;

// Module declarations
mod broker;
mod topic;
mod cluster;

// Re-exports
pub use broker::{BrokerInfo, BrokerNode, ClusterDescription};
pub use topic::{PartitionMetadata, ReplicaAssignment, TopicInfo, TopicPartition};
pub use cluster::ClusterModel;
