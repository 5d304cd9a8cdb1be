use serde::{Deserialize, Serialize};
use super::BrokerId;

/// A live broker as reported by a describe-cluster call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerNode {
    pub id: BrokerId,
    pub rack: Option<String>,
}

impl BrokerNode {
    pub fn new(id: BrokerId, rack: Option<String>) -> Self {
        Self { id, rack }
    }
}

/// Snapshot of the cluster membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescription {
    pub brokers: Vec<BrokerNode>,
    pub controller_id: Option<BrokerId>,
}

impl ClusterDescription {
    pub fn new(brokers: Vec<BrokerNode>, controller_id: Option<BrokerId>) -> Self {
        Self {
            brokers,
            controller_id,
        }
    }

    /// Rack-awareness is on as soon as one broker reports a non-empty rack
    pub fn racks_enabled(&self) -> bool {
        self.brokers
            .iter()
            .any(|b| b.rack.as_deref().is_some_and(|r| !r.is_empty()))
    }
}

/// Per-broker load bookkeeping for a single rebalance run.
///
/// `partitions_count` is mutated as replicas are planned onto or off the
/// broker, and `skew` is recomputed from it before every placement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub id: BrokerId,
    pub partitions_count: i64,
    /// Empty when the broker has no rack
    pub rack: String,
    pub skew: i32,
}

impl BrokerInfo {
    pub fn new(id: BrokerId, partitions_count: i64, rack: impl Into<String>) -> Self {
        Self {
            id,
            partitions_count,
            rack: rack.into(),
            skew: 0,
        }
    }
}
