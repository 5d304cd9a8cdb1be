use crate::models::*;
use serde::{Deserialize, Serialize};

/// One replica moved from an overloaded broker to an underloaded one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaMove {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub from_broker: BrokerId,
    pub to_broker: BrokerId,
    /// Position in the partition's replica list; 0 is the preferred leader
    pub replica_index: usize,
}

impl ReplicaMove {
    pub fn moves_leader(&self) -> bool {
        self.replica_index == 0
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        format!(
            "Move replica #{} of {}/{} from broker {} to {}",
            self.replica_index, self.topic, self.partition, self.from_broker, self.to_broker
        )
    }
}

/// New replica assignment for a single topic together with the moves that
/// produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicReassignmentPlan {
    pub topic: TopicName,
    pub replication_factor: usize,
    pub assignment: ReplicaAssignment,
    pub moves: Vec<ReplicaMove>,
    pub metadata: PlanMetadata,
}

impl TopicReassignmentPlan {
    pub fn new(topic: &TopicInfo) -> Self {
        Self {
            topic: topic.name.clone(),
            replication_factor: topic.replication_factor,
            assignment: topic.assignment(),
            moves: Vec::new(),
            metadata: PlanMetadata::default(),
        }
    }

    /// Check if this plan is empty
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let leader_moves = self.moves.iter().filter(|m| m.moves_leader()).count();

        PlanSummary {
            topic: self.topic.clone(),
            partitions: self.assignment.len(),
            total_moves: self.moves.len(),
            leader_moves,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Default for PlanMetadata {
    fn default() -> Self {
        Self {
            created_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub topic: TopicName,
    pub partitions: usize,
    pub total_moves: usize,
    pub leader_moves: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Topic: {}, Partitions: {}, Moves: {}, Leader Moves: {}",
            self.topic, self.partitions, self.total_moves, self.leader_moves
        )
    }
}
