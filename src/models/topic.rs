use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use super::{BrokerId, PartitionId, TopicName};

/// Partition metadata as returned by a describe-topics call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub id: PartitionId,
    pub leader: Option<BrokerId>,
    pub replicas: Vec<BrokerId>,
}

impl PartitionMetadata {
    pub fn new(id: PartitionId, replicas: Vec<BrokerId>) -> Self {
        Self {
            id,
            leader: replicas.first().copied(),
            replicas,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: TopicName,
    pub replication_factor: usize,
    pub partitions: BTreeMap<PartitionId, PartitionMetadata>,
}

impl TopicInfo {
    /// Build a topic from its partitions. The replication factor is taken
    /// from the widest replica list.
    pub fn new(name: impl Into<TopicName>, partitions: Vec<PartitionMetadata>) -> Self {
        let replication_factor = partitions
            .iter()
            .map(|p| p.replicas.len())
            .max()
            .unwrap_or(0);

        Self {
            name: name.into(),
            replication_factor,
            partitions: partitions.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    /// Copy of the current replica placement
    pub fn assignment(&self) -> ReplicaAssignment {
        ReplicaAssignment(
            self.partitions
                .values()
                .map(|p| (p.id, p.replicas.clone()))
                .collect(),
        )
    }
}

/// Partition index -> ordered replica list.
///
/// A broker id never appears twice within one partition's list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaAssignment(BTreeMap<PartitionId, Vec<BrokerId>>);

impl ReplicaAssignment {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, partition: PartitionId, replicas: Vec<BrokerId>) {
        self.0.insert(partition, replicas);
    }

    pub fn replicas(&self, partition: PartitionId) -> &[BrokerId] {
        self.0.get(&partition).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartitionId, &[BrokerId])> {
        self.0.iter().map(|(p, r)| (*p, r.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Swap the replica at `index` for `broker`.
    ///
    /// Refuses (returns `false`) when the partition or index does not exist
    /// or when `broker` already hosts a replica of this partition.
    pub fn replace(&mut self, partition: PartitionId, index: usize, broker: BrokerId) -> bool {
        let Some(replicas) = self.0.get_mut(&partition) else {
            return false;
        };
        if index >= replicas.len() || replicas.contains(&broker) {
            return false;
        }
        replicas[index] = broker;
        true
    }

    /// Check every partition has exactly `replication_factor` distinct replicas
    pub fn validate(&self, replication_factor: usize) -> Result<(), String> {
        for (partition, replicas) in &self.0 {
            if replicas.len() != replication_factor {
                return Err(format!(
                    "partition {} has {} replicas, expected {}",
                    partition,
                    replicas.len(),
                    replication_factor
                ));
            }
            for (i, broker) in replicas.iter().enumerate() {
                if replicas[..i].contains(broker) {
                    return Err(format!(
                        "partition {} lists broker {} more than once",
                        partition, broker
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ReplicaAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(p, r)| format!("{}:{:?}", p, r))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Key of one partition of one topic, rendered as `topic-partition`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: TopicName,
    pub partition: PartitionId,
}

impl TopicPartition {
    pub fn new(topic: impl Into<TopicName>, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
