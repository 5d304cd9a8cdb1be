use std::collections::HashMap;
use super::{BrokerId, BrokerInfo, ClusterDescription, TopicInfo};
use crate::skew;

/// Load model of a Kafka cluster for one rebalance run
#[derive(Debug, Clone)]
pub struct ClusterModel {
    pub brokers: Vec<BrokerInfo>,
    pub racks_enabled: bool,
    pub controller_id: Option<BrokerId>,
    /// Partitions across all topics; constant for the whole run
    pub global_partition_count: i64,
    index: HashMap<BrokerId, usize>,
}

impl ClusterModel {
    /// Count partitions per live broker by their current leader. Partitions
    /// without a leader, or led by a broker that is not part of
    /// `description`, contribute to the global count only.
    pub fn new(description: &ClusterDescription, topics: &[TopicInfo]) -> Self {
        let mut counts: HashMap<BrokerId, i64> = HashMap::new();
        let mut global_partition_count = 0;

        for topic in topics {
            for partition in topic.partitions.values() {
                global_partition_count += 1;
                if let Some(leader) = partition.leader {
                    *counts.entry(leader).or_insert(0) += 1;
                }
            }
        }

        let mut brokers: Vec<BrokerInfo> = description
            .brokers
            .iter()
            .map(|b| {
                BrokerInfo::new(
                    b.id,
                    counts.get(&b.id).copied().unwrap_or(0),
                    b.rack.clone().unwrap_or_default(),
                )
            })
            .collect();
        brokers.sort_by_key(|b| b.id);

        let mut model = Self {
            brokers,
            racks_enabled: description.racks_enabled(),
            controller_id: description.controller_id,
            global_partition_count,
            index: HashMap::new(),
        };
        model.reindex();
        model.recompute_skew();
        model
    }

    fn reindex(&mut self) {
        self.index = self
            .brokers
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect();
    }

    pub fn get_broker(&self, id: BrokerId) -> Option<&BrokerInfo> {
        self.index.get(&id).map(|&i| &self.brokers[i])
    }

    fn get_broker_mut(&mut self, id: BrokerId) -> Option<&mut BrokerInfo> {
        let i = *self.index.get(&id)?;
        Some(&mut self.brokers[i])
    }

    /// Rack of a live broker; empty string when unset or unknown
    pub fn rack_of(&self, id: BrokerId) -> &str {
        self.get_broker(id).map(|b| b.rack.as_str()).unwrap_or("")
    }

    pub fn recompute_skew(&mut self) {
        skew::compute_skew(&mut self.brokers, self.global_partition_count);
    }

    pub fn is_balanced(&self, threshold: i32) -> bool {
        skew::is_balanced(&self.brokers, threshold)
    }

    /// Move one partition worth of load between brokers
    pub fn apply_move(&mut self, from_broker: BrokerId, to_broker: BrokerId) {
        if let Some(broker) = self.get_broker_mut(from_broker) {
            broker.partitions_count -= 1;
        }
        if let Some(broker) = self.get_broker_mut(to_broker) {
            broker.partitions_count += 1;
        }
    }

    pub fn partition_counts(&self) -> Vec<(BrokerId, i64)> {
        self.brokers
            .iter()
            .map(|b| (b.id, b.partitions_count))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BrokerNode, PartitionMetadata};

    fn description() -> ClusterDescription {
        ClusterDescription::new(
            vec![
                BrokerNode::new(1, Some("a".into())),
                BrokerNode::new(2, Some("b".into())),
                BrokerNode::new(3, None),
            ],
            Some(1),
        )
    }

    #[test]
    fn test_counts_partitions_by_leader() {
        let mut moved_leader = PartitionMetadata::new(2, vec![1, 2]);
        moved_leader.leader = Some(2);
        let mut offline = PartitionMetadata::new(3, vec![3, 1]);
        offline.leader = None;
        let topics = vec![TopicInfo::new(
            "orders",
            vec![
                PartitionMetadata::new(0, vec![1, 2]),
                PartitionMetadata::new(1, vec![9, 1]),
                moved_leader,
                offline,
            ],
        )];
        let model = ClusterModel::new(&description(), &topics);

        assert_eq!(model.global_partition_count, 4);
        assert_eq!(model.partition_counts(), vec![(1, 1), (2, 1), (3, 0)]);
        assert!(model.racks_enabled);
        assert_eq!(model.rack_of(3), "");
        assert_eq!(model.rack_of(9), "");
    }

    #[test]
    fn test_apply_move_keeps_total() {
        let topics = vec![TopicInfo::new(
            "orders",
            vec![PartitionMetadata::new(0, vec![1]), PartitionMetadata::new(1, vec![1])],
        )];
        let mut model = ClusterModel::new(&description(), &topics);
        model.apply_move(1, 3);
        model.recompute_skew();

        assert_eq!(model.partition_counts(), vec![(1, 1), (2, 0), (3, 1)]);
        assert_eq!(model.global_partition_count, 2);
    }

    #[test]
    fn test_racks_disabled_without_rack_labels() {
        let description = ClusterDescription::new(
            vec![BrokerNode::new(1, None), BrokerNode::new(2, Some(String::new()))],
            None,
        );
        let model = ClusterModel::new(&description, &[]);
        assert!(!model.racks_enabled);
        assert!(model.is_balanced(5));
    }
}
