use crate::actions::{ReplicaMove, TopicReassignmentPlan};
use crate::models::{BrokerId, BrokerInfo, ClusterModel, TopicInfo};
use crate::skew;
use std::collections::HashSet;

/// Plans replica moves for one topic at a time against a mutable load model.
///
/// Partitions are visited in index order and every decision sees the broker
/// counters left behind by the previous one, so planning is strictly
/// sequential.
pub struct Optimizer;

impl Optimizer {
    /// Plan a new assignment for `topic`, updating `model` as moves are made.
    ///
    /// Callers that may fail to apply the plan should hand in a clone of
    /// their model and keep it only once the plan is committed.
    pub fn plan_topic(model: &mut ClusterModel, topic: &TopicInfo) -> TopicReassignmentPlan {
        let mut plan = TopicReassignmentPlan::new(topic);
        let mut previous_target: Option<BrokerId> = None;
        let partitions: Vec<_> = plan.assignment.partitions().collect();

        for partition in partitions {
            model.recompute_skew();
            let (most_loaded, least_loaded) = skew::split_by_load(&model.brokers);
            let replicas = plan.assignment.replicas(partition).to_vec();

            let Some((source, index)) = select_source(&most_loaded, &replicas) else {
                continue;
            };
            let Some(target) = select_target(model, &least_loaded, &replicas, source) else {
                continue;
            };

            // a single replica would otherwise bounce between the same pair
            if topic.replication_factor == 1 && previous_target == Some(target) {
                previous_target = None;
                continue;
            }
            previous_target = Some(target);

            if !plan.assignment.replace(partition, index, target) {
                continue;
            }
            model.apply_move(source, target);
            plan.moves.push(ReplicaMove {
                topic: topic.name.clone(),
                partition,
                from_broker: source,
                to_broker: target,
                replica_index: index,
            });
        }

        model.recompute_skew();
        plan
    }
}

/// First most-loaded broker holding a replica of the partition, with the
/// replica's index
pub fn select_source(most_loaded: &[BrokerInfo], replicas: &[BrokerId]) -> Option<(BrokerId, usize)> {
    most_loaded.iter().find_map(|broker| {
        replicas
            .iter()
            .position(|&r| r == broker.id)
            .map(|index| (broker.id, index))
    })
}

/// Least-loaded broker to receive the replica taken from `source`.
///
/// With rack-awareness the first pass looks for a rack the partition does
/// not use yet, the second pass for the source's own rack. The last pass
/// takes any broker that is not already a replica.
pub fn select_target(
    model: &ClusterModel,
    least_loaded: &[BrokerInfo],
    replicas: &[BrokerId],
    source: BrokerId,
) -> Option<BrokerId> {
    let is_replica = |id: BrokerId| replicas.contains(&id);

    if model.racks_enabled {
        let current_racks: HashSet<&str> = replicas.iter().map(|&r| model.rack_of(r)).collect();

        // First pass: a rack not represented in the partition yet
        if let Some(broker) = least_loaded
            .iter()
            .find(|b| !current_racks.contains(b.rack.as_str()) && !is_replica(b.id))
        {
            return Some(broker.id);
        }

        // Second pass: stay on the rack of the broker being relieved
        let source_rack = model.rack_of(source);
        if let Some(broker) = least_loaded
            .iter()
            .find(|b| b.rack == source_rack && !is_replica(b.id))
        {
            return Some(broker.id);
        }
    }

    // Final pass: any underloaded broker without a replica of the partition
    least_loaded.iter().find(|b| !is_replica(b.id)).map(|b| b.id)
}
