use kafka_ops_core::*;

use kafka_ops_core::models::{BrokerId, BrokerNode, ClusterDescription, PartitionMetadata};

fn main() {
    println!("Kafka Partition Rebalancer - Scale-out Plan\n");

    // Three brokers grew to five; every topic still lives on the first three
    let description = create_scaled_cluster(5);
    let topics = vec![
        create_topic("orders", 12, 3),
        create_topic("payments", 6, 3),
        create_topic("audit-log", 4, 2),
    ];

    let settings = RebalanceSettings::for_scale_out(5);
    let mut model = ClusterModel::new(&description, &topics);

    println!("=== Initial Load ===");
    print_broker_load(&model);

    if model.is_balanced(settings.skew_threshold) {
        println!("✓ No rebalancing needed - cluster is already balanced!");
        return;
    }

    println!("\n=== Planning Reassignments ===");
    let mut plans = Vec::new();
    for topic in &topics {
        let plan = Optimizer::plan_topic(&mut model, topic);
        println!("{}", plan.summary());
        let balanced = model.is_balanced(settings.skew_threshold);
        if !plan.is_empty() {
            plans.push(plan);
        }
        if balanced {
            println!("Cluster is balanced after topic {}", topic.name);
            break;
        }
    }

    print_proposed_moves(&plans);
    print_partition_movements(&plans);

    println!("\n=== New Assignments ===");
    for plan in &plans {
        println!("{}:", plan.topic);
        for (partition, replicas) in plan.assignment.iter() {
            println!("  {:>3} -> {:?}", partition, replicas);
        }
    }

    println!("\n=== Final Load ===");
    print_broker_load(&model);
}

fn create_scaled_cluster(broker_count: BrokerId) -> ClusterDescription {
    let brokers = (1..=broker_count)
        .map(|id| {
            let rack = if id % 2 == 1 { "rack-a" } else { "rack-b" };
            BrokerNode::new(id, Some(rack.to_string()))
        })
        .collect();
    ClusterDescription::new(brokers, Some(1))
}

/// Partitions spread round-robin over brokers 1..=3
fn create_topic(name: &str, partitions: i32, replication_factor: i32) -> TopicInfo {
    let partitions = (0..partitions)
        .map(|p| {
            let replicas = (0..replication_factor).map(|r| (p + r) % 3 + 1).collect();
            PartitionMetadata::new(p, replicas)
        })
        .collect();
    TopicInfo::new(name, partitions)
}

fn print_proposed_moves(plans: &[TopicReassignmentPlan]) {
    println!("\n=== Proposed Moves (showing first 20) ===");
    let moves: Vec<&ReplicaMove> = plans.iter().flat_map(|p| p.moves.iter()).collect();
    for (i, m) in moves.iter().take(20).enumerate() {
        println!("{}. {}", i + 1, m.description());
    }
    if moves.len() > 20 {
        println!("... and {} more moves", moves.len() - 20);
    }
}

fn print_partition_movements(plans: &[TopicReassignmentPlan]) {
    println!("\n=== Partition Movements ===");

    if plans.iter().all(|p| p.is_empty()) {
        println!("No partition movements");
        return;
    }

    for plan in plans {
        println!("{}:", plan.summary());
        // one line per move, ordered by partition then replica position
        let mut moves: Vec<&ReplicaMove> = plan.moves.iter().collect();
        moves.sort_by_key(|m| (m.partition, m.replica_index));
        for m in moves {
            let marker = if m.moves_leader() { " (leader)" } else { "" };
            println!("  {}{}", m.description(), marker);
        }
    }
}

fn print_broker_load(model: &ClusterModel) {
    println!("Global partition count: {}", model.global_partition_count);
    for broker in &model.brokers {
        let rack = if broker.rack.is_empty() { "-" } else { broker.rack.as_str() };
        println!(
            "  Broker {} ({}): {:>3} partitions led, skew {:+}%",
            broker.id, rack, broker.partitions_count, broker.skew
        );
    }
}
