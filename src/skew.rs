//! Broker load skew.
//!
//! Skew is a broker's deviation from the average partition count, normalized
//! by the largest deviation the cluster could possibly show and scaled to a
//! +/-100 range.

use crate::models::BrokerInfo;

/// Brokers whose `|skew|` stays within this bound count as balanced
pub const DEFAULT_SKEW_THRESHOLD: i32 = 5;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Recompute `skew` for every broker from its current `partitions_count`
pub fn compute_skew(brokers: &mut [BrokerInfo], global_partition_count: i64) {
    if brokers.is_empty() {
        return;
    }

    let total: i64 = brokers.iter().map(|b| b.partitions_count).sum();
    let average = round2(total as f64 / brokers.len() as f64);
    let max_skew = (global_partition_count as f64 - average).max(average);

    for broker in brokers.iter_mut() {
        let deviation = broker.partitions_count as f64 - average;
        broker.skew = if max_skew == 0.0 || deviation == 0.0 {
            0
        } else {
            ((deviation / max_skew) * 100.0).round() as i32
        };
    }
}

pub fn is_balanced(brokers: &[BrokerInfo], threshold: i32) -> bool {
    brokers.iter().all(|b| b.skew.abs() <= threshold)
}

/// Brokers over the threshold, for logging
pub fn skewed_brokers(brokers: &[BrokerInfo], threshold: i32) -> Vec<&BrokerInfo> {
    brokers.iter().filter(|b| b.skew.abs() > threshold).collect()
}

/// Split into most-loaded (skew >= 0, descending) and least-loaded
/// (skew < 0, ascending). Ties are broken by broker id.
pub fn split_by_load(brokers: &[BrokerInfo]) -> (Vec<BrokerInfo>, Vec<BrokerInfo>) {
    let (mut most, mut least): (Vec<BrokerInfo>, Vec<BrokerInfo>) =
        brokers.iter().cloned().partition(|b| b.skew >= 0);

    most.sort_by(|a, b| b.skew.cmp(&a.skew).then(a.id.cmp(&b.id)));
    least.sort_by(|a, b| a.skew.cmp(&b.skew).then(a.id.cmp(&b.id)));

    (most, least)
}
