use crate::skew::DEFAULT_SKEW_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings that control how a rebalance run waits, retries and decides it
/// is done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSettings {
    /// Number of live brokers required before rebalancing starts
    pub expected_broker_count: usize,

    /// How long to wait for `expected_broker_count` brokers to show up
    pub all_brokers_start_timeout: Duration,

    /// Interval between broker-list polls while waiting for quorum
    pub quorum_poll_interval: Duration,

    /// How long to wait for one topic's reassignment to settle
    pub topic_reassignment_timeout: Duration,

    /// Interval between reassignment status polls
    pub reassignment_poll_interval: Duration,

    /// Retries after the first failed describe-topics call
    pub describe_topics_max_retries: u32,

    /// Pause between describe-topics attempts
    pub describe_topics_retry_delay: Duration,

    /// Largest `|skew|` a broker may show in a balanced cluster
    pub skew_threshold: i32,
}

impl Default for RebalanceSettings {
    fn default() -> Self {
        Self {
            expected_broker_count: 1,
            all_brokers_start_timeout: Duration::from_secs(600),
            quorum_poll_interval: Duration::from_secs(10),
            topic_reassignment_timeout: Duration::from_secs(300),
            reassignment_poll_interval: Duration::from_secs(2),
            describe_topics_max_retries: 5,
            describe_topics_retry_delay: Duration::from_secs(60),
            skew_threshold: DEFAULT_SKEW_THRESHOLD,
        }
    }
}

impl RebalanceSettings {
    /// Settings for the run that follows scaling a cluster out to
    /// `expected_broker_count` brokers
    pub fn for_scale_out(expected_broker_count: usize) -> Self {
        Self {
            expected_broker_count,
            ..Default::default()
        }
    }

    pub fn with_all_brokers_start_timeout(mut self, timeout: Duration) -> Self {
        self.all_brokers_start_timeout = timeout;
        self
    }

    pub fn with_topic_reassignment_timeout(mut self, timeout: Duration) -> Self {
        self.topic_reassignment_timeout = timeout;
        self
    }

    pub fn with_skew_threshold(mut self, threshold: i32) -> Self {
        self.skew_threshold = threshold;
        self
    }
}

/// Settings for a replication completeness audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Deadline for the whole audit, initial snapshots included
    pub timeout: Duration,

    /// Pause between standby re-checks while partitions are lagging
    pub poll_interval: Duration,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl AuditSettings {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}
