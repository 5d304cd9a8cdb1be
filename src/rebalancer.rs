//! Partition rebalancing after a broker-count change.
//!
//! One run waits for the expected brokers to be up, builds a load model from
//! the topic metadata and then walks the topics one at a time, committing a
//! new assignment per topic and waiting for the cluster to apply it. The run
//! stops as soon as every broker's skew is within the threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::actions::{PlanSummary, TopicReassignmentPlan};
use crate::constraints::RebalanceSettings;
use crate::models::{BrokerId, ClusterDescription, ClusterModel, TopicInfo, TopicName};
use crate::optimizer::Optimizer;
use crate::ports::AdminPort;
use crate::skew;
use crate::{Error, Result};

/// A topic whose reassignment could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFailure {
    pub topic: TopicName,
    pub message: String,
}

/// What one rebalance run did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub controller_id: Option<BrokerId>,
    pub racks_enabled: bool,
    pub initially_balanced: bool,
    pub balanced: bool,
    /// Committed topics, in processing order
    pub plans: Vec<PlanSummary>,
    pub failures: Vec<TopicFailure>,
    /// Set when topic metadata could not be described and the run degraded
    pub describe_topics_error: Option<String>,
    pub final_partition_counts: Vec<(BrokerId, i64)>,
}

impl RebalanceReport {
    fn new(started_at: DateTime<Utc>, model: &ClusterModel, threshold: i32) -> Self {
        let balanced = model.is_balanced(threshold);
        Self {
            started_at,
            finished_at: started_at,
            controller_id: model.controller_id,
            racks_enabled: model.racks_enabled,
            initially_balanced: balanced,
            balanced,
            plans: Vec::new(),
            failures: Vec::new(),
            describe_topics_error: None,
            final_partition_counts: model.partition_counts(),
        }
    }

    fn finish(mut self, model: &ClusterModel, threshold: i32) -> Self {
        self.finished_at = Utc::now();
        self.balanced = model.is_balanced(threshold);
        self.final_partition_counts = model.partition_counts();
        self
    }

    pub fn total_moves(&self) -> usize {
        self.plans.iter().map(|p| p.total_moves).sum()
    }
}

pub struct PartitionRebalancer {
    admin: Arc<dyn AdminPort>,
    settings: RebalanceSettings,
}

impl PartitionRebalancer {
    pub fn new(admin: Arc<dyn AdminPort>, settings: RebalanceSettings) -> Self {
        Self { admin, settings }
    }

    pub fn settings(&self) -> &RebalanceSettings {
        &self.settings
    }

    /// Run one rebalance pass over every topic of the cluster.
    ///
    /// Only a quorum timeout or a failure to list topics aborts the run.
    /// Metadata and per-topic failures are logged and recorded in the report.
    #[instrument(skip(self), fields(expected_brokers = self.settings.expected_broker_count))]
    pub async fn run(&self) -> Result<RebalanceReport> {
        let started_at = Utc::now();
        let threshold = self.settings.skew_threshold;

        let description = self.await_quorum().await?;

        let mut names = self.admin.list_topics().await?;
        names.sort();

        let (mut topics, describe_topics_error) = match self.describe_topics_with_retry(&names).await {
            Ok(topics) => (topics, None),
            Err(err) => {
                error!(error = %err, "Maximum attempts exceeded when trying to describe topics");
                (Vec::new(), Some(err.to_string()))
            }
        };
        topics.sort_by(|a, b| a.name.cmp(&b.name));

        let mut model = ClusterModel::new(&description, &topics);
        for broker in &model.brokers {
            debug!(
                broker_id = broker.id,
                partitions_count = broker.partitions_count,
                skew = broker.skew,
                rack = %broker.rack,
                "Broker load"
            );
        }
        info!(global_partition_count = model.global_partition_count, "Load model built");

        let mut report = RebalanceReport::new(started_at, &model, threshold);
        report.describe_topics_error = describe_topics_error;

        if report.initially_balanced {
            info!("Partitions are evenly distributed between all brokers.");
            return Ok(report.finish(&model, threshold));
        }

        for broker in skew::skewed_brokers(&model.brokers, threshold) {
            info!(broker_id = broker.id, skew = broker.skew, "Broker is out of balance");
        }

        let total = topics.len();
        for (i, topic) in topics.iter().enumerate() {
            info!(
                "{} of {}: Trying to reassign partitions for topic {}...",
                i + 1,
                total,
                topic.name
            );

            match self.rebalance_topic(&mut model, topic).await {
                Ok(plan) if !plan.is_empty() => report.plans.push(plan.summary()),
                Ok(_) => {}
                Err(err) => {
                    error!(topic = %topic.name, error = %err, "Cannot reassign partitions for topic");
                    report.failures.push(TopicFailure {
                        topic: topic.name.clone(),
                        message: err.to_string(),
                    });
                }
            }

            model.recompute_skew();
            if model.is_balanced(threshold) {
                info!("Partitions are evenly distributed between all brokers.");
                break;
            }
        }

        let report = report.finish(&model, threshold);
        info!(
            moves = report.total_moves(),
            failures = report.failures.len(),
            balanced = report.balanced,
            "Partitions reassignment finished"
        );
        Ok(report)
    }

    /// Poll the broker list until `expected_broker_count` brokers are live
    pub async fn await_quorum(&self) -> Result<ClusterDescription> {
        let expected = self.settings.expected_broker_count;
        let deadline = Instant::now() + self.settings.all_brokers_start_timeout;
        let mut live = 0;

        info!("Waiting for all brokers are up...");
        loop {
            match self.admin.describe_cluster().await {
                Ok(description) => {
                    live = description.brokers.len();
                    if live >= expected {
                        info!(
                            brokers = live,
                            controller_id = ?description.controller_id,
                            racks_enabled = description.racks_enabled(),
                            "Brokers are up"
                        );
                        return Ok(description);
                    }
                    debug!(live, expected, "Not all brokers are up yet");
                }
                Err(err) => error!(error = %err, "cannot get active brokers"),
            }

            sleep(self.settings.quorum_poll_interval).await;
            if Instant::now() >= deadline {
                return Err(Error::QuorumTimeout { expected, live });
            }
        }
    }

    async fn describe_topics_with_retry(&self, names: &[TopicName]) -> Result<Vec<TopicInfo>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.admin.describe_topics(names).await {
                Ok(topics) => return Ok(topics),
                Err(source) if attempt > self.settings.describe_topics_max_retries => {
                    return Err(Error::DescribeTopics {
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Describe topics failed, retrying");
                    sleep(self.settings.describe_topics_retry_delay).await;
                }
            }
        }
    }

    /// Plan, commit and wait for one topic.
    ///
    /// `model` only takes the planned moves once the cluster accepted the new
    /// assignment.
    pub async fn rebalance_topic(
        &self,
        model: &mut ClusterModel,
        topic: &TopicInfo,
    ) -> Result<TopicReassignmentPlan> {
        let mut candidate = model.clone();
        let plan = Optimizer::plan_topic(&mut candidate, topic);

        if plan.is_empty() {
            debug!(topic = %topic.name, "No replica moves for topic");
            return Ok(plan);
        }

        info!(
            topic = %topic.name,
            current = %topic.assignment(),
            new = %plan.assignment,
            "New assignment for topic"
        );
        self.admin
            .alter_partition_reassignments(&topic.name, &plan.assignment)
            .await
            .map_err(|source| Error::Reassign {
                topic: topic.name.clone(),
                source,
            })?;
        *model = candidate;

        self.wait_for_reassignment(topic).await;
        Ok(plan)
    }

    /// Returns `false` when the timeout expired with moves still pending
    async fn wait_for_reassignment(&self, topic: &TopicInfo) -> bool {
        let partitions = topic.partition_ids();
        let deadline = Instant::now() + self.settings.topic_reassignment_timeout;

        loop {
            match self
                .admin
                .list_partition_reassignments(&topic.name, &partitions)
                .await
            {
                Ok(pending) if pending.is_empty() => return true,
                Ok(pending) => debug!(topic = %topic.name, pending = pending.len(), "Reassignment in progress"),
                Err(err) => warn!(topic = %topic.name, error = %err, "Cannot list partition reassignments"),
            }

            sleep(self.settings.reassignment_poll_interval).await;
            if Instant::now() >= deadline {
                warn!(topic = %topic.name, "Reassignment did not finish before the timeout");
                return false;
            }
        }
    }
}
