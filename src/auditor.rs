//! Replication completeness check run before a DR switchover.
//!
//! The active and standby clusters are snapshotted concurrently, then the
//! standby is re-polled for the partitions that are behind until it has caught
//! up with the frozen active snapshot. The whole audit races a deadline; an
//! expired deadline is an outcome, not an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::constraints::AuditSettings;
use crate::flow_config::ReplicationFlowConfig;
use crate::models::{TopicName, TopicPartition};
use crate::ports::{PortResult, ReadPort};
use crate::{Error, Result};

/// Message count per partition of one cluster at one point in time
pub type AuditSnapshot = BTreeMap<TopicPartition, i64>;

/// Messages held by a partition, never negative
pub fn message_count(earliest: i64, latest: i64) -> i64 {
    if earliest > latest {
        return 0;
    }
    latest.max(0) - earliest.max(0)
}

/// Topics the cluster maintains for itself and never replicates
pub fn is_internal_topic(topic: &str) -> bool {
    topic.starts_with("__") || topic == "heartbeats"
}

/// Which topics take part in replication
#[derive(Debug, Clone, Default)]
pub struct TopicScope {
    allow: Option<Vec<Regex>>,
    block: Vec<Regex>,
}

impl TopicScope {
    /// Patterns must match the whole topic name. A pattern that does not
    /// compile is logged and never matches.
    pub fn new(allow: Option<&[String]>, block: Option<&[String]>) -> Self {
        Self {
            allow: allow.map(|patterns| compile_all(patterns, "allow")),
            block: block.map(|patterns| compile_all(patterns, "block")).unwrap_or_default(),
        }
    }

    pub fn from_flow(flow: &ReplicationFlowConfig) -> Self {
        let (allow, block) = flow.regular_expressions();
        Self::new(allow, block)
    }

    pub fn contains(&self, topic: &str) -> bool {
        if is_internal_topic(topic) {
            return false;
        }
        if self.block.iter().any(|re| re.is_match(topic)) {
            return false;
        }
        match &self.allow {
            None => true,
            Some(allow) => allow.iter().any(|re| re.is_match(topic)),
        }
    }

    pub fn select(&self, topics: impl IntoIterator<Item = TopicName>) -> Vec<TopicName> {
        topics.into_iter().filter(|topic| self.contains(topic)).collect()
    }
}

fn compile_all(patterns: &[String], list: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => Some(re),
            Err(err) => {
                error!(pattern = %pattern, list, error = %err, "Regular expression is invalid");
                None
            }
        })
        .collect()
}

/// Convenience form of [`TopicScope::contains`] for a one-off check
pub fn is_topic_in_scope(topic: &str, allow: Option<&[String]>, block: Option<&[String]>) -> bool {
    TopicScope::new(allow, block).contains(topic)
}

/// Partitions of `active` that are missing on `standby` or hold more messages
/// there. Values come from `active`.
pub fn flush_out(active: &AuditSnapshot, standby: &AuditSnapshot) -> AuditSnapshot {
    active
        .iter()
        .filter(|(key, count)| standby.get(*key).map_or(true, |standby_count| **count > *standby_count))
        .map(|(key, count)| (key.clone(), *count))
        .collect()
}

fn lagging_topics(lagging: &AuditSnapshot) -> Vec<TopicName> {
    lagging
        .keys()
        .map(|key| key.topic.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Message counts of every partition of `topics`
pub async fn fetch_snapshot(port: &dyn ReadPort, topics: &[TopicName]) -> PortResult<AuditSnapshot> {
    let mut snapshot = AuditSnapshot::new();
    for topic in topics {
        let partitions = port.partitions(topic).await.inspect_err(|err| {
            error!(topic = %topic, error = %err, "can not list partitions for topic");
        })?;
        for partition in partitions {
            let range = port.offsets(topic, partition).await.inspect_err(|err| {
                error!(topic = %topic, partition, error = %err, "can not get offsets for topic partition");
            })?;
            snapshot.insert(
                TopicPartition::new(topic.clone(), partition),
                message_count(range.earliest, range.latest),
            );
        }
    }
    Ok(snapshot)
}

/// How an audit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    /// Standby holds at least as many messages as active for every partition
    Completed,
    /// Replication is disabled for the flow, nothing was checked
    Skipped,
    /// The deadline passed with partitions still behind
    TimedOut,
}

impl AuditOutcome {
    pub fn is_completed(&self) -> bool {
        !matches!(self, AuditOutcome::TimedOut)
    }
}

pub struct ReplicationCompletenessAuditor {
    active: Arc<dyn ReadPort>,
    standby: Arc<dyn ReadPort>,
}

impl ReplicationCompletenessAuditor {
    pub fn new(active: Arc<dyn ReadPort>, standby: Arc<dyn ReadPort>) -> Self {
        Self { active, standby }
    }

    /// Wait until the standby cluster has caught up with the active one.
    ///
    /// Errors from either cluster end the audit early and are returned.
    #[instrument(skip_all, fields(flow = %flow.arrow_pattern))]
    pub async fn check_full_replication(
        &self,
        flow: &ReplicationFlowConfig,
        settings: &AuditSettings,
    ) -> Result<AuditOutcome> {
        info!("Kafka replication auditor started");
        if !flow.replication_enabled {
            warn!("Replication between Kafka clusters is disabled. Switch over replication check will be skipped");
            return Ok(AuditOutcome::Skipped);
        }

        let cancel = CancellationToken::new();
        let mut work = tokio::spawn(audit(
            self.active.clone(),
            self.standby.clone(),
            TopicScope::from_flow(flow),
            settings.poll_interval,
            cancel.clone(),
        ));

        match timeout(settings.timeout, &mut work).await {
            Ok(Ok(Ok(()))) => {
                info!("Replication audit has finished");
                Ok(AuditOutcome::Completed)
            }
            Ok(Ok(Err(err))) => {
                info!(error = %err, "Replication audit has finished with error");
                Err(err.into())
            }
            Ok(Err(join_err)) => Err(Error::Audit(join_err.to_string())),
            Err(_) => {
                cancel.cancel();
                info!("Audit replication is not finished. Timeout is occurred.");
                Ok(AuditOutcome::TimedOut)
            }
        }
    }
}

async fn audit(
    active: Arc<dyn ReadPort>,
    standby: Arc<dyn ReadPort>,
    scope: TopicScope,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> PortResult<()> {
    let topics = active.list_topics().await.inspect_err(|err| {
        error!(error = %err, "can not list Kafka topics from active side");
    })?;
    let topics = scope.select(topics);
    info!(?topics, "check full replication for topics");

    let (active_counts, standby_counts) = tokio::join!(
        fetch_snapshot(active.as_ref(), &topics),
        fetch_snapshot(standby.as_ref(), &topics),
    );
    let mut lagging = flush_out(&active_counts?, &standby_counts?);
    if lagging.is_empty() {
        return Ok(());
    }
    info!(partitions = lagging.len(), "partitions have not been replicated yet");

    while !cancel.is_cancelled() {
        let topics = lagging_topics(&lagging);
        let standby_counts = fetch_snapshot(standby.as_ref(), &topics).await?;
        lagging = flush_out(&lagging, &standby_counts);
        if lagging.is_empty() {
            return Ok(());
        }
        info!(partitions = lagging.len(), ?topics, "have not been replicated partitions");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(poll_interval) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, i32, i64)]) -> AuditSnapshot {
        entries
            .iter()
            .map(|(topic, partition, count)| (TopicPartition::new(*topic, *partition), *count))
            .collect()
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_message_count() {
        assert_eq!(message_count(0, 100), 100);
        assert_eq!(message_count(20, 100), 80);
        assert_eq!(message_count(150, 100), 0);
        assert_eq!(message_count(-1, -1), 0);
        assert_eq!(message_count(-1, 10), 10);
    }

    #[test]
    fn test_flush_out() {
        let active = snapshot(&[("a", 0, 2), ("b", 0, 3), ("c", 0, 1), ("d", 0, 2)]);
        let standby = snapshot(&[("a", 0, 2), ("b", 0, 3), ("c", 0, 1)]);
        assert_eq!(flush_out(&active, &standby), snapshot(&[("d", 0, 2)]));

        let behind = snapshot(&[("a", 0, 1), ("b", 0, 5), ("c", 0, 0), ("d", 0, 2)]);
        assert_eq!(
            flush_out(&active, &behind),
            snapshot(&[("a", 0, 2), ("c", 0, 1)])
        );

        assert!(flush_out(&active, &active).is_empty());
        assert!(flush_out(&AuditSnapshot::new(), &standby).is_empty());
    }

    #[test]
    fn test_lagging_topics_deduplicated() {
        let lagging = snapshot(&[("orders", 0, 1), ("orders", 2, 1), ("audit-log", 1, 4)]);
        assert_eq!(lagging_topics(&lagging), vec!["audit-log", "orders"]);
    }

    #[test]
    fn test_internal_topics_excluded() {
        let scope = TopicScope::default();
        assert!(!scope.contains("__consumer_offsets"));
        assert!(!scope.contains("heartbeats"));
        assert!(scope.contains("heartbeats-dc1"));
        assert!(scope.contains("orders"));
    }

    #[test]
    fn test_block_list_wins() {
        let allow = patterns(&["orders.*"]);
        let block = patterns(&["orders-internal"]);
        let scope = TopicScope::new(Some(&allow), Some(&block));
        assert!(scope.contains("orders"));
        assert!(scope.contains("orders-eu"));
        assert!(!scope.contains("orders-internal"));
        assert!(!scope.contains("payments"));
    }

    #[test]
    fn test_patterns_are_anchored() {
        let block = patterns(&["dc2", "a|b"]);
        let scope = TopicScope::new(None, Some(&block));
        assert!(!scope.contains("dc2"));
        assert!(scope.contains("dc2.orders"));
        assert!(scope.contains("my-dc2"));
        assert!(!scope.contains("a"));
        assert!(scope.contains("ab"));
    }

    #[test]
    fn test_empty_allow_list_allows_nothing() {
        let allow: Vec<String> = Vec::new();
        assert!(!is_topic_in_scope("orders", Some(&allow), None));
        assert!(is_topic_in_scope("orders", None, None));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty_name() {
        let empty = patterns(&[""]);
        assert!(is_topic_in_scope("orders", None, Some(&empty)));
        assert!(!is_topic_in_scope("orders", Some(&empty), None));
        assert!(is_topic_in_scope("", Some(&empty), None));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        let broken = patterns(&["orders(", "payments"]);
        assert!(is_topic_in_scope("orders(", None, Some(&broken)));
        assert!(!is_topic_in_scope("payments", None, Some(&broken)));
        assert!(!is_topic_in_scope("orders(", Some(&broken), None));
        assert!(is_topic_in_scope("payments", Some(&broken), None));
    }

    #[test]
    fn test_outcome_completion() {
        assert!(AuditOutcome::Completed.is_completed());
        assert!(AuditOutcome::Skipped.is_completed());
        assert!(!AuditOutcome::TimedOut.is_completed());
    }
}
