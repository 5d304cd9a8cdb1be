//! In-memory clusters shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use kafka_ops_core::models::{
    BrokerId, BrokerNode, ClusterDescription, PartitionId, PartitionMetadata, TopicName,
};
use kafka_ops_core::ports::PortResult;
use kafka_ops_core::{AdminPort, ConnectionError, OffsetRange, ReadPort, ReplicaAssignment, TopicInfo};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Topic with partitions `0..` placed on the given replica lists
pub fn topic(name: &str, assignment: &[&[BrokerId]]) -> TopicInfo {
    TopicInfo::new(
        name,
        assignment
            .iter()
            .enumerate()
            .map(|(i, replicas)| PartitionMetadata::new(i as PartitionId, replicas.to_vec()))
            .collect(),
    )
}

/// `partitions` partitions with replication factor 3 spread over brokers 1..=3
pub fn three_broker_topic(name: &str, partitions: usize) -> TopicInfo {
    let lists: Vec<Vec<BrokerId>> = (0..partitions)
        .map(|p| {
            let first = (p % 3) as BrokerId;
            (0..3).map(|r| (first + r) % 3 + 1).collect()
        })
        .collect();
    let refs: Vec<&[BrokerId]> = lists.iter().map(Vec::as_slice).collect();
    topic(name, &refs)
}

#[derive(Debug, Default)]
pub struct AdminState {
    pub brokers: Vec<BrokerNode>,
    pub controller_id: Option<BrokerId>,
    pub topics: BTreeMap<TopicName, TopicInfo>,

    /// The last `late_brokers` brokers stay invisible for the first
    /// `late_after_calls` describe-cluster calls
    pub late_brokers: usize,
    pub late_after_calls: usize,

    /// Describe-topics calls that fail before one succeeds
    pub describe_topics_failures: u32,
    pub fail_list_topics: bool,
    /// Topics whose reassignment request is rejected
    pub rejected_topics: HashSet<TopicName>,
    /// Topics whose reassignment never completes
    pub stuck_topics: HashSet<TopicName>,

    pub describe_cluster_calls: usize,
    pub describe_topics_calls: u32,
    pub list_reassignment_calls: usize,
    pub alter_calls: Vec<(TopicName, ReplicaAssignment)>,
}

/// Admin port over an in-memory cluster. Accepted reassignments are applied
/// to the topic metadata immediately.
#[derive(Default)]
pub struct FakeAdmin {
    pub state: Mutex<AdminState>,
}

impl FakeAdmin {
    pub fn new(broker_count: i32, topics: Vec<TopicInfo>) -> Arc<Self> {
        Self::with_racks(&vec![None; broker_count as usize], topics)
    }

    pub fn with_racks(racks: &[Option<&str>], topics: Vec<TopicInfo>) -> Arc<Self> {
        let brokers = racks
            .iter()
            .enumerate()
            .map(|(i, rack)| BrokerNode::new(i as BrokerId + 1, rack.map(String::from)))
            .collect();
        let state = AdminState {
            brokers,
            controller_id: Some(1),
            topics: topics.into_iter().map(|t| (t.name.clone(), t)).collect(),
            ..Default::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut AdminState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn alter_calls(&self) -> Vec<(TopicName, ReplicaAssignment)> {
        self.state.lock().unwrap().alter_calls.clone()
    }

    pub fn topic(&self, name: &str) -> TopicInfo {
        self.state.lock().unwrap().topics[name].clone()
    }

    /// Partitions led per broker id
    pub fn leader_counts(&self) -> BTreeMap<BrokerId, usize> {
        let state = self.state.lock().unwrap();
        let mut counts: BTreeMap<BrokerId, usize> =
            state.brokers.iter().map(|b| (b.id, 0)).collect();
        for topic in state.topics.values() {
            for leader in topic.partitions.values().filter_map(|p| p.leader) {
                *counts.entry(leader).or_default() += 1;
            }
        }
        counts
    }
}

#[async_trait]
impl AdminPort for FakeAdmin {
    async fn describe_cluster(&self) -> PortResult<ClusterDescription> {
        let mut state = self.state.lock().unwrap();
        state.describe_cluster_calls += 1;
        let visible = if state.describe_cluster_calls <= state.late_after_calls {
            state.brokers.len() - state.late_brokers
        } else {
            state.brokers.len()
        };
        Ok(ClusterDescription::new(
            state.brokers[..visible].to_vec(),
            state.controller_id,
        ))
    }

    async fn list_topics(&self) -> PortResult<Vec<TopicName>> {
        let state = self.state.lock().unwrap();
        if state.fail_list_topics {
            return Err(ConnectionError::request("list topics", "broker not available"));
        }
        Ok(state.topics.keys().rev().cloned().collect())
    }

    async fn describe_topics(&self, topics: &[TopicName]) -> PortResult<Vec<TopicInfo>> {
        let mut state = self.state.lock().unwrap();
        state.describe_topics_calls += 1;
        if state.describe_topics_failures > 0 {
            state.describe_topics_failures -= 1;
            return Err(ConnectionError::request("describe topics", "leader not available"));
        }
        Ok(topics
            .iter()
            .filter_map(|name| state.topics.get(name).cloned())
            .collect())
    }

    async fn alter_partition_reassignments(
        &self,
        topic: &str,
        assignment: &ReplicaAssignment,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        state.alter_calls.push((topic.to_string(), assignment.clone()));
        if state.rejected_topics.contains(topic) {
            return Err(ConnectionError::request(
                "alter partition reassignments",
                "invalid replica assignment",
            ));
        }
        let partitions = assignment
            .iter()
            .map(|(p, replicas)| PartitionMetadata::new(p, replicas.to_vec()))
            .collect();
        state
            .topics
            .insert(topic.to_string(), TopicInfo::new(topic, partitions));
        Ok(())
    }

    async fn list_partition_reassignments(
        &self,
        topic: &str,
        partitions: &[PartitionId],
    ) -> PortResult<Vec<PartitionId>> {
        let mut state = self.state.lock().unwrap();
        state.list_reassignment_calls += 1;
        if state.stuck_topics.contains(topic) {
            return Ok(partitions.to_vec());
        }
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct ReaderState {
    /// Offset ranges per partition; each offsets call takes the next range
    /// and the last one repeats
    pub partitions: BTreeMap<TopicName, BTreeMap<PartitionId, VecDeque<OffsetRange>>>,
    pub failing_offsets: Option<ConnectionError>,
    pub list_topics_calls: usize,
    pub partitions_calls: Vec<TopicName>,
    pub offsets_calls: usize,
}

/// Read port over in-memory offsets
#[derive(Default)]
pub struct FakeReader {
    pub state: Mutex<ReaderState>,
}

impl FakeReader {
    /// `latest` offset per partition, all starting at offset 0
    pub fn new(topics: &[(&str, &[i64])]) -> Arc<Self> {
        let reader = Self::default();
        for (name, latest) in topics {
            for (partition, latest) in latest.iter().enumerate() {
                reader.script(name, partition as PartitionId, &[OffsetRange::new(0, *latest)]);
            }
        }
        Arc::new(reader)
    }

    /// Successive offset ranges returned for one partition
    pub fn script(&self, topic: &str, partition: PartitionId, ranges: &[OffsetRange]) {
        self.state
            .lock()
            .unwrap()
            .partitions
            .entry(topic.to_string())
            .or_default()
            .insert(partition, ranges.iter().copied().collect());
    }

    pub fn fail_offsets(&self, err: ConnectionError) {
        self.state.lock().unwrap().failing_offsets = Some(err);
    }

    pub fn partitions_calls(&self) -> Vec<TopicName> {
        self.state.lock().unwrap().partitions_calls.clone()
    }

    pub fn offsets_calls(&self) -> usize {
        self.state.lock().unwrap().offsets_calls
    }
}

#[async_trait]
impl ReadPort for FakeReader {
    async fn list_topics(&self) -> PortResult<Vec<TopicName>> {
        let mut state = self.state.lock().unwrap();
        state.list_topics_calls += 1;
        Ok(state.partitions.keys().cloned().collect())
    }

    async fn partitions(&self, topic: &str) -> PortResult<Vec<PartitionId>> {
        let mut state = self.state.lock().unwrap();
        state.partitions_calls.push(topic.to_string());
        Ok(state
            .partitions
            .get(topic)
            .map(|p| p.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn offsets(&self, topic: &str, partition: PartitionId) -> PortResult<OffsetRange> {
        let mut state = self.state.lock().unwrap();
        state.offsets_calls += 1;
        if let Some(err) = &state.failing_offsets {
            return Err(err.clone());
        }
        let ranges = state
            .partitions
            .get_mut(topic)
            .and_then(|p| p.get_mut(&partition))
            .ok_or_else(|| ConnectionError::request("fetch offsets", "unknown topic partition"))?;
        let range = if ranges.len() > 1 {
            ranges.pop_front()
        } else {
            ranges.front().copied()
        };
        range.ok_or_else(|| ConnectionError::request("fetch offsets", "no offsets"))
    }
}
