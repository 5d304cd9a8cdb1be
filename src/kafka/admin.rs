//! Admin port over the Kafka wire protocol.
//!
//! Cluster and topic metadata come from a bootstrap broker. Reassignment
//! requests go to the broker the cluster reports as controller; on KRaft
//! clusters that is any live broker, which forwards them.

use async_trait::async_trait;
use kafka_protocol::messages::alter_partition_reassignments_request::{
    ReassignablePartition, ReassignableTopic,
};
use kafka_protocol::messages::list_partition_reassignments_request::ListPartitionReassignmentsTopics;
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{
    AlterPartitionReassignmentsRequest, AlterPartitionReassignmentsResponse, BrokerId as WireBrokerId,
    DescribeClusterRequest, DescribeClusterResponse, ListPartitionReassignmentsRequest,
    ListPartitionReassignmentsResponse, MetadataRequest, MetadataResponse, TopicName as WireTopicName,
};
use kafka_protocol::protocol::{Request, StrBytes};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::wire::{self, error_codes, BrokerChannel};
use crate::connection::{ClusterConnection, ConnectionError};
use crate::models::{
    BrokerNode, ClusterDescription, PartitionId, PartitionMetadata, ReplicaAssignment, TopicInfo,
    TopicName,
};
use crate::ports::{AdminPort, PortResult};

const DESCRIBE_CLUSTER_VERSION: i16 = 0;
const METADATA_VERSION: i16 = 4;
const ALTER_REASSIGNMENTS_VERSION: i16 = 0;
const LIST_REASSIGNMENTS_VERSION: i16 = 0;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KafkaAdmin {
    connection: ClusterConnection,
    tls: Option<TlsConnector>,
    request_timeout: Duration,
    bootstrap: Mutex<Option<BrokerChannel>>,
    controller: Mutex<Option<BrokerChannel>>,
}

impl KafkaAdmin {
    /// Open and authenticate a session with the first reachable bootstrap
    /// server
    pub async fn connect(connection: &ClusterConnection) -> Result<Self, ConnectionError> {
        Self::connect_with_timeout(connection, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        connection: &ClusterConnection,
        request_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let tls = connection.tls().map(wire::tls_connector).transpose()?;
        let admin = Self {
            connection: connection.clone(),
            tls,
            request_timeout,
            bootstrap: Mutex::new(None),
            controller: Mutex::new(None),
        };

        let channel = admin.open_bootstrap().await?;
        info!(
            broker = channel.address(),
            security_protocol = connection.security_protocol(),
            "Kafka admin session opened"
        );
        *admin.bootstrap.lock().await = Some(channel);
        Ok(admin)
    }

    async fn open(&self, address: &str) -> PortResult<BrokerChannel> {
        timeout(
            self.request_timeout,
            BrokerChannel::open(address, &self.connection, self.tls.as_ref()),
        )
        .await
        .map_err(|_| ConnectionError::Connection {
            brokers: address.to_string(),
            message: format!("no connection within {:?}", self.request_timeout),
        })?
    }

    /// Bootstrap servers are tried in order. Credential and TLS failures
    /// stop the search.
    async fn open_bootstrap(&self) -> PortResult<BrokerChannel> {
        let mut last_error = None;
        for address in self.connection.bootstrap_servers() {
            match self.open(address).await {
                Ok(channel) => return Ok(channel),
                Err(err @ (ConnectionError::Auth(_) | ConnectionError::TlsConfig(_))) => return Err(err),
                Err(err) => {
                    warn!(address = %address, error = %err, "Bootstrap server unreachable");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ConnectionError::Connection {
            brokers: self.connection.bootstrap_servers().join(","),
            message: "no bootstrap server reachable".to_string(),
        }))
    }

    /// A channel that fails or times out mid-request is dropped; the next
    /// call opens a fresh one.
    async fn send_on<Req: Request>(
        &self,
        slot: &mut Option<BrokerChannel>,
        operation: &str,
        request: &Req,
        version: i16,
    ) -> PortResult<Req::Response> {
        let channel = slot
            .as_mut()
            .ok_or_else(|| ConnectionError::request(operation, "no broker connection"))?;
        let address = channel.address().to_string();
        let result = timeout(self.request_timeout, channel.send(operation, request, version))
            .await
            .unwrap_or_else(|_| {
                Err(ConnectionError::request(
                    operation,
                    format!("no response from {address} within {:?}", self.request_timeout),
                ))
            });
        if result.is_err() {
            *slot = None;
        }
        result
    }

    async fn send_bootstrap<Req: Request>(
        &self,
        operation: &str,
        request: &Req,
        version: i16,
    ) -> PortResult<Req::Response> {
        let mut slot = self.bootstrap.lock().await;
        if slot.is_none() {
            *slot = Some(self.open_bootstrap().await?);
        }
        self.send_on(&mut slot, operation, request, version).await
    }

    async fn send_controller<Req: Request>(
        &self,
        operation: &str,
        request: &Req,
        version: i16,
    ) -> PortResult<Req::Response> {
        let mut slot = self.controller.lock().await;
        if slot.is_none() {
            let address = controller_address(&self.describe_cluster_response().await?)?;
            *slot = Some(self.open(&address).await?);
        }
        self.send_on(&mut slot, operation, request, version).await
    }

    async fn forget_controller(&self) {
        self.controller.lock().await.take();
    }

    async fn describe_cluster_response(&self) -> PortResult<DescribeClusterResponse> {
        let response: DescribeClusterResponse = self
            .send_bootstrap("describe cluster", &DescribeClusterRequest::default(), DESCRIBE_CLUSTER_VERSION)
            .await?;
        wire::check("describe cluster", response.error_code, response.error_message.as_ref())?;
        Ok(response)
    }

    async fn metadata(&self, operation: &str, topics: Option<&[TopicName]>) -> PortResult<MetadataResponse> {
        let topics = topics.map(|names| {
            names
                .iter()
                .map(|name| MetadataRequestTopic::default().with_name(Some(wire_topic(name))))
                .collect()
        });
        let request = MetadataRequest::default()
            .with_topics(topics)
            .with_allow_auto_topic_creation(false);
        self.send_bootstrap(operation, &request, METADATA_VERSION).await
    }
}

fn wire_topic(name: &str) -> WireTopicName {
    WireTopicName(StrBytes::from_string(name.to_string()))
}

fn controller_address(response: &DescribeClusterResponse) -> PortResult<String> {
    response
        .brokers
        .iter()
        .find(|broker| broker.broker_id == response.controller_id)
        .map(|broker| format!("{}:{}", broker.host, broker.port))
        .ok_or_else(|| {
            ConnectionError::request(
                "find controller",
                format!("controller {} is not among the live brokers", response.controller_id.0),
            )
        })
}

fn cluster_description(response: &DescribeClusterResponse) -> ClusterDescription {
    let brokers = response
        .brokers
        .iter()
        .map(|broker| {
            BrokerNode::new(
                broker.broker_id.0,
                broker.rack.as_ref().map(|rack| rack.to_string()),
            )
        })
        .collect();
    let controller_id = Some(response.controller_id.0).filter(|id| *id >= 0);
    ClusterDescription::new(brokers, controller_id)
}

/// Topics the broker does not know are left out, any other topic error
/// fails the whole call
fn topics_from_metadata(response: &MetadataResponse) -> PortResult<Vec<TopicInfo>> {
    let mut topics = Vec::with_capacity(response.topics.len());
    for topic in &response.topics {
        let Some(name) = &topic.name else { continue };
        match topic.error_code {
            error_codes::UNKNOWN_TOPIC_OR_PARTITION => continue,
            code => wire::check(&format!("describe topic {}", name.0), code, None)?,
        }
        let partitions = topic
            .partitions
            .iter()
            .map(|partition| {
                let replicas = partition.replica_nodes.iter().map(|id| id.0).collect();
                let mut metadata = PartitionMetadata::new(partition.partition_index, replicas);
                metadata.leader = Some(partition.leader_id.0).filter(|id| *id >= 0);
                metadata
            })
            .collect();
        topics.push(TopicInfo::new(name.0.to_string(), partitions));
    }
    Ok(topics)
}

fn topic_names(response: &MetadataResponse) -> Vec<TopicName> {
    response
        .topics
        .iter()
        .filter(|topic| topic.error_code == error_codes::NONE)
        .filter_map(|topic| topic.name.as_ref().map(|name| name.0.to_string()))
        .collect()
}

fn reassignment_request(
    topic: &str,
    assignment: &ReplicaAssignment,
    request_timeout: Duration,
) -> AlterPartitionReassignmentsRequest {
    let partitions = assignment
        .iter()
        .map(|(partition, replicas)| {
            ReassignablePartition::default()
                .with_partition_index(partition)
                .with_replicas(Some(replicas.iter().map(|&id| WireBrokerId(id)).collect()))
        })
        .collect();
    AlterPartitionReassignmentsRequest::default()
        .with_timeout_ms(request_timeout.as_millis().min(i32::MAX as u128) as i32)
        .with_topics(vec![ReassignableTopic::default()
            .with_name(wire_topic(topic))
            .with_partitions(partitions)])
}

/// The first rejected partition fails the whole topic
fn check_reassignment(topic: &str, response: &AlterPartitionReassignmentsResponse) -> PortResult<()> {
    wire::check(
        "alter partition reassignments",
        response.error_code,
        response.error_message.as_ref(),
    )?;
    for partition in response.responses.iter().flat_map(|t| &t.partitions) {
        wire::check(
            &format!("reassign {}-{}", topic, partition.partition_index),
            partition.error_code,
            partition.error_message.as_ref(),
        )?;
    }
    Ok(())
}

fn pending_partitions(
    topic: &str,
    partitions: &[PartitionId],
    response: &ListPartitionReassignmentsResponse,
) -> PortResult<Vec<PartitionId>> {
    wire::check(
        "list partition reassignments",
        response.error_code,
        response.error_message.as_ref(),
    )?;
    let wanted = wire_topic(topic);
    let mut pending: Vec<PartitionId> = response
        .topics
        .iter()
        .filter(|t| t.name == wanted)
        .flat_map(|t| t.partitions.iter().map(|p| p.partition_index))
        .filter(|p| partitions.contains(p))
        .collect();
    pending.sort_unstable();
    Ok(pending)
}

/// The request reached a broker that no longer coordinates reassignments
fn moved_controller(response: &AlterPartitionReassignmentsResponse) -> bool {
    response.error_code == error_codes::NOT_CONTROLLER
        || response
            .responses
            .iter()
            .flat_map(|t| &t.partitions)
            .any(|p| p.error_code == error_codes::NOT_CONTROLLER)
}

#[async_trait]
impl AdminPort for KafkaAdmin {
    async fn describe_cluster(&self) -> PortResult<ClusterDescription> {
        let response = self.describe_cluster_response().await?;
        let description = cluster_description(&response);
        debug!(
            brokers = description.brokers.len(),
            controller_id = ?description.controller_id,
            "Cluster described"
        );
        Ok(description)
    }

    async fn list_topics(&self) -> PortResult<Vec<TopicName>> {
        let response = self.metadata("list topics", None).await?;
        Ok(topic_names(&response))
    }

    async fn describe_topics(&self, topics: &[TopicName]) -> PortResult<Vec<TopicInfo>> {
        let response = self.metadata("describe topics", Some(topics)).await?;
        let described = topics_from_metadata(&response)?;
        debug!(requested = topics.len(), described = described.len(), "Topics described");
        Ok(described)
    }

    async fn alter_partition_reassignments(
        &self,
        topic: &str,
        assignment: &ReplicaAssignment,
    ) -> PortResult<()> {
        let request = reassignment_request(topic, assignment, self.request_timeout);
        let response = self
            .send_controller("alter partition reassignments", &request, ALTER_REASSIGNMENTS_VERSION)
            .await?;
        if moved_controller(&response) {
            self.forget_controller().await;
        }
        check_reassignment(topic, &response)
    }

    async fn list_partition_reassignments(
        &self,
        topic: &str,
        partitions: &[PartitionId],
    ) -> PortResult<Vec<PartitionId>> {
        let request = ListPartitionReassignmentsRequest::default()
            .with_timeout_ms(self.request_timeout.as_millis().min(i32::MAX as u128) as i32)
            .with_topics(Some(vec![ListPartitionReassignmentsTopics::default()
                .with_name(wire_topic(topic))
                .with_partition_indexes(partitions.to_vec())]));
        let response = self
            .send_controller("list partition reassignments", &request, LIST_REASSIGNMENTS_VERSION)
            .await?;
        if response.error_code == error_codes::NOT_CONTROLLER {
            self.forget_controller().await;
        }
        pending_partitions(topic, partitions, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_protocol::messages::alter_partition_reassignments_response::{
        ReassignablePartitionResponse, ReassignableTopicResponse,
    };
    use kafka_protocol::messages::describe_cluster_response::DescribeClusterBroker;
    use kafka_protocol::messages::list_partition_reassignments_response::{
        OngoingPartitionReassignment, OngoingTopicReassignment,
    };
    use kafka_protocol::messages::metadata_response::{MetadataResponsePartition, MetadataResponseTopic};

    fn broker(id: i32, rack: Option<&'static str>) -> DescribeClusterBroker {
        DescribeClusterBroker::default()
            .with_broker_id(WireBrokerId(id))
            .with_host(StrBytes::from_string(format!("kafka-{id}.kafka")))
            .with_port(9092)
            .with_rack(rack.map(StrBytes::from_static_str))
    }

    #[test]
    fn test_cluster_description_keeps_racks_and_controller() {
        let response = DescribeClusterResponse::default()
            .with_controller_id(WireBrokerId(2))
            .with_brokers(vec![broker(1, Some("zone-a")), broker(2, Some("zone-b")), broker(3, None)]);

        let description = cluster_description(&response);
        assert_eq!(description.controller_id, Some(2));
        assert!(description.racks_enabled());
        assert_eq!(description.brokers[0], BrokerNode::new(1, Some("zone-a".to_string())));
        assert_eq!(description.brokers[2], BrokerNode::new(3, None));
        assert_eq!(controller_address(&response).unwrap(), "kafka-2.kafka:9092");

        let leaderless = response.with_controller_id(WireBrokerId(-1));
        assert_eq!(cluster_description(&leaderless).controller_id, None);
        assert!(controller_address(&leaderless).is_err());
    }

    fn partition(index: i32, leader: i32, replicas: &[i32]) -> MetadataResponsePartition {
        MetadataResponsePartition::default()
            .with_partition_index(index)
            .with_leader_id(WireBrokerId(leader))
            .with_replica_nodes(replicas.iter().map(|&id| WireBrokerId(id)).collect())
    }

    #[test]
    fn test_topics_from_metadata() {
        let response = MetadataResponse::default().with_topics(vec![
            MetadataResponseTopic::default()
                .with_name(Some(wire_topic("orders")))
                .with_partitions(vec![partition(0, 2, &[1, 2, 3]), partition(1, -1, &[2, 3, 1])]),
            MetadataResponseTopic::default()
                .with_name(Some(wire_topic("deleted")))
                .with_error_code(error_codes::UNKNOWN_TOPIC_OR_PARTITION),
        ]);

        let topics = topics_from_metadata(&response).unwrap();
        assert_eq!(topics.len(), 1);
        let orders = &topics[0];
        assert_eq!(orders.name, "orders");
        assert_eq!(orders.replication_factor, 3);
        assert_eq!(orders.partitions[&0].leader, Some(2));
        assert_eq!(orders.partitions[&0].replicas, vec![1, 2, 3]);
        assert_eq!(orders.partitions[&1].leader, None);
        assert_eq!(topic_names(&response), vec!["orders".to_string()]);

        let denied = MetadataResponse::default().with_topics(vec![MetadataResponseTopic::default()
            .with_name(Some(wire_topic("orders")))
            .with_error_code(error_codes::TOPIC_AUTHORIZATION_FAILED)]);
        assert!(matches!(topics_from_metadata(&denied), Err(ConnectionError::Auth(_))));
    }

    #[test]
    fn test_reassignment_request_carries_full_assignment() {
        let mut assignment = ReplicaAssignment::new();
        assignment.insert(0, vec![4, 2, 3]);
        assignment.insert(1, vec![2, 3, 1]);

        let request = reassignment_request("orders", &assignment, Duration::from_secs(30));
        assert_eq!(request.timeout_ms, 30_000);
        assert_eq!(request.topics.len(), 1);
        let topic = &request.topics[0];
        assert_eq!(topic.name, wire_topic("orders"));
        let sent: Vec<(i32, Vec<i32>)> = topic
            .partitions
            .iter()
            .map(|p| {
                let replicas = p.replicas.as_ref().unwrap().iter().map(|id| id.0).collect();
                (p.partition_index, replicas)
            })
            .collect();
        assert_eq!(sent, vec![(0, vec![4, 2, 3]), (1, vec![2, 3, 1])]);
    }

    #[test]
    fn test_rejected_partition_fails_topic() {
        let response = AlterPartitionReassignmentsResponse::default().with_responses(vec![
            ReassignableTopicResponse::default()
                .with_name(wire_topic("orders"))
                .with_partitions(vec![
                    ReassignablePartitionResponse::default().with_partition_index(0),
                    ReassignablePartitionResponse::default()
                        .with_partition_index(1)
                        .with_error_code(39)
                        .with_error_message(Some(StrBytes::from_static_str("Replica assignment is invalid"))),
                ]),
        ]);

        let err = check_reassignment("orders", &response).unwrap_err();
        assert!(matches!(
            &err,
            ConnectionError::Request { operation, message }
                if operation == "reassign orders-1" && message.starts_with("Replica assignment is invalid")
        ));
        assert!(!moved_controller(&response));

        let moved = AlterPartitionReassignmentsResponse::default()
            .with_error_code(error_codes::NOT_CONTROLLER);
        assert!(moved_controller(&moved));
        assert!(check_reassignment("orders", &moved).is_err());
    }

    #[test]
    fn test_pending_partitions_filtered_to_request() {
        let ongoing = |index| OngoingPartitionReassignment::default().with_partition_index(index);
        let response = ListPartitionReassignmentsResponse::default().with_topics(vec![
            OngoingTopicReassignment::default()
                .with_name(wire_topic("orders"))
                .with_partitions(vec![ongoing(5), ongoing(2), ongoing(9)]),
            OngoingTopicReassignment::default()
                .with_name(wire_topic("payments"))
                .with_partitions(vec![ongoing(1)]),
        ]);

        assert_eq!(pending_partitions("orders", &[1, 2, 5], &response).unwrap(), vec![2, 5]);
        assert!(pending_partitions("audit", &[1], &response).unwrap().is_empty());
    }
}
