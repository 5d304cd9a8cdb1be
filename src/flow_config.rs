//! Resolution of the mirror-maker DR properties into one replication flow.
//!
//! The properties blob declares exactly two clusters and the target one.
//! Everything else is resolved relative to the `<source>-><target>` flow:
//! a flow-scoped key such as `dc2->dc1.topics` overrides the global `topics`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

static FLOW_SCOPED_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w]*->[\w]*\.(topics|topics\.blacklist|enabled)$").unwrap());

const CLUSTERS: &str = "clusters";
const TARGET_DC: &str = "target.dc";
const ENABLED: &str = "enabled";
const TOPICS: &str = "topics";
const TOPICS_BLACKLIST: &str = "topics.blacklist";

/// Which side of the flow a setting belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowSide {
    Source,
    Target,
}

impl fmt::Display for FlowSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowSide::Source => write!(f, "source"),
            FlowSide::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("can not find KMM property 'clusters'")]
    ClustersMissing,

    #[error("in disaster recovery mode exactly two clusters must be declared in 'clusters' property")]
    ClustersCount { found: usize },

    #[error("declared KMM clusters can not be repeated")]
    ClustersRepeated,

    #[error("can not find KMM property 'target.dc' or property has incorrect value")]
    TargetDcInvalid,

    #[error("{side} Kafka bootstrap servers are not set")]
    BootstrapServersMissing { side: FlowSide },

    #[error("can not find Kafka credential '{key}'")]
    CredentialMissing { key: String },

    #[error("cannot find cluster with name: {name}")]
    ClusterNotFound { name: String },
}

/// Parse a `key = value` blob.
///
/// Blank lines, `#` comments and lines without `=` are skipped. The first `=`
/// splits key from value and both sides are trimmed. A repeated key keeps
/// its last value.
pub fn parse_properties(blob: &str) -> BTreeMap<String, String> {
    blob.lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(|item| item.trim().to_string()).collect()
}

/// Scalar and list views of the recognized properties
#[derive(Debug, Default)]
struct KnownProperties {
    scalars: BTreeMap<String, String>,
    lists: BTreeMap<String, Vec<String>>,
}

impl KnownProperties {
    fn collect(properties: &BTreeMap<String, String>) -> Self {
        let mut known = Self::default();
        for (key, value) in properties {
            let name = match FLOW_SCOPED_KEY.captures(key).and_then(|c| c.get(1)) {
                Some(suffix) => suffix.as_str(),
                None => key.as_str(),
            };
            match name {
                // scalars holding a comma are ignored
                TARGET_DC | ENABLED if !value.contains(',') => {
                    known.scalars.insert(key.clone(), value.clone());
                }
                CLUSTERS | TOPICS | TOPICS_BLACKLIST => {
                    known.lists.insert(key.clone(), split_list(value));
                }
                _ => {}
            }
        }
        known
    }

    fn scoped<'a, T>(map: &'a BTreeMap<String, T>, arrow: &str, name: &str) -> Option<&'a T> {
        map.get(&format!("{arrow}.{name}")).or_else(|| map.get(name))
    }
}

/// One validated replication flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationFlowConfig {
    pub source_cluster: String,
    pub target_cluster: String,
    /// `<source>-><target>`, the prefix of flow-scoped keys
    pub arrow_pattern: String,
    pub source_brokers: Vec<String>,
    pub target_brokers: Vec<String>,
    /// `None` means every topic is allowed
    pub allow_topics: Option<Vec<String>>,
    pub block_topics: Option<Vec<String>>,
    pub replication_enabled: bool,
}

impl ReplicationFlowConfig {
    pub fn from_properties_blob(blob: &str) -> Result<Self, ConfigError> {
        Self::from_properties(&parse_properties(blob))
    }

    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let known = KnownProperties::collect(properties);

        let clusters = known.lists.get(CLUSTERS).ok_or(ConfigError::ClustersMissing)?;
        if clusters.len() != 2 {
            return Err(ConfigError::ClustersCount {
                found: clusters.len(),
            });
        }
        if clusters[0] == clusters[1] {
            return Err(ConfigError::ClustersRepeated);
        }

        let target_cluster = known
            .scalars
            .get(TARGET_DC)
            .filter(|target| clusters.contains(target))
            .ok_or(ConfigError::TargetDcInvalid)?
            .clone();
        let source_cluster = clusters
            .iter()
            .find(|cluster| **cluster != target_cluster)
            .ok_or(ConfigError::TargetDcInvalid)?
            .clone();
        let arrow_pattern = format!("{source_cluster}->{target_cluster}");

        let target_brokers = bootstrap_servers(properties, &target_cluster, FlowSide::Target)?;
        let source_brokers = bootstrap_servers(properties, &source_cluster, FlowSide::Source)?;

        let replication_enabled = KnownProperties::scoped(&known.scalars, &arrow_pattern, ENABLED)
            .map(|value| value.to_lowercase() == "true")
            .unwrap_or(true);
        let allow_topics = KnownProperties::scoped(&known.lists, &arrow_pattern, TOPICS).cloned();
        let block_topics =
            KnownProperties::scoped(&known.lists, &arrow_pattern, TOPICS_BLACKLIST).cloned();

        debug!(
            flow = %arrow_pattern,
            replication_enabled,
            ?allow_topics,
            ?block_topics,
            "Replication flow resolved"
        );

        Ok(Self {
            source_cluster,
            target_cluster,
            arrow_pattern,
            source_brokers,
            target_brokers,
            allow_topics,
            block_topics,
            replication_enabled,
        })
    }

    /// Allow and block topic regexes, in that order
    pub fn regular_expressions(&self) -> (Option<&[String]>, Option<&[String]>) {
        (self.allow_topics.as_deref(), self.block_topics.as_deref())
    }

    pub fn cluster(&self, side: FlowSide) -> &str {
        match side {
            FlowSide::Source => &self.source_cluster,
            FlowSide::Target => &self.target_cluster,
        }
    }

    pub fn brokers(&self, side: FlowSide) -> &[String] {
        match side {
            FlowSide::Source => &self.source_brokers,
            FlowSide::Target => &self.target_brokers,
        }
    }
}

impl FromStr for ReplicationFlowConfig {
    type Err = ConfigError;

    fn from_str(blob: &str) -> Result<Self, Self::Err> {
        Self::from_properties_blob(blob)
    }
}

fn bootstrap_servers(
    properties: &BTreeMap<String, String>,
    cluster: &str,
    side: FlowSide,
) -> Result<Vec<String>, ConfigError> {
    let servers = properties
        .get(&format!("{cluster}.bootstrap.servers"))
        .map(|value| split_list(value))
        .unwrap_or_default();
    if servers.is_empty() {
        return Err(ConfigError::BootstrapServersMissing { side });
    }
    Ok(servers)
}
