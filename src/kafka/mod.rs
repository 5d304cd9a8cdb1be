//! Adapters that implement the ports against a real cluster.
//!
//! [`KafkaAdmin`] speaks the Kafka wire protocol itself, since reassignment
//! and cluster description requests are not exposed by librdkafka.
//! [`KafkaReader`] wraps a librdkafka consumer for metadata and watermarks.

mod admin;
mod reader;
mod scram;
mod wire;

pub use admin::KafkaAdmin;
pub use reader::KafkaReader;
