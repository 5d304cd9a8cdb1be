//! One authenticated connection to one broker, and the request framing
//! spoken over it.
//!
//! Every request is a size-prefixed frame holding a request header and the
//! request body. Requests are sent one at a time, so a response always
//! answers the request written just before it; the correlation id is still
//! checked.

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{
    RequestHeader, ResponseHeader, SaslAuthenticateRequest, SaslHandshakeRequest,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use super::scram::ScramSha512;
use crate::connection::{
    read_certificates, read_private_key, ClusterConnection, ConnectionError, SaslCredentials,
    SaslMechanism, TlsMaterial,
};
use crate::ports::PortResult;

const CLIENT_ID: &str = "kafka-ops-core";

/// Largest response frame accepted from a broker
const MAX_FRAME_BYTES: i32 = 100 * 1024 * 1024;

/// Broker error codes the adapters act on
pub(super) mod error_codes {
    pub const NONE: i16 = 0;
    pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
    pub const TOPIC_AUTHORIZATION_FAILED: i16 = 29;
    pub const CLUSTER_AUTHORIZATION_FAILED: i16 = 31;
    pub const UNSUPPORTED_VERSION: i16 = 35;
    pub const NOT_CONTROLLER: i16 = 41;
    pub const SASL_AUTHENTICATION_FAILED: i16 = 58;
}

/// Turn a broker error code into a port error
pub(super) fn check(operation: &str, code: i16, message: Option<&StrBytes>) -> PortResult<()> {
    use error_codes::*;

    let detail = || match message {
        Some(message) if !message.is_empty() => format!("{message} (error code {code})"),
        _ => format!("error code {code}"),
    };
    match code {
        NONE => Ok(()),
        TOPIC_AUTHORIZATION_FAILED | CLUSTER_AUTHORIZATION_FAILED | SASL_AUTHENTICATION_FAILED => {
            Err(ConnectionError::Auth(format!("{operation}: {}", detail())))
        }
        UNSUPPORTED_VERSION => Err(ConnectionError::Unsupported {
            operation: operation.to_string(),
        }),
        _ => Err(ConnectionError::request(operation, detail())),
    }
}

/// rustls client settings trusting the configured CA
pub(super) fn tls_connector(material: &TlsMaterial) -> Result<TlsConnector, ConnectionError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certificates(&material.ca_cert, "CA certificate")? {
        roots
            .add(cert)
            .map_err(|err| ConnectionError::TlsConfig(format!("cannot trust CA certificate: {err}")))?;
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let config = if material.is_mutual() {
        let certs = read_certificates(&material.client_cert, "client certificate")?;
        let key = read_private_key(&material.client_key)?;
        builder
            .with_client_auth_cert(certs, key)
            .map_err(|err| ConnectionError::TlsConfig(format!("invalid client identity: {err}")))?
    } else {
        builder.with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Size-prefixed request frame
pub(super) fn encode_request<Req: Request>(
    operation: &str,
    correlation_id: i32,
    request: &Req,
    version: i16,
) -> PortResult<BytesMut> {
    let header = RequestHeader::default()
        .with_request_api_key(Req::KEY)
        .with_request_api_version(version)
        .with_correlation_id(correlation_id)
        .with_client_id(Some(StrBytes::from_static_str(CLIENT_ID)));

    let mut buf = BytesMut::new();
    buf.put_i32(0);
    header
        .encode(&mut buf, <Req as HeaderVersion>::header_version(version))
        .map_err(|err| ConnectionError::request(operation, format!("cannot encode header: {err}")))?;
    request
        .encode(&mut buf, version)
        .map_err(|err| ConnectionError::request(operation, format!("cannot encode request: {err}")))?;

    let size = (buf.len() - 4) as i32;
    buf[..4].copy_from_slice(&size.to_be_bytes());
    Ok(buf)
}

/// Decode a response frame with its size prefix already stripped
pub(super) fn decode_response<Req: Request>(
    operation: &str,
    mut frame: Bytes,
    correlation_id: i32,
    version: i16,
) -> PortResult<Req::Response> {
    let header_version = <Req::Response as HeaderVersion>::header_version(version);
    let header = ResponseHeader::decode(&mut frame, header_version)
        .map_err(|err| ConnectionError::request(operation, format!("cannot decode header: {err}")))?;
    if header.correlation_id != correlation_id {
        return Err(ConnectionError::request(
            operation,
            format!(
                "response correlation id {} does not match request {}",
                header.correlation_id, correlation_id
            ),
        ));
    }
    Req::Response::decode(&mut frame, version)
        .map_err(|err| ConnectionError::request(operation, format!("cannot decode response: {err}")))
}

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub(super) struct BrokerChannel {
    address: String,
    stream: Box<dyn Transport>,
    next_correlation_id: i32,
}

impl BrokerChannel {
    /// Connect, wrap in TLS when configured, then run the SASL exchange
    pub(super) async fn open(
        address: &str,
        connection: &ClusterConnection,
        tls: Option<&TlsConnector>,
    ) -> PortResult<Self> {
        let unreachable = |message: String| ConnectionError::Connection {
            brokers: address.to_string(),
            message,
        };

        let tcp = TcpStream::connect(address)
            .await
            .map_err(|err| unreachable(err.to_string()))?;
        let _ = tcp.set_nodelay(true);

        let stream: Box<dyn Transport> = match tls {
            Some(connector) => {
                let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
                let server_name = ServerName::try_from(host.to_string()).map_err(|err| {
                    ConnectionError::TlsConfig(format!("invalid server name {host}: {err}"))
                })?;
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|err| unreachable(format!("TLS handshake failed: {err}")))?;
                Box::new(stream)
            }
            None => Box::new(tcp),
        };

        let mut channel = Self {
            address: address.to_string(),
            stream,
            next_correlation_id: 0,
        };
        if let Some(sasl) = connection.sasl() {
            channel.authenticate(sasl).await?;
        }
        debug!(address, tls = tls.is_some(), "Broker connection opened");
        Ok(channel)
    }

    pub(super) fn address(&self) -> &str {
        &self.address
    }

    pub(super) async fn send<Req: Request>(
        &mut self,
        operation: &str,
        request: &Req,
        version: i16,
    ) -> PortResult<Req::Response> {
        let correlation_id = self.next_correlation_id;
        self.next_correlation_id = self.next_correlation_id.wrapping_add(1);

        let frame = encode_request(operation, correlation_id, request, version)?;
        let io_error = |err: std::io::Error| {
            ConnectionError::request(operation, format!("broker {}: {err}", self.address))
        };
        self.stream.write_all(&frame).await.map_err(io_error)?;
        self.stream.flush().await.map_err(io_error)?;

        let size = self.stream.read_i32().await.map_err(io_error)?;
        if !(0..=MAX_FRAME_BYTES).contains(&size) {
            return Err(ConnectionError::request(
                operation,
                format!("broker {} sent a frame of {size} bytes", self.address),
            ));
        }
        let mut body = vec![0u8; size as usize];
        self.stream.read_exact(&mut body).await.map_err(io_error)?;

        decode_response::<Req>(operation, Bytes::from(body), correlation_id, version)
    }

    async fn authenticate(&mut self, sasl: &SaslCredentials) -> PortResult<()> {
        let handshake = SaslHandshakeRequest::default()
            .with_mechanism(StrBytes::from_static_str(sasl.mechanism.as_str()));
        let response = self.send("SASL handshake", &handshake, 1).await?;
        if response.error_code != error_codes::NONE {
            let offered: Vec<String> = response.mechanisms.iter().map(|m| m.to_string()).collect();
            return Err(ConnectionError::Auth(format!(
                "broker {} does not accept {}, it offers {:?}",
                self.address, sasl.mechanism, offered
            )));
        }

        match sasl.mechanism {
            SaslMechanism::Plain => {
                let token = format!("\0{}\0{}", sasl.username, sasl.password);
                self.sasl_round(token.into_bytes()).await?;
            }
            SaslMechanism::ScramSha512 => {
                let mut scram = ScramSha512::new(&sasl.username, &sasl.password);
                let server_first = self.sasl_round(scram.client_first_message()).await?;
                let client_final = scram.client_final_message(&server_first)?;
                let server_final = self.sasl_round(client_final).await?;
                scram.verify_server_final(&server_final)?;
            }
        }
        info!(address = %self.address, mechanism = %sasl.mechanism, "SASL authentication succeeded");
        Ok(())
    }

    async fn sasl_round(&mut self, token: Vec<u8>) -> PortResult<Bytes> {
        let request = SaslAuthenticateRequest::default().with_auth_bytes(Bytes::from(token));
        let response = self.send("SASL authenticate", &request, 1).await?;
        if response.error_code != error_codes::NONE {
            let message = response
                .error_message
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("error code {}", response.error_code));
            return Err(ConnectionError::Auth(message));
        }
        Ok(response.auth_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;
    use kafka_protocol::messages::{ApiKey, DescribeClusterRequest, DescribeClusterResponse, MetadataRequest};

    const CA: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    #[test]
    fn test_request_frame_layout() {
        let request = MetadataRequest::default()
            .with_topics(None)
            .with_allow_auto_topic_creation(false);
        let frame = encode_request("describe topics", 7, &request, 4).unwrap();

        let mut bytes = frame.freeze();
        let size = bytes.get_i32();
        assert_eq!(size as usize, bytes.len());

        let header = RequestHeader::decode(&mut bytes, 1).unwrap();
        assert_eq!(header.request_api_key, ApiKey::Metadata as i16);
        assert_eq!(header.request_api_version, 4);
        assert_eq!(header.correlation_id, 7);
        assert_eq!(header.client_id.as_deref(), Some(CLIENT_ID));
    }

    fn response_frame(correlation_id: i32, response: &DescribeClusterResponse) -> Bytes {
        let mut buf = BytesMut::new();
        let header = ResponseHeader::default().with_correlation_id(correlation_id);
        header
            .encode(&mut buf, <DescribeClusterResponse as HeaderVersion>::header_version(0))
            .unwrap();
        response.encode(&mut buf, 0).unwrap();
        buf.freeze()
    }

    #[test]
    fn test_response_correlation_checked() {
        let response = DescribeClusterResponse::default()
            .with_cluster_id(StrBytes::from_static_str("dc1"))
            .with_controller_id(kafka_protocol::messages::BrokerId(2));

        let decoded = decode_response::<DescribeClusterRequest>(
            "describe cluster",
            response_frame(3, &response),
            3,
            0,
        )
        .unwrap();
        assert_eq!(decoded.controller_id.0, 2);

        let err = decode_response::<DescribeClusterRequest>(
            "describe cluster",
            response_frame(4, &response),
            3,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ConnectionError::Request { message, .. } if message.contains("correlation")));
    }

    #[test]
    fn test_error_codes_classified() {
        assert!(check("list topics", error_codes::NONE, None).is_ok());
        assert!(matches!(
            check("list topics", error_codes::CLUSTER_AUTHORIZATION_FAILED, None),
            Err(ConnectionError::Auth(_))
        ));
        assert!(matches!(
            check("describe cluster", error_codes::UNSUPPORTED_VERSION, None),
            Err(ConnectionError::Unsupported { operation }) if operation == "describe cluster"
        ));

        let message = StrBytes::from_static_str("This is not the correct controller for this cluster.");
        let err = check("alter partition reassignments", error_codes::NOT_CONTROLLER, Some(&message)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "alter partition reassignments failed: This is not the correct controller for this cluster. (error code 41)"
        );
    }

    #[test]
    fn test_ca_must_be_a_certificate() {
        // PEM armour around bytes that are not DER
        let result = tls_connector(&TlsMaterial::new(CA));
        assert!(matches!(result, Err(ConnectionError::TlsConfig(m)) if m.contains("cannot trust")));
    }
}
