//! CoAP over UDP transport.
//!
//! Every request runs in its own session: a freshly bound socket plus a
//! snapshot of the PSK credentials taken when the session opens. The session
//! is dropped on every exit path, so nothing leaks from one request into the
//! next. Record protection for `coaps` is not provided here; a DTLS-capable
//! [`Transport`] can be plugged into the engine instead.

use crate::coap::{CoapMessage, MessageType};
use crate::error::{TransportError, TransportResult};
use crate::transport::{Transport, TransportResponse};
use crest_psk::{PskCredentials, PskStore};
use rand::Rng;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Initial retransmission timeout for confirmable requests.
const ACK_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_RETRANSMIT: u32 = 4;
const TOKEN_LENGTH: usize = 4;
const MAX_DATAGRAM: usize = 2048;

/// Parsed `coap://host[:port]/path` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapEndpoint {
    pub host: String,
    pub port: u16,
    pub path: Vec<String>,
}

impl CoapEndpoint {
    pub fn parse(uri: &str) -> TransportResult<Self> {
        let invalid = || TransportError::InvalidEndpoint(uri.to_string());

        let (scheme, rest) = uri.split_once("://").ok_or_else(invalid)?;
        match scheme.to_ascii_lowercase().as_str() {
            "coap" => {}
            "coaps" => return Err(TransportError::UnsupportedScheme(scheme.to_string())),
            _ => return Err(invalid()),
        }

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => return Err(invalid()),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None => DEFAULT_COAP_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    async fn resolve(&self) -> TransportResult<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| TransportError::InvalidEndpoint(format!("{} did not resolve", self.host)))
    }
}

/// One request's worth of network state.
struct CoapSession {
    socket: UdpSocket,
    credentials: PskCredentials,
}

impl CoapSession {
    async fn open(peer: SocketAddr, credentials: PskCredentials) -> TransportResult<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        debug!(peer = %peer, identity = %credentials.identity, "Opened coap session");
        Ok(Self {
            socket,
            credentials,
        })
    }

    /// Send a confirmable request and wait for its response, retransmitting
    /// with exponential backoff until `deadline`.
    async fn exchange(
        &self,
        request: &CoapMessage,
        deadline: Instant,
        limit: Duration,
    ) -> TransportResult<CoapMessage> {
        let datagram = request.encode()?;
        let mut wait = ACK_TIMEOUT;
        let mut acknowledged = false;

        for attempt in 0..=MAX_RETRANSMIT {
            if !acknowledged {
                if attempt > 0 {
                    debug!(message_id = request.message_id, attempt, "Retransmitting request");
                }
                self.socket.send(&datagram).await?;
            }

            let attempt_deadline = if acknowledged {
                deadline
            } else {
                (Instant::now() + wait).min(deadline)
            };
            while let Ok(received) =
                tokio::time::timeout_at(attempt_deadline, self.receive()).await
            {
                let message = received?;
                if let Some(response) = self.accept(request, message, &mut acknowledged).await? {
                    return Ok(response);
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            wait *= 2;
        }
        Err(TransportError::Timeout(limit))
    }

    async fn receive(&self) -> TransportResult<CoapMessage> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let length = self.socket.recv(&mut buffer).await?;
        CoapMessage::decode(&buffer[..length])
    }

    /// Classify an incoming message. Returns the response once it is complete.
    async fn accept(
        &self,
        request: &CoapMessage,
        message: CoapMessage,
        acknowledged: &mut bool,
    ) -> TransportResult<Option<CoapMessage>> {
        match message.kind {
            MessageType::Acknowledgement | MessageType::Reset
                if message.message_id != request.message_id =>
            {
                Err(TransportError::MessageIdMismatch {
                    expected: request.message_id,
                    actual: message.message_id,
                })
            }
            MessageType::Reset => Err(TransportError::Reset(request.message_id)),
            MessageType::Acknowledgement if message.is_empty() => {
                // Separate response follows.
                *acknowledged = true;
                Ok(None)
            }
            MessageType::Acknowledgement => Self::check_token(request, message).map(Some),
            MessageType::Confirmable | MessageType::NonConfirmable => {
                if message.kind == MessageType::Confirmable {
                    self.socket
                        .send(&CoapMessage::ack(message.message_id).encode()?)
                        .await?;
                }
                Self::check_token(request, message).map(Some)
            }
        }
    }

    fn check_token(request: &CoapMessage, message: CoapMessage) -> TransportResult<CoapMessage> {
        if message.token == request.token {
            Ok(message)
        } else {
            Err(TransportError::MalformedResponse(
                "response token does not match request".to_string(),
            ))
        }
    }
}

impl Drop for CoapSession {
    fn drop(&mut self) {
        debug!(identity = %self.credentials.identity, "Closed coap session");
    }
}

/// Posts envelopes to a `coap://` endpoint, one session per request.
///
/// Each session snapshots the live PSK credentials when it opens. Plain CoAP
/// only logs the identity; a DTLS-capable `Transport` keys its handshake from
/// the same snapshot, so a rotation takes effect on the next request.
#[derive(Debug, Clone)]
pub struct CoapTransport {
    endpoint: CoapEndpoint,
    store: PskStore,
    request_timeout: Duration,
}

impl CoapTransport {
    pub fn new(uri: &str, store: PskStore, request_timeout: Duration) -> TransportResult<Self> {
        let endpoint = CoapEndpoint::parse(uri)?;
        info!(
            host = %endpoint.host,
            port = endpoint.port,
            path = %endpoint.path.join("/"),
            "Configured coap transport"
        );
        Ok(Self {
            endpoint,
            store,
            request_timeout,
        })
    }

    pub fn endpoint(&self) -> &CoapEndpoint {
        &self.endpoint
    }

    /// Credentials the next session will be opened with.
    pub fn credentials(&self) -> PskCredentials {
        self.store.credentials()
    }

    async fn post(&self, payload: &[u8]) -> TransportResult<TransportResponse> {
        let deadline = Instant::now() + self.request_timeout;
        let peer = timeout(self.request_timeout, self.endpoint.resolve())
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))??;

        let session = CoapSession::open(peer, self.credentials()).await?;

        let (message_id, token) = {
            let mut rng = rand::thread_rng();
            let token: [u8; TOKEN_LENGTH] = rng.gen();
            (rng.gen::<u16>(), token.to_vec())
        };
        let request = CoapMessage::post(message_id, token, &self.endpoint.path, payload.to_vec());

        let response = session
            .exchange(&request, deadline, self.request_timeout)
            .await?;
        Ok(TransportResponse::new(response.response_code(), response.payload))
    }
}

impl Transport for CoapTransport {
    async fn send(&self, payload: &[u8]) -> TransportResult<TransportResponse> {
        let result = self.post(payload).await;
        if let Err(e) = &result {
            warn!(error = %e, "Coap request failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::{CODE_POST, OPTION_CONTENT_FORMAT, OPTION_URI_PATH};
    use crate::transport::ResponseCode;

    #[test]
    fn test_parse_endpoint() {
        let endpoint = CoapEndpoint::parse("coap://localhost:55554/").unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 55554);
        assert!(endpoint.path.is_empty());

        let endpoint = CoapEndpoint::parse("coap://platform.example/crest/v1").unwrap();
        assert_eq!(endpoint.port, DEFAULT_COAP_PORT);
        assert_eq!(endpoint.path, vec!["crest", "v1"]);

        let endpoint = CoapEndpoint::parse("coap://[::1]:6000/x").unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 6000);
    }

    #[test]
    fn test_sessions_follow_key_rotation() {
        let store = PskStore::new("867787050253370", "1234567891234567");
        let transport =
            CoapTransport::new("coap://127.0.0.1/uplink", store.clone(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(transport.credentials().key.as_str(), "1234567891234567");

        store.set_key("ABCDEFGHIJKLMNOP");
        let credentials = transport.credentials();
        assert_eq!(credentials.identity, "867787050253370");
        assert_eq!(credentials.key.as_str(), "ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn test_parse_rejects_bad_endpoints() {
        assert!(matches!(
            CoapEndpoint::parse("coaps://localhost:5684/"),
            Err(TransportError::UnsupportedScheme(_))
        ));
        for uri in ["localhost:5683", "http://localhost/", "coap://:5683/", "coap://host:port/", "coap://[::1/"] {
            assert!(
                matches!(CoapEndpoint::parse(uri), Err(TransportError::InvalidEndpoint(_))),
                "accepted {uri}"
            );
        }
    }

    async fn server() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("coap://{}/crest", socket.local_addr().unwrap());
        (socket, uri)
    }

    #[tokio::test]
    async fn test_piggybacked_exchange() {
        let (server, uri) = server().await;
        let transport =
            CoapTransport::new(&uri, PskStore::new("D1", "1234567891234567"), Duration::from_secs(5))
                .unwrap();

        let platform = tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            let (length, peer) = server.recv_from(&mut buffer).await.unwrap();
            let request = CoapMessage::decode(&buffer[..length]).unwrap();

            assert_eq!(request.kind, MessageType::Confirmable);
            assert_eq!(request.code, CODE_POST);
            assert_eq!(request.option(OPTION_URI_PATH).collect::<Vec<_>>(), vec![b"crest".as_slice()]);
            assert_eq!(request.option(OPTION_CONTENT_FORMAT).next(), Some([60u8].as_slice()));
            assert_eq!(request.payload, b"envelope");

            let response = CoapMessage {
                kind: MessageType::Acknowledgement,
                code: ResponseCode::CHANGED.0,
                message_id: request.message_id,
                token: request.token.clone(),
                options: Vec::new(),
                payload: b"!CMD:REBOOT".to_vec(),
            };
            server
                .send_to(&response.encode().unwrap(), peer)
                .await
                .unwrap();
        });

        let response = transport.send(b"envelope").await.unwrap();
        platform.await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.payload, b"!CMD:REBOOT");
    }

    #[tokio::test]
    async fn test_separate_response_is_acknowledged() {
        let (server, uri) = server().await;
        let transport =
            CoapTransport::new(&uri, PskStore::new("D1", "1234567891234567"), Duration::from_secs(5))
                .unwrap();

        let platform = tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            let (length, peer) = server.recv_from(&mut buffer).await.unwrap();
            let request = CoapMessage::decode(&buffer[..length]).unwrap();

            let empty_ack = CoapMessage::ack(request.message_id);
            server.send_to(&empty_ack.encode().unwrap(), peer).await.unwrap();

            let response = CoapMessage {
                kind: MessageType::Confirmable,
                code: ResponseCode::CONTENT.0,
                message_id: request.message_id.wrapping_add(1),
                token: request.token.clone(),
                options: Vec::new(),
                payload: b"CMD:RSP".to_vec(),
            };
            server.send_to(&response.encode().unwrap(), peer).await.unwrap();

            let (length, _) = server.recv_from(&mut buffer).await.unwrap();
            CoapMessage::decode(&buffer[..length]).unwrap()
        });

        let response = transport.send(b"envelope").await.unwrap();
        let ack = platform.await.unwrap();

        assert_eq!(response.payload, b"CMD:RSP");
        assert_eq!(ack.kind, MessageType::Acknowledgement);
        assert!(ack.is_empty());
    }

    #[tokio::test]
    async fn test_error_code_is_returned() {
        let (server, uri) = server().await;
        let transport =
            CoapTransport::new(&uri, PskStore::new("D1", "1234567891234567"), Duration::from_secs(5))
                .unwrap();

        let platform = tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            let (length, peer) = server.recv_from(&mut buffer).await.unwrap();
            let request = CoapMessage::decode(&buffer[..length]).unwrap();
            let response = CoapMessage {
                kind: MessageType::Acknowledgement,
                code: ResponseCode::BAD_REQUEST.0,
                message_id: request.message_id,
                token: request.token,
                options: Vec::new(),
                payload: Vec::new(),
            };
            server.send_to(&response.encode().unwrap(), peer).await.unwrap();
        });

        let response = transport.send(b"envelope").await.unwrap();
        platform.await.unwrap();

        assert_eq!(response.code, ResponseCode::BAD_REQUEST);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (_server, uri) = server().await;
        let transport = CoapTransport::new(
            &uri,
            PskStore::new("D1", "1234567891234567"),
            Duration::from_millis(200),
        )
        .unwrap();

        let result = transport.send(b"envelope").await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
