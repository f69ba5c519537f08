use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;
use udht_logic::{Contact, FindValueReply, Id, Protocol, RpcError};

use crate::consts::{MAX_DATAGRAM_SIZE, PROTOCOL_NAME, REQUEST_TIMEOUT};
use crate::payload::{ContactInfo, Packet, RequestBody};

/// Outbound UDP handle for one remote peer.
///
/// Every call opens an ephemeral socket, sends a single request datagram
/// and waits for the one response correlated by a fresh 160-bit nonce.
/// The socket closes when the call resolves or is dropped.
#[derive(Clone, Debug)]
pub struct UdpProtocol {
    host: String,
    port: u16,
    request_timeout: Duration,
}

impl UdpProtocol {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_timeout(host, port, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(host: impl Into<String>, port: u16, request_timeout: Duration) -> Self {
        UdpProtocol {
            host: host.into(),
            port,
            request_timeout,
        }
    }

    fn request_body(&self, sender: &Contact, random_id: Id) -> RequestBody {
        RequestBody {
            protocol_name: PROTOCOL_NAME.to_owned(),
            random_id,
            sender: sender.id,
            sender_host: sender.host.clone(),
            sender_port: sender.port,
            key: None,
            value: None,
            exp_time: None,
        }
    }

    /// Turn a wire contact entry into a live contact backed by this
    /// transport.
    fn wrap_contact(&self, info: ContactInfo) -> Contact {
        let protocol = Arc::new(UdpProtocol::with_timeout(
            info.host.clone(),
            info.port,
            self.request_timeout,
        ));
        Contact::new(info.contact, info.host, info.port, protocol)
    }

    async fn exchange(&self, request: Packet, random_id: Id) -> Result<Packet, RpcError> {
        let raw = serde_json::to_vec(&request).map_err(proto_err)?;
        if raw.len() > MAX_DATAGRAM_SIZE {
            return Err(RpcError::Protocol(
                "request exceeds the datagram size".to_owned(),
            ));
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(proto_err)?;
        socket
            .send_to(&raw, (self.host.as_str(), self.port))
            .await
            .map_err(proto_err)?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = timeout(self.request_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| RpcError::Timeout)?
            .map_err(proto_err)?;

        let response: Packet = serde_json::from_slice(&buf[..len]).map_err(proto_err)?;
        let body = response
            .response()
            .ok_or_else(|| RpcError::Protocol("peer sent a request back".to_owned()))?;

        if let Packet::Error(body) = &response {
            let message = body
                .error_message
                .clone()
                .unwrap_or_else(|| "unspecified peer failure".to_owned());
            return Err(RpcError::Peer(message));
        }
        if body.random_id != random_id {
            return Err(RpcError::IdMismatched);
        }
        Ok(response)
    }
}

fn proto_err(err: impl ToString) -> RpcError {
    RpcError::Protocol(err.to_string())
}

fn unexpected_variant() -> RpcError {
    RpcError::Protocol("unexpected response variant".to_owned())
}

impl Protocol for UdpProtocol {
    fn ping(&self, sender: Contact) -> BoxFuture<'static, Result<(), RpcError>> {
        let client = self.clone();
        async move {
            let random_id: Id = rand::random();
            let body = client.request_body(&sender, random_id);
            debug!(host = %client.host, port = client.port, "sending ping");
            match client.exchange(Packet::Ping(body), random_id).await? {
                Packet::PingResponse(_) => Ok(()),
                _ => Err(unexpected_variant()),
            }
        }
        .boxed()
    }

    fn store(
        &self,
        sender: Contact,
        key: Id,
        value: String,
        exp_time: u64,
    ) -> BoxFuture<'static, Result<(), RpcError>> {
        let client = self.clone();
        async move {
            let random_id: Id = rand::random();
            let mut body = client.request_body(&sender, random_id);
            body.key = Some(key);
            body.value = Some(value);
            body.exp_time = Some(exp_time);
            debug!(host = %client.host, port = client.port, %key, "sending store");
            match client.exchange(Packet::Store(body), random_id).await? {
                Packet::StoreResponse(_) => Ok(()),
                _ => Err(unexpected_variant()),
            }
        }
        .boxed()
    }

    fn find_node(
        &self,
        sender: Contact,
        key: Id,
    ) -> BoxFuture<'static, Result<Vec<Contact>, RpcError>> {
        let client = self.clone();
        async move {
            let random_id: Id = rand::random();
            let mut body = client.request_body(&sender, random_id);
            body.key = Some(key);
            debug!(host = %client.host, port = client.port, %key, "sending find_node");
            match client.exchange(Packet::FindNode(body), random_id).await? {
                Packet::FindNodeResponse(body) => Ok(body
                    .contacts
                    .unwrap_or_default()
                    .into_iter()
                    .map(|info| client.wrap_contact(info))
                    .collect()),
                _ => Err(unexpected_variant()),
            }
        }
        .boxed()
    }

    fn find_value(
        &self,
        sender: Contact,
        key: Id,
    ) -> BoxFuture<'static, Result<FindValueReply, RpcError>> {
        let client = self.clone();
        async move {
            let random_id: Id = rand::random();
            let mut body = client.request_body(&sender, random_id);
            body.key = Some(key);
            debug!(host = %client.host, port = client.port, %key, "sending find_value");
            match client.exchange(Packet::FindValue(body), random_id).await? {
                Packet::FindValueResponse(body) => Ok(FindValueReply {
                    contacts: body
                        .contacts
                        .unwrap_or_default()
                        .into_iter()
                        .map(|info| client.wrap_contact(info))
                        .collect(),
                    value: body.value,
                }),
                _ => Err(unexpected_variant()),
            }
        }
        .boxed()
    }
}

/// Contact for a peer reachable over UDP at the given address.
pub fn udp_contact(id: Id, host: &str, port: u16) -> Contact {
    Contact::new(id, host, port, Arc::new(UdpProtocol::new(host, port)))
}
