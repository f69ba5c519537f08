use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use udht_logic::{Contact, Id, Node, NodeError};

use crate::client::UdpProtocol;
use crate::consts::{MAX_DATAGRAM_SIZE, PROTOCOL_NAME};
use crate::payload::{extract_random_id, ContactInfo, Packet, RequestBody, ResponseBody};

/// Long-lived datagram endpoint answering the four DHT RPCs for one node.
///
/// Every datagram is handled in its own task: decode, dispatch to the
/// node, reply to the source address with the request nonce echoed.
/// Undecodable or unknown messages earn an error response, never a crash.
pub struct UdpServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl UdpServer {
    /// Bind and serve. With port zero the OS picks one; `local_addr`
    /// reports the actual endpoint.
    pub async fn bind(node: Arc<Node>, addr: impl ToSocketAddrs) -> io::Result<UdpServer> {
        let socket = UdpSocket::bind(addr).await?;
        Self::serve(socket, node)
    }

    /// Serve on an already bound socket.
    pub fn serve(socket: UdpSocket, node: Arc<Node>) -> io::Result<UdpServer> {
        let local_addr = socket.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run(Arc::new(socket), node, shutdown_rx));
        debug!(%local_addr, "udp server listening");
        Ok(UdpServer {
            local_addr,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting datagrams. Handlers already spawned finish on their
    /// own.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
    }

    fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

async fn run(socket: Arc<UdpSocket>, node: Arc<Node>, mut shutdown: oneshot::Receiver<()>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, peer) = tokio::select! {
            _ = &mut shutdown => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(err) => {
                    warn!(%err, "datagram receive failed");
                    continue;
                }
            },
        };
        let datagram = buf[..len].to_vec();
        tokio::spawn(handle_datagram(socket.clone(), node.clone(), datagram, peer));
    }
}

async fn handle_datagram(
    socket: Arc<UdpSocket>,
    node: Arc<Node>,
    datagram: Vec<u8>,
    peer: SocketAddr,
) {
    let reply = match serde_json::from_slice::<Packet>(&datagram) {
        Ok(packet) => dispatch(&node, packet),
        Err(err) => {
            debug!(%peer, %err, "undecodable request");
            Packet::Error(ResponseBody::error(
                extract_random_id(&datagram),
                format!("malformed request: {err}"),
            ))
        }
    };

    let raw = match serde_json::to_vec(&reply) {
        Ok(raw) if raw.len() <= MAX_DATAGRAM_SIZE => raw,
        Ok(_) => {
            warn!(%peer, "response exceeds the datagram size");
            let random_id = reply.response().map(|b| b.random_id).unwrap_or(Id::ZERO);
            let fallback = Packet::Error(ResponseBody::error(random_id, "response too large"));
            match serde_json::to_vec(&fallback) {
                Ok(raw) => raw,
                Err(_) => return,
            }
        }
        Err(err) => {
            warn!(%peer, %err, "response serialization failed");
            return;
        }
    };

    if let Err(err) = socket.send_to(&raw, peer).await {
        warn!(%peer, %err, "reply send failed");
    }
}

fn dispatch(node: &Node, packet: Packet) -> Packet {
    match packet {
        Packet::Ping(req) => {
            let sender = sender_contact(&req);
            match node.ping(&sender) {
                Ok(_) => Packet::PingResponse(ResponseBody::empty(req.random_id)),
                Err(err) => error_reply(req.random_id, err),
            }
        }
        Packet::Store(req) => {
            let sender = sender_contact(&req);
            let (key, value) = match (req.key, req.value) {
                (Some(key), Some(value)) => (key, value),
                _ => {
                    return Packet::Error(ResponseBody::error(
                        req.random_id,
                        "store requires a key and a value",
                    ))
                }
            };
            let lifetime = Duration::from_secs(req.exp_time.unwrap_or(0));
            match node.store(&sender, key, value, lifetime) {
                Ok(()) => Packet::StoreResponse(ResponseBody::empty(req.random_id)),
                Err(err) => error_reply(req.random_id, err),
            }
        }
        Packet::FindNode(req) => {
            let sender = sender_contact(&req);
            let key = match req.key {
                Some(key) => key,
                None => {
                    return Packet::Error(ResponseBody::error(
                        req.random_id,
                        "find_node requires a key",
                    ))
                }
            };
            match node.find_node(&sender, key) {
                Ok(contacts) => Packet::FindNodeResponse(ResponseBody::with_contacts(
                    req.random_id,
                    contact_infos(&contacts),
                )),
                Err(err) => error_reply(req.random_id, err),
            }
        }
        Packet::FindValue(req) => {
            let sender = sender_contact(&req);
            let key = match req.key {
                Some(key) => key,
                None => {
                    return Packet::Error(ResponseBody::error(
                        req.random_id,
                        "find_value requires a key",
                    ))
                }
            };
            match node.find_value(&sender, key) {
                Ok(reply) => match reply.value {
                    Some(value) => Packet::FindValueResponse(ResponseBody::with_value(
                        req.random_id,
                        value,
                    )),
                    None => Packet::FindValueResponse(ResponseBody::with_contacts(
                        req.random_id,
                        contact_infos(&reply.contacts),
                    )),
                },
                Err(err) => error_reply(req.random_id, err),
            }
        }
        other => {
            // A response aimed at the server port is a peer bug; answer
            // it instead of dropping it on the floor.
            let random_id = other.response().map(|b| b.random_id).unwrap_or(Id::ZERO);
            Packet::Error(ResponseBody::error(random_id, "unexpected message type"))
        }
    }
}

fn error_reply(random_id: Id, err: NodeError) -> Packet {
    Packet::Error(ResponseBody::error(random_id, err.to_string()))
}

/// Rebuild the sender's contact from the request header, reachable back
/// through a fresh outbound handle.
fn sender_contact(req: &RequestBody) -> Contact {
    Contact::new(
        req.sender,
        req.sender_host.clone(),
        req.sender_port,
        Arc::new(UdpProtocol::new(req.sender_host.clone(), req.sender_port)),
    )
}

fn contact_infos(contacts: &[Contact]) -> Vec<ContactInfo> {
    contacts
        .iter()
        .map(|c| ContactInfo {
            contact: c.id,
            protocol_name: PROTOCOL_NAME.to_owned(),
            host: c.host.clone(),
            port: c.port,
        })
        .collect()
}
