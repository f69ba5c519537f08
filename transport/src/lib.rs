#![forbid(unsafe_code)]

//! UDP transport for the DHT: JSON datagrams with per-request correlation
//! nonces, an ephemeral client socket per RPC and one long-lived server
//! socket per node.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::info;
use udht_logic::{config::SystemConfig, Contact, Dht, Id, Node};

mod client;
pub mod consts;
mod payload;
mod server;

pub use client::{udp_contact, UdpProtocol};
pub use payload::{extract_random_id, ContactInfo, Packet, RequestBody, ResponseBody};
pub use server::UdpServer;

/// A DHT wired to a running UDP server.
pub struct UdpDht {
    pub dht: Arc<Dht>,
    pub server: UdpServer,
}

impl UdpDht {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }
}

/// Bind a UDP endpoint, build the node around its final address and start
/// serving. The advertised contact carries the real port before this
/// returns, so peers learn a reachable address even when the OS picked
/// it. Failing to bind is fatal to the caller.
///
/// Bind a concrete interface; the advertised host is taken verbatim from
/// the bound address.
pub async fn create_dht(
    config: SystemConfig,
    id: Id,
    bind: impl ToSocketAddrs,
) -> io::Result<UdpDht> {
    let socket = UdpSocket::bind(bind).await?;
    let addr = socket.local_addr()?;
    let host = addr.ip().to_string();

    let protocol = Arc::new(UdpProtocol::new(host.clone(), addr.port()));
    let our = Contact::new(id, host, addr.port(), protocol);
    let node = Node::new(config.clone(), our);
    let dht = Arc::new(Dht::new(config, node.clone()));
    let server = UdpServer::serve(socket, node)?;

    info!(%addr, node = %id, "dht listening");
    Ok(UdpDht { dht, server })
}

#[cfg(test)]
mod tests {
    use rand::prelude::StdRng;
    use rand::SeedableRng;
    use udht_logic::Protocol;

    use super::*;

    async fn spawn(id: u64) -> UdpDht {
        create_dht(Default::default(), Id::from_u64(id), "127.0.0.1:0")
            .await
            .unwrap()
    }

    fn contact_of(peer: &UdpDht) -> Contact {
        peer.dht.self_contact()
    }

    #[test_log::test(tokio::test)]
    async fn bootstrap_store_and_fetch_across_three_nodes() {
        let a = spawn(1).await;
        let b = spawn(2).await;
        let c = spawn(3).await;
        let mut rng = StdRng::seed_from_u64(3);

        // a joins through b, then publishes.
        a.dht.bootstrap(contact_of(&b), &mut rng).await.unwrap();
        let key = Id::from_u64(40);
        let replicas = a.dht.store(key, "over the wire".to_owned()).await;
        assert_eq!(replicas, 2);
        assert_eq!(
            b.dht.node().storage().read().unwrap().get(key),
            Some("over the wire")
        );

        // c joins through a and fetches the value from the network.
        c.dht.bootstrap(contact_of(&a), &mut rng).await.unwrap();
        let outcome = c.dht.find_value(key).await;
        assert!(outcome.found);
        assert_eq!(outcome.value.as_deref(), Some("over the wire"));
        assert!(!c.dht.node().storage().read().unwrap().contains(key));
    }

    #[test_log::test(tokio::test)]
    async fn bootstrap_learns_the_peers_of_the_peer() {
        let a = spawn(1).await;
        let b = spawn(2).await;
        let c = spawn(3).await;
        let mut rng = StdRng::seed_from_u64(7);

        b.dht.bootstrap(contact_of(&c), &mut rng).await.unwrap();
        a.dht.bootstrap(contact_of(&b), &mut rng).await.unwrap();

        let list = a.dht.node().bucket_list();
        let list = list.lock().unwrap();
        assert!(list.get_kbucket(Id::from_u64(2)).contains(Id::from_u64(2)));
        assert!(list.get_kbucket(Id::from_u64(3)).contains(Id::from_u64(3)));
    }

    #[test_log::test(tokio::test)]
    async fn server_shutdown_silences_the_endpoint() {
        let a = spawn(1).await;
        let addr = a.local_addr();
        let UdpDht { dht: _dht, server } = a;
        server.shutdown();
        // Give the accept loop a moment to wind down.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let client = UdpProtocol::with_timeout(
            addr.ip().to_string(),
            addr.port(),
            std::time::Duration::from_millis(150),
        );
        let caller = udp_contact(Id::from_u64(9), "127.0.0.1", 4000);
        let err = client.ping(caller).await.unwrap_err();
        assert!(matches!(err, udht_logic::RpcError::Timeout));
    }
}
