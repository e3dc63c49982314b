//! UDP peer discovery.
//!
//! One broadcast-capable socket serves both directions: `probe()`
//! broadcasts `DISCOVER|<name>` to the subnet, and the listen loop
//! answers probes with a unicast `RESPONSE|<name>` while collecting
//! responses into the shared peer set. Datagrams from our own address
//! are ignored and malformed ones are dropped without comment.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::logger::Logger;
use crate::protocol::discovery::{MAX_DATAGRAM, PROBE, RESPONSE, SEPARATOR};

/// A remote host that answered a discovery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub host_name: String,
    pub address: IpAddr,
}

#[derive(Debug, PartialEq, Eq)]
enum Message<'a> {
    Probe(&'a str),
    Response(&'a str),
}

/// Parse a discovery datagram. Anything that is not exactly two
/// `|`-separated fields with a known prefix is discarded.
fn parse_message(buf: &[u8]) -> Option<Message<'_>> {
    let text = std::str::from_utf8(buf).ok()?;
    let mut fields = text.split(SEPARATOR);
    let kind = fields.next()?;
    let name = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    match kind {
        PROBE => Some(Message::Probe(name)),
        RESPONSE => Some(Message::Response(name)),
        _ => None,
    }
}

/// Best-effort local address, used to filter our own broadcasts. The
/// connect never sends a packet; it only selects the outbound route.
fn local_ip() -> Option<IpAddr> {
    let sock = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    sock.connect("8.8.8.8:80").ok()?;
    sock.local_addr().ok().map(|a| a.ip())
}

pub struct PeerDiscovery {
    socket: Arc<UdpSocket>,
    display_name: String,
    port: u16,
    local_addr: Option<IpAddr>,
    peers: Arc<RwLock<HashMap<IpAddr, Peer>>>,
}

impl PeerDiscovery {
    /// Bind the discovery socket. `port` 0 is allowed (tests).
    pub async fn bind(port: u16, display_name: &str) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .with_context(|| format!("bind discovery port {}", port))?;
        socket.set_broadcast(true).context("enable broadcast")?;
        let port = socket.local_addr().context("discovery local addr")?.port();
        Ok(Self {
            socket: Arc::new(socket),
            display_name: display_name.to_string(),
            port,
            local_addr: local_ip(),
            peers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start a discovery round: clear known peers and broadcast a
    /// probe. Responses arrive asynchronously via the listen loop.
    pub async fn probe(&self) -> Result<()> {
        self.peers.write().clear();
        let msg = format!("{}{}{}", PROBE, SEPARATOR, self.display_name);
        self.socket
            .send_to(msg.as_bytes(), (Ipv4Addr::BROADCAST, self.port))
            .await
            .context("broadcast discovery probe")?;
        Ok(())
    }

    /// Snapshot of the peer set, sorted by address for stable display.
    pub fn peers(&self) -> Vec<Peer> {
        let mut list: Vec<Peer> = self.peers.read().values().cloned().collect();
        list.sort_by_key(|p| p.address);
        list
    }

    #[cfg(test)]
    fn set_local_addr(&mut self, addr: Option<IpAddr>) {
        self.local_addr = addr;
    }

    fn record_response(&self, name: &str, from: IpAddr) {
        self.peers
            .write()
            .entry(from)
            .and_modify(|p| p.host_name = name.to_string())
            .or_insert_with(|| Peer {
                host_name: name.to_string(),
                address: from,
            });
    }

    async fn handle_datagram(&self, buf: &[u8], src: SocketAddr) {
        if Some(src.ip()) == self.local_addr {
            return;
        }
        match parse_message(buf) {
            Some(Message::Probe(_)) => {
                let reply = format!("{}{}{}", RESPONSE, SEPARATOR, self.display_name);
                let _ = self.socket.send_to(reply.as_bytes(), src).await;
            }
            Some(Message::Response(name)) => self.record_response(name, src.ip()),
            None => {}
        }
    }

    /// Run the listen loop until shutdown is signalled. Shutdown is a
    /// clean exit; only unexpected socket errors reach the logger.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, logger: Arc<dyn Logger>) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok((n, src)) => self.handle_datagram(&buf[..n], src).await,
                    Err(e) => {
                        if *shutdown.borrow() {
                            break;
                        }
                        logger.error("discovery", &e.to_string());
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_and_response() {
        assert_eq!(
            parse_message(b"DISCOVER|laptop"),
            Some(Message::Probe("laptop"))
        );
        assert_eq!(
            parse_message(b"RESPONSE|desk-01"),
            Some(Message::Response("desk-01"))
        );
    }

    #[test]
    fn rejects_malformed_datagrams() {
        assert_eq!(parse_message(b"DISCOVER"), None);
        assert_eq!(parse_message(b"DISCOVER|a|b"), None);
        assert_eq!(parse_message(b"HELLO|there"), None);
        assert_eq!(parse_message(&[0xff, 0xfe, b'|', b'x']), None);
    }

    #[tokio::test]
    async fn peer_set_is_unique_by_address() -> Result<()> {
        let disc = PeerDiscovery::bind(0, "me").await?;
        let addr: IpAddr = "192.168.1.20".parse().unwrap();
        disc.record_response("desk", addr);
        disc.record_response("desk-renamed", addr);
        disc.record_response("other", "192.168.1.21".parse().unwrap());

        let peers = disc.peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].host_name, "desk-renamed");
        Ok(())
    }

    #[tokio::test]
    async fn own_responses_are_ignored() -> Result<()> {
        let mut disc = PeerDiscovery::bind(0, "me").await?;
        let local: IpAddr = "192.168.1.9".parse().unwrap();
        disc.set_local_addr(Some(local));

        disc.handle_datagram(b"RESPONSE|me", SocketAddr::new(local, 40_000))
            .await;
        assert!(disc.peers().is_empty());

        let other: IpAddr = "192.168.1.10".parse().unwrap();
        disc.handle_datagram(b"RESPONSE|them", SocketAddr::new(other, 40_000))
            .await;
        assert_eq!(disc.peers().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn probe_clears_previous_round() -> Result<()> {
        let disc = PeerDiscovery::bind(0, "me").await?;
        disc.record_response("stale", "192.168.1.50".parse().unwrap());
        assert_eq!(disc.peers().len(), 1);
        // Broadcast may be unroutable in a sandboxed test environment;
        // the clearing side effect is what we assert on.
        let _ = disc.probe().await;
        assert!(disc.peers().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn answers_probe_and_records_response() -> Result<()> {
        let disc = PeerDiscovery::bind(0, "server").await?;
        let port = disc.port();

        let (tx, rx) = watch::channel(false);
        let disc = Arc::new(disc);
        let runner = disc.clone();
        let task = tokio::spawn(async move {
            runner.run(rx, Arc::new(crate::logger::NoopLogger)).await;
        });

        let probe_sock = UdpSocket::bind("127.0.0.1:0").await?;
        probe_sock
            .send_to(b"DISCOVER|client", ("127.0.0.1", port))
            .await?;
        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            probe_sock.recv_from(&mut buf),
        )
        .await??;
        assert_eq!(&buf[..n], b"RESPONSE|server");

        probe_sock
            .send_to(b"RESPONSE|client", ("127.0.0.1", port))
            .await?;
        // Give the listen loop a moment to upsert
        for _ in 0..50 {
            if !disc.peers().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(disc.peers().len(), 1);
        assert_eq!(disc.peers()[0].host_name, "client");

        tx.send(true)?;
        let _ = task.await;
        Ok(())
    }
}
