use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::{MAX_PACKET_SIZE, Packet};
use super::stats::NetworkStats;

/// A decoded datagram handed from the receive task to the tick loop.
#[derive(Debug)]
pub struct Incoming {
    pub packet: Packet,
    pub addr: SocketAddr,
    pub size: usize,
}

/// UDP socket shared between the tick loop (sending) and a receive task.
pub struct NetworkEndpoint {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    stats: NetworkStats,
    rejected: Arc<AtomicU64>,
}

impl NetworkEndpoint {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            remote_addr: None,
            stats: NetworkStats::default(),
            rejected: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = self.stats.clone();
        stats.packets_rejected = self.rejected.load(Ordering::Relaxed);
        stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    pub async fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let data = packet
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("packet of {} bytes exceeds MTU", data.len()),
            ));
        }

        let bytes = self.socket.send_to(&data, addr).await?;
        self.stats.record_sent(bytes);

        Ok(bytes)
    }

    pub async fn send(&mut self, packet: &Packet) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        self.send_to(packet, addr).await
    }

    /// Accounts a datagram drained from the receive channel.
    pub fn record_received(&mut self, incoming: &Incoming) {
        self.stats.record_received(incoming.size);
    }

    /// Spawns the task that decodes datagrams into the returned channel. The
    /// task ends when the receiver is dropped or the socket fails.
    pub fn spawn_receiver(&self) -> (mpsc::UnboundedReceiver<Incoming>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Arc::clone(&self.socket);
        let rejected = Arc::clone(&self.rejected);

        let handle = tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                let (size, addr) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                    Err(e) => {
                        log::error!("receive failed: {}", e);
                        break;
                    }
                };

                let packet = match Packet::deserialize(&buffer[..size]) {
                    Ok(packet) if packet.header.is_valid() => packet,
                    Ok(_) => {
                        log::debug!("dropping packet from {} with bad header", addr);
                        rejected.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    Err(e) => {
                        log::debug!("dropping malformed packet from {}: {}", addr, e);
                        rejected.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                if tx.send(Incoming { packet, addr, size }).is_err() {
                    break;
                }
            }
        });

        (rx, handle)
    }
}
