use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use strata::net::PlayersInput;
use strata::{
    ConnectionManager, ConnectionState, FixedTimestep, Incoming, NetworkEndpoint, NetworkStats,
    Packet, PacketHeader, PacketType, ServerMatch,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, MatchLog, ServerEvent};

pub struct GameServer {
    endpoint: NetworkEndpoint,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    receiver: JoinHandle<()>,
    connections: ConnectionManager,
    config: ServerConfig,
    game: ServerMatch,
    timestep: FixedTimestep,
    last_tick_time: Instant,
    match_log: MatchLog,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub async fn bind(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let endpoint = NetworkEndpoint::bind(bind_addr).await?;
        let (incoming, receiver) = endpoint.spawn_receiver();

        let mut connections = ConnectionManager::with_timeout(config.max_clients, config.client_timeout);
        connections.set_max_players_per_client(config.max_players_per_client);

        let mut game_config = config.game.clone();
        game_config.tick_rate = config.tick_rate;
        let mut game = ServerMatch::new(game_config);
        let wanderers = game.spawn_wanderers(config.game.demo_entities);
        if !wanderers.is_empty() {
            log::info!("spawned {} wandering entities", wanderers.len());
        }

        Ok(Self {
            endpoint,
            incoming,
            receiver,
            connections,
            timestep: FixedTimestep::new(config.tick_rate),
            game,
            last_tick_time: Instant::now(),
            match_log: MatchLog::default(),
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub async fn shutdown_connections(&mut self) {
        let client_ids: Vec<u32> = self.connections.iter().map(|c| c.client_id).collect();
        for client_id in client_ids {
            self.kick_client(client_id).await;
        }
        self.receiver.abort();
    }

    pub async fn kick_client(&mut self, client_id: u32) {
        if let Some(client) = self.connections.get_mut(client_id) {
            let addr = client.addr;
            let packet = Packet::new(client.next_header(), PacketType::Disconnect);
            if let Err(e) = self.endpoint.send_to(&packet, addr).await {
                log::warn!("failed to notify {} of disconnect: {}", addr, e);
            }
        }

        if self.connections.remove(client_id).is_some() {
            self.game.remove_client(client_id);
            self.pending_events.push_back(ServerEvent::ClientDisconnected {
                client_id,
                reason: DisconnectReason::Kicked,
            });
        }
    }

    /// Drains the network, then runs as many fixed ticks as have elapsed.
    pub async fn tick_once(&mut self) -> Result<()> {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.timestep.accumulate(delta.as_secs_f32());

        self.process_network().await?;

        while self.timestep.consume_tick() {
            self.tick().await?;
        }

        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        let packets = self.game.tick(&mut self.match_log)?;
        for (client_id, payload) in packets {
            self.send_to_client(client_id, payload).await;
        }

        for client_id in self.connections.cleanup_timed_out() {
            self.game.remove_client(client_id);
            self.pending_events.push_back(ServerEvent::ClientDisconnected {
                client_id,
                reason: DisconnectReason::Timeout,
            });
        }

        let interval = self.config.stats_interval_secs * self.config.tick_rate;
        if interval > 0 && self.game.server_tick() as u32 % interval == 0 {
            let stats = self.stats();
            log::info!(
                "tick {}: {} clients, {} entities, {} packets out ({} bytes), {} in, {} rejected",
                stats.tick,
                stats.client_count,
                stats.entity_count,
                stats.network_stats.packets_sent,
                stats.network_stats.bytes_sent,
                stats.network_stats.packets_received,
                stats.network_stats.packets_rejected
            );
        }

        Ok(())
    }

    async fn send_to_client(&mut self, client_id: u32, payload: PacketType) {
        let Some(client) = self.connections.get_mut(client_id) else {
            return;
        };
        let addr = client.addr;
        let packet = Packet::new(client.next_header(), payload);

        if let Err(e) = self.endpoint.send_to(&packet, addr).await {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("failed to send to client {}: {}", client_id, e),
            });
        }
    }

    async fn send_to_addr(&mut self, addr: SocketAddr, payload: PacketType) -> io::Result<()> {
        let header = match self.connections.get_by_addr_mut(&addr) {
            Some(client) => client.next_header(),
            None => PacketHeader::new(0),
        };
        self.endpoint.send_to(&Packet::new(header, payload), addr).await?;
        Ok(())
    }

    async fn process_network(&mut self) -> Result<()> {
        loop {
            let incoming = match self.incoming.try_recv() {
                Ok(incoming) => incoming,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    anyhow::bail!("receive task stopped");
                }
            };

            self.endpoint.record_received(&incoming);
            if let Err(e) = self.handle_packet(incoming.packet, incoming.addr).await {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("network error with {}: {}", incoming.addr, e),
                });
            }
        }

        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> io::Result<()> {
        match packet.payload {
            PacketType::ConnectionRequest {
                client_salt,
                player_count,
            } => {
                self.handle_connection_request(addr, client_salt, player_count)
                    .await?;
            }
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(addr, combined_salt).await?;
            }
            PacketType::PlayersInput(input) => {
                self.handle_players_input(addr, input).await?;
            }
            PacketType::Ping { timestamp } => {
                self.send_to_addr(addr, PacketType::Pong { timestamp }).await?;
            }
            PacketType::Disconnect => {
                self.handle_disconnect(addr);
            }
            other => {
                log::debug!("unexpected packet from {}: {:?}", addr, other);
            }
        }

        if let Some(client) = self.connections.get_by_addr_mut(&addr) {
            client.touch();
        }

        Ok(())
    }

    async fn handle_connection_request(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
        player_count: u8,
    ) -> io::Result<()> {
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });

        let client = match self
            .connections
            .handle_request(addr, client_salt, player_count)
        {
            Ok(client) => client,
            Err(reason) => {
                let reason = reason.to_string();
                self.send_to_addr(
                    addr,
                    PacketType::ConnectionDenied {
                        reason: reason.clone(),
                    },
                )
                .await?;
                self.pending_events
                    .push_back(ServerEvent::ConnectionDenied { addr, reason });
                return Ok(());
            }
        };

        let payload = PacketType::ConnectionChallenge {
            server_salt: client.server_salt,
            challenge: client.combined_salt(),
        };
        self.send_to_addr(addr, payload).await
    }

    async fn handle_challenge_response(&mut self, addr: SocketAddr, combined_salt: u64) -> io::Result<()> {
        let client_id = match self
            .connections
            .handle_challenge_response(addr, combined_salt)
        {
            Ok(client_id) => client_id,
            Err(e) => {
                self.pending_events.push_back(ServerEvent::Error {
                    message: e.to_string(),
                });
                return Ok(());
            }
        };

        // A repeated response (lost ConnectionAccepted) must not respawn the players.
        if self.game.client(client_id).is_none() {
            let player_count = self
                .connections
                .get(client_id)
                .map_or(1, |client| client.player_count);
            let entities = self.game.add_client(client_id, player_count);
            self.pending_events.push_back(ServerEvent::ClientConnected {
                client_id,
                addr,
                entities,
            });
        }

        let payload = PacketType::ConnectionAccepted {
            client_id,
            server_tick: self.game.server_tick(),
            tick_rate: self.config.tick_rate,
            layer_count: self.game.ctx().layer_count(),
        };
        self.send_to_addr(addr, payload).await
    }

    async fn handle_players_input(&mut self, addr: SocketAddr, input: PlayersInput) -> io::Result<()> {
        let Some(client) = self.connections.get_by_addr(&addr) else {
            return Ok(());
        };
        if client.state != ConnectionState::Connected {
            return Ok(());
        }

        let client_id = client.client_id;
        if let Some(correction) = self.game.handle_players_input(client_id, input) {
            self.send_to_addr(addr, PacketType::InputTimingCorrection(correction))
                .await?;
        }
        Ok(())
    }

    fn handle_disconnect(&mut self, addr: SocketAddr) {
        if let Some(client) = self.connections.remove_by_addr(&addr) {
            self.game.remove_client(client.client_id);
            self.pending_events.push_back(ServerEvent::ClientDisconnected {
                client_id: client.client_id,
                reason: DisconnectReason::Graceful,
            });
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.game.server_tick(),
            client_count: self.connections.connected_count(),
            max_clients: self.config.max_clients,
            entity_count: self.game.ctx().entity_count(),
            network_stats: self.endpoint.stats(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u16,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub network_stats: NetworkStats,
}
