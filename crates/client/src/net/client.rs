use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use strata::net::rand_u64;
use strata::{
    ClientSession, ConnectionState, FixedTimestep, Incoming, NetworkEndpoint, NetworkStats, Packet,
    PacketHeader, PacketType, SessionConfig, Tick,
};

use super::config::ClientConfig;
use super::input::ScriptedInput;

pub struct NetworkClient {
    endpoint: NetworkEndpoint,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    receiver: JoinHandle<()>,
    config: ClientConfig,
    state: ConnectionState,
    client_id: Option<u32>,
    client_salt: u64,
    session: Option<ClientSession>,
    timestep: Option<FixedTimestep>,
    input: ScriptedInput,
    send_sequence: u32,
    started: Instant,
    last_receive_time: Instant,
    last_request_time: Instant,
    last_ping_time: Instant,
    last_report_time: Instant,
    connection_start_time: Option<Instant>,
}

impl NetworkClient {
    pub async fn new(config: ClientConfig) -> io::Result<Self> {
        let endpoint = NetworkEndpoint::bind("0.0.0.0:0").await?;
        let (incoming, receiver) = endpoint.spawn_receiver();
        let now = Instant::now();

        Ok(Self {
            endpoint,
            incoming,
            receiver,
            state: ConnectionState::Disconnected,
            client_id: None,
            client_salt: rand_u64(),
            session: None,
            timestep: None,
            input: ScriptedInput::new(config.player_count),
            send_sequence: 0,
            started: now,
            last_receive_time: now,
            last_request_time: now,
            last_ping_time: now,
            last_report_time: now,
            connection_start_time: None,
            config,
        })
    }

    pub async fn connect(&mut self, server_addr: SocketAddr) -> io::Result<()> {
        log::info!("Connecting to {}", server_addr);

        self.endpoint.set_remote(server_addr);
        self.state = ConnectionState::Connecting;
        self.connection_start_time = Some(Instant::now());

        self.send_connection_request().await
    }

    pub async fn disconnect(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Connected {
            self.send(PacketType::Disconnect).await?;
        }

        self.reset();
        self.receiver.abort();
        Ok(())
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.client_id = None;
        self.client_salt = rand_u64();
        self.session = None;
        self.timestep = None;
        self.connection_start_time = None;
        self.input = ScriptedInput::new(self.config.player_count);
    }

    async fn send(&mut self, payload: PacketType) -> io::Result<()> {
        let header = PacketHeader::new(self.send_sequence);
        self.send_sequence = self.send_sequence.wrapping_add(1);
        self.endpoint.send(&Packet::new(header, payload)).await?;
        Ok(())
    }

    async fn send_connection_request(&mut self) -> io::Result<()> {
        self.last_request_time = Instant::now();
        self.send(PacketType::ConnectionRequest {
            client_salt: self.client_salt,
            player_count: self.config.player_count,
        })
        .await
    }

    pub async fn update(&mut self, delta_time: f32) -> Result<()> {
        self.process_network().await?;

        match self.state {
            ConnectionState::Connecting | ConnectionState::ChallengeResponse => {
                if let Some(start) = self.connection_start_time {
                    if start.elapsed() > Duration::from_secs(self.config.connection_timeout_secs) {
                        log::warn!("Connection timeout");
                        self.reset();
                        return Ok(());
                    }
                }
                if self.state == ConnectionState::Connecting
                    && self.last_request_time.elapsed().as_secs_f32() >= self.config.request_interval_secs
                {
                    self.send_connection_request().await?;
                }
            }
            ConnectionState::Connected => {
                self.run_ticks(delta_time).await?;

                if self.last_ping_time.elapsed().as_secs_f32() >= self.config.ping_interval_secs {
                    self.send_ping().await?;
                    self.last_ping_time = Instant::now();
                }

                if self.config.report_interval_secs > 0.0
                    && self.last_report_time.elapsed().as_secs_f32() >= self.config.report_interval_secs
                {
                    self.report();
                    self.last_report_time = Instant::now();
                }

                if self.last_receive_time.elapsed() > Duration::from_secs(self.config.connection_timeout_secs) {
                    log::warn!("Server connection lost");
                    self.reset();
                }
            }
            _ => {}
        }

        Ok(())
    }

    async fn run_ticks(&mut self, delta_time: f32) -> io::Result<()> {
        let Some(timestep) = self.timestep.as_mut() else {
            return Ok(());
        };
        timestep.accumulate(delta_time);

        while self.timestep.as_mut().is_some_and(|t| t.consume_tick()) {
            let inputs = self.input.next_inputs();
            let Some(session) = self.session.as_mut() else {
                break;
            };
            let message = session.tick(&inputs);
            self.send(PacketType::PlayersInput(message)).await?;
        }

        Ok(())
    }

    async fn send_ping(&mut self) -> io::Result<()> {
        let timestamp = self.started.elapsed().as_millis() as u64;
        self.send(PacketType::Ping { timestamp }).await
    }

    async fn process_network(&mut self) -> Result<()> {
        loop {
            let incoming = match self.incoming.try_recv() {
                Ok(incoming) => incoming,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => anyhow::bail!("receive task stopped"),
            };

            if Some(incoming.addr) != self.endpoint.remote_addr() {
                log::debug!("ignoring packet from unexpected peer {}", incoming.addr);
                continue;
            }

            self.endpoint.record_received(&incoming);
            self.last_receive_time = Instant::now();
            self.handle_payload(incoming.packet.payload).await?;
        }

        Ok(())
    }

    async fn handle_payload(&mut self, payload: PacketType) -> io::Result<()> {
        match payload {
            PacketType::ConnectionChallenge {
                server_salt,
                challenge,
            } => {
                self.handle_challenge(server_salt, challenge).await?;
            }
            PacketType::ConnectionAccepted {
                client_id,
                server_tick,
                tick_rate,
                layer_count,
            } => {
                self.handle_connection_accepted(client_id, server_tick, tick_rate, layer_count);
            }
            PacketType::ConnectionDenied { reason } => {
                log::warn!("Connection denied: {}", reason);
                self.reset();
            }
            PacketType::Pong { timestamp } => {
                let now = self.started.elapsed().as_millis() as u64;
                let rtt = Duration::from_millis(now.saturating_sub(timestamp));
                self.endpoint.stats_mut().record_rtt(rtt);
                log::debug!("Ping RTT: {} ms", rtt.as_millis());
            }
            PacketType::Disconnect => {
                log::info!("Disconnected by server");
                self.reset();
            }
            other => match self.session.as_mut() {
                Some(session) => session.handle_packet(other),
                None => log::debug!("match packet before connection accepted, dropped"),
            },
        }

        Ok(())
    }

    async fn handle_challenge(&mut self, server_salt: u64, challenge: u64) -> io::Result<()> {
        if self.state != ConnectionState::Connecting && self.state != ConnectionState::ChallengeResponse {
            return Ok(());
        }
        log::debug!("Received challenge from server");

        let expected_challenge = self.client_salt ^ server_salt;
        if challenge != expected_challenge {
            log::warn!("Challenge mismatch");
            return Ok(());
        }

        self.state = ConnectionState::ChallengeResponse;
        self.send(PacketType::ChallengeResponse {
            combined_salt: expected_challenge,
        })
        .await
    }

    fn handle_connection_accepted(&mut self, client_id: u32, server_tick: Tick, tick_rate: u32, layer_count: u16) {
        if self.state == ConnectionState::Connected {
            return;
        }
        log::info!(
            "Connected to server with client ID {} at tick {} ({} Hz, {} layers)",
            client_id,
            server_tick,
            tick_rate,
            layer_count
        );

        let session_config = SessionConfig {
            tick_rate,
            ..self.config.session.clone()
        };

        self.client_id = Some(client_id);
        self.state = ConnectionState::Connected;
        self.timestep = Some(FixedTimestep::new(tick_rate));
        self.session = Some(ClientSession::new(
            session_config,
            layer_count,
            self.config.player_count,
            server_tick,
        ));
    }

    /// Logs prediction health since the last report.
    pub fn report(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let stats = session.stats();
        let network = self.endpoint.stats();

        log::info!(
            "tick {} (handled {}): {} entities, rtt {:.1} ms, tick error {}, reconciled {} (missing {}, diverged {}, replayed {}), corrections {}/{} ignored, unresolved {}",
            session.local_tick(),
            session.handled_tick(),
            session.ctx().entity_count(),
            network.rtt_ms,
            session.estimator().average_tick_error(),
            stats.reconciliations,
            stats.missing_entries,
            stats.divergences,
            stats.replayed_ticks,
            stats.corrections_applied,
            stats.corrections_ignored,
            stats.unresolved_references
        );

        for (index, player) in session.players().iter().enumerate() {
            let position = player
                .controlled
                .and_then(|id| session.ctx().entity(id))
                .map(|entity| entity.position);
            log::info!("player {}: {:?} at {:?}", index, player.controlled, position);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn session(&self) -> Option<&ClientSession> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> NetworkStats {
        self.endpoint.stats()
    }
}
