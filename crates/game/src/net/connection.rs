use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::protocol::PacketHeader;
use super::stats::rand_u64;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
    Disconnecting,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("server full ({0} clients)")]
    ServerFull(usize),
    #[error("no pending connection from {0}")]
    UnknownClient(SocketAddr),
    #[error("challenge salt mismatch from {0}")]
    SaltMismatch(SocketAddr),
    #[error("client {0} requested {1} local players, at most {2} allowed")]
    TooManyPlayers(SocketAddr, u8, u8),
}

#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub client_id: u32,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub player_count: u8,
    pub last_receive_time: Instant,
    pub send_sequence: u32,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, client_id: u32, client_salt: u64, player_count: u8) -> Self {
        Self {
            addr,
            client_id,
            state: ConnectionState::Connecting,
            client_salt,
            server_salt: rand_u64(),
            player_count,
            last_receive_time: Instant::now(),
            send_sequence: 0,
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn next_header(&mut self) -> PacketHeader {
        let header = PacketHeader::new(self.send_sequence);
        self.send_sequence = self.send_sequence.wrapping_add(1);
        header
    }
}

/// Server-side table of clients, addressable by id and by address.
#[derive(Debug)]
pub struct ConnectionManager {
    clients_by_addr: HashMap<SocketAddr, u32>,
    clients: HashMap<u32, ClientConnection>,
    next_client_id: u32,
    max_clients: usize,
    max_players_per_client: u8,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            max_players_per_client: 4,
            timeout,
        }
    }

    pub fn set_max_players_per_client(&mut self, max: u8) {
        self.max_players_per_client = max;
    }

    /// First handshake step: registers (or refreshes) a pending connection.
    pub fn handle_request(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
        player_count: u8,
    ) -> Result<&mut ClientConnection, ConnectionError> {
        if player_count == 0 || player_count > self.max_players_per_client {
            return Err(ConnectionError::TooManyPlayers(
                addr,
                player_count,
                self.max_players_per_client,
            ));
        }

        let client_id = match self.clients_by_addr.get(&addr) {
            Some(&client_id) => client_id,
            None => {
                if self.clients.len() >= self.max_clients {
                    return Err(ConnectionError::ServerFull(self.max_clients));
                }

                let client_id = self.next_client_id;
                self.next_client_id += 1;

                let connection = ClientConnection::new(addr, client_id, client_salt, player_count);
                self.clients.insert(client_id, connection);
                self.clients_by_addr.insert(addr, client_id);
                client_id
            }
        };

        let connection = self
            .clients
            .get_mut(&client_id)
            .ok_or(ConnectionError::UnknownClient(addr))?;
        connection.touch();
        Ok(connection)
    }

    /// Second handshake step. Returns the client id once the salt checks out.
    pub fn handle_challenge_response(
        &mut self,
        addr: SocketAddr,
        combined_salt: u64,
    ) -> Result<u32, ConnectionError> {
        let connection = self
            .get_by_addr_mut(&addr)
            .ok_or(ConnectionError::UnknownClient(addr))?;

        if connection.combined_salt() != combined_salt {
            return Err(ConnectionError::SaltMismatch(addr));
        }

        connection.state = ConnectionState::Connected;
        connection.touch();
        Ok(connection.client_id)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientConnection> {
        self.clients_by_addr
            .get(addr)
            .and_then(|id| self.clients.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientConnection> {
        let id = self.clients_by_addr.get(addr)?;
        self.clients.get_mut(id)
    }

    pub fn get(&self, client_id: u32) -> Option<&ClientConnection> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut ClientConnection> {
        self.clients.get_mut(&client_id)
    }

    pub fn remove(&mut self, client_id: u32) -> Option<ClientConnection> {
        let conn = self.clients.remove(&client_id)?;
        self.clients_by_addr.remove(&conn.addr);
        Some(conn)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<ClientConnection> {
        let client_id = self.clients_by_addr.remove(addr)?;
        self.clients.remove(&client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientConnection> {
        self.clients.values_mut()
    }

    pub fn cleanup_timed_out(&mut self) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        for id in &timed_out {
            self.remove(*id);
        }

        timed_out
    }

    pub fn connected_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn handshake_connects() {
        let mut manager = ConnectionManager::new(4);
        let combined = manager.handle_request(addr(1000), 42, 1).unwrap().combined_salt();

        assert_eq!(manager.connected_count(), 0);
        let client_id = manager.handle_challenge_response(addr(1000), combined).unwrap();
        assert_eq!(manager.get(client_id).unwrap().state, ConnectionState::Connected);
        assert_eq!(manager.connected_count(), 1);
    }

    #[test]
    fn repeated_request_reuses_slot() {
        let mut manager = ConnectionManager::new(4);
        let first = manager.handle_request(addr(1000), 1, 1).unwrap().client_id;
        let second = manager.handle_request(addr(1000), 1, 1).unwrap().client_id;
        assert_eq!(first, second);
        assert_eq!(manager.total_count(), 1);
    }

    #[test]
    fn rejects_bad_salt_and_full_server() {
        let mut manager = ConnectionManager::new(1);
        manager.handle_request(addr(1000), 7, 1).unwrap();

        assert_eq!(
            manager.handle_challenge_response(addr(1000), 0xdead),
            Err(ConnectionError::SaltMismatch(addr(1000)))
        );
        assert_eq!(
            manager.handle_request(addr(1001), 7, 1).map(|c| c.client_id),
            Err(ConnectionError::ServerFull(1))
        );
        assert!(matches!(
            manager.handle_request(addr(1000), 7, 9),
            Err(ConnectionError::TooManyPlayers(..))
        ));
    }

    #[test]
    fn timeouts_are_removed() {
        let mut manager = ConnectionManager::with_timeout(4, Duration::ZERO);
        let id = manager.handle_request(addr(1000), 7, 1).unwrap().client_id;
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(manager.cleanup_timed_out(), vec![id]);
        assert!(manager.get_by_addr(&addr(1000)).is_none());
    }
}
