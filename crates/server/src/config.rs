use std::time::Duration;

use serde::{Deserialize, Serialize};

use strata::{DEFAULT_TICK_RATE, MatchConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub max_players_per_client: u8,
    pub client_timeout: Duration,
    /// Seconds between stats log lines, 0 to disable.
    pub stats_interval_secs: u32,
    pub game: MatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            max_players_per_client: 4,
            client_timeout: Duration::from_secs(10),
            stats_interval_secs: 10,
            game: MatchConfig::default(),
        }
    }
}
