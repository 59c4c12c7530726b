use serde::{Deserialize, Serialize};

use strata::SessionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub player_count: u8,
    pub connection_timeout_secs: u64,
    /// Connection requests are resent at this interval until answered.
    pub request_interval_secs: f32,
    pub ping_interval_secs: f32,
    /// Seconds between reconciliation stat lines, 0 to disable.
    pub report_interval_secs: f32,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_count: 1,
            connection_timeout_secs: 10,
            request_interval_secs: 1.0,
            ping_interval_secs: 0.25,
            report_interval_secs: 5.0,
            session: SessionConfig::default(),
        }
    }
}
