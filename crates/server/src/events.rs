use std::net::SocketAddr;

use strata::EntityId;
use strata::MatchEventSink;
use strata::net::{LayerIndex, PlayerIndex};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
    },
    ClientConnected {
        client_id: u32,
        addr: SocketAddr,
        entities: Vec<EntityId>,
    },
    ClientDisconnected {
        client_id: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}

/// Gamemode hooks of the headless server: everything is logged.
#[derive(Debug, Default)]
pub struct MatchLog {
    pub created: u64,
    pub destroyed: u64,
}

impl MatchEventSink for MatchLog {
    fn on_entity_created(&mut self, layer: LayerIndex, entity: EntityId) {
        self.created += 1;
        log::debug!("entity {} created on layer {}", entity, layer);
    }

    fn on_entity_destroyed(&mut self, layer: LayerIndex, entity: EntityId) {
        self.destroyed += 1;
        log::debug!("entity {} destroyed on layer {}", entity, layer);
    }

    fn on_entity_died(&mut self, layer: LayerIndex, entity: EntityId) {
        log::info!("entity {} died on layer {}", entity, layer);
    }

    fn on_player_controlled_entity_changed(&mut self, player: PlayerIndex, entity: Option<EntityId>) {
        log::debug!("player {} now controls {:?}", player, entity);
    }
}
