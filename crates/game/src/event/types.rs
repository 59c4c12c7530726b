use crate::net::{LayerIndex, PlayerIndex, ServerEntityId};
use crate::world::EntityId;

/// Component-level change notifications emitted by the match context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    EntityCreated {
        layer: LayerIndex,
        entity: EntityId,
    },
    EntityDestroyed {
        layer: LayerIndex,
        entity: EntityId,
        server_id: Option<ServerEntityId>,
    },
    EntityDied {
        layer: LayerIndex,
        entity: EntityId,
    },
    HealthChanged {
        layer: LayerIndex,
        entity: EntityId,
    },
    InputsChanged {
        layer: LayerIndex,
        entity: EntityId,
    },
    PhysicsChanged {
        layer: LayerIndex,
        entity: EntityId,
    },
    ScaleChanged {
        layer: LayerIndex,
        entity: EntityId,
    },
    WeaponChanged {
        layer: LayerIndex,
        entity: EntityId,
    },
    AnimationChanged {
        layer: LayerIndex,
        entity: EntityId,
    },
    /// A non-physical entity was moved and needs a movement update.
    MovementInvalidated {
        layer: LayerIndex,
        entity: EntityId,
    },
    PlayerControlledEntityChanged {
        player: PlayerIndex,
        layer: LayerIndex,
        entity: Option<EntityId>,
    },
}

impl MatchEvent {
    pub fn layer(&self) -> LayerIndex {
        match self {
            Self::EntityCreated { layer, .. }
            | Self::EntityDestroyed { layer, .. }
            | Self::EntityDied { layer, .. }
            | Self::HealthChanged { layer, .. }
            | Self::InputsChanged { layer, .. }
            | Self::PhysicsChanged { layer, .. }
            | Self::ScaleChanged { layer, .. }
            | Self::WeaponChanged { layer, .. }
            | Self::AnimationChanged { layer, .. }
            | Self::MovementInvalidated { layer, .. }
            | Self::PlayerControlledEntityChanged { layer, .. } => *layer,
        }
    }

    /// Calls the sink hook matching this event. Pure state changes have no hook.
    pub fn forward_to(&self, sink: &mut dyn MatchEventSink) {
        match self {
            Self::EntityCreated { layer, entity } => sink.on_entity_created(*layer, *entity),
            Self::EntityDestroyed { layer, entity, .. } => {
                sink.on_entity_destroyed(*layer, *entity)
            }
            Self::EntityDied { layer, entity } => sink.on_entity_died(*layer, *entity),
            Self::PlayerControlledEntityChanged { player, entity, .. } => {
                sink.on_player_controlled_entity_changed(*player, *entity)
            }
            _ => {}
        }
    }
}

/// Gamemode hooks. Every method defaults to doing nothing.
pub trait MatchEventSink {
    fn on_entity_created(&mut self, _layer: LayerIndex, _entity: EntityId) {}

    fn on_entity_destroyed(&mut self, _layer: LayerIndex, _entity: EntityId) {}

    fn on_entity_died(&mut self, _layer: LayerIndex, _entity: EntityId) {}

    fn on_player_controlled_entity_changed(
        &mut self,
        _player: PlayerIndex,
        _entity: Option<EntityId>,
    ) {
    }
}

#[derive(Debug, Default)]
pub struct NullSink;

impl MatchEventSink for NullSink {}

/// Records forwarded hooks, in call order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub created: Vec<EntityId>,
    pub destroyed: Vec<EntityId>,
    pub died: Vec<EntityId>,
    pub controlled: Vec<(PlayerIndex, Option<EntityId>)>,
}

impl MatchEventSink for RecordingSink {
    fn on_entity_created(&mut self, _layer: LayerIndex, entity: EntityId) {
        self.created.push(entity);
    }

    fn on_entity_destroyed(&mut self, _layer: LayerIndex, entity: EntityId) {
        self.destroyed.push(entity);
    }

    fn on_entity_died(&mut self, _layer: LayerIndex, entity: EntityId) {
        self.died.push(entity);
    }

    fn on_player_controlled_entity_changed(
        &mut self,
        player: PlayerIndex,
        entity: Option<EntityId>,
    ) {
        self.controlled.push((player, entity));
    }
}
