use crate::input::PlayerInputData;
use crate::net::{LayerIndex, MatchStateEntity, ServerEntityId};
use crate::world::EntityId;

/// One per-entity update, carrying the data read at collection time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncEvent<T> {
    pub layer: LayerIndex,
    pub entity: EntityId,
    pub data: T,
}

impl<T> SyncEvent<T> {
    pub fn new(layer: LayerIndex, entity: EntityId, data: T) -> Self {
        Self {
            layer,
            entity,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsUpdate {
    pub mass: f32,
    pub moment_of_inertia: f32,
    pub is_sleeping: bool,
}

/// Batched per-category changes of one server tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncEvents {
    pub created: Vec<SyncEvent<()>>,
    pub destroyed: Vec<SyncEvent<ServerEntityId>>,
    pub died: Vec<SyncEvent<()>>,
    pub health: Vec<SyncEvent<u16>>,
    pub inputs: Vec<SyncEvent<PlayerInputData>>,
    pub physics: Vec<SyncEvent<PhysicsUpdate>>,
    pub scale: Vec<SyncEvent<f32>>,
    pub weapons: Vec<SyncEvent<Option<EntityId>>>,
    pub animations: Vec<SyncEvent<u8>>,
    pub movement: Vec<SyncEvent<MatchStateEntity>>,
}

impl SyncEvents {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.destroyed.is_empty()
            && self.died.is_empty()
            && self.health.is_empty()
            && self.inputs.is_empty()
            && self.physics.is_empty()
            && self.scale.is_empty()
            && self.weapons.is_empty()
            && self.animations.is_empty()
            && self.movement.is_empty()
    }
}
