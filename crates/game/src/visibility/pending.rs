use std::collections::BTreeMap;

use crate::input::PlayerInputData;
use crate::net::{LayerIndex, MatchStateEntity};
use crate::sync::{PhysicsUpdate, SyncEvent};
use crate::world::EntityId;

/// Per-entity updates waiting for the next flush. A newer update for the
/// same entity replaces the older one.
#[derive(Debug, Default)]
pub(super) struct PendingEvents {
    pub deaths: BTreeMap<EntityId, LayerIndex>,
    pub health: BTreeMap<EntityId, SyncEvent<u16>>,
    pub inputs: BTreeMap<EntityId, SyncEvent<PlayerInputData>>,
    pub animations: BTreeMap<EntityId, SyncEvent<u8>>,
    pub physics: BTreeMap<EntityId, SyncEvent<PhysicsUpdate>>,
    pub scale: BTreeMap<EntityId, SyncEvent<f32>>,
    pub weapons: BTreeMap<EntityId, SyncEvent<Option<EntityId>>>,
    pub movement: BTreeMap<EntityId, SyncEvent<MatchStateEntity>>,
}

impl PendingEvents {
    pub fn is_empty(&self) -> bool {
        self.deaths.is_empty()
            && self.health.is_empty()
            && self.inputs.is_empty()
            && self.animations.is_empty()
            && self.physics.is_empty()
            && self.scale.is_empty()
            && self.weapons.is_empty()
            && self.movement.is_empty()
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        self.deaths.remove(&id);
        self.health.remove(&id);
        self.inputs.remove(&id);
        self.animations.remove(&id);
        self.physics.remove(&id);
        self.scale.remove(&id);
        self.weapons.remove(&id);
        self.movement.remove(&id);
    }

    pub fn remove_layer(&mut self, layer: LayerIndex) {
        self.deaths.retain(|_, l| *l != layer);
        self.health.retain(|_, e| e.layer != layer);
        self.inputs.retain(|_, e| e.layer != layer);
        self.animations.retain(|_, e| e.layer != layer);
        self.physics.retain(|_, e| e.layer != layer);
        self.scale.retain(|_, e| e.layer != layer);
        self.weapons.retain(|_, e| e.layer != layer);
        self.movement.retain(|_, e| e.layer != layer);
    }

    /// Moves every event of `id` from `self` into `target`, newer events in `target` winning.
    pub fn transfer(&mut self, id: EntityId, target: &mut PendingEvents) {
        if let Some(layer) = self.deaths.remove(&id) {
            target.deaths.entry(id).or_insert(layer);
        }
        move_entry(&mut self.health, &mut target.health, id);
        move_entry(&mut self.inputs, &mut target.inputs, id);
        move_entry(&mut self.animations, &mut target.animations, id);
        move_entry(&mut self.physics, &mut target.physics, id);
        move_entry(&mut self.scale, &mut target.scale, id);
        move_entry(&mut self.weapons, &mut target.weapons, id);
        move_entry(&mut self.movement, &mut target.movement, id);
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.deaths
            .keys()
            .chain(self.health.keys())
            .chain(self.inputs.keys())
            .chain(self.animations.keys())
            .chain(self.physics.keys())
            .chain(self.scale.keys())
            .chain(self.weapons.keys())
            .chain(self.movement.keys())
            .copied()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn move_entry<T>(
    from: &mut BTreeMap<EntityId, SyncEvent<T>>,
    to: &mut BTreeMap<EntityId, SyncEvent<T>>,
    id: EntityId,
) {
    if let Some(event) = from.remove(&id) {
        to.entry(id).or_insert(event);
    }
}
