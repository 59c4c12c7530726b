use std::collections::HashMap;

use crate::net::{LayerIndex, ServerEntityId};

use super::arena::{Arena, Handle};
use super::entity::{Entity, EntityId};

/// One layer's entity storage. Entities are inserted and removed only through
/// [`super::MatchContext`], which owns the unique id table.
#[derive(Debug)]
pub struct Layer {
    index: LayerIndex,
    entities: Arena<Entity>,
    server_ids: HashMap<ServerEntityId, EntityId>,
    next_server_id: ServerEntityId,
    enabled: bool,
    predicted: bool,
}

impl Layer {
    pub fn new(index: LayerIndex) -> Self {
        Self {
            index,
            entities: Arena::new(),
            server_ids: HashMap::new(),
            next_server_id: 1,
            enabled: false,
            predicted: false,
        }
    }

    pub fn index(&self) -> LayerIndex {
        self.index
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_predicted(&self) -> bool {
        self.predicted
    }

    pub fn set_predicted(&mut self, predicted: bool) {
        self.predicted = predicted;
    }

    pub fn get(&self, handle: Handle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Entity> {
        self.entities.get_mut(handle)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().map(|(_, entity)| entity)
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut().map(|(_, entity)| entity)
    }

    pub fn handles(&self) -> impl Iterator<Item = (Handle, &Entity)> {
        self.entities.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn resolve_server_id(&self, server_id: ServerEntityId) -> Option<EntityId> {
        self.server_ids.get(&server_id).copied()
    }

    pub(super) fn allocate_server_id(&mut self) -> ServerEntityId {
        let id = self.next_server_id;
        self.next_server_id = self.next_server_id.wrapping_add(1).max(1);
        id
    }

    pub(super) fn insert(&mut self, entity: Entity) -> Handle {
        if let Some(server_id) = entity.server_id {
            if !entity.unique_id.is_clientside() {
                self.server_ids.insert(server_id, entity.unique_id);
            }
        }
        self.entities.insert(entity)
    }

    pub(super) fn remove(&mut self, handle: Handle) -> Option<Entity> {
        let entity = self.entities.remove(handle)?;
        if let Some(server_id) = entity.server_id {
            if self.server_ids.get(&server_id) == Some(&entity.unique_id) {
                self.server_ids.remove(&server_id);
            }
        }
        Some(entity)
    }
}
