use std::collections::HashMap;

use glam::Vec2;

use crate::event::{EventQueue, MatchEvent};
use crate::input::PlayerInputData;
use crate::net::{EntityDescriptor, HealthData, LayerIndex, PhysicsProperties, ServerEntityId};

use super::arena::Handle;
use super::entity::{CLIENTSIDE_ID_BASE, Entity, EntityId, PhysicsBody};
use super::layer::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Assigns unique ids and per-layer server ids.
    Server,
    /// Mirrors ids received from the server, allocates clientside ids only.
    Client,
}

/// All mutable state of one match, passed explicitly into every core operation.
#[derive(Debug)]
pub struct MatchContext {
    authority: Authority,
    layers: Vec<Layer>,
    unique_ids: HashMap<EntityId, (LayerIndex, Handle)>,
    next_entity_id: u64,
    next_clientside_id: u64,
    events: EventQueue,
}

impl MatchContext {
    pub fn new(authority: Authority, layer_count: LayerIndex) -> Self {
        Self {
            authority,
            layers: (0..layer_count).map(Layer::new).collect(),
            unique_ids: HashMap::new(),
            next_entity_id: 1,
            next_clientside_id: CLIENTSIDE_ID_BASE,
            events: EventQueue::new(),
        }
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn layer_count(&self) -> LayerIndex {
        self.layers.len() as LayerIndex
    }

    /// Panics on an out-of-range index: layer topology is fixed for the match's lifetime.
    pub fn layer(&self, index: LayerIndex) -> &Layer {
        assert!(
            (index as usize) < self.layers.len(),
            "layer index {} out of range ({} layers)",
            index,
            self.layers.len()
        );
        &self.layers[index as usize]
    }

    pub fn layer_mut(&mut self, index: LayerIndex) -> &mut Layer {
        assert!(
            (index as usize) < self.layers.len(),
            "layer index {} out of range ({} layers)",
            index,
            self.layers.len()
        );
        &mut self.layers[index as usize]
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn allocate_entity_id(&mut self) -> EntityId {
        debug_assert_eq!(self.authority, Authority::Server);
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }

    pub fn allocate_clientside_id(&mut self) -> EntityId {
        let id = EntityId(self.next_clientside_id);
        self.next_clientside_id += 1;
        id
    }

    /// Inserts an entity and registers it in the unique id table.
    ///
    /// On the server, non-clientside entities get a fresh per-layer server id.
    /// An entity already registered under the same unique id is destroyed first.
    pub fn create_entity(&mut self, layer: LayerIndex, mut entity: Entity) -> EntityId {
        let unique_id = entity.unique_id;

        if self.unique_ids.contains_key(&unique_id) {
            log::warn!("entity {} created twice, replacing previous instance", unique_id);
            self.destroy_entity(unique_id);
        }

        if self.authority == Authority::Server && !unique_id.is_clientside() {
            entity.server_id = Some(self.layer_mut(layer).allocate_server_id());
            if unique_id.0 >= self.next_entity_id {
                self.next_entity_id = unique_id.0 + 1;
            }
        }

        let handle = self.layer_mut(layer).insert(entity);
        self.unique_ids.insert(unique_id, (layer, handle));
        self.events.push(MatchEvent::EntityCreated {
            layer,
            entity: unique_id,
        });

        unique_id
    }

    pub fn destroy_entity(&mut self, id: EntityId) -> Option<Entity> {
        let (layer, handle) = self.unique_ids.remove(&id)?;
        let entity = self.layer_mut(layer).remove(handle)?;

        self.events.push(MatchEvent::EntityDestroyed {
            layer,
            entity: id,
            server_id: entity.server_id,
        });

        Some(entity)
    }

    /// Destroys every entity of a layer without emitting per-entity destroy packets upstream.
    pub fn clear_layer(&mut self, layer: LayerIndex) -> usize {
        let ids: Vec<EntityId> = self.layer(layer).entities().map(|e| e.unique_id).collect();
        for id in &ids {
            self.destroy_entity(*id);
        }
        ids.len()
    }

    pub fn locate(&self, id: EntityId) -> Option<(LayerIndex, Handle)> {
        self.unique_ids.get(&id).copied()
    }

    pub fn layer_of(&self, id: EntityId) -> Option<LayerIndex> {
        self.unique_ids.get(&id).map(|(layer, _)| *layer)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.unique_ids.contains_key(&id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        let (layer, handle) = self.locate(id)?;
        self.layers[layer as usize].get(handle)
    }

    /// Raw mutable access; changes made this way are not reported to the sync system.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let (layer, handle) = self.locate(id)?;
        self.layers[layer as usize].get_mut(handle)
    }

    pub fn resolve_server_id(&self, layer: LayerIndex, server_id: ServerEntityId) -> Option<EntityId> {
        self.layer(layer).resolve_server_id(server_id)
    }

    pub fn server_id_of(&self, id: EntityId) -> Option<ServerEntityId> {
        self.entity(id).and_then(|e| e.server_id)
    }

    pub fn entity_count(&self) -> usize {
        self.unique_ids.len()
    }

    pub fn push_event(&mut self, event: MatchEvent) {
        self.events.push(event);
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = MatchEvent> + '_ {
        self.events.drain()
    }

    pub fn pending_events(&self) -> impl Iterator<Item = &MatchEvent> {
        self.events.iter()
    }

    fn modify<F>(&mut self, id: EntityId, f: F) -> Option<LayerIndex>
    where
        F: FnOnce(&mut Entity) -> bool,
    {
        let (layer, handle) = self.locate(id)?;
        let entity = self.layers[layer as usize].get_mut(handle)?;
        f(entity).then_some(layer)
    }

    pub fn set_health(&mut self, id: EntityId, current: u16) -> bool {
        let layer = self.modify(id, |e| match e.health.as_mut() {
            Some(health) if health.current != current => {
                health.current = current.min(health.max);
                true
            }
            _ => false,
        });
        if let Some(layer) = layer {
            self.events.push(MatchEvent::HealthChanged { layer, entity: id });
        }
        layer.is_some()
    }

    /// Marks an entity dead and zeroes its health.
    pub fn kill(&mut self, id: EntityId) -> bool {
        let layer = self.modify(id, |e| {
            if e.dead {
                return false;
            }
            e.dead = true;
            if let Some(health) = e.health.as_mut() {
                health.current = 0;
            }
            true
        });
        if let Some(layer) = layer {
            self.events.push(MatchEvent::EntityDied { layer, entity: id });
        }
        layer.is_some()
    }

    pub fn set_inputs(&mut self, id: EntityId, inputs: PlayerInputData) -> bool {
        let layer = self.modify(id, |e| {
            if e.inputs == Some(inputs) {
                return false;
            }
            e.inputs = Some(inputs);
            true
        });
        if let Some(layer) = layer {
            self.events.push(MatchEvent::InputsChanged { layer, entity: id });
        }
        layer.is_some()
    }

    pub fn set_scale(&mut self, id: EntityId, scale: f32) -> bool {
        let layer = self.modify(id, |e| {
            if e.scale == scale {
                return false;
            }
            e.scale = scale;
            true
        });
        if let Some(layer) = layer {
            self.events.push(MatchEvent::ScaleChanged { layer, entity: id });
        }
        layer.is_some()
    }

    pub fn set_animation(&mut self, id: EntityId, animation: u8) -> bool {
        let layer = self.modify(id, |e| {
            e.animation = Some(animation);
            true
        });
        if let Some(layer) = layer {
            self.events
                .push(MatchEvent::AnimationChanged { layer, entity: id });
        }
        layer.is_some()
    }

    /// Updates mass, inertia and sleep state of a physical entity.
    pub fn set_physics_properties(
        &mut self,
        id: EntityId,
        mass: f32,
        moment_of_inertia: f32,
        is_sleeping: bool,
    ) -> bool {
        let layer = self.modify(id, |e| {
            let Some(body) = e.physics.as_mut() else {
                return false;
            };
            if body.mass == mass
                && body.moment_of_inertia == moment_of_inertia
                && body.is_sleeping == is_sleeping
            {
                return false;
            }
            body.mass = mass;
            body.moment_of_inertia = moment_of_inertia;
            body.is_sleeping = is_sleeping;
            true
        });
        if let Some(layer) = layer {
            self.events.push(MatchEvent::PhysicsChanged { layer, entity: id });
        }
        layer.is_some()
    }

    pub fn set_weapon(&mut self, id: EntityId, weapon: Option<EntityId>) -> bool {
        let layer = self.modify(id, |e| {
            if e.weapon == weapon {
                return false;
            }
            e.weapon = weapon;
            true
        });
        if let Some(layer) = layer {
            self.events.push(MatchEvent::WeaponChanged { layer, entity: id });
        }
        layer.is_some()
    }

    /// Moves an entity. Non-physical entities are only synchronized when moved this way.
    pub fn set_transform(&mut self, id: EntityId, position: Vec2, rotation: f32) -> bool {
        let mut is_static = false;
        let layer = self.modify(id, |e| {
            is_static = !e.is_physical();
            e.position = position;
            e.rotation = rotation;
            true
        });
        if let Some(layer) = layer {
            if is_static {
                self.events
                    .push(MatchEvent::MovementInvalidated { layer, entity: id });
            }
        }
        layer.is_some()
    }

    /// Builds the full wire descriptor of an entity. References to entities
    /// without a server id are left out.
    pub fn descriptor(&self, id: EntityId) -> Option<EntityDescriptor> {
        let entity = self.entity(id)?;
        let server_id = entity.server_id?;

        Some(EntityDescriptor {
            id: server_id,
            unique_id: entity.unique_id.0,
            class_name: entity.class_name.clone(),
            position: entity.position.into(),
            rotation: entity.rotation,
            scale: entity.scale,
            animation: entity.animation,
            health: entity.health,
            inputs: entity.inputs,
            name: entity.name.clone(),
            parent_id: entity.parent.and_then(|p| self.server_id_of(p)),
            weapon_id: entity.weapon.and_then(|w| self.server_id_of(w)),
            physics: entity.physics.map(|body| PhysicsProperties {
                mass: body.mass,
                moment_of_inertia: body.moment_of_inertia,
                is_sleeping: body.is_sleeping,
                angular_velocity: body.angular_velocity,
                linear_velocity: body.linear_velocity.into(),
            }),
            player_movement: entity.movement,
        })
    }
}

/// Builds a local entity from a wire descriptor. Parent and weapon references are resolved separately.
pub fn entity_from_descriptor(descriptor: &EntityDescriptor) -> Entity {
    let mut entity = Entity::new(EntityId(descriptor.unique_id), descriptor.class_name.clone());
    entity.server_id = Some(descriptor.id);
    entity.name = descriptor.name.clone();
    entity.position = Vec2::from(descriptor.position);
    entity.rotation = descriptor.rotation;
    entity.scale = descriptor.scale;
    entity.animation = descriptor.animation;
    entity.health = descriptor.health;
    entity.inputs = descriptor.inputs;
    entity.dead = descriptor
        .health
        .is_some_and(|HealthData { current, .. }| current == 0);
    entity.physics = descriptor.physics.map(|physics| PhysicsBody {
        mass: physics.mass,
        moment_of_inertia: physics.moment_of_inertia,
        is_sleeping: physics.is_sleeping,
        linear_velocity: Vec2::from(physics.linear_velocity),
        angular_velocity: physics.angular_velocity,
    });
    entity.movement = descriptor.player_movement;
    entity
}
