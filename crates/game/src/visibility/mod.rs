//! Per-connection view of the match: which layers a client sees, which
//! entities it knows about, and the packets needed to bring it up to date.

mod order;
mod pending;

pub use order::creation_order;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::net::{
    AnimationEntry, ControlEntity, CreateEntities, DEFAULT_MATCH_STATE_BUDGET, DeleteEntities,
    DisableLayer, EnableLayer, EntitiesAnimation, EntitiesDeath, EntitiesInputs, EntitiesScale,
    EntityDescriptor, EntityPhysics, EntityWeapon, HealthEntry, HealthUpdate, InputEntry,
    LayerIndex, LayerPartition, MapReset, MatchState, MatchStateEntity, PacketError, PacketType,
    PlayerIndex, PlayerLayer, PlayerWeapons, ScaleEntry, ServerEntityId, descriptor_size,
    estimate_size, partition,
};
use crate::sync::{SyncEvent, SyncEvents};
use crate::tick::Tick;
use crate::world::{EntityId, MatchContext};

use pending::PendingEvents;

/// Priority gained per tick by an entity whose movement is waiting to be sent.
pub const PRIORITY_INCREMENT: u8 = 10;

/// Fixed per-packet allowance when splitting descriptor batches.
const BATCH_OVERHEAD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityConfig {
    /// Serialized size limit for one `MatchState` and for each creation batch.
    pub mtu_budget: usize,
    pub priority_increment: u8,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            mtu_budget: DEFAULT_MATCH_STATE_BUDGET,
            priority_increment: PRIORITY_INCREMENT,
        }
    }
}

/// What the server remembers about an entity the client has been told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleEntityData {
    pub layer: LayerIndex,
    pub server_id: ServerEntityId,
    pub priority_accumulator: u8,
}

#[derive(Debug)]
pub struct VisibilityManager {
    config: VisibilityConfig,
    visible: BTreeSet<LayerIndex>,
    enabled_on_client: BTreeSet<LayerIndex>,
    newly_visible: BTreeSet<LayerIndex>,
    newly_hidden: BTreeSet<LayerIndex>,
    known: HashMap<EntityId, VisibleEntityData>,
    creations: BTreeMap<EntityId, LayerIndex>,
    destructions: BTreeMap<EntityId, (LayerIndex, ServerEntityId)>,
    pending: PendingEvents,
    held: PendingEvents,
    controlled: BTreeMap<PlayerIndex, EntityId>,
    control_updates: BTreeMap<PlayerIndex, (LayerIndex, Option<EntityId>)>,
    player_layers: BTreeMap<PlayerIndex, LayerIndex>,
    player_weapons: BTreeMap<PlayerIndex, (LayerIndex, Vec<EntityId>)>,
    map_reset: bool,
}

impl VisibilityManager {
    pub fn new(config: VisibilityConfig) -> Self {
        Self {
            config,
            visible: BTreeSet::new(),
            enabled_on_client: BTreeSet::new(),
            newly_visible: BTreeSet::new(),
            newly_hidden: BTreeSet::new(),
            known: HashMap::new(),
            creations: BTreeMap::new(),
            destructions: BTreeMap::new(),
            pending: PendingEvents::default(),
            held: PendingEvents::default(),
            controlled: BTreeMap::new(),
            control_updates: BTreeMap::new(),
            player_layers: BTreeMap::new(),
            player_weapons: BTreeMap::new(),
            map_reset: false,
        }
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.config
    }

    pub fn is_layer_visible(&self, layer: LayerIndex) -> bool {
        self.visible.contains(&layer)
    }

    pub fn visible_layers(&self) -> impl Iterator<Item = LayerIndex> + '_ {
        self.visible.iter().copied()
    }

    pub fn is_known(&self, entity: EntityId) -> bool {
        self.known.contains_key(&entity)
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    pub fn priority_of(&self, entity: EntityId) -> Option<u8> {
        self.known.get(&entity).map(|data| data.priority_accumulator)
    }

    /// Returns false if the layer was already visible.
    pub fn show_layer(&mut self, layer: LayerIndex) -> bool {
        if !self.visible.insert(layer) {
            return false;
        }
        self.newly_visible.insert(layer);
        true
    }

    /// Returns false if the layer was not visible.
    pub fn hide_layer(&mut self, layer: LayerIndex) -> bool {
        if !self.visible.remove(&layer) {
            return false;
        }
        self.newly_visible.remove(&layer);
        if self.enabled_on_client.contains(&layer) {
            self.newly_hidden.insert(layer);
        }
        self.pending.remove_layer(layer);
        self.held.remove_layer(layer);
        self.creations.retain(|_, l| *l != layer);
        true
    }

    /// Controlled entities always win the `MatchState` priority contest.
    pub fn set_controlled_entity(&mut self, player: PlayerIndex, target: Option<(LayerIndex, EntityId)>) {
        match target {
            Some((layer, entity)) => {
                self.controlled.insert(player, entity);
                self.control_updates.insert(player, (layer, Some(entity)));
            }
            None => {
                let layer = self
                    .controlled
                    .remove(&player)
                    .and_then(|entity| self.known.get(&entity))
                    .map_or(0, |data| data.layer);
                self.control_updates.insert(player, (layer, None));
            }
        }
    }

    pub fn controlled_entity(&self, player: PlayerIndex) -> Option<EntityId> {
        self.controlled.get(&player).copied()
    }

    pub fn queue_player_layer(&mut self, player: PlayerIndex, layer: LayerIndex) {
        self.player_layers.insert(player, layer);
    }

    pub fn queue_player_weapons(&mut self, player: PlayerIndex, layer: LayerIndex, weapons: Vec<EntityId>) {
        self.player_weapons.insert(player, (layer, weapons));
    }

    /// Resends every entity of the layers the client has enabled on the next flush.
    pub fn queue_map_reset(&mut self) {
        self.map_reset = true;
    }

    /// Drops all per-connection state.
    pub fn release(&mut self) {
        *self = Self::new(self.config);
    }

    fn route(&mut self, layer: LayerIndex, entity: EntityId) -> Option<&mut PendingEvents> {
        if !self.visible.contains(&layer) {
            return None;
        }
        if self.known.contains_key(&entity) {
            Some(&mut self.pending)
        } else {
            Some(&mut self.held)
        }
    }

    fn route_all<T: Copy>(
        &mut self,
        events: &[SyncEvent<T>],
        select: fn(&mut PendingEvents) -> &mut BTreeMap<EntityId, SyncEvent<T>>,
    ) {
        for event in events {
            if let Some(target) = self.route(event.layer, event.entity) {
                select(target).insert(event.entity, *event);
            }
        }
    }

    /// Routes one tick of sync batches. Events on hidden layers are dropped,
    /// events for entities the client does not know yet are held.
    pub fn push_events(&mut self, events: &SyncEvents) {
        for event in &events.created {
            if !self.visible.contains(&event.layer) || self.newly_visible.contains(&event.layer) {
                continue;
            }
            self.creations.insert(event.entity, event.layer);
        }

        for event in &events.destroyed {
            self.creations.remove(&event.entity);
            self.pending.remove_entity(event.entity);
            self.held.remove_entity(event.entity);
            if self.known.contains_key(&event.entity) {
                self.destructions
                    .insert(event.entity, (event.layer, event.data));
            }
        }

        for event in &events.died {
            if let Some(target) = self.route(event.layer, event.entity) {
                target.deaths.insert(event.entity, event.layer);
            }
        }

        self.route_all(&events.health, |p| &mut p.health);
        self.route_all(&events.inputs, |p| &mut p.inputs);
        self.route_all(&events.animations, |p| &mut p.animations);
        self.route_all(&events.physics, |p| &mut p.physics);
        self.route_all(&events.scale, |p| &mut p.scale);
        self.route_all(&events.weapons, |p| &mut p.weapons);
        self.route_all(&events.movement, |p| &mut p.movement);
    }

    /// Produces this tick's packets for the connection, in a fixed order.
    pub fn flush(
        &mut self,
        ctx: &MatchContext,
        server_tick: Tick,
        last_input_tick: Tick,
    ) -> Result<Vec<PacketType>, PacketError> {
        let mut packets = Vec::new();

        if std::mem::take(&mut self.map_reset) {
            self.flush_map_reset(ctx, server_tick, &mut packets)?;
        }
        self.flush_hidden_layers(server_tick, &mut packets);
        self.flush_player_layers(server_tick, &mut packets);
        self.flush_newly_visible(ctx, server_tick, &mut packets)?;
        self.flush_deaths(server_tick, &mut packets);
        self.flush_destructions(server_tick, &mut packets);
        self.flush_creations(ctx, server_tick, &mut packets)?;
        self.flush_control_updates(ctx, server_tick, &mut packets);
        self.flush_component_updates(server_tick, &mut packets);
        self.flush_weapons(server_tick, &mut packets);

        let state = self.build_match_state(server_tick, last_input_tick)?;
        packets.push(PacketType::MatchState(state));

        Ok(packets)
    }

    fn flush_map_reset(
        &mut self,
        ctx: &MatchContext,
        tick: Tick,
        packets: &mut Vec<PacketType>,
    ) -> Result<(), PacketError> {
        let layers: Vec<LayerIndex> = self
            .enabled_on_client
            .iter()
            .filter(|layer| !self.newly_hidden.contains(layer))
            .copied()
            .collect();

        self.known.clear();
        self.creations.clear();
        self.destructions.clear();
        self.pending.clear();
        self.held.clear();

        let mut ids = Vec::new();
        for &layer in &layers {
            ids.extend(networked_entities(ctx, layer));
        }
        let descriptors = self.describe(ctx, &ids);
        let mut chunks = self.chunk(descriptors)?.into_iter();

        let (first_layers, first_entities) = chunks.next().map(group).unwrap_or_default();
        packets.push(PacketType::MapReset(MapReset {
            state_tick: tick,
            layers: first_layers,
            entities: first_entities,
        }));
        for chunk in chunks {
            let (layers, entities) = group(chunk);
            packets.push(PacketType::CreateEntities(CreateEntities {
                state_tick: tick,
                layers,
                entities,
            }));
        }

        log::debug!("map reset resent {} entities", self.known.len());
        Ok(())
    }

    fn flush_hidden_layers(&mut self, tick: Tick, packets: &mut Vec<PacketType>) {
        for layer in std::mem::take(&mut self.newly_hidden) {
            self.enabled_on_client.remove(&layer);
            self.known.retain(|_, data| data.layer != layer);
            self.destructions.retain(|_, (l, _)| *l != layer);
            packets.push(PacketType::DisableLayer(DisableLayer {
                state_tick: tick,
                layer_index: layer,
            }));
        }
    }

    fn flush_player_layers(&mut self, tick: Tick, packets: &mut Vec<PacketType>) {
        for (player, layer) in std::mem::take(&mut self.player_layers) {
            packets.push(PacketType::PlayerLayer(PlayerLayer {
                state_tick: tick,
                player_index: player,
                layer_index: layer,
            }));
        }
    }

    fn flush_newly_visible(
        &mut self,
        ctx: &MatchContext,
        tick: Tick,
        packets: &mut Vec<PacketType>,
    ) -> Result<(), PacketError> {
        for layer in std::mem::take(&mut self.newly_visible) {
            self.enabled_on_client.insert(layer);
            self.creations.retain(|_, l| *l != layer);

            let ids: Vec<EntityId> = networked_entities(ctx, layer).collect();
            let descriptors = self.describe(ctx, &ids);
            let mut chunks = self.chunk(descriptors)?.into_iter();

            let first = chunks.next().unwrap_or_default();
            packets.push(PacketType::EnableLayer(EnableLayer {
                state_tick: tick,
                layer_index: layer,
                entities: first.into_iter().map(|(_, descriptor)| descriptor).collect(),
            }));
            for chunk in chunks {
                let (layers, entities) = group(chunk);
                packets.push(PacketType::CreateEntities(CreateEntities {
                    state_tick: tick,
                    layers,
                    entities,
                }));
            }

            self.promote_held(&ids);
        }
        Ok(())
    }

    fn flush_deaths(&mut self, tick: Tick, packets: &mut Vec<PacketType>) {
        let deaths = std::mem::take(&mut self.pending.deaths);
        let mut groups: BTreeMap<LayerIndex, Vec<ServerEntityId>> = BTreeMap::new();
        for (entity, layer) in deaths {
            if let Some(data) = self.known.get(&entity) {
                groups.entry(layer).or_default().push(data.server_id);
            }
        }
        if groups.is_empty() {
            return;
        }
        let (layers, entities) = partition(groups);
        packets.push(PacketType::EntitiesDeath(EntitiesDeath {
            state_tick: tick,
            layers,
            entities,
        }));
    }

    fn flush_destructions(&mut self, tick: Tick, packets: &mut Vec<PacketType>) {
        let mut groups: BTreeMap<LayerIndex, Vec<ServerEntityId>> = BTreeMap::new();
        for (entity, (layer, server_id)) in std::mem::take(&mut self.destructions) {
            self.known.remove(&entity);
            groups.entry(layer).or_default().push(server_id);
        }
        if groups.is_empty() {
            return;
        }
        let (layers, entities) = partition(groups);
        packets.push(PacketType::DeleteEntities(DeleteEntities {
            state_tick: tick,
            layers,
            entities,
        }));
    }

    fn flush_creations(
        &mut self,
        ctx: &MatchContext,
        tick: Tick,
        packets: &mut Vec<PacketType>,
    ) -> Result<(), PacketError> {
        let ids: Vec<EntityId> = std::mem::take(&mut self.creations)
            .into_keys()
            .filter(|id| ctx.contains(*id) && !self.known.contains_key(id))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let ordered = creation_order(ctx, &ids);
        let descriptors = self.describe(ctx, &ordered);
        for chunk in self.chunk(descriptors)? {
            let (layers, entities) = group(chunk);
            packets.push(PacketType::CreateEntities(CreateEntities {
                state_tick: tick,
                layers,
                entities,
            }));
        }

        self.promote_held(&ordered);
        Ok(())
    }

    fn flush_control_updates(&mut self, ctx: &MatchContext, tick: Tick, packets: &mut Vec<PacketType>) {
        let mut retry = BTreeMap::new();

        for (player, (layer, entity)) in std::mem::take(&mut self.control_updates) {
            let entity_id = match entity {
                None => None,
                Some(id) => match self.known.get(&id) {
                    Some(data) => Some(data.server_id),
                    None if ctx.contains(id) && self.visible.contains(&layer) => {
                        retry.insert(player, (layer, entity));
                        continue;
                    }
                    None => {
                        log::warn!("player {} controls entity {} the client cannot see", player, id);
                        None
                    }
                },
            };

            packets.push(PacketType::ControlEntity(ControlEntity {
                state_tick: tick,
                player_index: player,
                layer_index: layer,
                entity_id,
            }));
        }

        self.control_updates = retry;
    }

    fn flush_component_updates(&mut self, tick: Tick, packets: &mut Vec<PacketType>) {
        let health = std::mem::take(&mut self.pending.health);
        if let Some((layers, entities)) = self.batch(health, |id, current_health| HealthEntry {
            id,
            current_health,
        }) {
            packets.push(PacketType::HealthUpdate(HealthUpdate {
                state_tick: tick,
                layers,
                entities,
            }));
        }

        let inputs = std::mem::take(&mut self.pending.inputs);
        if let Some((layers, entities)) = self.batch(inputs, |id, inputs| InputEntry { id, inputs }) {
            packets.push(PacketType::EntitiesInputs(EntitiesInputs {
                state_tick: tick,
                layers,
                entities,
            }));
        }

        let animations = std::mem::take(&mut self.pending.animations);
        if let Some((layers, entities)) = self.batch(animations, |id, animation_id| AnimationEntry {
            id,
            animation_id,
        }) {
            packets.push(PacketType::EntitiesAnimation(EntitiesAnimation {
                state_tick: tick,
                layers,
                entities,
            }));
        }

        for (entity, event) in std::mem::take(&mut self.pending.physics) {
            let Some(data) = self.known.get(&entity) else {
                continue;
            };
            packets.push(PacketType::EntityPhysics(EntityPhysics {
                state_tick: tick,
                layer_index: event.layer,
                entity_id: data.server_id,
                is_sleeping: event.data.is_sleeping,
                mass: event.data.mass,
                moment_of_inertia: event.data.moment_of_inertia,
            }));
        }

        let scale = std::mem::take(&mut self.pending.scale);
        if let Some((layers, entities)) = self.batch(scale, |id, scale| ScaleEntry { id, scale }) {
            packets.push(PacketType::EntitiesScale(EntitiesScale {
                state_tick: tick,
                layers,
                entities,
            }));
        }
    }

    fn flush_weapons(&mut self, tick: Tick, packets: &mut Vec<PacketType>) {
        for (entity, event) in std::mem::take(&mut self.pending.weapons) {
            let Some(data) = self.known.get(&entity) else {
                continue;
            };
            packets.push(PacketType::EntityWeapon(EntityWeapon {
                state_tick: tick,
                layer_index: event.layer,
                entity_id: data.server_id,
                weapon_id: event
                    .data
                    .and_then(|weapon| self.known.get(&weapon))
                    .map(|weapon| weapon.server_id),
            }));
        }

        for (player, (layer, weapons)) in std::mem::take(&mut self.player_weapons) {
            let weapon_ids = weapons
                .iter()
                .filter_map(|weapon| self.known.get(weapon))
                .map(|data| data.server_id)
                .collect();
            packets.push(PacketType::PlayerWeapons(PlayerWeapons {
                state_tick: tick,
                player_index: player,
                layer_index: layer,
                weapon_ids,
            }));
        }
    }

    /// Greedily fills one `MatchState` in priority order without exceeding the MTU budget.
    fn build_match_state(&mut self, tick: Tick, last_input_tick: Tick) -> Result<MatchState, PacketError> {
        let controlled: BTreeSet<EntityId> = self.controlled.values().copied().collect();
        let increment = self.config.priority_increment;

        let mut ranked = Vec::with_capacity(self.pending.movement.len());
        for entity in self.pending.movement.keys() {
            let Some(data) = self.known.get_mut(entity) else {
                continue;
            };
            data.priority_accumulator = if controlled.contains(entity) {
                u8::MAX
            } else {
                data.priority_accumulator.saturating_add(increment)
            };
            ranked.push((data.priority_accumulator, *entity));
        }
        ranked.sort_by_key(|(priority, entity)| (Reverse(*priority), *entity));

        let mut state = MatchState {
            last_input_tick,
            state_tick: tick,
            layers: Vec::new(),
            entities: Vec::new(),
        };
        let mut included: Vec<(LayerIndex, EntityId, MatchStateEntity)> = Vec::new();

        for (_, entity) in ranked {
            let Some(event) = self.pending.movement.get(&entity) else {
                continue;
            };
            included.push((event.layer, entity, event.data));

            let candidate = assemble(tick, last_input_tick, &included);
            if estimate_size(&candidate)? > self.config.mtu_budget {
                included.pop();
                break;
            }
            state = candidate;
        }

        for (_, entity, _) in &included {
            self.pending.movement.remove(entity);
            if let Some(data) = self.known.get_mut(entity) {
                data.priority_accumulator = 0;
            }
        }

        if !self.pending.movement.is_empty() {
            log::debug!(
                "match state for tick {} deferred {} entities",
                tick,
                self.pending.movement.len()
            );
        }

        Ok(state)
    }

    /// Builds descriptors and marks the entities as known.
    fn describe(&mut self, ctx: &MatchContext, ids: &[EntityId]) -> Vec<(LayerIndex, EntityDescriptor)> {
        let mut descriptors = Vec::with_capacity(ids.len());
        for &id in ids {
            let (Some(layer), Some(descriptor)) = (ctx.layer_of(id), ctx.descriptor(id)) else {
                continue;
            };
            self.known.insert(
                id,
                VisibleEntityData {
                    layer,
                    server_id: descriptor.id,
                    priority_accumulator: 0,
                },
            );
            descriptors.push((layer, descriptor));
        }
        descriptors
    }

    fn chunk(
        &self,
        descriptors: Vec<(LayerIndex, EntityDescriptor)>,
    ) -> Result<Vec<Vec<(LayerIndex, EntityDescriptor)>>, PacketError> {
        let mut chunks = Vec::new();
        let mut current = Vec::new();
        let mut size = BATCH_OVERHEAD;

        for (layer, descriptor) in descriptors {
            let entry_size = descriptor_size(&descriptor)? + std::mem::size_of::<LayerPartition>();
            if !current.is_empty() && size + entry_size > self.config.mtu_budget {
                chunks.push(std::mem::take(&mut current));
                size = BATCH_OVERHEAD;
            }
            size += entry_size;
            current.push((layer, descriptor));
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        Ok(chunks)
    }

    fn batch<T, E>(
        &self,
        events: BTreeMap<EntityId, SyncEvent<T>>,
        build: impl Fn(ServerEntityId, T) -> E,
    ) -> Option<(Vec<LayerPartition>, Vec<E>)> {
        let mut groups: BTreeMap<LayerIndex, Vec<E>> = BTreeMap::new();
        for (entity, event) in events {
            if let Some(data) = self.known.get(&entity) {
                groups
                    .entry(event.layer)
                    .or_default()
                    .push(build(data.server_id, event.data));
            }
        }
        if groups.is_empty() {
            return None;
        }
        Some(partition(groups))
    }

    fn promote_held(&mut self, ids: &[EntityId]) {
        if self.held.is_empty() {
            return;
        }
        for id in ids {
            if self.known.contains_key(id) {
                self.held.transfer(*id, &mut self.pending);
            }
        }
    }

    /// Entities with events waiting for their creation to reach the client.
    pub fn held_entities(&self) -> BTreeSet<EntityId> {
        self.held.entities().collect()
    }
}

fn networked_entities(ctx: &MatchContext, layer: LayerIndex) -> impl Iterator<Item = EntityId> + '_ {
    let mut ids: Vec<EntityId> = ctx
        .layer(layer)
        .entities()
        .filter(|entity| !entity.unique_id.is_clientside() && entity.server_id.is_some())
        .map(|entity| entity.unique_id)
        .collect();
    ids.sort();
    let ordered = creation_order(ctx, &ids);
    ordered.into_iter()
}

fn group(chunk: Vec<(LayerIndex, EntityDescriptor)>) -> (Vec<LayerPartition>, Vec<EntityDescriptor>) {
    let mut groups: BTreeMap<LayerIndex, Vec<EntityDescriptor>> = BTreeMap::new();
    for (layer, descriptor) in chunk {
        groups.entry(layer).or_default().push(descriptor);
    }
    partition(groups)
}

fn assemble(
    tick: Tick,
    last_input_tick: Tick,
    included: &[(LayerIndex, EntityId, MatchStateEntity)],
) -> MatchState {
    let mut groups: BTreeMap<LayerIndex, Vec<MatchStateEntity>> = BTreeMap::new();
    for (layer, _, entity) in included {
        groups.entry(*layer).or_default().push(*entity);
    }
    let (layers, entities) = partition(groups);

    MatchState {
        last_input_tick,
        state_tick: tick,
        layers,
        entities,
    }
}

#[cfg(test)]
mod tests;
