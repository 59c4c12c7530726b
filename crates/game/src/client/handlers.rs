use crate::event::MatchEvent;
use crate::net::{
    ControlEntity, CreateEntities, DeleteEntities, DisableLayer, EnableLayer, EntitiesAnimation,
    EntitiesDeath, EntitiesInputs, EntitiesScale, EntityDescriptor, EntityPhysics, EntityWeapon,
    HealthUpdate, LayerIndex, LayerPartition, MapReset, MatchState, PlayerLayer, PlayerWeapons,
    ServerEntityId, TickPacketHandler, partitioned, validate_partition,
};
use crate::simulation::TickSimulator;
use crate::world::{EntityId, entity_from_descriptor};

use super::{ClientSession, PendingLink};

impl<S: TickSimulator> ClientSession<S> {
    fn valid_layer(&self, layer: LayerIndex) -> bool {
        if layer < self.ctx.layer_count() {
            return true;
        }
        log::error!("packet references unknown layer {}", layer);
        false
    }

    fn resolve(&mut self, layer: LayerIndex, server_id: ServerEntityId) -> Option<EntityId> {
        let resolved = self.ctx.resolve_server_id(layer, server_id);
        if resolved.is_none() {
            log::error!("unknown entity {} on layer {}", server_id, layer);
            self.stats.unresolved_references += 1;
        }
        resolved
    }

    /// Returns the per-layer slices of a batched packet, or nothing if the
    /// partition does not cover the entity array.
    fn checked_partition<'a, T>(
        &self,
        kind: &str,
        layers: &'a [LayerPartition],
        entities: &'a [T],
    ) -> Option<Vec<(LayerIndex, &'a [T])>> {
        if let Err(e) = validate_partition(layers, entities.len()) {
            log::error!("dropping {} packet: {}", kind, e);
            return None;
        }
        Some(
            partitioned(layers, entities)
                .filter(|(layer, _)| self.valid_layer(*layer))
                .collect(),
        )
    }

    fn create_from_descriptors(&mut self, layer: LayerIndex, descriptors: &[EntityDescriptor]) {
        for descriptor in descriptors {
            let id = self.ctx.create_entity(layer, entity_from_descriptor(descriptor));
            if descriptor.parent_id.is_some() || descriptor.weapon_id.is_some() {
                self.pending_links.push(PendingLink {
                    entity: id,
                    layer,
                    parent: descriptor.parent_id,
                    weapon: descriptor.weapon_id,
                });
            }
        }
        self.resolve_links();
    }

    /// Links parents and weapons whose targets now exist. Unresolved links
    /// wait for later creations.
    fn resolve_links(&mut self) {
        let ctx = &mut self.ctx;

        self.pending_links.retain_mut(|link| {
            if !ctx.contains(link.entity) {
                return false;
            }

            if let Some(parent) = link.parent {
                if let Some(target) = ctx.resolve_server_id(link.layer, parent) {
                    if let Some(entity) = ctx.entity_mut(link.entity) {
                        entity.parent = Some(target);
                    }
                    link.parent = None;
                }
            }

            if let Some(weapon) = link.weapon {
                if let Some(target) = ctx.resolve_server_id(link.layer, weapon) {
                    if let Some(entity) = ctx.entity_mut(link.entity) {
                        entity.weapon = Some(target);
                    }
                    link.weapon = None;
                }
            }

            link.parent.is_some() || link.weapon.is_some()
        });

        if !self.pending_links.is_empty() {
            log::debug!("{} entity links waiting for their targets", self.pending_links.len());
        }
    }

    fn is_locally_controlled(&self, id: EntityId) -> bool {
        self.players.iter().any(|p| p.controlled == Some(id))
    }

    fn release_layer(&mut self, layer: LayerIndex) {
        for player in self.players.iter_mut() {
            let Some(id) = player.controlled else {
                continue;
            };
            if self.ctx.layer_of(id) == Some(layer) {
                player.controlled = None;
            }
        }
        self.pending_links.retain(|link| link.layer != layer);
    }
}

impl<S: TickSimulator> TickPacketHandler for ClientSession<S> {
    fn handle_control_entity(&mut self, packet: ControlEntity) {
        let player = packet.player_index as usize;
        if player >= self.players.len() {
            log::error!("control packet for unknown player {} dropped", packet.player_index);
            return;
        }
        if !self.valid_layer(packet.layer_index) {
            return;
        }

        let entity = match packet.entity_id {
            Some(server_id) => match self.resolve(packet.layer_index, server_id) {
                Some(id) => Some(id),
                None => return,
            },
            None => None,
        };

        self.players[player].controlled = entity;
        if entity.is_some() {
            self.players[player].layer = Some(packet.layer_index);
            self.ctx.layer_mut(packet.layer_index).set_predicted(true);
        }
        self.ctx.push_event(MatchEvent::PlayerControlledEntityChanged {
            player: packet.player_index,
            layer: packet.layer_index,
            entity,
        });

        log::info!("player {} now controls {:?}", packet.player_index, entity);
    }

    fn handle_create_entities(&mut self, packet: CreateEntities) {
        let Some(groups) = self.checked_partition("create", &packet.layers, &packet.entities) else {
            return;
        };
        for (layer, descriptors) in groups {
            self.create_from_descriptors(layer, descriptors);
        }
    }

    fn handle_delete_entities(&mut self, packet: DeleteEntities) {
        let Some(groups) = self.checked_partition("delete", &packet.layers, &packet.entities) else {
            return;
        };
        for (layer, ids) in groups {
            for server_id in ids {
                let Some(id) = self.resolve(layer, *server_id) else {
                    continue;
                };
                self.ctx.destroy_entity(id);
                for player in self.players.iter_mut() {
                    if player.controlled == Some(id) {
                        player.controlled = None;
                    }
                    player.weapons.retain(|w| *w != id);
                }
            }
        }
    }

    fn handle_enable_layer(&mut self, packet: EnableLayer) {
        if !self.valid_layer(packet.layer_index) {
            return;
        }
        self.ctx.layer_mut(packet.layer_index).set_enabled(true);
        self.create_from_descriptors(packet.layer_index, &packet.entities);

        log::debug!(
            "layer {} enabled with {} entities",
            packet.layer_index,
            packet.entities.len()
        );
    }

    fn handle_disable_layer(&mut self, packet: DisableLayer) {
        if !self.valid_layer(packet.layer_index) {
            return;
        }
        self.release_layer(packet.layer_index);
        let removed = self.ctx.clear_layer(packet.layer_index);
        self.ctx.layer_mut(packet.layer_index).set_enabled(false);

        log::debug!("layer {} disabled, {} entities removed", packet.layer_index, removed);
    }

    fn handle_entities_animation(&mut self, packet: EntitiesAnimation) {
        let Some(groups) = self.checked_partition("animation", &packet.layers, &packet.entities) else {
            return;
        };
        for (layer, entries) in groups {
            for entry in entries {
                if let Some(id) = self.resolve(layer, entry.id) {
                    self.ctx.set_animation(id, entry.animation_id);
                }
            }
        }
    }

    fn handle_entities_death(&mut self, packet: EntitiesDeath) {
        let Some(groups) = self.checked_partition("death", &packet.layers, &packet.entities) else {
            return;
        };
        for (layer, ids) in groups {
            for server_id in ids {
                if let Some(id) = self.resolve(layer, *server_id) {
                    self.ctx.kill(id);
                }
            }
        }
    }

    fn handle_entities_inputs(&mut self, packet: EntitiesInputs) {
        let Some(groups) = self.checked_partition("inputs", &packet.layers, &packet.entities) else {
            return;
        };
        for (layer, entries) in groups {
            for entry in entries {
                let Some(id) = self.resolve(layer, entry.id) else {
                    continue;
                };
                // Local prediction owns the inputs of controlled entities.
                if !self.is_locally_controlled(id) {
                    self.ctx.set_inputs(id, entry.inputs);
                }
            }
        }
    }

    fn handle_entities_scale(&mut self, packet: EntitiesScale) {
        let Some(groups) = self.checked_partition("scale", &packet.layers, &packet.entities) else {
            return;
        };
        for (layer, entries) in groups {
            for entry in entries {
                if let Some(id) = self.resolve(layer, entry.id) {
                    self.ctx.set_scale(id, entry.scale);
                }
            }
        }
    }

    fn handle_entity_physics(&mut self, packet: EntityPhysics) {
        if !self.valid_layer(packet.layer_index) {
            return;
        }
        if let Some(id) = self.resolve(packet.layer_index, packet.entity_id) {
            self.ctx.set_physics_properties(
                id,
                packet.mass,
                packet.moment_of_inertia,
                packet.is_sleeping,
            );
        }
    }

    fn handle_entity_weapon(&mut self, packet: EntityWeapon) {
        if !self.valid_layer(packet.layer_index) {
            return;
        }
        let Some(id) = self.resolve(packet.layer_index, packet.entity_id) else {
            return;
        };
        let weapon = match packet.weapon_id {
            Some(server_id) => match self.resolve(packet.layer_index, server_id) {
                Some(weapon) => Some(weapon),
                None => return,
            },
            None => None,
        };
        self.ctx.set_weapon(id, weapon);
    }

    fn handle_health_update(&mut self, packet: HealthUpdate) {
        let Some(groups) = self.checked_partition("health", &packet.layers, &packet.entities) else {
            return;
        };
        for (layer, entries) in groups {
            for entry in entries {
                if let Some(id) = self.resolve(layer, entry.id) {
                    self.ctx.set_health(id, entry.current_health);
                }
            }
        }
    }

    fn handle_map_reset(&mut self, packet: MapReset) {
        let Some(groups) = self.checked_partition("map reset", &packet.layers, &packet.entities) else {
            return;
        };
        for layer in 0..self.ctx.layer_count() {
            self.ctx.clear_layer(layer);
        }
        self.pending_links.clear();
        self.buffer.clear();

        let mut created = 0;
        for (layer, descriptors) in groups {
            created += descriptors.len();
            self.create_from_descriptors(layer, descriptors);
        }

        for player in self.players.iter_mut() {
            if player.controlled.is_some_and(|id| !self.ctx.contains(id)) {
                player.controlled = None;
            }
            player.weapons.retain(|w| self.ctx.contains(*w));
        }

        log::info!("map reset at tick {}: {} entities", packet.state_tick, created);
    }

    fn handle_match_state(&mut self, packet: MatchState) {
        let players = self.controlled_ids();
        let report = self.reconciler.reconcile(
            &mut self.ctx,
            &mut self.buffer,
            &players,
            &packet,
            &mut self.simulator,
        );
        self.record_report(report);
    }

    fn handle_player_layer(&mut self, packet: PlayerLayer) {
        let player = packet.player_index as usize;
        if player >= self.players.len() || !self.valid_layer(packet.layer_index) {
            return;
        }
        self.players[player].layer = Some(packet.layer_index);
        self.ctx.layer_mut(packet.layer_index).set_predicted(true);
    }

    fn handle_player_weapons(&mut self, packet: PlayerWeapons) {
        let player = packet.player_index as usize;
        if player >= self.players.len() || !self.valid_layer(packet.layer_index) {
            return;
        }
        let weapons = packet
            .weapon_ids
            .iter()
            .filter_map(|server_id| self.resolve(packet.layer_index, *server_id))
            .collect::<Vec<_>>();
        self.players[player].weapons = weapons;
    }
}
