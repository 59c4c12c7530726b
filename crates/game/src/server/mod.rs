//! Authoritative side of a match: applies queued client inputs, steps the
//! simulation and produces per-connection packets.

use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::event::{MatchEvent, MatchEventSink};
use crate::input::{InputFlags, PlayerInputData};
use crate::net::{InputTimingCorrection, LayerIndex, PacketError, PacketType, PlayerIndex, PlayerMovement, PlayersInput};
use crate::simulation::{InputQueue, KinematicConfig, KinematicSimulator, QueuedInput, TickSimulator, step_layers};
use crate::sync::NetworkSyncSystem;
use crate::tick::{DEFAULT_TICK_RATE, Tick, tick_delta};
use crate::visibility::{VisibilityConfig, VisibilityManager};
use crate::world::{Authority, Entity, EntityId, MatchContext, PhysicsBody};

/// Layer new players spawn on.
pub const SPAWN_LAYER: LayerIndex = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub tick_rate: u32,
    pub layer_count: LayerIndex,
    pub input_queue_size: usize,
    pub player_health: u16,
    pub spawn_spacing: f32,
    /// Scripted entities spawned at startup that wander on their own.
    pub demo_entities: usize,
    pub visibility: VisibilityConfig,
    pub kinematic: KinematicConfig,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            layer_count: 2,
            input_queue_size: 64,
            player_health: 100,
            spawn_spacing: 64.0,
            demo_entities: 0,
            visibility: VisibilityConfig::default(),
            kinematic: KinematicConfig::default(),
        }
    }
}

impl MatchConfig {
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }
}

/// Server-side state of one connected client.
#[derive(Debug)]
pub struct ClientState {
    pub visibility: VisibilityManager,
    pub inputs: InputQueue,
    pub last_input_tick: Tick,
    /// Entity controlled by each local player, indexed by player.
    pub players: Vec<Option<EntityId>>,
    previous_inputs: Vec<PlayerInputData>,
}

impl ClientState {
    fn new(config: &MatchConfig, player_count: u8) -> Self {
        Self {
            visibility: VisibilityManager::new(config.visibility),
            inputs: InputQueue::new(config.input_queue_size),
            last_input_tick: 0,
            players: vec![None; player_count as usize],
            previous_inputs: vec![PlayerInputData::default(); player_count as usize],
        }
    }
}

pub struct ServerMatch<S: TickSimulator = KinematicSimulator> {
    config: MatchConfig,
    ctx: MatchContext,
    sync: NetworkSyncSystem,
    simulator: S,
    clients: BTreeMap<u32, ClientState>,
    tick: Tick,
    spawned: u32,
    wanderers: Vec<Wanderer>,
}

#[derive(Debug, Clone, Copy)]
struct Wanderer {
    entity: EntityId,
    previous: PlayerInputData,
}

impl ServerMatch<KinematicSimulator> {
    pub fn new(config: MatchConfig) -> Self {
        let simulator = KinematicSimulator::new(config.kinematic);
        Self::with_simulator(config, simulator)
    }
}

impl<S: TickSimulator> ServerMatch<S> {
    pub fn with_simulator(config: MatchConfig, simulator: S) -> Self {
        let mut ctx = MatchContext::new(Authority::Server, config.layer_count.max(1));
        for index in 0..ctx.layer_count() {
            ctx.layer_mut(index).set_enabled(true);
        }

        Self {
            config,
            ctx,
            sync: NetworkSyncSystem::new(),
            simulator,
            clients: BTreeMap::new(),
            tick: 0,
            spawned: 0,
            wanderers: Vec::new(),
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn ctx(&self) -> &MatchContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut MatchContext {
        &mut self.ctx
    }

    pub fn server_tick(&self) -> Tick {
        self.tick
    }

    pub fn client(&self, client_id: u32) -> Option<&ClientState> {
        self.clients.get(&client_id)
    }

    pub fn client_mut(&mut self, client_id: u32) -> Option<&mut ClientState> {
        self.clients.get_mut(&client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Registers a client and spawns one controlled entity per local player.
    pub fn add_client(&mut self, client_id: u32, player_count: u8) -> Vec<EntityId> {
        if self.clients.contains_key(&client_id) {
            self.remove_client(client_id);
        }

        let mut state = ClientState::new(&self.config, player_count);
        state.visibility.show_layer(SPAWN_LAYER);

        let mut spawned = Vec::with_capacity(player_count as usize);
        for player in 0..player_count {
            let id = self.spawn_player(client_id, player);
            state.players[player as usize] = Some(id);
            state.visibility.queue_player_layer(player, SPAWN_LAYER);
            state.visibility.set_controlled_entity(player, Some((SPAWN_LAYER, id)));
            self.ctx.push_event(MatchEvent::PlayerControlledEntityChanged {
                player,
                layer: SPAWN_LAYER,
                entity: Some(id),
            });
            spawned.push(id);
        }

        log::info!(
            "client {} joined with {} player(s): {:?}",
            client_id,
            player_count,
            spawned
        );
        self.clients.insert(client_id, state);
        spawned
    }

    fn spawn_player(&mut self, client_id: u32, player: PlayerIndex) -> EntityId {
        self.spawn_mover("player", format!("client{}-p{}", client_id, player))
    }

    fn spawn_mover(&mut self, class_name: &str, name: String) -> EntityId {
        let id = self.ctx.allocate_entity_id();
        let x = self.spawned as f32 * self.config.spawn_spacing;
        self.spawned += 1;

        let entity = Entity::new(id, class_name)
            .with_name(name)
            .with_position(Vec2::new(x, 0.0))
            .with_health(self.config.player_health)
            .with_physics(PhysicsBody::default())
            .with_movement(PlayerMovement::default());

        self.ctx.create_entity(SPAWN_LAYER, entity)
    }

    /// Spawns `count` scripted entities that walk back and forth and jump.
    pub fn spawn_wanderers(&mut self, count: usize) -> Vec<EntityId> {
        let mut spawned = Vec::with_capacity(count);
        for index in 0..count {
            let entity = self.spawn_mover("wanderer", format!("wanderer{}", index));
            self.wanderers.push(Wanderer {
                entity,
                previous: PlayerInputData::default(),
            });
            spawned.push(entity);
        }
        spawned
    }

    fn drive_wanderers(&mut self) {
        let tick = self.tick;
        for (index, wanderer) in self.wanderers.iter_mut().enumerate() {
            let input = wander_input(tick, index);
            self.ctx.set_inputs(wanderer.entity, input);
            if let Some(entity) = self.ctx.entity_mut(wanderer.entity) {
                self.simulator.apply_input(entity, &input, &wanderer.previous);
            }
            wanderer.previous = input;
        }
        self.wanderers.retain(|w| self.ctx.contains(w.entity));
    }

    /// Destroys the client's entities and drops its per-connection state.
    pub fn remove_client(&mut self, client_id: u32) -> bool {
        let Some(mut state) = self.clients.remove(&client_id) else {
            return false;
        };

        for id in state.players.iter().flatten() {
            self.ctx.destroy_entity(*id);
        }
        state.visibility.release();

        log::info!("client {} left", client_id);
        true
    }

    /// Queues an input message and returns the timing feedback for its sender.
    pub fn handle_players_input(
        &mut self,
        client_id: u32,
        input: PlayersInput,
    ) -> Option<InputTimingCorrection> {
        let server_tick = self.tick;
        let state = self.clients.get_mut(&client_id)?;

        let correction = InputTimingCorrection {
            server_tick: input.estimated_server_tick,
            tick_error: tick_delta(input.estimated_server_tick, server_tick) as i32,
        };

        state.inputs.push(QueuedInput {
            target_tick: input.estimated_server_tick,
            input_tick: input.input_tick,
            inputs: input.inputs,
        });

        Some(correction)
    }

    /// Advances the match one tick and returns the packets to send, tagged by client id.
    pub fn tick(&mut self, sink: &mut dyn MatchEventSink) -> Result<Vec<(u32, PacketType)>, PacketError> {
        self.tick = self.tick.wrapping_add(1);

        self.drive_wanderers();
        self.apply_inputs();
        step_layers(&mut self.ctx, &mut self.simulator, self.config.dt(), false);

        self.sync.process_events(&mut self.ctx, sink);
        let events = self.sync.collect(&self.ctx);

        let mut outgoing = Vec::new();
        for (client_id, state) in self.clients.iter_mut() {
            state.visibility.push_events(&events);
            let packets = state
                .visibility
                .flush(&self.ctx, self.tick, state.last_input_tick)?;
            outgoing.extend(packets.into_iter().map(|packet| (*client_id, packet)));
        }

        Ok(outgoing)
    }

    fn apply_inputs(&mut self) {
        for state in self.clients.values_mut() {
            for queued in state.inputs.drain_for_tick(self.tick) {
                for (index, input) in queued.inputs.iter().enumerate() {
                    let (Some(input), Some(Some(id))) = (input, state.players.get(index)) else {
                        continue;
                    };
                    let previous = state.previous_inputs[index];

                    self.ctx.set_inputs(*id, *input);
                    if let Some(entity) = self.ctx.entity_mut(*id) {
                        self.simulator.apply_input(entity, input, &previous);
                    }
                    state.previous_inputs[index] = *input;
                }
                state.last_input_tick = queued.input_tick;
            }
        }
    }

    /// Gives a player control of another entity, or of nothing.
    pub fn set_controlled_entity(
        &mut self,
        client_id: u32,
        player: PlayerIndex,
        target: Option<EntityId>,
    ) -> bool {
        let layer = match target {
            Some(id) => match self.ctx.layer_of(id) {
                Some(layer) => layer,
                None => return false,
            },
            None => SPAWN_LAYER,
        };
        let Some(state) = self.clients.get_mut(&client_id) else {
            return false;
        };
        let Some(slot) = state.players.get_mut(player as usize) else {
            return false;
        };

        *slot = target;
        state
            .visibility
            .set_controlled_entity(player, target.map(|id| (layer, id)));
        self.ctx.push_event(MatchEvent::PlayerControlledEntityChanged {
            player,
            layer,
            entity: target,
        });
        true
    }

    /// Makes a layer visible to every connected client.
    pub fn show_layer_to_all(&mut self, layer: LayerIndex) {
        for state in self.clients.values_mut() {
            state.visibility.show_layer(layer);
        }
    }

    pub fn hide_layer_from_all(&mut self, layer: LayerIndex) {
        for state in self.clients.values_mut() {
            state.visibility.hide_layer(layer);
        }
    }
}

/// Two-second walks alternating direction with a pause in between, jumping
/// once per cycle. Offset per wanderer so they do not move in lockstep.
fn wander_input(tick: Tick, index: usize) -> PlayerInputData {
    let phase = (tick as usize + index * 37) % 360;
    let mut flags = match phase {
        0..120 => InputFlags::MOVING_RIGHT | InputFlags::LOOKING_RIGHT,
        180..300 => InputFlags::MOVING_LEFT,
        _ => InputFlags::empty(),
    };
    if phase == 60 || phase == 240 {
        flags |= InputFlags::JUMPING;
    }
    let aim = if flags.contains(InputFlags::MOVING_LEFT) {
        Vec2::NEG_X
    } else {
        Vec2::X
    };
    PlayerInputData::new(flags, aim)
}
