//! Client side of a match: buffers tick packets until their tick is due,
//! predicts locally controlled entities and reconciles with the server.

mod handlers;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::MatchEvent;
use crate::input::PlayerInputData;
use crate::net::{LayerIndex, PacketType, PlayersInput, ServerEntityId, TickPacketContent, TickPacketQueue};
use crate::prediction::{
    LayerSnapshot, PlayerInputRecord, PredictedInput, PredictionBuffer, ReconcileConfig,
    ReconciliationReport, Reconciler, WeaponState,
};
use crate::simulation::{KinematicConfig, KinematicSimulator, TickSimulator, step_layers};
use crate::tick::{
    ClockEstimator, DEFAULT_TICK_RATE, JITTER_COMPENSATION_TICKS, Tick, history_capacity,
    tick_duration,
};
use crate::world::{Authority, EntityId, MatchContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_rate: u32,
    pub jitter_compensation: u16,
    pub reconcile: ReconcileConfig,
    pub kinematic: KinematicConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            jitter_compensation: JITTER_COMPENSATION_TICKS,
            reconcile: ReconcileConfig::default(),
            kinematic: KinematicConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalPlayer {
    pub controlled: Option<EntityId>,
    pub layer: Option<LayerIndex>,
    pub weapons: Vec<EntityId>,
    pub previous_input: PlayerInputData,
}

/// Running totals over every reconciliation of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub reconciliations: u64,
    pub missing_entries: u64,
    pub divergences: u64,
    pub replayed_ticks: u64,
    pub corrections_applied: u64,
    pub corrections_ignored: u64,
    pub unresolved_references: u64,
}

/// A parent or weapon reference that arrived before its target.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingLink {
    entity: EntityId,
    layer: LayerIndex,
    parent: Option<ServerEntityId>,
    weapon: Option<ServerEntityId>,
}

pub struct ClientSession<S: TickSimulator = KinematicSimulator> {
    ctx: MatchContext,
    queue: TickPacketQueue,
    estimator: ClockEstimator,
    buffer: PredictionBuffer,
    reconciler: Reconciler,
    simulator: S,
    players: Vec<LocalPlayer>,
    pending_links: Vec<PendingLink>,
    local_tick: Tick,
    handled_tick: Tick,
    dt: f32,
    events: Vec<MatchEvent>,
    last_report: Option<ReconciliationReport>,
    stats: SessionStats,
}

impl ClientSession<KinematicSimulator> {
    pub fn new(config: SessionConfig, layer_count: LayerIndex, player_count: u8, server_tick: Tick) -> Self {
        let simulator = KinematicSimulator::new(config.kinematic);
        Self::with_simulator(config, layer_count, player_count, server_tick, simulator)
    }
}

impl<S: TickSimulator> ClientSession<S> {
    /// Starts a session right after `ConnectionAccepted`; the local tick starts at the server's.
    pub fn with_simulator(
        config: SessionConfig,
        layer_count: LayerIndex,
        player_count: u8,
        server_tick: Tick,
        simulator: S,
    ) -> Self {
        let duration = tick_duration(config.tick_rate);
        let capacity = history_capacity(duration);

        Self {
            ctx: MatchContext::new(Authority::Client, layer_count),
            queue: TickPacketQueue::new(),
            estimator: ClockEstimator::new(capacity).with_jitter_compensation(config.jitter_compensation),
            buffer: PredictionBuffer::new(capacity),
            reconciler: Reconciler::new(config.reconcile, duration.as_secs_f32()),
            simulator,
            players: vec![LocalPlayer::default(); player_count as usize],
            pending_links: Vec::new(),
            local_tick: server_tick,
            handled_tick: server_tick,
            dt: duration.as_secs_f32(),
            events: Vec::new(),
            last_report: None,
            stats: SessionStats::default(),
        }
    }

    pub fn ctx(&self) -> &MatchContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut MatchContext {
        &mut self.ctx
    }

    pub fn players(&self) -> &[LocalPlayer] {
        &self.players
    }

    pub fn controlled_entity(&self, player: usize) -> Option<EntityId> {
        self.players.get(player).and_then(|p| p.controlled)
    }

    pub fn local_tick(&self) -> Tick {
        self.local_tick
    }

    /// Tick up to which server packets have been applied.
    pub fn handled_tick(&self) -> Tick {
        self.handled_tick
    }

    pub fn estimator(&self) -> &ClockEstimator {
        &self.estimator
    }

    pub fn buffer(&self) -> &PredictionBuffer {
        &self.buffer
    }

    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }

    pub fn last_report(&self) -> Option<&ReconciliationReport> {
        self.last_report.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Change notifications raised while applying the last tick.
    pub fn events(&self) -> &[MatchEvent] {
        &self.events
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(self.dt)
    }

    /// Accepts a server payload. Tick packets wait in the queue until their
    /// tick is handled; timing corrections go straight to the estimator.
    pub fn handle_packet(&mut self, payload: PacketType) {
        let payload = match TickPacketContent::from_payload(payload) {
            Ok(content) => {
                self.queue.push_content(content);
                return;
            }
            Err(payload) => payload,
        };

        match payload {
            PacketType::InputTimingCorrection(correction) => {
                if self
                    .estimator
                    .handle_correction(correction.server_tick, correction.tick_error)
                {
                    self.stats.corrections_applied += 1;
                } else {
                    self.stats.corrections_ignored += 1;
                }
            }
            other => log::debug!("ignoring unexpected packet: {:?}", other),
        }
    }

    /// Runs one client tick with this tick's local inputs, one per player,
    /// and returns the message to send to the server.
    pub fn tick(&mut self, inputs: &[PlayerInputData]) -> PlayersInput {
        self.local_tick = self.local_tick.wrapping_add(1);

        let estimated = self.estimator.estimate_server_tick(self.local_tick);
        self.handled_tick = self.estimator.adjust_server_tick(estimated);

        for packet in self.queue.drain_up_to(self.handled_tick) {
            packet.content.dispatch(self);
        }

        let records = self.apply_local_inputs(inputs);
        step_layers(&mut self.ctx, &mut self.simulator, self.dt, true);
        self.record_prediction(records);
        self.estimator.record_prediction(estimated);

        self.events = self.ctx.drain_events().collect();

        PlayersInput {
            estimated_server_tick: estimated,
            input_tick: self.local_tick,
            inputs: self
                .players
                .iter()
                .enumerate()
                .map(|(index, player)| {
                    player
                        .controlled
                        .map(|_| inputs.get(index).copied().unwrap_or_default())
                })
                .collect(),
        }
    }

    fn apply_local_inputs(&mut self, inputs: &[PlayerInputData]) -> Vec<PlayerInputRecord> {
        let mut records = Vec::with_capacity(self.players.len());

        for (index, player) in self.players.iter_mut().enumerate() {
            let current = inputs.get(index).copied().unwrap_or_default();
            let previous = player.previous_input;
            player.previous_input = current;

            let entity = player.controlled.and_then(|id| self.ctx.entity_mut(id));
            let movement = match entity {
                Some(entity) => {
                    self.simulator.apply_input(entity, &current, &previous);
                    entity.movement
                }
                None => None,
            };

            let weapons = player
                .weapons
                .iter()
                .filter_map(|weapon| {
                    self.ctx.entity(*weapon).map(|entity| WeaponState {
                        weapon: *weapon,
                        animation: entity.animation,
                    })
                })
                .collect();

            records.push(PlayerInputRecord {
                current,
                previous,
                movement,
                weapons,
            });
        }

        records
    }

    fn record_prediction(&mut self, players: Vec<PlayerInputRecord>) {
        let layers = (0..self.ctx.layer_count())
            .filter(|index| {
                let layer = self.ctx.layer(*index);
                layer.is_enabled() && layer.is_predicted()
            })
            .map(|index| LayerSnapshot::capture(&self.ctx, index))
            .collect();

        self.buffer.record_tick(PredictedInput {
            input_tick: self.local_tick,
            players,
            layers,
        });
    }

    fn controlled_ids(&self) -> Vec<Option<EntityId>> {
        self.players.iter().map(|p| p.controlled).collect()
    }

    fn record_report(&mut self, report: ReconciliationReport) {
        self.stats.reconciliations += 1;
        if !report.entry_found {
            self.stats.missing_entries += 1;
        }
        if report.divergent {
            self.stats.divergences += 1;
        }
        self.stats.replayed_ticks += report.replayed_ticks as u64;
        self.stats.unresolved_references += report.unresolved as u64;
        self.last_report = Some(report);
    }
}

#[cfg(test)]
mod tests;
