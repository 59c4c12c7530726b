use std::collections::HashSet;
use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::net::{LayerIndex, MatchState, MatchStateEntity, partitioned, validate_partition};
use crate::simulation::{TickSimulator, step_layers};
use crate::world::{EntityId, EntityTransformSnapshot, MatchContext};

use super::buffer::{LayerSnapshot, PredictedInput, PredictionBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Pixels.
    pub position_tolerance: f32,
    /// Degrees.
    pub rotation_tolerance: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 5.0,
            rotation_tolerance: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Whether a prediction entry existed for the snapshot's input tick.
    pub entry_found: bool,
    /// Entities compared against the matched prediction entry.
    pub matched: usize,
    pub divergent: bool,
    /// Entities that received the authoritative transform.
    pub applied: usize,
    pub replayed_ticks: usize,
    pub reenabled: usize,
    pub force_enabled: usize,
    /// Snapshot entries referring to entities this client does not know.
    pub unresolved: usize,
}

/// Compares authoritative snapshots with recorded predictions and rolls back on divergence.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconcileConfig,
    dt: f32,
}

struct Authoritative<'a> {
    layer: LayerIndex,
    entity: EntityId,
    state: &'a MatchStateEntity,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig, dt: f32) -> Self {
        Self { config, dt }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconciles one `MatchState`. `players` maps local player index to the
    /// entity that player currently controls.
    pub fn reconcile<S: TickSimulator + ?Sized>(
        &self,
        ctx: &mut MatchContext,
        buffer: &mut PredictionBuffer,
        players: &[Option<EntityId>],
        state: &MatchState,
        simulator: &mut S,
    ) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();

        if let Err(e) = validate_partition(&state.layers, state.entities.len()) {
            log::error!("dropping match state for tick {}: {}", state.state_tick, e);
            return report;
        }

        let authoritative = resolve_entities(ctx, state, &mut report);

        let entry = buffer.find(state.last_input_tick).cloned();
        report.entry_found = entry.is_some();

        if let Some(entry) = &entry {
            report.divergent = self.detect_divergence(ctx, entry, &authoritative, &mut report);
        }

        let mut inactive = HashSet::new();
        if let (true, Some(entry)) = (report.divergent, &entry) {
            inactive = rewind(ctx, entry, players);
        }

        for auth in &authoritative {
            let predicted = ctx.layer(auth.layer).is_predicted();
            let Some(entity) = ctx.entity_mut(auth.entity) else {
                continue;
            };
            if !predicted || !entity.is_physical() || report.divergent {
                entity.apply_match_state(auth.state);
                report.applied += 1;
            }
        }

        buffer.prune(state.last_input_tick);

        if report.divergent {
            let dt = self.dt;
            report.replayed_ticks = buffer.replay(0, |entry| {
                replay_entry(ctx, simulator, players, entry, dt, &mut inactive, &mut report.reenabled);
            });

            for id in inactive.drain() {
                if let Some(entity) = ctx.entity_mut(id) {
                    entity.enabled = true;
                    report.force_enabled += 1;
                }
            }
        }

        log::debug!(
            "reconciled tick {} (input {}): found={} matched={} divergent={} replayed={} reenabled={} forced={}",
            state.state_tick,
            state.last_input_tick,
            report.entry_found,
            report.matched,
            report.divergent,
            report.replayed_ticks,
            report.reenabled,
            report.force_enabled
        );

        report
    }

    fn detect_divergence(
        &self,
        ctx: &MatchContext,
        entry: &PredictedInput,
        authoritative: &[Authoritative<'_>],
        report: &mut ReconciliationReport,
    ) -> bool {
        let mut divergent = false;

        for auth in authoritative {
            let layer = ctx.layer(auth.layer);
            if !layer.is_predicted() || !layer.is_enabled() {
                continue;
            }
            let Some(recorded) = entry
                .layer(auth.layer)
                .and_then(|snapshot| snapshot.entities.get(&auth.entity))
            else {
                continue;
            };

            report.matched += 1;
            if recorded.is_physical && !self.within_tolerance(recorded, auth.state) {
                log::debug!(
                    "entity {} diverged at input tick {}",
                    auth.entity,
                    entry.input_tick
                );
                divergent = true;
            }
        }

        divergent
    }

    fn within_tolerance(&self, recorded: &EntityTransformSnapshot, state: &MatchStateEntity) -> bool {
        let position_error = recorded.position.distance(state.position.into());
        let rotation_error = angle_between(recorded.rotation, state.rotation).to_degrees();

        position_error <= self.config.position_tolerance
            && rotation_error <= self.config.rotation_tolerance
    }
}

/// Smallest absolute difference between two angles in radians.
fn angle_between(a: f32, b: f32) -> f32 {
    let diff = (a - b).rem_euclid(TAU);
    diff.min(TAU - diff)
}

fn resolve_entities<'a>(
    ctx: &MatchContext,
    state: &'a MatchState,
    report: &mut ReconciliationReport,
) -> Vec<Authoritative<'a>> {
    let mut resolved = Vec::with_capacity(state.entities.len());

    for (layer, entities) in partitioned(&state.layers, &state.entities) {
        if layer >= ctx.layer_count() {
            log::error!("match state references unknown layer {}", layer);
            report.unresolved += entities.len();
            continue;
        }
        for entity_state in entities {
            match ctx.resolve_server_id(layer, entity_state.id) {
                Some(entity) => resolved.push(Authoritative {
                    layer,
                    entity,
                    state: entity_state,
                }),
                None => {
                    log::error!(
                        "match state references unknown entity {} on layer {}",
                        entity_state.id,
                        layer
                    );
                    report.unresolved += 1;
                }
            }
        }
    }

    resolved
}

/// Resets every predicted layer to the recorded state. Entities missing from
/// the recording are disabled and returned.
fn rewind(ctx: &mut MatchContext, entry: &PredictedInput, players: &[Option<EntityId>]) -> HashSet<EntityId> {
    let mut inactive = HashSet::new();

    for index in 0..ctx.layer_count() {
        let layer = ctx.layer_mut(index);
        if !layer.is_predicted() {
            continue;
        }
        let Some(snapshot) = entry.layer(index) else {
            continue;
        };

        for entity in layer.entities_mut() {
            match snapshot.entities.get(&entity.unique_id) {
                Some(recorded) => entity.restore_transform(recorded),
                None if entity.enabled => {
                    entity.enabled = false;
                    inactive.insert(entity.unique_id);
                }
                None => {}
            }
        }
    }

    for (record, controlled) in entry.players.iter().zip(players) {
        let Some(id) = controlled else {
            continue;
        };
        if let (Some(entity), Some(movement)) = (ctx.entity_mut(*id), record.movement) {
            entity.movement = Some(movement);
        }
        for weapon in &record.weapons {
            if let Some(entity) = ctx.entity_mut(weapon.weapon) {
                entity.animation = weapon.animation;
            }
        }
    }

    inactive
}

fn replay_entry<S: TickSimulator + ?Sized>(
    ctx: &mut MatchContext,
    simulator: &mut S,
    players: &[Option<EntityId>],
    entry: &mut PredictedInput,
    dt: f32,
    inactive: &mut HashSet<EntityId>,
    reenabled: &mut usize,
) {
    for (record, controlled) in entry.players.iter().zip(players) {
        let Some(entity) = controlled.and_then(|id| ctx.entity_mut(id)) else {
            continue;
        };
        simulator.apply_input(entity, &record.current, &record.previous);
    }

    step_layers(ctx, simulator, dt, true);

    inactive.retain(|id| {
        let Some(layer) = ctx.layer_of(*id) else {
            return false;
        };
        let Some(recorded) = entry
            .layer(layer)
            .and_then(|snapshot| snapshot.entities.get(id))
        else {
            return true;
        };
        let recorded = *recorded;
        if let Some(entity) = ctx.entity_mut(*id) {
            entity.enabled = true;
            entity.restore_transform(&recorded);
            *reenabled += 1;
        }
        false
    });

    for snapshot in entry.layers.iter_mut() {
        *snapshot = LayerSnapshot::capture(ctx, snapshot.layer_index);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use glam::Vec2;

    use super::*;
    use crate::net::LayerPartition;
    use crate::prediction::PlayerInputRecord;
    use crate::simulation::KinematicSimulator;
    use crate::world::{Authority, Entity, PhysicsBody};

    const DT: f32 = 1.0 / 60.0;

    fn client_with_box(predicted: bool, physical: bool) -> (MatchContext, EntityId) {
        let mut ctx = MatchContext::new(Authority::Client, 1);
        ctx.layer_mut(0).set_enabled(true);
        ctx.layer_mut(0).set_predicted(predicted);

        let mut entity = Entity::new(EntityId(10), "box").with_position(Vec2::new(100.0, 0.0));
        entity.server_id = Some(1);
        if physical {
            entity.physics = Some(PhysicsBody {
                is_sleeping: true,
                ..Default::default()
            });
        }
        ctx.create_entity(0, entity);
        (ctx, EntityId(10))
    }

    fn record(ctx: &MatchContext, input_tick: u16) -> PredictedInput {
        PredictedInput {
            input_tick,
            players: Vec::new(),
            layers: vec![LayerSnapshot::capture(ctx, 0)],
        }
    }

    fn state_at(last_input_tick: u16, x: f32) -> MatchState {
        MatchState {
            last_input_tick,
            state_tick: 100,
            layers: vec![LayerPartition {
                layer_index: 0,
                entity_count: 1,
            }],
            entities: vec![MatchStateEntity {
                id: 1,
                position: [x, 0.0],
                rotation: 0.0,
                player_movement: None,
                physics_properties: None,
            }],
        }
    }

    #[test]
    fn small_error_is_trusted() {
        let (mut ctx, id) = client_with_box(true, true);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 7));
        buffer.record_tick(record(&ctx, 8));

        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state_at(7, 102.0),
            &mut KinematicSimulator::default(),
        );

        assert!(report.entry_found);
        assert_eq!(report.matched, 1);
        assert!(!report.divergent);
        assert_eq!(report.applied, 0);
        assert_eq!(ctx.entity(id).unwrap().position.x, 100.0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn large_error_rolls_back_and_replays() {
        let (mut ctx, id) = client_with_box(true, true);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 7));
        buffer.record_tick(record(&ctx, 8));
        buffer.record_tick(record(&ctx, 9));

        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state_at(7, 140.0),
            &mut KinematicSimulator::default(),
        );

        assert!(report.divergent);
        assert_eq!(report.replayed_ticks, 2);
        assert_eq!(ctx.entity(id).unwrap().position.x, 140.0);
        assert_eq!(
            buffer.latest().unwrap().layer(0).unwrap().entities[&id].position.x,
            140.0
        );
    }

    fn reconcile_rotated(degrees: f32) -> (ReconciliationReport, f32) {
        let (mut ctx, id) = client_with_box(true, true);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 7));
        buffer.record_tick(record(&ctx, 8));

        let mut state = state_at(7, 100.0);
        state.entities[0].rotation = degrees.to_radians();
        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state,
            &mut KinematicSimulator::default(),
        );
        (report, ctx.entity(id).unwrap().rotation)
    }

    #[test]
    fn small_rotation_error_is_trusted() {
        let (report, rotation) = reconcile_rotated(4.0);
        assert_eq!(report.matched, 1);
        assert!(!report.divergent);
        assert_eq!(rotation, 0.0);
    }

    #[test]
    fn large_rotation_error_rolls_back() {
        let (report, rotation) = reconcile_rotated(6.0);
        assert!(report.divergent);
        assert_eq!(report.replayed_ticks, 1);
        assert!((rotation - 6f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn missing_entry_skips_check() {
        let (mut ctx, id) = client_with_box(true, true);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 20));

        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state_at(7, 140.0),
            &mut KinematicSimulator::default(),
        );

        assert!(!report.entry_found);
        assert!(!report.divergent);
        assert_eq!(ctx.entity(id).unwrap().position.x, 100.0);
    }

    #[test]
    fn non_predicted_always_applied() {
        let (mut ctx, id) = client_with_box(false, true);
        let mut buffer = PredictionBuffer::new(120);

        Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state_at(7, 101.0),
            &mut KinematicSimulator::default(),
        );

        assert_eq!(ctx.entity(id).unwrap().position.x, 101.0);
    }

    #[test]
    fn static_predicted_entity_always_applied() {
        let (mut ctx, id) = client_with_box(true, false);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 7));

        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state_at(7, 400.0),
            &mut KinematicSimulator::default(),
        );

        assert!(!report.divergent);
        assert_eq!(ctx.entity(id).unwrap().position.x, 400.0);
    }

    #[test]
    fn entities_missing_from_recording_are_restored() {
        let (mut ctx, id) = client_with_box(true, true);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 7));

        let mut spawned = Entity::new(EntityId(11), "debris").with_physics(PhysicsBody::default());
        spawned.server_id = Some(2);
        ctx.create_entity(0, spawned);

        buffer.record_tick(record(&ctx, 8));
        buffer.record_tick(PredictedInput {
            input_tick: 9,
            players: Vec::new(),
            layers: vec![LayerSnapshot {
                layer_index: 0,
                entities: HashMap::from([(id, ctx.entity(id).unwrap().transform_snapshot())]),
            }],
        });

        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state_at(7, 200.0),
            &mut KinematicSimulator::default(),
        );

        assert!(report.divergent);
        assert_eq!(report.reenabled, 1);
        assert_eq!(report.force_enabled, 0);
        assert!(ctx.entity(EntityId(11)).unwrap().enabled);
    }

    #[test]
    fn stuck_inactive_entities_force_enabled() {
        let (mut ctx, _) = client_with_box(true, true);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 7));

        let mut late = Entity::new(EntityId(12), "debris");
        late.server_id = Some(3);
        ctx.create_entity(0, late);

        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[],
            &state_at(7, 200.0),
            &mut KinematicSimulator::default(),
        );

        assert!(report.divergent);
        assert_eq!(report.replayed_ticks, 0);
        assert_eq!(report.force_enabled, 1);
        assert!(ctx.entity(EntityId(12)).unwrap().enabled);
    }

    #[test]
    fn replay_reapplies_player_inputs() {
        let mut ctx = MatchContext::new(Authority::Client, 1);
        ctx.layer_mut(0).set_enabled(true);
        ctx.layer_mut(0).set_predicted(true);
        let mut player = Entity::new(EntityId(1), "player")
            .with_physics(PhysicsBody::default())
            .with_movement(Default::default());
        player.server_id = Some(1);
        ctx.create_entity(0, player);

        let right = crate::input::PlayerInputData::new(crate::input::InputFlags::MOVING_RIGHT, Vec2::X);
        let mut buffer = PredictionBuffer::new(120);
        buffer.record_tick(record(&ctx, 7));
        buffer.record_tick(PredictedInput {
            input_tick: 8,
            players: vec![PlayerInputRecord {
                current: right,
                previous: Default::default(),
                movement: None,
                weapons: Vec::new(),
            }],
            layers: vec![LayerSnapshot::capture(&ctx, 0)],
        });

        let mut state = state_at(7, 50.0);
        state.entities[0].physics_properties = Some(crate::net::MovementPhysics {
            angular_velocity: 0.0,
            linear_velocity: [0.0, 0.0],
        });

        let report = Reconciler::new(ReconcileConfig::default(), DT).reconcile(
            &mut ctx,
            &mut buffer,
            &[Some(EntityId(1))],
            &state,
            &mut KinematicSimulator::default(),
        );

        assert!(report.divergent);
        assert_eq!(report.replayed_ticks, 1);
        let x = ctx.entity(EntityId(1)).unwrap().position.x;
        assert!((x - (50.0 + 200.0 * DT)).abs() < 1e-3);
    }

    #[test]
    fn rotation_wraps() {
        assert!(angle_between(0.01, TAU - 0.01) < 0.03);
        assert!((angle_between(0.0, std::f32::consts::PI) - std::f32::consts::PI).abs() < 1e-6);
    }
}
