use glam::Vec2;

use super::*;
use crate::input::InputFlags;
use crate::net::{
    ControlEntity, CreateEntities, DisableLayer, EnableLayer, EntitiesInputs, EntityDescriptor,
    HealthData, HealthEntry, HealthUpdate, InputEntry, InputTimingCorrection, LayerPartition,
    MapReset, MatchState, MatchStateEntity, MovementPhysics, PhysicsProperties, PlayerMovement,
};

fn descriptor(id: u32, unique_id: u64, x: f32) -> EntityDescriptor {
    EntityDescriptor {
        id,
        unique_id,
        class_name: "player".into(),
        position: [x, 0.0],
        rotation: 0.0,
        scale: 1.0,
        animation: None,
        health: Some(HealthData {
            current: 100,
            max: 100,
        }),
        inputs: Some(PlayerInputData::default()),
        name: None,
        parent_id: None,
        weapon_id: None,
        physics: Some(PhysicsProperties {
            mass: 1.0,
            moment_of_inertia: 1.0,
            is_sleeping: false,
            angular_velocity: 0.0,
            linear_velocity: [0.0, 0.0],
        }),
        player_movement: Some(PlayerMovement::default()),
    }
}

fn no_jitter() -> SessionConfig {
    SessionConfig {
        jitter_compensation: 0,
        ..SessionConfig::default()
    }
}

fn right() -> PlayerInputData {
    PlayerInputData::new(InputFlags::MOVING_RIGHT, Vec2::X)
}

/// Session controlling server entity 1 (unique id 10) on layer 0 after one tick.
fn controlling_session() -> ClientSession {
    let mut session = ClientSession::new(no_jitter(), 2, 1, 0);
    session.handle_packet(PacketType::EnableLayer(EnableLayer {
        state_tick: 1,
        layer_index: 0,
        entities: vec![descriptor(1, 10, 0.0)],
    }));
    session.handle_packet(PacketType::ControlEntity(ControlEntity {
        state_tick: 1,
        player_index: 0,
        layer_index: 0,
        entity_id: Some(1),
    }));
    session.tick(&[right()]);
    session
}

fn state_for(session: &ClientSession, input_tick: Tick, state_tick: Tick, offset: f32) -> MatchState {
    let recorded = session.buffer().find(input_tick).unwrap().layers[0].entities[&EntityId(10)];
    MatchState {
        last_input_tick: input_tick,
        state_tick,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 1,
        }],
        entities: vec![MatchStateEntity {
            id: 1,
            position: [recorded.position.x + offset, recorded.position.y],
            rotation: recorded.rotation,
            player_movement: Some(PlayerMovement::default()),
            physics_properties: Some(MovementPhysics {
                angular_velocity: 0.0,
                linear_velocity: recorded.linear_velocity.unwrap_or_default().into(),
            }),
        }],
    }
}

#[test]
fn packets_wait_for_their_tick() {
    let mut session = ClientSession::new(SessionConfig::default(), 1, 1, 0);
    session.handle_packet(PacketType::CreateEntities(CreateEntities {
        state_tick: 5,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 1,
        }],
        entities: vec![descriptor(1, 10, 0.0)],
    }));

    for _ in 0..7 {
        session.tick(&[PlayerInputData::default()]);
    }
    assert_eq!(session.ctx().entity_count(), 0);
    assert_eq!(session.queued_packets(), 1);

    session.tick(&[PlayerInputData::default()]);
    assert_eq!(session.handled_tick(), 5);
    assert!(session.ctx().contains(EntityId(10)));
    assert!(session.events().iter().any(|e| matches!(e, MatchEvent::EntityCreated { .. })));
}

#[test]
fn control_enables_prediction() {
    let session = controlling_session();

    assert_eq!(session.controlled_entity(0), Some(EntityId(10)));
    assert!(session.ctx().layer(0).is_predicted());
    assert!(!session.ctx().layer(1).is_predicted());

    let entity = session.ctx().entity(EntityId(10)).unwrap();
    assert!(entity.position.x > 0.0);
    assert_eq!(session.buffer().len(), 1);
    assert_eq!(session.buffer().latest().unwrap().input_tick, 1);
}

#[test]
fn input_message_only_for_controlled_players() {
    let mut session = ClientSession::new(no_jitter(), 1, 2, 0);
    let message = session.tick(&[right(), right()]);
    assert_eq!(message.inputs, vec![None, None]);

    let mut session = controlling_session();
    let message = session.tick(&[right()]);
    assert_eq!(message.input_tick, 2);
    assert_eq!(message.estimated_server_tick, 2);
    assert_eq!(message.inputs, vec![Some(right())]);
}

#[test]
fn small_error_keeps_prediction() {
    let mut session = controlling_session();
    session.tick(&[right()]);
    session.tick(&[right()]);

    let state = state_for(&session, 1, 4, 2.0);
    session.handle_packet(PacketType::MatchState(state));
    let before = session.ctx().entity(EntityId(10)).unwrap().position;
    session.tick(&[PlayerInputData::default()]);

    let report = session.last_report().unwrap();
    assert!(report.entry_found);
    assert!(!report.divergent);
    assert_eq!(session.stats().divergences, 0);
    // Releasing the input stops the entity where prediction left it.
    assert_eq!(session.ctx().entity(EntityId(10)).unwrap().position, before);
}

#[test]
fn large_error_rolls_back() {
    let mut session = controlling_session();
    session.tick(&[right()]);
    session.tick(&[right()]);
    let predicted_x = session.ctx().entity(EntityId(10)).unwrap().position.x;

    let state = state_for(&session, 1, 4, 40.0);
    session.handle_packet(PacketType::MatchState(state));
    session.tick(&[right()]);

    let report = session.last_report().unwrap();
    assert!(report.divergent);
    assert_eq!(report.replayed_ticks, 2);
    assert_eq!(session.stats().divergences, 1);

    let x = session.ctx().entity(EntityId(10)).unwrap().position.x;
    assert!(x > predicted_x + 39.0, "replayed from corrected state, got {}", x);
}

#[test]
fn references_resolve_across_packets() {
    let mut session = ClientSession::new(no_jitter(), 1, 1, 0);

    let mut weapon = descriptor(2, 20, 0.0);
    weapon.class_name = "rifle".into();
    weapon.parent_id = Some(1);
    session.handle_packet(PacketType::EnableLayer(EnableLayer {
        state_tick: 1,
        layer_index: 0,
        entities: vec![weapon],
    }));
    session.handle_packet(PacketType::CreateEntities(CreateEntities {
        state_tick: 2,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 1,
        }],
        entities: vec![descriptor(1, 10, 0.0)],
    }));

    session.tick(&[]);
    assert_eq!(session.ctx().entity(EntityId(20)).unwrap().parent, None);

    session.tick(&[]);
    assert_eq!(
        session.ctx().entity(EntityId(20)).unwrap().parent,
        Some(EntityId(10))
    );
}

#[test]
fn disabling_layer_releases_control() {
    let mut session = controlling_session();
    session.handle_packet(PacketType::DisableLayer(DisableLayer {
        state_tick: 2,
        layer_index: 0,
    }));
    session.tick(&[right()]);

    assert_eq!(session.controlled_entity(0), None);
    assert_eq!(session.ctx().entity_count(), 0);
    assert!(!session.ctx().layer(0).is_enabled());
}

#[test]
fn map_reset_replaces_world() {
    let mut session = controlling_session();
    session.tick(&[right()]);
    assert_eq!(session.buffer().len(), 2);

    session.handle_packet(PacketType::MapReset(MapReset {
        state_tick: 3,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 2,
        }],
        entities: vec![descriptor(1, 10, 500.0), descriptor(2, 11, 600.0)],
    }));
    session.tick(&[PlayerInputData::default()]);

    assert_eq!(session.ctx().entity_count(), 2);
    assert_eq!(session.controlled_entity(0), Some(EntityId(10)));
    assert_eq!(session.ctx().entity(EntityId(11)).unwrap().position.x, 600.0);
    // Cleared on reset, then this tick's prediction recorded.
    assert_eq!(session.buffer().len(), 1);
}

#[test]
fn malformed_and_unknown_references_are_dropped() {
    let mut session = controlling_session();
    session.handle_packet(PacketType::HealthUpdate(HealthUpdate {
        state_tick: 2,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 2,
        }],
        entities: vec![
            HealthEntry {
                id: 1,
                current_health: 40,
            },
            HealthEntry {
                id: 77,
                current_health: 10,
            },
        ],
    }));
    session.handle_packet(PacketType::HealthUpdate(HealthUpdate {
        state_tick: 2,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 5,
        }],
        entities: vec![HealthEntry {
            id: 1,
            current_health: 1,
        }],
    }));
    session.tick(&[right()]);

    let health = session.ctx().entity(EntityId(10)).unwrap().health.unwrap();
    assert_eq!(health.current, 40);
    assert_eq!(session.stats().unresolved_references, 1);
}

#[test]
fn packets_for_unknown_layers_are_dropped() {
    let mut session = controlling_session();
    session.handle_packet(PacketType::EnableLayer(EnableLayer {
        state_tick: 2,
        layer_index: 7,
        entities: vec![descriptor(2, 11, 50.0)],
    }));
    session.handle_packet(PacketType::HealthUpdate(HealthUpdate {
        state_tick: 2,
        layers: vec![LayerPartition {
            layer_index: 9,
            entity_count: 1,
        }],
        entities: vec![HealthEntry {
            id: 1,
            current_health: 5,
        }],
    }));
    session.tick(&[right()]);

    assert_eq!(session.ctx().entity_count(), 1);
    assert_eq!(session.controlled_entity(0), Some(EntityId(10)));
    let health = session.ctx().entity(EntityId(10)).unwrap().health.unwrap();
    assert_eq!(health.current, 100);
}

#[test]
fn remote_inputs_do_not_override_local_ones() {
    let mut session = controlling_session();
    session.handle_packet(PacketType::EntitiesInputs(EntitiesInputs {
        state_tick: 2,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 1,
        }],
        entities: vec![InputEntry {
            id: 1,
            inputs: PlayerInputData::new(InputFlags::MOVING_LEFT, Vec2::NEG_X),
        }],
    }));
    session.tick(&[right()]);

    let inputs = session.ctx().entity(EntityId(10)).unwrap().inputs.unwrap();
    assert!(inputs.has(InputFlags::MOVING_RIGHT));
}

#[test]
fn corrections_need_a_matching_prediction() {
    let mut session = ClientSession::new(no_jitter(), 1, 1, 0);
    session.tick(&[]);

    session.handle_packet(PacketType::InputTimingCorrection(InputTimingCorrection {
        server_tick: 1,
        tick_error: -4,
    }));
    session.handle_packet(PacketType::InputTimingCorrection(InputTimingCorrection {
        server_tick: 900,
        tick_error: 2,
    }));

    assert_eq!(session.stats().corrections_applied, 1);
    assert_eq!(session.stats().corrections_ignored, 1);
    assert_eq!(session.estimator().average_tick_error(), -4);
}
