use glam::Vec2;

use super::*;
use crate::event::NullSink;
use crate::net::MovementPhysics;
use crate::sync::NetworkSyncSystem;
use crate::world::{Authority, Entity, PhysicsBody};

struct Fixture {
    ctx: MatchContext,
    sync: NetworkSyncSystem,
    vm: VisibilityManager,
    tick: Tick,
}

impl Fixture {
    fn new(config: VisibilityConfig) -> Self {
        Self {
            ctx: MatchContext::new(Authority::Server, 2),
            sync: NetworkSyncSystem::new(),
            vm: VisibilityManager::new(config),
            tick: 0,
        }
    }

    fn spawn(&mut self, layer: LayerIndex, mut entity: Entity) -> EntityId {
        entity.unique_id = self.ctx.allocate_entity_id();
        self.ctx.create_entity(layer, entity)
    }

    fn spawn_ball(&mut self, layer: LayerIndex) -> EntityId {
        self.spawn(
            layer,
            Entity::new(EntityId(0), "ball").with_physics(PhysicsBody::default()),
        )
    }

    fn flush(&mut self) -> Vec<PacketType> {
        self.sync.process_events(&mut self.ctx, &mut NullSink);
        let events = self.sync.collect(&self.ctx);
        self.vm.push_events(&events);
        self.tick = self.tick.wrapping_add(1);
        self.vm.flush(&self.ctx, self.tick, 0).unwrap()
    }
}

fn kind(packet: &PacketType) -> &'static str {
    match packet {
        PacketType::MapReset(_) => "map_reset",
        PacketType::DisableLayer(_) => "disable_layer",
        PacketType::PlayerLayer(_) => "player_layer",
        PacketType::EnableLayer(_) => "enable_layer",
        PacketType::EntitiesDeath(_) => "death",
        PacketType::DeleteEntities(_) => "delete",
        PacketType::CreateEntities(_) => "create",
        PacketType::ControlEntity(_) => "control",
        PacketType::HealthUpdate(_) => "health",
        PacketType::EntitiesInputs(_) => "inputs",
        PacketType::EntitiesAnimation(_) => "animation",
        PacketType::EntityPhysics(_) => "physics",
        PacketType::EntitiesScale(_) => "scale",
        PacketType::EntityWeapon(_) => "entity_weapon",
        PacketType::PlayerWeapons(_) => "player_weapons",
        PacketType::MatchState(_) => "match_state",
        _ => "other",
    }
}

fn kinds(packets: &[PacketType]) -> Vec<&'static str> {
    packets.iter().map(kind).collect()
}

fn match_state(packets: &[PacketType]) -> &MatchState {
    match packets.last() {
        Some(PacketType::MatchState(state)) => state,
        other => panic!("expected trailing match state, got {:?}", other),
    }
}

fn static_state(id: ServerEntityId) -> MatchStateEntity {
    MatchStateEntity {
        id,
        position: [0.0, 0.0],
        rotation: 0.0,
        player_movement: None,
        physics_properties: Some(MovementPhysics {
            angular_velocity: 0.0,
            linear_velocity: [0.0, 0.0],
        }),
    }
}

#[test]
fn showing_layer_sends_full_entity_set() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    let a = fx.spawn(0, Entity::new(EntityId(0), "crate"));
    let b = fx.spawn(0, Entity::new(EntityId(0), "crate"));
    fx.spawn(1, Entity::new(EntityId(0), "crate"));
    fx.flush();

    assert!(fx.vm.show_layer(0));
    assert!(!fx.vm.show_layer(0));
    let packets = fx.flush();

    assert_eq!(kinds(&packets), vec!["enable_layer", "match_state"]);
    let PacketType::EnableLayer(enable) = &packets[0] else {
        unreachable!()
    };
    assert_eq!(enable.layer_index, 0);
    assert_eq!(enable.entities.len(), 2);
    assert!(fx.vm.is_known(a) && fx.vm.is_known(b));
    assert_eq!(fx.vm.known_count(), 2);
}

#[test]
fn flush_order_is_fixed() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    let victim = fx.spawn(0, Entity::new(EntityId(0), "player").with_health(100));
    let doomed = fx.spawn(0, Entity::new(EntityId(0), "crate"));
    let sized = fx.spawn(0, Entity::new(EntityId(0), "crate"));
    let body = fx.spawn_ball(0);
    fx.spawn(1, Entity::new(EntityId(0), "crate"));
    fx.vm.show_layer(0);
    fx.vm.show_layer(1);
    fx.flush();

    fx.vm.hide_layer(1);
    fx.vm.queue_player_layer(0, 0);
    fx.ctx.kill(victim);
    fx.ctx.destroy_entity(doomed);
    let fresh = fx.spawn(0, Entity::new(EntityId(0), "crate"));
    fx.vm.set_controlled_entity(0, Some((0, fresh)));
    fx.ctx.set_health(victim, 50);
    fx.ctx.set_inputs(victim, Default::default());
    fx.ctx.set_animation(victim, 3);
    fx.ctx.set_physics_properties(body, 4.0, 2.0, false);
    fx.ctx.set_scale(sized, 2.0);
    fx.ctx.set_weapon(victim, Some(sized));
    fx.vm.queue_player_weapons(0, 0, vec![sized]);

    let packets = fx.flush();
    assert_eq!(
        kinds(&packets),
        vec![
            "disable_layer",
            "player_layer",
            "death",
            "delete",
            "create",
            "control",
            "health",
            "inputs",
            "animation",
            "physics",
            "scale",
            "entity_weapon",
            "player_weapons",
            "match_state",
        ]
    );
}

#[test]
fn map_reset_comes_first() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    fx.spawn(0, Entity::new(EntityId(0), "crate"));
    fx.vm.show_layer(0);
    fx.flush();

    fx.vm.queue_map_reset();
    fx.vm.queue_player_layer(1, 0);
    let packets = fx.flush();

    assert_eq!(kinds(&packets), vec!["map_reset", "player_layer", "match_state"]);
    let PacketType::MapReset(reset) = &packets[0] else {
        unreachable!()
    };
    assert_eq!(reset.entities.len(), 1);
    assert_eq!(fx.vm.known_count(), 1);
}

#[test]
fn events_for_new_entities_follow_creation() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    fx.vm.show_layer(0);
    fx.flush();

    let player = fx.spawn(0, Entity::new(EntityId(0), "player").with_health(100));
    fx.ctx.set_health(player, 10);
    let packets = fx.flush();

    assert_eq!(kinds(&packets), vec!["create", "health", "match_state"]);
    assert!(fx.vm.held_entities().is_empty());
}

#[test]
fn hidden_layer_events_dropped() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    let hidden = fx.spawn(1, Entity::new(EntityId(0), "player").with_health(100));
    fx.vm.show_layer(0);
    fx.flush();

    fx.ctx.set_health(hidden, 5);
    fx.ctx.kill(hidden);
    let packets = fx.flush();

    assert_eq!(kinds(&packets), vec!["match_state"]);
    assert!(fx.vm.held_entities().is_empty());
}

#[test]
fn hiding_forgets_entities() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    let id = fx.spawn_ball(0);
    fx.vm.show_layer(0);
    fx.flush();
    assert!(fx.vm.is_known(id));

    assert!(fx.vm.hide_layer(0));
    let packets = fx.flush();
    assert_eq!(kinds(&packets), vec!["disable_layer", "match_state"]);
    assert!(!fx.vm.is_known(id));
    assert!(match_state(&packets).entities.is_empty());
}

#[test]
fn show_then_hide_before_flush_is_silent() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    fx.spawn_ball(0);
    fx.vm.show_layer(0);
    fx.vm.hide_layer(0);

    assert_eq!(kinds(&fx.flush()), vec!["match_state"]);
}

#[test]
fn creations_are_dependency_ordered() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    fx.vm.show_layer(0);
    fx.flush();

    let weapon = fx.ctx.allocate_entity_id();
    let owner = fx.ctx.allocate_entity_id();
    fx.ctx.create_entity(0, Entity::new(weapon, "rifle"));
    let mut player = Entity::new(owner, "player");
    player.weapon = Some(weapon);
    fx.ctx.create_entity(0, player);
    let child = fx.spawn(0, Entity::new(EntityId(0), "hat").with_parent(owner));

    let packets = fx.flush();
    let PacketType::CreateEntities(create) = &packets[0] else {
        panic!("expected creation batch first")
    };
    let order: Vec<u64> = create.entities.iter().map(|d| d.unique_id).collect();
    let pos = |id: EntityId| order.iter().position(|u| *u == id.0).unwrap();
    assert_eq!(order.len(), 3);
    assert!(pos(owner) < pos(child));
    assert!(pos(weapon) < pos(owner));
}

#[test]
fn large_creation_batches_are_split() {
    let mut fx = Fixture::new(VisibilityConfig {
        mtu_budget: 400,
        ..Default::default()
    });
    for _ in 0..20 {
        fx.spawn(0, Entity::new(EntityId(0), "crate").with_name("a reasonably long crate name"));
    }
    fx.vm.show_layer(0);
    let packets = fx.flush();

    assert_eq!(kind(&packets[0]), "enable_layer");
    let total: usize = packets
        .iter()
        .map(|p| match p {
            PacketType::EnableLayer(p) => p.entities.len(),
            PacketType::CreateEntities(p) => p.entities.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(total, 20);
    assert!(packets.len() > 2);
    assert_eq!(kind(&packets[1]), "create");
}

#[test]
fn controlled_entity_always_included() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    let balls: Vec<EntityId> = (0..4).map(|_| fx.spawn_ball(0)).collect();
    fx.vm.show_layer(0);
    fx.vm.set_controlled_entity(0, Some((0, balls[3])));
    let packets = fx.flush();

    assert_eq!(kinds(&packets), vec!["enable_layer", "control", "match_state"]);
    let state = match_state(&packets);
    let first = fx.ctx.server_id_of(balls[3]).unwrap();
    assert_eq!(state.entities[0].id, first);
}

#[test]
fn priority_rotates_under_budget() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    let balls: Vec<EntityId> = (0..4).map(|_| fx.spawn_ball(0)).collect();

    let two = MatchState {
        last_input_tick: 0,
        state_tick: 0,
        layers: vec![LayerPartition {
            layer_index: 0,
            entity_count: 2,
        }],
        entities: vec![static_state(1), static_state(2)],
    };
    fx.vm = VisibilityManager::new(VisibilityConfig {
        mtu_budget: estimate_size(&two).unwrap(),
        ..Default::default()
    });
    fx.vm.show_layer(0);

    let sent = |packets: &[PacketType]| -> Vec<ServerEntityId> {
        match_state(packets).entities.iter().map(|e| e.id).collect()
    };
    let ids: Vec<ServerEntityId> = balls
        .iter()
        .map(|b| fx.ctx.server_id_of(*b).unwrap())
        .collect();

    let first = fx.flush();
    assert_eq!(sent(&first), vec![ids[0], ids[1]]);
    assert_eq!(fx.vm.priority_of(balls[2]), Some(PRIORITY_INCREMENT));

    let second = fx.flush();
    assert_eq!(sent(&second), vec![ids[2], ids[3]]);
    assert_eq!(fx.vm.priority_of(balls[0]), Some(PRIORITY_INCREMENT));

    let third = fx.flush();
    assert_eq!(sent(&third), vec![ids[0], ids[1]]);
}

#[test]
fn release_drops_everything() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    fx.spawn_ball(0);
    fx.vm.show_layer(0);
    fx.flush();

    fx.vm.release();
    assert_eq!(fx.vm.known_count(), 0);
    assert!(!fx.vm.is_layer_visible(0));
    assert_eq!(kinds(&fx.flush()), vec!["match_state"]);
}

#[test]
fn moved_static_entity_is_sent_once() {
    let mut fx = Fixture::new(VisibilityConfig::default());
    let door = fx.spawn(0, Entity::new(EntityId(0), "door"));
    fx.vm.show_layer(0);
    fx.flush();

    fx.ctx.set_transform(door, Vec2::new(8.0, 0.0), 0.0);
    let packets = fx.flush();
    assert_eq!(match_state(&packets).entities.len(), 1);
    assert_eq!(match_state(&packets).entities[0].position, [8.0, 0.0]);

    assert!(match_state(&fx.flush()).entities.is_empty());
}
