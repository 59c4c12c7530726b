mod events;

pub use events::{PhysicsUpdate, SyncEvent, SyncEvents};

use std::collections::BTreeSet;

use crate::event::{MatchEvent, MatchEventSink};
use crate::net::LayerIndex;
use crate::world::{Entity, EntityId, MatchContext};

/// Turns component change notifications into per-tick batches for the
/// visibility managers.
#[derive(Debug, Default)]
pub struct NetworkSyncSystem {
    pending: SyncEvents,
    physical: BTreeSet<EntityId>,
    /// Physical entities awake as of the last collection.
    awake: BTreeSet<EntityId>,
    invalidated: BTreeSet<EntityId>,
    health: BTreeSet<EntityId>,
    inputs: BTreeSet<EntityId>,
    physics: BTreeSet<EntityId>,
    scale: BTreeSet<EntityId>,
    weapons: BTreeSet<EntityId>,
    animations: BTreeSet<EntityId>,
}

impl NetworkSyncSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the context's event queue, forwarding gamemode hooks to `sink`.
    pub fn process_events(&mut self, ctx: &mut MatchContext, sink: &mut dyn MatchEventSink) {
        let events: Vec<MatchEvent> = ctx.drain_events().collect();
        for event in events {
            event.forward_to(sink);
            self.record(ctx, event);
        }
    }

    fn record(&mut self, ctx: &MatchContext, event: MatchEvent) {
        match event {
            MatchEvent::EntityCreated { layer, entity } => {
                if entity.is_clientside() {
                    return;
                }
                if let Some(created) = ctx.entity(entity).filter(|e| e.is_physical()) {
                    self.physical.insert(entity);
                    if created.is_awake() {
                        self.awake.insert(entity);
                    }
                }
                self.pending.created.push(SyncEvent::new(layer, entity, ()));
            }
            MatchEvent::EntityDestroyed {
                layer,
                entity,
                server_id,
            } => {
                self.forget(entity);
                if let Some(server_id) = server_id {
                    self.pending
                        .destroyed
                        .push(SyncEvent::new(layer, entity, server_id));
                }
            }
            MatchEvent::EntityDied { layer, entity } => {
                self.pending.died.push(SyncEvent::new(layer, entity, ()));
            }
            MatchEvent::HealthChanged { entity, .. } => {
                self.health.insert(entity);
            }
            MatchEvent::InputsChanged { entity, .. } => {
                self.inputs.insert(entity);
            }
            MatchEvent::PhysicsChanged { entity, .. } => {
                if ctx.entity(entity).is_some_and(|e| e.is_physical()) {
                    self.physical.insert(entity);
                }
                self.physics.insert(entity);
            }
            MatchEvent::ScaleChanged { entity, .. } => {
                self.scale.insert(entity);
            }
            MatchEvent::WeaponChanged { entity, .. } => {
                self.weapons.insert(entity);
            }
            MatchEvent::AnimationChanged { entity, .. } => {
                self.animations.insert(entity);
            }
            MatchEvent::MovementInvalidated { entity, .. } => {
                self.invalidated.insert(entity);
            }
            // Routed per connection by the owner of the visibility managers.
            MatchEvent::PlayerControlledEntityChanged { .. } => {}
        }
    }

    fn forget(&mut self, entity: EntityId) {
        self.physical.remove(&entity);
        self.awake.remove(&entity);
        self.invalidated.remove(&entity);
        self.health.remove(&entity);
        self.inputs.remove(&entity);
        self.physics.remove(&entity);
        self.scale.remove(&entity);
        self.weapons.remove(&entity);
        self.animations.remove(&entity);
    }

    pub fn tracked_physical(&self) -> usize {
        self.physical.len()
    }

    /// Emits this tick's batches and clears every dirty set.
    pub fn collect(&mut self, ctx: &MatchContext) -> SyncEvents {
        let mut events = std::mem::take(&mut self.pending);
        let fell_asleep = self.track_sleep(ctx);

        for id in std::mem::take(&mut self.health) {
            if let Some((layer, entity)) = lookup(ctx, id) {
                if let Some(health) = entity.health {
                    events.health.push(SyncEvent::new(layer, id, health.current));
                }
            }
        }

        for id in std::mem::take(&mut self.inputs) {
            if let Some((layer, entity)) = lookup(ctx, id) {
                if let Some(inputs) = entity.inputs {
                    events.inputs.push(SyncEvent::new(layer, id, inputs));
                }
            }
        }

        for id in std::mem::take(&mut self.physics) {
            if let Some((layer, entity)) = lookup(ctx, id) {
                if let Some(body) = entity.physics {
                    events.physics.push(SyncEvent::new(
                        layer,
                        id,
                        PhysicsUpdate {
                            mass: body.mass,
                            moment_of_inertia: body.moment_of_inertia,
                            is_sleeping: body.is_sleeping,
                        },
                    ));
                }
            }
        }

        for id in std::mem::take(&mut self.scale) {
            if let Some((layer, entity)) = lookup(ctx, id) {
                events.scale.push(SyncEvent::new(layer, id, entity.scale));
            }
        }

        for id in std::mem::take(&mut self.weapons) {
            if let Some((layer, entity)) = lookup(ctx, id) {
                events.weapons.push(SyncEvent::new(layer, id, entity.weapon));
            }
        }

        for id in std::mem::take(&mut self.animations) {
            if let Some((layer, entity)) = lookup(ctx, id) {
                if let Some(animation) = entity.animation {
                    events.animations.push(SyncEvent::new(layer, id, animation));
                }
            }
        }

        let invalidated = std::mem::take(&mut self.invalidated);
        let moving = self
            .physical
            .iter()
            .filter(|id| {
                fell_asleep.contains(*id) || ctx.entity(**id).is_some_and(|e| e.enabled && e.is_awake())
            })
            .chain(invalidated.iter().filter(|id| !self.physical.contains(*id)));

        for id in moving {
            if let Some((layer, entity)) = lookup(ctx, *id) {
                if let Some(server_id) = entity.server_id {
                    events
                        .movement
                        .push(SyncEvent::new(layer, *id, entity.to_match_state(server_id)));
                }
            }
        }

        events
    }

    /// Marks physics dirty for every body whose sleep state flipped since the
    /// last collection, and returns the ones that fell asleep. The step that
    /// lands a body is the one that puts it to sleep, so its final transform
    /// still has to go out.
    fn track_sleep(&mut self, ctx: &MatchContext) -> BTreeSet<EntityId> {
        let mut fell_asleep = BTreeSet::new();

        for id in &self.physical {
            let Some(entity) = ctx.entity(*id) else {
                continue;
            };
            let awake = entity.is_awake();
            if awake == self.awake.contains(id) {
                continue;
            }
            if awake {
                self.awake.insert(*id);
            } else {
                self.awake.remove(id);
                fell_asleep.insert(*id);
            }
            self.physics.insert(*id);
        }

        fell_asleep
    }
}

fn lookup(ctx: &MatchContext, id: EntityId) -> Option<(LayerIndex, &Entity)> {
    let layer = ctx.layer_of(id)?;
    Some((layer, ctx.entity(id)?))
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::event::{NullSink, RecordingSink};
    use crate::world::{Authority, PhysicsBody};

    fn server() -> (MatchContext, NetworkSyncSystem) {
        (MatchContext::new(Authority::Server, 2), NetworkSyncSystem::new())
    }

    #[test]
    fn creation_and_destruction_batches() {
        let (mut ctx, mut sync) = server();
        let id = ctx.allocate_entity_id();
        ctx.create_entity(1, Entity::new(id, "box"));

        let mut sink = RecordingSink::default();
        sync.process_events(&mut ctx, &mut sink);
        let events = sync.collect(&ctx);
        assert_eq!(events.created, vec![SyncEvent::new(1, id, ())]);
        assert_eq!(sink.created, vec![id]);

        ctx.destroy_entity(id);
        sync.process_events(&mut ctx, &mut sink);
        let events = sync.collect(&ctx);
        assert_eq!(events.destroyed, vec![SyncEvent::new(1, id, 1)]);
        assert!(events.created.is_empty());
    }

    #[test]
    fn dirty_sets_read_current_values() {
        let (mut ctx, mut sync) = server();
        let id = ctx.allocate_entity_id();
        ctx.create_entity(0, Entity::new(id, "player").with_health(100));

        ctx.set_health(id, 90);
        ctx.set_health(id, 75);
        ctx.set_scale(id, 1.5);
        sync.process_events(&mut ctx, &mut NullSink);

        let events = sync.collect(&ctx);
        assert_eq!(events.health, vec![SyncEvent::new(0, id, 75)]);
        assert_eq!(events.scale, vec![SyncEvent::new(0, id, 1.5)]);

        sync.process_events(&mut ctx, &mut NullSink);
        let events = sync.collect(&ctx);
        assert!(events.health.is_empty());
        assert!(events.scale.is_empty());
    }

    #[test]
    fn physical_entities_move_every_tick_unless_asleep() {
        let (mut ctx, mut sync) = server();
        let awake = ctx.allocate_entity_id();
        let asleep = ctx.allocate_entity_id();
        let fixed = ctx.allocate_entity_id();
        ctx.create_entity(0, Entity::new(awake, "ball").with_physics(PhysicsBody::default()));
        ctx.create_entity(
            0,
            Entity::new(asleep, "crate").with_physics(PhysicsBody {
                is_sleeping: true,
                ..Default::default()
            }),
        );
        ctx.create_entity(0, Entity::new(fixed, "door"));
        sync.process_events(&mut ctx, &mut NullSink);
        assert_eq!(sync.tracked_physical(), 2);

        for _ in 0..2 {
            let events = sync.collect(&ctx);
            let moved: Vec<_> = events.movement.iter().map(|e| e.entity).collect();
            assert_eq!(moved, vec![awake]);
        }

        ctx.set_transform(fixed, Vec2::new(3.0, 4.0), 0.0);
        sync.process_events(&mut ctx, &mut NullSink);
        let events = sync.collect(&ctx);
        let moved: Vec<_> = events.movement.iter().map(|e| e.entity).collect();
        assert_eq!(moved, vec![awake, fixed]);
        assert_eq!(events.movement[1].data.position, [3.0, 4.0]);
    }

    #[test]
    fn sleep_transitions_are_reported_once() {
        let (mut ctx, mut sync) = server();
        let id = ctx.allocate_entity_id();
        ctx.create_entity(0, Entity::new(id, "crate").with_physics(PhysicsBody::default()));
        sync.process_events(&mut ctx, &mut NullSink);
        assert!(sync.collect(&ctx).physics.is_empty());

        ctx.entity_mut(id).unwrap().physics.as_mut().unwrap().is_sleeping = true;
        let events = sync.collect(&ctx);
        assert_eq!(events.physics.len(), 1);
        assert!(events.physics[0].data.is_sleeping);
        let moved: Vec<_> = events.movement.iter().map(|e| e.entity).collect();
        assert_eq!(moved, vec![id]);

        let events = sync.collect(&ctx);
        assert!(events.physics.is_empty());
        assert!(events.movement.is_empty());

        ctx.entity_mut(id).unwrap().physics.as_mut().unwrap().is_sleeping = false;
        let events = sync.collect(&ctx);
        assert_eq!(events.physics.len(), 1);
        assert!(!events.physics[0].data.is_sleeping);
        assert_eq!(events.movement.len(), 1);
    }

    #[test]
    fn clientside_entities_are_not_replicated() {
        let (mut ctx, mut sync) = server();
        let ghost = ctx.allocate_clientside_id();
        ctx.create_entity(0, Entity::new(ghost, "ghost"));
        sync.process_events(&mut ctx, &mut NullSink);
        assert!(sync.collect(&ctx).is_empty());
    }
}
