use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::input::PlayerInputData;
use crate::net::{HealthData, MatchStateEntity, MovementPhysics, PlayerMovement, ServerEntityId};

/// Ids at or above this value are allocated locally by a client and never leave it.
pub const CLIENTSIDE_ID_BASE: u64 = 1 << 63;

/// Network-stable entity identifier, distinct from any process-local [`super::Handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn is_clientside(self) -> bool {
        self.0 >= CLIENTSIDE_ID_BASE
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsBody {
    pub mass: f32,
    pub moment_of_inertia: f32,
    pub is_sleeping: bool,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
}

impl Default for PhysicsBody {
    fn default() -> Self {
        Self {
            mass: 1.0,
            moment_of_inertia: 1.0,
            is_sleeping: false,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
        }
    }
}

/// Transform (and velocity, for physical entities) recorded for one predicted tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityTransformSnapshot {
    pub is_physical: bool,
    pub position: Vec2,
    pub rotation: f32,
    pub linear_velocity: Option<Vec2>,
    pub angular_velocity: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub unique_id: EntityId,
    pub server_id: Option<ServerEntityId>,
    pub class_name: String,
    pub name: Option<String>,
    pub position: Vec2,
    /// Radians.
    pub rotation: f32,
    pub scale: f32,
    pub animation: Option<u8>,
    pub health: Option<HealthData>,
    pub inputs: Option<PlayerInputData>,
    pub parent: Option<EntityId>,
    pub weapon: Option<EntityId>,
    pub physics: Option<PhysicsBody>,
    pub movement: Option<PlayerMovement>,
    pub enabled: bool,
    pub dead: bool,
}

impl Entity {
    pub fn new(unique_id: EntityId, class_name: impl Into<String>) -> Self {
        Self {
            unique_id,
            server_id: None,
            class_name: class_name.into(),
            name: None,
            position: Vec2::ZERO,
            rotation: 0.0,
            scale: 1.0,
            animation: None,
            health: None,
            inputs: None,
            parent: None,
            weapon: None,
            physics: None,
            movement: None,
            enabled: true,
            dead: false,
        }
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_health(mut self, max: u16) -> Self {
        self.health = Some(HealthData { current: max, max });
        self
    }

    pub fn with_physics(mut self, body: PhysicsBody) -> Self {
        self.physics = Some(body);
        self
    }

    pub fn with_movement(mut self, movement: PlayerMovement) -> Self {
        self.movement = Some(movement);
        self.inputs.get_or_insert_with(PlayerInputData::default);
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_physical(&self) -> bool {
        self.physics.is_some()
    }

    pub fn is_awake(&self) -> bool {
        self.physics.is_some_and(|body| !body.is_sleeping)
    }

    pub fn linear_velocity(&self) -> Vec2 {
        self.physics.map_or(Vec2::ZERO, |body| body.linear_velocity)
    }

    pub fn transform_snapshot(&self) -> EntityTransformSnapshot {
        EntityTransformSnapshot {
            is_physical: self.is_physical(),
            position: self.position,
            rotation: self.rotation,
            linear_velocity: self.physics.map(|body| body.linear_velocity),
            angular_velocity: self.physics.map(|body| body.angular_velocity),
        }
    }

    pub fn restore_transform(&mut self, snapshot: &EntityTransformSnapshot) {
        self.position = snapshot.position;
        self.rotation = snapshot.rotation;

        if let Some(body) = self.physics.as_mut() {
            if let Some(velocity) = snapshot.linear_velocity {
                body.linear_velocity = velocity;
            }
            if let Some(velocity) = snapshot.angular_velocity {
                body.angular_velocity = velocity;
            }
        }
    }

    pub fn to_match_state(&self, id: ServerEntityId) -> MatchStateEntity {
        MatchStateEntity {
            id,
            position: self.position.into(),
            rotation: self.rotation,
            player_movement: self.movement,
            physics_properties: self.physics.map(|body| MovementPhysics {
                angular_velocity: body.angular_velocity,
                linear_velocity: body.linear_velocity.into(),
            }),
        }
    }

    /// Applies the authoritative movement part of a `MatchState` entry.
    pub fn apply_match_state(&mut self, state: &MatchStateEntity) {
        self.position = Vec2::from(state.position);
        self.rotation = state.rotation;

        if let Some(movement) = state.player_movement {
            self.movement = Some(movement);
        }

        if let (Some(body), Some(physics)) = (self.physics.as_mut(), state.physics_properties) {
            body.linear_velocity = Vec2::from(physics.linear_velocity);
            body.angular_velocity = physics.angular_velocity;
        }
    }
}
