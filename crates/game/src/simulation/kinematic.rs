use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::input::{InputFlags, PlayerInputData};
use crate::world::{Entity, Layer};

use super::TickSimulator;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicConfig {
    /// Downward acceleration in px/s².
    pub gravity: f32,
    pub floor_height: f32,
    pub max_fall_speed: f32,
    /// Angular velocity decay per second, 0 keeps spin forever.
    pub angular_damping: f32,
}

impl Default for KinematicConfig {
    fn default() -> Self {
        Self {
            gravity: 980.0,
            floor_height: 0.0,
            max_fall_speed: 1200.0,
            angular_damping: 2.0,
        }
    }
}

/// Deterministic stand-in for a physics engine: y points up, bodies rest on a flat floor.
#[derive(Debug, Clone, Default)]
pub struct KinematicSimulator {
    config: KinematicConfig,
}

impl KinematicSimulator {
    pub fn new(config: KinematicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KinematicConfig {
        &self.config
    }

    fn is_grounded(&self, entity: &Entity) -> bool {
        entity.position.y <= self.config.floor_height + f32::EPSILON
    }

    fn jump_velocity(&self, height: f32) -> f32 {
        (2.0 * self.config.gravity * height.max(0.0)).sqrt()
    }
}

impl TickSimulator for KinematicSimulator {
    fn apply_input(
        &mut self,
        entity: &mut Entity,
        current: &PlayerInputData,
        previous: &PlayerInputData,
    ) {
        entity.inputs = Some(*current);

        let grounded = self.is_grounded(entity);
        let Some(movement) = entity.movement.as_mut() else {
            return;
        };

        let axis = current.horizontal_axis();
        if axis != 0.0 {
            movement.is_facing_right = axis > 0.0;
        } else if current.has(InputFlags::LOOKING_RIGHT) != previous.has(InputFlags::LOOKING_RIGHT)
        {
            movement.is_facing_right = current.has(InputFlags::LOOKING_RIGHT);
        }

        let jump_pressed =
            current.has(InputFlags::JUMPING) && !previous.has(InputFlags::JUMPING);
        let speed = movement.movement_speed;
        let jump_height = if current.has(InputFlags::CROUCHING) {
            movement.jump_height + movement.jump_boost_height
        } else {
            movement.jump_height
        };
        let jump_velocity = self.jump_velocity(jump_height);

        let Some(body) = entity.physics.as_mut() else {
            return;
        };

        body.linear_velocity.x = axis * speed;
        if jump_pressed && grounded {
            body.linear_velocity.y = jump_velocity;
        }
        if axis != 0.0 || jump_pressed {
            body.is_sleeping = false;
        }
    }

    fn step(&mut self, layer: &mut Layer, dt: f32) {
        let config = self.config;

        for entity in layer.entities_mut() {
            if !entity.enabled || entity.dead {
                continue;
            }
            let Some(body) = entity.physics.as_mut() else {
                continue;
            };
            if body.is_sleeping {
                continue;
            }

            body.linear_velocity.y =
                (body.linear_velocity.y - config.gravity * dt).max(-config.max_fall_speed);
            body.angular_velocity *= (1.0 - config.angular_damping * dt).max(0.0);

            entity.position += body.linear_velocity * dt;
            entity.rotation += body.angular_velocity * dt;

            if entity.position.y < config.floor_height {
                entity.position.y = config.floor_height;
                body.linear_velocity.y = body.linear_velocity.y.max(0.0);
            }

            if entity.position.y <= config.floor_height
                && body.linear_velocity == Vec2::ZERO
                && body.angular_velocity.abs() < 1e-3
                && entity.movement.is_none()
            {
                body.angular_velocity = 0.0;
                body.is_sleeping = true;
            }
        }
    }
}
