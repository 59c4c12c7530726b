mod input_queue;
mod kinematic;

pub use input_queue::{InputQueue, QueuedInput};
pub use kinematic::{KinematicConfig, KinematicSimulator};

use crate::input::PlayerInputData;
use crate::world::{Entity, Layer, MatchContext};

/// Entity-state provider driven once per tick by both the server loop and
/// client prediction. Implementations must be deterministic: replaying the
/// same inputs from the same state yields the same state.
pub trait TickSimulator {
    /// Applies one player's input to the entity it controls.
    fn apply_input(
        &mut self,
        entity: &mut Entity,
        current: &PlayerInputData,
        previous: &PlayerInputData,
    );

    /// Advances every enabled entity of a layer by one tick.
    fn step(&mut self, layer: &mut Layer, dt: f32);
}

/// Steps every enabled layer (or, with `predicted_only`, every enabled predicted layer).
pub fn step_layers<S: TickSimulator + ?Sized>(
    ctx: &mut MatchContext,
    simulator: &mut S,
    dt: f32,
    predicted_only: bool,
) {
    for index in 0..ctx.layer_count() {
        let layer = ctx.layer_mut(index);
        if !layer.is_enabled() || (predicted_only && !layer.is_predicted()) {
            continue;
        }
        simulator.step(layer, dt);
    }
}
