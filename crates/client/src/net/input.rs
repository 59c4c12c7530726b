use glam::Vec2;

use strata::{InputFlags, PlayerInputData};

/// Frames of one scripted cycle: walk right, pause, walk left, pause.
const CYCLE: u32 = 240;

/// Deterministic stand-in for a human at the keyboard, one pattern per local player.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    players: Vec<PlayerScript>,
    frame: u32,
}

#[derive(Debug, Clone, Copy)]
struct PlayerScript {
    offset: u32,
    crouch_jumps: bool,
}

impl ScriptedInput {
    pub fn new(player_count: u8) -> Self {
        let players = (0..player_count as u32)
            .map(|index| PlayerScript {
                offset: index * 130,
                crouch_jumps: index % 2 == 1,
            })
            .collect();

        Self { players, frame: 0 }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Inputs for the next tick, one per local player.
    pub fn next_inputs(&mut self) -> Vec<PlayerInputData> {
        let frame = self.frame;
        self.frame = self.frame.wrapping_add(1);

        self.players
            .iter()
            .map(|script| script.input_at(frame.wrapping_add(script.offset) % CYCLE))
            .collect()
    }
}

impl PlayerScript {
    fn input_at(&self, phase: u32) -> PlayerInputData {
        let mut flags = match phase {
            0..90 => InputFlags::MOVING_RIGHT | InputFlags::LOOKING_RIGHT,
            120..210 => InputFlags::MOVING_LEFT,
            _ => InputFlags::empty(),
        };

        // Held for a few frames so the press edge survives a dropped tick.
        if (45..50).contains(&phase) || (165..170).contains(&phase) {
            flags |= InputFlags::JUMPING;
            if self.crouch_jumps {
                flags |= InputFlags::CROUCHING;
            }
        }

        let aim = if flags.contains(InputFlags::MOVING_LEFT) {
            Vec2::NEG_X
        } else {
            Vec2::X
        };
        PlayerInputData::new(flags, aim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_input_per_player() {
        let mut script = ScriptedInput::new(3);
        assert_eq!(script.next_inputs().len(), 3);
        assert_eq!(script.frame(), 1);
    }

    #[test]
    fn cycle_walks_both_ways_and_jumps() {
        let mut script = ScriptedInput::new(1);
        let inputs: Vec<PlayerInputData> = (0..CYCLE).map(|_| script.next_inputs()[0]).collect();

        assert!(inputs[10].has(InputFlags::MOVING_RIGHT));
        assert!(inputs[150].has(InputFlags::MOVING_LEFT));
        assert_eq!(inputs[100].horizontal_axis(), 0.0);
        assert_eq!(
            inputs.iter().filter(|i| i.has(InputFlags::JUMPING)).count(),
            10
        );
        assert!(!inputs.iter().any(|i| i.has(InputFlags::CROUCHING)));
    }

    #[test]
    fn players_are_out_of_phase() {
        let mut script = ScriptedInput::new(2);
        let first = script.next_inputs();
        assert_ne!(first[0], first[1]);
    }
}
