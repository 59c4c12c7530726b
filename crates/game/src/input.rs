use bitflags::bitflags;
use glam::Vec2;
use rkyv::{Archive, Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputFlags: u8 {
        const ATTACKING = 1 << 0;
        const CROUCHING = 1 << 1;
        const JUMPING = 1 << 2;
        const LOOKING_RIGHT = 1 << 3;
        const MOVING_LEFT = 1 << 4;
        const MOVING_RIGHT = 1 << 5;
    }
}

/// Per-player input for one tick, as captured by the input source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerInputData {
    pub flags: u8,
    pub aim_direction: [f32; 2],
}

impl PlayerInputData {
    pub fn new(flags: InputFlags, aim_direction: Vec2) -> Self {
        Self {
            flags: flags.bits(),
            aim_direction: aim_direction.into(),
        }
    }

    #[inline]
    pub fn flags(&self) -> InputFlags {
        InputFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn has(&self, flag: InputFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn set(&mut self, flag: InputFlags, value: bool) {
        let mut flags = self.flags();
        flags.set(flag, value);
        self.flags = flags.bits();
    }

    pub fn aim(&self) -> Vec2 {
        Vec2::from(self.aim_direction)
    }

    /// -1 moving left, 1 moving right, 0 when both or neither are held.
    pub fn horizontal_axis(&self) -> f32 {
        let mut axis = 0.0;
        if self.has(InputFlags::MOVING_LEFT) {
            axis -= 1.0;
        }
        if self.has(InputFlags::MOVING_RIGHT) {
            axis += 1.0;
        }
        axis
    }
}
