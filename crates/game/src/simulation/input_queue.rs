use std::collections::VecDeque;

use crate::input::PlayerInputData;
use crate::tick::{Tick, is_more_recent};

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedInput {
    /// Server tick the client aimed this input at.
    pub target_tick: Tick,
    /// Client-side tick the input was captured on, echoed back in `MatchState`.
    pub input_tick: Tick,
    pub inputs: Vec<Option<PlayerInputData>>,
}

/// Per-connection buffer of received inputs, ordered by target server tick.
#[derive(Debug)]
pub struct InputQueue {
    inputs: VecDeque<QueuedInput>,
    max_size: usize,
}

impl InputQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inputs: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, input: QueuedInput) {
        if self.inputs.len() >= self.max_size {
            self.inputs.pop_front();
        }
        let index = self
            .inputs
            .partition_point(|queued| !is_more_recent(queued.target_tick, input.target_tick));
        self.inputs.insert(index, input);
    }

    /// Removes every input due at or before `tick`. Late inputs are still returned so
    /// the most recent one can be applied.
    pub fn drain_for_tick(&mut self, tick: Tick) -> Vec<QueuedInput> {
        let count = self
            .inputs
            .partition_point(|queued| !is_more_recent(queued.target_tick, tick));
        self.inputs.drain(..count).collect()
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
