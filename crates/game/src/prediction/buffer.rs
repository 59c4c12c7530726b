use std::collections::{HashMap, VecDeque};

use crate::input::PlayerInputData;
use crate::net::{LayerIndex, PlayerMovement};
use crate::tick::{Tick, is_more_recent};
use crate::world::{EntityId, EntityTransformSnapshot, MatchContext};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponState {
    pub weapon: EntityId,
    pub animation: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInputRecord {
    pub current: PlayerInputData,
    pub previous: PlayerInputData,
    pub movement: Option<PlayerMovement>,
    pub weapons: Vec<WeaponState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSnapshot {
    pub layer_index: LayerIndex,
    pub entities: HashMap<EntityId, EntityTransformSnapshot>,
}

impl LayerSnapshot {
    /// Records every enabled entity of a layer.
    pub fn capture(ctx: &MatchContext, layer_index: LayerIndex) -> Self {
        let entities = ctx
            .layer(layer_index)
            .entities()
            .filter(|entity| entity.enabled)
            .map(|entity| (entity.unique_id, entity.transform_snapshot()))
            .collect();

        Self {
            layer_index,
            entities,
        }
    }
}

/// Everything needed to re-simulate one client tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedInput {
    pub input_tick: Tick,
    pub players: Vec<PlayerInputRecord>,
    pub layers: Vec<LayerSnapshot>,
}

impl PredictedInput {
    pub fn layer(&self, layer_index: LayerIndex) -> Option<&LayerSnapshot> {
        self.layers.iter().find(|l| l.layer_index == layer_index)
    }
}

/// Bounded history of predicted ticks, oldest first.
#[derive(Debug)]
pub struct PredictionBuffer {
    entries: VecDeque<PredictedInput>,
    capacity: usize,
}

impl PredictionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_tick(&mut self, entry: PredictedInput) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Drops every entry already covered by the authoritative snapshot.
    pub fn prune(&mut self, last_acknowledged: Tick) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| is_more_recent(entry.input_tick, last_acknowledged));
        before - self.entries.len()
    }

    pub fn find(&self, input_tick: Tick) -> Option<&PredictedInput> {
        self.entries.iter().find(|entry| entry.input_tick == input_tick)
    }

    /// Calls `f` on every entry from index `from` onward, in recording order.
    /// Replayed entries may be re-recorded in place.
    pub fn replay<F>(&mut self, from: usize, mut f: F) -> usize
    where
        F: FnMut(&mut PredictedInput),
    {
        let mut count = 0;
        for entry in self.entries.iter_mut().skip(from) {
            f(entry);
            count += 1;
        }
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = &PredictedInput> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&PredictedInput> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(input_tick: Tick) -> PredictedInput {
        PredictedInput {
            input_tick,
            players: Vec::new(),
            layers: Vec::new(),
        }
    }

    fn ticks(buffer: &PredictionBuffer) -> Vec<Tick> {
        buffer.iter().map(|e| e.input_tick).collect()
    }

    #[test]
    fn cap_drops_oldest() {
        let mut buffer = PredictionBuffer::new(3);
        for tick in 0..5 {
            buffer.record_tick(entry(tick));
        }
        assert_eq!(ticks(&buffer), vec![2, 3, 4]);
    }

    #[test]
    fn prune_removes_acknowledged() {
        let mut buffer = PredictionBuffer::new(16);
        for tick in 10..15 {
            buffer.record_tick(entry(tick));
        }

        assert_eq!(buffer.prune(12), 3);
        assert_eq!(ticks(&buffer), vec![13, 14]);
        assert!(buffer.find(12).is_none());
        assert!(buffer.find(13).is_some());
    }

    #[test]
    fn prune_across_wraparound() {
        let mut buffer = PredictionBuffer::new(16);
        for tick in [65534, 65535, 0, 1] {
            buffer.record_tick(entry(tick));
        }

        buffer.prune(65535);
        assert_eq!(ticks(&buffer), vec![0, 1]);
    }

    #[test]
    fn replay_visits_remaining_in_order() {
        let mut buffer = PredictionBuffer::new(16);
        for tick in 0..4 {
            buffer.record_tick(entry(tick));
        }

        let mut seen = Vec::new();
        let count = buffer.replay(1, |e| seen.push(e.input_tick));
        assert_eq!(count, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
