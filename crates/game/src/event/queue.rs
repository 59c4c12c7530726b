use std::collections::VecDeque;

use super::types::MatchEvent;

/// FIFO of match events produced during a tick, drained by the tick loop.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<MatchEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: MatchEvent) {
        self.pending.push_back(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = MatchEvent> + '_ {
        self.pending.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchEvent> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::EntityId;

    #[test]
    fn drain_preserves_order() {
        let mut queue = EventQueue::new();
        queue.push(MatchEvent::EntityCreated {
            layer: 0,
            entity: EntityId(1),
        });
        queue.push(MatchEvent::EntityDied {
            layer: 0,
            entity: EntityId(1),
        });

        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], MatchEvent::EntityCreated { .. }));
        assert!(queue.is_empty());
    }
}
