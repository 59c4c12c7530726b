use std::collections::HashSet;

use crate::world::{EntityId, MatchContext};

/// Orders a creation batch so every parent and active weapon inside the batch
/// comes before the entity referencing it. Cycles are broken by skipping ids
/// already on the current path.
pub fn creation_order(ctx: &MatchContext, ids: &[EntityId]) -> Vec<EntityId> {
    let batch: HashSet<EntityId> = ids.iter().copied().collect();
    let mut visiting = HashSet::new();
    let mut emitted = HashSet::new();
    let mut order = Vec::with_capacity(ids.len());
    let mut stack: Vec<(EntityId, bool)> = Vec::new();

    for &root in ids {
        stack.push((root, false));

        while let Some((id, expanded)) = stack.pop() {
            if emitted.contains(&id) {
                continue;
            }
            if expanded {
                emitted.insert(id);
                order.push(id);
                continue;
            }
            if !visiting.insert(id) {
                continue;
            }

            stack.push((id, true));

            let Some(entity) = ctx.entity(id) else {
                continue;
            };
            for dependency in [entity.weapon, entity.parent].into_iter().flatten() {
                if batch.contains(&dependency)
                    && !emitted.contains(&dependency)
                    && !visiting.contains(&dependency)
                {
                    stack.push((dependency, false));
                }
            }
        }
    }

    order
}
