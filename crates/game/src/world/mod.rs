mod arena;
mod context;
pub(crate) mod entity;
mod layer;

pub use arena::{Arena, Handle};
pub use context::{Authority, MatchContext, entity_from_descriptor};
pub use entity::{CLIENTSIDE_ID_BASE, Entity, EntityId, EntityTransformSnapshot, PhysicsBody};
pub use layer::Layer;
