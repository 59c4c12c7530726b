mod connection;
mod endpoint;
mod protocol;
mod queue;
mod stats;

pub use connection::{ClientConnection, ConnectionError, ConnectionManager, ConnectionState};
pub use endpoint::{Incoming, NetworkEndpoint};
pub use protocol::{
    AnimationEntry, ControlEntity, CreateEntities, DEFAULT_MATCH_STATE_BUDGET, DEFAULT_PORT,
    DeleteEntities, DisableLayer, EnableLayer, EntitiesAnimation, EntitiesDeath, EntitiesInputs,
    EntitiesScale, EntityDescriptor, EntityPhysics, EntityWeapon, HealthData, HealthEntry,
    HealthUpdate, InputEntry, InputTimingCorrection, LayerIndex, LayerPartition, MAX_PACKET_SIZE,
    MapReset, MatchState, MatchStateEntity, MovementPhysics, PROTOCOL_MAGIC, PROTOCOL_VERSION,
    Packet, PacketError, PacketHeader, PacketType, PhysicsProperties, PlayerIndex, PlayerLayer,
    PlayerMovement, PlayerWeapons, PlayersInput, ScaleEntry, ServerEntityId, descriptor_size,
    estimate_size, partition, partitioned, validate_partition,
};
pub use queue::{TickPacket, TickPacketContent, TickPacketHandler, TickPacketQueue};
pub use stats::{NetworkStats, rand_u64};
