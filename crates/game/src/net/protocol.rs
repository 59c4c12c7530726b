use std::collections::BTreeMap;

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::input::PlayerInputData;
use crate::tick::Tick;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5354_5241;
pub const DEFAULT_PORT: u16 = 27016;

/// Default serialized size budget for one `MatchState`, leaving room for the packet envelope.
pub const DEFAULT_MATCH_STATE_BUDGET: usize = MAX_PACKET_SIZE - 100;

pub type LayerIndex = u16;
pub type ServerEntityId = u32;
pub type PlayerIndex = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Number of entries of the flat `entities` array belonging to one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct LayerPartition {
    pub layer_index: LayerIndex,
    pub entity_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct HealthData {
    pub current: u16,
    pub max: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PhysicsProperties {
    pub mass: f32,
    pub moment_of_inertia: f32,
    pub is_sleeping: bool,
    pub angular_velocity: f32,
    pub linear_velocity: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerMovement {
    pub is_facing_right: bool,
    pub jump_height: f32,
    pub jump_boost_height: f32,
    pub movement_speed: f32,
}

impl Default for PlayerMovement {
    fn default() -> Self {
        Self {
            is_facing_right: true,
            jump_height: 300.0,
            jump_boost_height: 50.0,
            movement_speed: 200.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityDescriptor {
    pub id: ServerEntityId,
    pub unique_id: u64,
    pub class_name: String,
    pub position: [f32; 2],
    pub rotation: f32,
    pub scale: f32,
    pub animation: Option<u8>,
    pub health: Option<HealthData>,
    pub inputs: Option<PlayerInputData>,
    pub name: Option<String>,
    pub parent_id: Option<ServerEntityId>,
    pub weapon_id: Option<ServerEntityId>,
    pub physics: Option<PhysicsProperties>,
    pub player_movement: Option<PlayerMovement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct MovementPhysics {
    pub angular_velocity: f32,
    pub linear_velocity: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct MatchStateEntity {
    pub id: ServerEntityId,
    pub position: [f32; 2],
    pub rotation: f32,
    pub player_movement: Option<PlayerMovement>,
    pub physics_properties: Option<MovementPhysics>,
}

#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct MatchState {
    pub last_input_tick: Tick,
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<MatchStateEntity>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ControlEntity {
    pub state_tick: Tick,
    pub player_index: PlayerIndex,
    pub layer_index: LayerIndex,
    pub entity_id: Option<ServerEntityId>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct CreateEntities {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<EntityDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DeleteEntities {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<ServerEntityId>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitiesDeath {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<ServerEntityId>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EnableLayer {
    pub state_tick: Tick,
    pub layer_index: LayerIndex,
    pub entities: Vec<EntityDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DisableLayer {
    pub state_tick: Tick,
    pub layer_index: LayerIndex,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct MapReset {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<EntityDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct AnimationEntry {
    pub id: ServerEntityId,
    pub animation_id: u8,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitiesAnimation {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<AnimationEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputEntry {
    pub id: ServerEntityId,
    pub inputs: PlayerInputData,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitiesInputs {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<InputEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ScaleEntry {
    pub id: ServerEntityId,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitiesScale {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<ScaleEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct HealthEntry {
    pub id: ServerEntityId,
    pub current_health: u16,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct HealthUpdate {
    pub state_tick: Tick,
    pub layers: Vec<LayerPartition>,
    pub entities: Vec<HealthEntry>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityPhysics {
    pub state_tick: Tick,
    pub layer_index: LayerIndex,
    pub entity_id: ServerEntityId,
    pub is_sleeping: bool,
    pub mass: f32,
    pub moment_of_inertia: f32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityWeapon {
    pub state_tick: Tick,
    pub layer_index: LayerIndex,
    pub entity_id: ServerEntityId,
    pub weapon_id: Option<ServerEntityId>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerLayer {
    pub state_tick: Tick,
    pub player_index: PlayerIndex,
    pub layer_index: LayerIndex,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerWeapons {
    pub state_tick: Tick,
    pub player_index: PlayerIndex,
    pub layer_index: LayerIndex,
    pub weapon_ids: Vec<ServerEntityId>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputTimingCorrection {
    pub server_tick: Tick,
    pub tick_error: i32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayersInput {
    pub estimated_server_tick: Tick,
    pub input_tick: Tick,
    pub inputs: Vec<Option<PlayerInputData>>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest {
        client_salt: u64,
        player_count: u8,
    },
    ConnectionChallenge {
        server_salt: u64,
        challenge: u64,
    },
    ChallengeResponse {
        combined_salt: u64,
    },
    ConnectionAccepted {
        client_id: u32,
        server_tick: Tick,
        tick_rate: u32,
        layer_count: LayerIndex,
    },
    ConnectionDenied {
        reason: String,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Disconnect,
    PlayersInput(PlayersInput),
    InputTimingCorrection(InputTimingCorrection),
    ControlEntity(ControlEntity),
    CreateEntities(CreateEntities),
    DeleteEntities(DeleteEntities),
    EnableLayer(EnableLayer),
    DisableLayer(DisableLayer),
    EntitiesAnimation(EntitiesAnimation),
    EntitiesDeath(EntitiesDeath),
    EntitiesInputs(EntitiesInputs),
    EntitiesScale(EntitiesScale),
    EntityPhysics(EntityPhysics),
    EntityWeapon(EntityWeapon),
    HealthUpdate(HealthUpdate),
    MapReset(MapReset),
    MatchState(MatchState),
    PlayerLayer(PlayerLayer),
    PlayerWeapons(PlayerWeapons),
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("packet of {size} bytes exceeds MTU of {limit} bytes", limit = MAX_PACKET_SIZE)]
    TooLarge { size: usize },
    #[error("layer partition covers {declared} entities but packet holds {actual}")]
    Partition { declared: usize, actual: usize },
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    /// Copies into an aligned buffer first; datagram buffers carry no alignment guarantee.
    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)
    }
}

/// Serialized size of a `MatchState`, computed by the wire serializer itself.
pub fn estimate_size(state: &MatchState) -> Result<usize, PacketError> {
    rkyv::to_bytes::<rancor::Error>(state)
        .map(|aligned| aligned.len())
        .map_err(PacketError::Serialize)
}

/// Serialized size of a single entity descriptor, used to split creation batches.
pub fn descriptor_size(descriptor: &EntityDescriptor) -> Result<usize, PacketError> {
    rkyv::to_bytes::<rancor::Error>(descriptor)
        .map(|aligned| aligned.len())
        .map_err(PacketError::Serialize)
}

/// Checks that the per-layer counts cover the flat entity array exactly.
pub fn validate_partition(layers: &[LayerPartition], entity_count: usize) -> Result<(), PacketError> {
    let declared: usize = layers.iter().map(|l| l.entity_count as usize).sum();
    if declared != entity_count {
        return Err(PacketError::Partition {
            declared,
            actual: entity_count,
        });
    }
    Ok(())
}

/// Splits a flat entity array into its per-layer slices. Call [`validate_partition`] first.
pub fn partitioned<'a, T>(
    layers: &'a [LayerPartition],
    entities: &'a [T],
) -> impl Iterator<Item = (LayerIndex, &'a [T])> + 'a {
    let mut offset = 0usize;
    layers.iter().map(move |layer| {
        let start = offset.min(entities.len());
        let end = (offset + layer.entity_count as usize).min(entities.len());
        offset += layer.entity_count as usize;
        (layer.layer_index, &entities[start..end])
    })
}

/// Flattens per-layer groups into a partition table plus entity array, in layer order.
pub fn partition<T>(groups: BTreeMap<LayerIndex, Vec<T>>) -> (Vec<LayerPartition>, Vec<T>) {
    let mut layers = Vec::with_capacity(groups.len());
    let mut entities = Vec::new();

    for (layer_index, group) in groups {
        if group.is_empty() {
            continue;
        }
        layers.push(LayerPartition {
            layer_index,
            entity_count: group.len() as u32,
        });
        entities.extend(group);
    }

    (layers, entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_entity(id: ServerEntityId) -> MatchStateEntity {
        MatchStateEntity {
            id,
            position: [id as f32, 0.0],
            rotation: 0.0,
            player_movement: None,
            physics_properties: Some(MovementPhysics {
                angular_velocity: 0.0,
                linear_velocity: [1.0, 0.0],
            }),
        }
    }

    #[test]
    fn match_state_serialization() {
        let mut groups = BTreeMap::new();
        groups.insert(1, vec![state_entity(3)]);
        groups.insert(0, vec![state_entity(1), state_entity(2)]);
        let (layers, entities) = partition(groups);

        let state = MatchState {
            last_input_tick: 41,
            state_tick: 65535,
            layers,
            entities,
        };

        let packet = Packet::new(PacketHeader::new(7), PacketType::MatchState(state.clone()));
        let bytes = packet.serialize().unwrap();
        let decoded = Packet::deserialize(&bytes).unwrap();

        assert_eq!(decoded.header, packet.header);
        assert_eq!(decoded.payload, PacketType::MatchState(state));
    }

    #[test]
    fn partition_layout() {
        let mut groups = BTreeMap::new();
        groups.insert(2, vec!['c']);
        groups.insert(0, vec!['a', 'b']);
        groups.insert(1, Vec::new());

        let (layers, entities) = partition(groups);
        assert_eq!(layers.len(), 2);
        assert_eq!(entities, vec!['a', 'b', 'c']);
        validate_partition(&layers, entities.len()).unwrap();

        let slices: Vec<_> = partitioned(&layers, &entities).collect();
        assert_eq!(slices[0], (0, &['a', 'b'][..]));
        assert_eq!(slices[1], (2, &['c'][..]));
    }

    #[test]
    fn partition_mismatch_rejected() {
        let layers = [LayerPartition {
            layer_index: 0,
            entity_count: 3,
        }];
        assert!(validate_partition(&layers, 2).is_err());
    }

    #[test]
    fn estimate_grows_with_entities() {
        let mut state = MatchState::default();
        let empty = estimate_size(&state).unwrap();

        state.layers.push(LayerPartition {
            layer_index: 0,
            entity_count: 1,
        });
        state.entities.push(state_entity(1));
        let one = estimate_size(&state).unwrap();

        state.layers[0].entity_count = 2;
        state.entities.push(state_entity(2));
        let two = estimate_size(&state).unwrap();

        assert!(empty < one);
        assert!(one < two);
    }

    #[test]
    fn header_validation() {
        assert!(PacketHeader::new(0).is_valid());
        let mut header = PacketHeader::new(0);
        header.magic = 0;
        assert!(!header.is_valid());
    }
}
