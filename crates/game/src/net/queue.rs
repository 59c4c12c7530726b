use crate::tick::{Tick, is_more_recent};

use super::protocol::{
    ControlEntity, CreateEntities, DeleteEntities, DisableLayer, EnableLayer, EntitiesAnimation,
    EntitiesDeath, EntitiesInputs, EntitiesScale, EntityPhysics, EntityWeapon, HealthUpdate,
    MapReset, MatchState, PacketType, PlayerLayer, PlayerWeapons,
};

/// State-carrying packets, applied when the client's handled tick reaches their tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickPacketContent {
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

pub trait TickPacketHandler {
    fn handle_control_entity(&mut self, packet: ControlEntity);
    fn handle_create_entities(&mut self, packet: CreateEntities);
    fn handle_delete_entities(&mut self, packet: DeleteEntities);
    fn handle_enable_layer(&mut self, packet: EnableLayer);
    fn handle_disable_layer(&mut self, packet: DisableLayer);
    fn handle_entities_animation(&mut self, packet: EntitiesAnimation);
    fn handle_entities_death(&mut self, packet: EntitiesDeath);
    fn handle_entities_inputs(&mut self, packet: EntitiesInputs);
    fn handle_entities_scale(&mut self, packet: EntitiesScale);
    fn handle_entity_physics(&mut self, packet: EntityPhysics);
    fn handle_entity_weapon(&mut self, packet: EntityWeapon);
    fn handle_health_update(&mut self, packet: HealthUpdate);
    fn handle_map_reset(&mut self, packet: MapReset);
    fn handle_match_state(&mut self, packet: MatchState);
    fn handle_player_layer(&mut self, packet: PlayerLayer);
    fn handle_player_weapons(&mut self, packet: PlayerWeapons);
}

impl TickPacketContent {
    /// Splits a received payload into a tick packet, handing back anything that is not one.
    pub fn from_payload(payload: PacketType) -> Result<Self, PacketType> {
        Ok(match payload {
            PacketType::ControlEntity(p) => Self::ControlEntity(p),
            PacketType::CreateEntities(p) => Self::CreateEntities(p),
            PacketType::DeleteEntities(p) => Self::DeleteEntities(p),
            PacketType::EnableLayer(p) => Self::EnableLayer(p),
            PacketType::DisableLayer(p) => Self::DisableLayer(p),
            PacketType::EntitiesAnimation(p) => Self::EntitiesAnimation(p),
            PacketType::EntitiesDeath(p) => Self::EntitiesDeath(p),
            PacketType::EntitiesInputs(p) => Self::EntitiesInputs(p),
            PacketType::EntitiesScale(p) => Self::EntitiesScale(p),
            PacketType::EntityPhysics(p) => Self::EntityPhysics(p),
            PacketType::EntityWeapon(p) => Self::EntityWeapon(p),
            PacketType::HealthUpdate(p) => Self::HealthUpdate(p),
            PacketType::MapReset(p) => Self::MapReset(p),
            PacketType::MatchState(p) => Self::MatchState(p),
            PacketType::PlayerLayer(p) => Self::PlayerLayer(p),
            PacketType::PlayerWeapons(p) => Self::PlayerWeapons(p),
            other => return Err(other),
        })
    }

    pub fn into_payload(self) -> PacketType {
        match self {
            Self::ControlEntity(p) => PacketType::ControlEntity(p),
            Self::CreateEntities(p) => PacketType::CreateEntities(p),
            Self::DeleteEntities(p) => PacketType::DeleteEntities(p),
            Self::EnableLayer(p) => PacketType::EnableLayer(p),
            Self::DisableLayer(p) => PacketType::DisableLayer(p),
            Self::EntitiesAnimation(p) => PacketType::EntitiesAnimation(p),
            Self::EntitiesDeath(p) => PacketType::EntitiesDeath(p),
            Self::EntitiesInputs(p) => PacketType::EntitiesInputs(p),
            Self::EntitiesScale(p) => PacketType::EntitiesScale(p),
            Self::EntityPhysics(p) => PacketType::EntityPhysics(p),
            Self::EntityWeapon(p) => PacketType::EntityWeapon(p),
            Self::HealthUpdate(p) => PacketType::HealthUpdate(p),
            Self::MapReset(p) => PacketType::MapReset(p),
            Self::MatchState(p) => PacketType::MatchState(p),
            Self::PlayerLayer(p) => PacketType::PlayerLayer(p),
            Self::PlayerWeapons(p) => PacketType::PlayerWeapons(p),
        }
    }

    /// The server tick this packet applies to.
    pub fn state_tick(&self) -> Tick {
        match self {
            Self::ControlEntity(p) => p.state_tick,
            Self::CreateEntities(p) => p.state_tick,
            Self::DeleteEntities(p) => p.state_tick,
            Self::EnableLayer(p) => p.state_tick,
            Self::DisableLayer(p) => p.state_tick,
            Self::EntitiesAnimation(p) => p.state_tick,
            Self::EntitiesDeath(p) => p.state_tick,
            Self::EntitiesInputs(p) => p.state_tick,
            Self::EntitiesScale(p) => p.state_tick,
            Self::EntityPhysics(p) => p.state_tick,
            Self::EntityWeapon(p) => p.state_tick,
            Self::HealthUpdate(p) => p.state_tick,
            Self::MapReset(p) => p.state_tick,
            Self::MatchState(p) => p.state_tick,
            Self::PlayerLayer(p) => p.state_tick,
            Self::PlayerWeapons(p) => p.state_tick,
        }
    }

    pub fn dispatch<H: TickPacketHandler + ?Sized>(self, handler: &mut H) {
        match self {
            Self::ControlEntity(p) => handler.handle_control_entity(p),
            Self::CreateEntities(p) => handler.handle_create_entities(p),
            Self::DeleteEntities(p) => handler.handle_delete_entities(p),
            Self::EnableLayer(p) => handler.handle_enable_layer(p),
            Self::DisableLayer(p) => handler.handle_disable_layer(p),
            Self::EntitiesAnimation(p) => handler.handle_entities_animation(p),
            Self::EntitiesDeath(p) => handler.handle_entities_death(p),
            Self::EntitiesInputs(p) => handler.handle_entities_inputs(p),
            Self::EntitiesScale(p) => handler.handle_entities_scale(p),
            Self::EntityPhysics(p) => handler.handle_entity_physics(p),
            Self::EntityWeapon(p) => handler.handle_entity_weapon(p),
            Self::HealthUpdate(p) => handler.handle_health_update(p),
            Self::MapReset(p) => handler.handle_map_reset(p),
            Self::MatchState(p) => handler.handle_match_state(p),
            Self::PlayerLayer(p) => handler.handle_player_layer(p),
            Self::PlayerWeapons(p) => handler.handle_player_weapons(p),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickPacket {
    pub tick: Tick,
    pub content: TickPacketContent,
}

/// Client-side buffer of state packets, least recent tick at the front.
#[derive(Debug, Default)]
pub struct TickPacketQueue {
    packets: Vec<TickPacket>,
}

impl TickPacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after every packet whose tick is not more recent, so equal ticks keep arrival order.
    pub fn push(&mut self, tick: Tick, content: TickPacketContent) {
        let index = self
            .packets
            .partition_point(|p| !is_more_recent(p.tick, tick));
        self.packets.insert(index, TickPacket { tick, content });
    }

    pub fn push_content(&mut self, content: TickPacketContent) {
        self.push(content.state_tick(), content);
    }

    /// Removes every packet whose tick is equal to or less recent than `handled_tick`.
    pub fn drain_up_to(&mut self, handled_tick: Tick) -> Vec<TickPacket> {
        let count = self
            .packets
            .partition_point(|p| !is_more_recent(p.tick, handled_tick));
        self.packets.drain(..count).collect()
    }

    pub fn front_tick(&self) -> Option<Tick> {
        self.packets.first().map(|p| p.tick)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn is_sorted(&self) -> bool {
        self.packets
            .windows(2)
            .all(|w| !is_more_recent(w[0].tick, w[1].tick))
    }
}
