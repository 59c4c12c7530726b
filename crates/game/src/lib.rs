pub mod client;
pub mod event;
pub mod input;
pub mod net;
pub mod prediction;
pub mod server;
pub mod simulation;
pub mod sync;
pub mod tick;
pub mod visibility;
pub mod world;

pub use client::{ClientSession, LocalPlayer, SessionConfig, SessionStats};
pub use event::{EventQueue, MatchEvent, MatchEventSink, NullSink};
pub use input::{InputFlags, PlayerInputData};
pub use net::{
    ClientConnection, ConnectionError, ConnectionManager, ConnectionState, DEFAULT_PORT,
    Incoming, MAX_PACKET_SIZE, NetworkEndpoint, NetworkStats, Packet, PacketError, PacketHeader,
    PacketType,
};
pub use prediction::{PredictionBuffer, ReconcileConfig, ReconciliationReport, Reconciler};
pub use server::{MatchConfig, ServerMatch};
pub use simulation::{KinematicConfig, KinematicSimulator, TickSimulator};
pub use sync::{NetworkSyncSystem, SyncEvents};
pub use tick::{ClockEstimator, DEFAULT_TICK_RATE, FixedTimestep, Tick};
pub use visibility::{VisibilityConfig, VisibilityManager};
pub use world::{Authority, Entity, EntityId, MatchContext};
