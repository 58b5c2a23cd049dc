//! bustrack Core - Realtime location distribution
//!
//! This crate provides:
//! - The position cache shared by producer and consumer sessions
//! - The distribution hub that negotiates session roles, ingests producer
//!   samples, and pushes snapshots to consumers on a fixed cadence
//! - Session bookkeeping and the best-effort mirror dispatcher
//! - A simulated fleet used by experimental consumer streams

pub mod error;
pub mod model;
pub mod service;

// Re-export commonly used types
pub use error::{HubError, SampleError, TransportError};
pub use model::{
    BusFilter, BusPosition, ConsumerHandshake, Handshake, HubConfig, LocationUpdate,
    ProducerHandshake, Role, ServerMessage, SessionEnd, SessionQuery,
};
pub use service::{
    CachedPosition, ConsumerSession, DistributionHub, DistributionHubBuilder, MirrorDispatcher,
    PositionCache, PositionSource, ProducerSession, SessionInfo, SessionRegistry, SimulatedFleet,
    SimulatedRoute,
};
