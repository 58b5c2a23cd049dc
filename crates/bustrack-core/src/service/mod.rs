// Distribution services: cache, hub, sessions, mirroring, simulation

pub mod cache;
pub mod hub;
pub mod mirror;
pub mod registry;
pub mod simulation;

// Re-export commonly used types
pub use cache::{CachedPosition, PositionCache, PositionSource};
pub use hub::{ConsumerSession, DistributionHub, DistributionHubBuilder, ProducerSession};
pub use mirror::MirrorDispatcher;
pub use registry::{SessionInfo, SessionRegistry};
pub use simulation::{SimulatedFleet, SimulatedRoute};
