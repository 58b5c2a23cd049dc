//! bustrack Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all bustrack components:
//! - Error types and error codes
//! - The bus / position sample domain model

pub mod error;
pub mod model;

// Re-exports for convenience
pub use error::{ErrorCode, TrackerError};
pub use model::{Bus, BusKey, PositionSample, now_millis};

/// Role value for producer (driver) connections
pub const ROLE_DRIVER: &str = "driver";

/// Role value for consumer (client) connections
pub const ROLE_CLIENT: &str = "client";
