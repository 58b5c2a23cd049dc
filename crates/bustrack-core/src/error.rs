//! Hub error types

use bustrack_common::BusKey;
use bustrack_common::error::{
    ACCESS_DENIED, BUS_INACTIVE, BUS_NOT_FOUND, CONSUMER_TOO_SLOW, DATA_ACCESS_ERROR, ErrorCode,
    PARAMETER_VALIDATE_ERROR, SERVER_ERROR,
};

/// Failure reported by the duplex transport underneath a session
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection reset: {0}")]
    Reset(String),
}

/// Why an inbound producer message was not accepted as a sample
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("malformed sample: {0}")]
    Malformed(String),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),
    #[error("bus '{0}' not found")]
    UnknownBus(BusKey),
    #[error("bus '{0}' is not active")]
    InactiveBus(BusKey),
    #[error("producer is not authorized for bus '{0}'")]
    Unauthorized(BusKey),
    #[error("location store failure: {0:#}")]
    Store(anyhow::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("consumer cannot keep up with the snapshot cadence")]
    SlowConsumer,
}

impl HubError {
    /// Error code sent to the peer in the terminal error frame
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            HubError::InvalidHandshake(_) => PARAMETER_VALIDATE_ERROR,
            HubError::UnknownBus(_) => BUS_NOT_FOUND,
            HubError::InactiveBus(_) => BUS_INACTIVE,
            HubError::Unauthorized(_) => ACCESS_DENIED,
            HubError::Store(_) => DATA_ACCESS_ERROR,
            HubError::Transport(_) => SERVER_ERROR,
            HubError::SlowConsumer => CONSUMER_TOO_SLOW,
        }
    }

    /// True when the session was refused before it started
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            HubError::InvalidHandshake(_)
                | HubError::UnknownBus(_)
                | HubError::InactiveBus(_)
                | HubError::Unauthorized(_)
        )
    }
}
