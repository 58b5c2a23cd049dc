//! Error types and error codes for bustrack
//!
//! - `TrackerError`: errors raised by stores, gates and configuration
//! - `ErrorCode`: structured codes carried in terminal stream frames

use serde::Serialize;

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("bus '{0}' not exist!")]
    BusNotExist(String),

    #[error("mirror error: {0}")]
    MirrorError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Error code structure for stream frames
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const ACCESS_DENIED: ErrorCode<'static> = ErrorCode {
    code: 10001,
    message: "access denied",
};

pub const DATA_ACCESS_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "data access error",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const BUS_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 21003,
    message: "bus not found",
};

pub const BUS_INACTIVE: ErrorCode<'static> = ErrorCode {
    code: 21004,
    message: "bus is not active",
};

pub const SESSION_IDLE_TIMEOUT: ErrorCode<'static> = ErrorCode {
    code: 23003,
    message: "session idle timeout",
};

pub const CONSUMER_TOO_SLOW: ErrorCode<'static> = ErrorCode {
    code: 23004,
    message: "consumer cannot keep up with cadence",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_error_display() {
        let err = TrackerError::BusNotExist("bus-7".to_string());
        assert_eq!(format!("{}", err), "bus 'bus-7' not exist!");

        let err = TrackerError::ConfigError("auth secret key is empty".to_string());
        assert_eq!(format!("{}", err), "configuration error: auth secret key is empty");
    }

    #[test]
    fn test_error_code_constants() {
        assert_eq!(ACCESS_DENIED.code, 10001);
        assert_eq!(ACCESS_DENIED.message, "access denied");
        assert_eq!(DATA_ACCESS_ERROR.code, 10002);
        assert_ne!(BUS_NOT_FOUND.code, BUS_INACTIVE.code);
    }

    #[test]
    fn test_error_code_serializes_flat() {
        let json = serde_json::to_value(SESSION_IDLE_TIMEOUT).unwrap();
        assert_eq!(json["code"], 23003);
        assert_eq!(json["message"], "session idle timeout");
    }
}
