use std::io;

use crate::protocol::{Status, StatusCode};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway-wide error type.
///
/// Variants carry plain strings so the whole enum stays `Clone`; the seek
/// gate memoizes its first result, including a failed one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIo(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("{processor}: {message}")]
    PreProcessor { processor: String, message: String },

    #[error("malformed protocol: {0}")]
    Protocol(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("config file error: {0}")]
    ConfigFile(String),

    /// marker error
    #[error("incomplete frame")]
    Incomplete,
}

impl From<io::Error> for GatewayError {
    fn from(e: io::Error) -> Self {
        GatewayError::DetailedIo(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Protocol(e.to_string())
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(e: config::ConfigError) -> Self {
        GatewayError::ConfigFile(e.to_string())
    }
}

impl From<tracing::dispatcher::SetGlobalDefaultError> for GatewayError {
    fn from(e: tracing::dispatcher::SetGlobalDefaultError) -> Self {
        GatewayError::IllegalState(e.to_string())
    }
}

/// Every terminal error reaches the client as INTERNAL with the original
/// message; kinds are not distinguished on the wire in this version.
impl From<GatewayError> for Status {
    fn from(e: GatewayError) -> Self {
        Status::new(StatusCode::Internal, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_processor_error_carries_identity() {
        let e = GatewayError::PreProcessor {
            processor: "gatemq::processor::Uppercase".to_string(),
            message: "bad key".to_string(),
        };
        assert!(e.to_string().contains("gatemq::processor::Uppercase"));
        assert!(e.to_string().contains("bad key"));
    }

    #[test]
    fn test_status_mapping_keeps_message() {
        let status: Status = GatewayError::Storage("boom".to_string()).into();
        assert_eq!(status.code, StatusCode::Internal);
        assert!(status.message.contains("boom"));
    }
}
