use thiserror::Error;

/// Errors surfaced to the application code that asked the bus to do something.
///
/// Cloneable so an in-flight initialization can hand the same failure to
/// every caller that joined it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("destination '{0}' is not a known context")]
    DestinationNotFound(String),

    #[error("no confirmation for '{message_type}' from '{destination}' within {timeout_ms}ms")]
    ConfirmationTimeout {
        message_type: String,
        destination: String,
        timeout_ms: u64,
    },

    #[error("initialization of context '{context}' failed: {reason}")]
    InitializationFailure { context: String, reason: String },

    #[error("envelope of type '{0}' carries no correlation id")]
    NotConfirmable(String),

    #[error("bus for context '{0}' was torn down")]
    TornDown(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("encode error: {0}")]
    Encode(String),
}

/// Why a candidate that looks like a protocol envelope was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failure reported by a message handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Wrap any displayable error as a handler failure.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Errors from the host's cross-context channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("frame '{0}' is detached")]
    Detached(String),

    #[error("no frame for context '{0}'")]
    UnknownFrame(String),

    #[error("frame '{0}' already exists")]
    DuplicateFrame(String),

    #[error("inbound listener for '{0}' is already attached")]
    AlreadyListening(String),

    #[error("channel closed: {0}")]
    Closed(String),
}

/// Errors related to loading or validating bus configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_timeout_display() {
        let err = BusError::ConfirmationTimeout {
            message_type: "SYSTEM.PING".to_string(),
            destination: "mapa".to_string(),
            timeout_ms: 50,
        };
        assert_eq!(
            err.to_string(),
            "no confirmation for 'SYSTEM.PING' from 'mapa' within 50ms"
        );
    }

    #[test]
    fn test_transport_error_converts_into_bus_error() {
        let err: BusError = TransportError::Detached("audio".to_string()).into();
        assert_eq!(err.to_string(), "transport error: frame 'audio' is detached");
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::MissingField("payload");
        assert_eq!(err.to_string(), "missing required field 'payload'");
    }

    #[test]
    fn test_handler_error_failed_wraps_message() {
        let err = HandlerError::failed("boom");
        assert_eq!(err, HandlerError::Failed("boom".to_string()));
    }
}
