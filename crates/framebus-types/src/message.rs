//! Cross-context messaging wire types for framebus.
//!
//! Defines the `Envelope` exchanged between an embedding page and its frames,
//! the `Destination` addressing tokens, and the well-known message types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version stamped on every envelope built by this bus version.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Reserved addressing token for "the context that embeds me".
pub const PARENT_TOKEN: &str = "parent";

/// Reserved addressing token for "every known context".
pub const BROADCAST_TOKEN: &str = "broadcast";

/// Payload key the correlation id is embedded under.
pub const CORRELATION_KEY: &str = "correlationId";

/// Opaque key/value payload. The bus only ever reads `correlationId` from it.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Well-known message types, grouped by domain.
pub mod types {
    pub const SYSTEM_ERROR: &str = "SYSTEM.ERROR";
    pub const SYSTEM_MODE_CHANGE: &str = "SYSTEM.CAMBIO_MODO";
    pub const SYSTEM_CONFIRMATION: &str = "SYSTEM.CONFIRMACION";
    pub const SYSTEM_PING: &str = "SYSTEM.PING";
    pub const NAV_SET_DESTINATION: &str = "NAVEGACION.ESTABLECER_DESTINO";
    pub const NAV_UPDATE_POSITION: &str = "NAVEGACION.ACTUALIZAR_POSICION";
}

/// Where an envelope is going.
///
/// Serialized as a plain string on the wire: the reserved tokens `"parent"`
/// and `"broadcast"`, or a literal context id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    /// The context that embeds the sender.
    Parent,
    /// The upward link (if any) plus every registered peer.
    Broadcast,
    /// One named context.
    Context(String),
}

impl Destination {
    /// Address a named context.
    pub fn context(id: impl Into<String>) -> Self {
        Self::Context(id.into())
    }

    /// The wire form of this destination.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Parent => PARENT_TOKEN,
            Self::Broadcast => BROADCAST_TOKEN,
            Self::Context(id) => id,
        }
    }
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        match value.as_str() {
            PARENT_TOKEN => Self::Parent,
            BROADCAST_TOKEN => Self::Broadcast,
            _ => Self::Context(value),
        }
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Destination> for String {
    fn from(value: Destination) -> Self {
        match value {
            Destination::Context(id) => id,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only unit ever transmitted between contexts.
///
/// `origin`, `destination`, `type` and `payload` are required on the wire;
/// `timestamp` and `protocolVersion` are filled in when an older sender left
/// them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Context id of the sending bus.
    pub origin: String,
    /// Addressing token or literal context id.
    pub destination: Destination,
    /// Namespaced message type (e.g. `"SYSTEM.ERROR"`).
    #[serde(rename = "type")]
    pub message_type: String,
    /// Sender-defined payload; schema is a contract per `type`.
    pub payload: Payload,
    /// Creation instant.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Present only on request/confirmation flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl Envelope {
    /// Correlation id of this envelope.
    ///
    /// Prefers the envelope field and falls back to the copy embedded in the
    /// payload, which is where confirmation-seeking senders always put it.
    pub fn correlation(&self) -> Option<&str> {
        self.correlation_id.as_deref().or_else(|| {
            self.payload
                .get(CORRELATION_KEY)
                .and_then(serde_json::Value::as_str)
        })
    }

    /// Whether this envelope is a confirmation reply.
    pub fn is_confirmation(&self) -> bool {
        self.message_type == types::SYSTEM_CONFIRMATION
    }
}

/// Generate a fresh correlation id (UUIDv7, time-sortable).
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
