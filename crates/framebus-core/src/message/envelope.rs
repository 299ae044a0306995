//! Envelope codec: constructors for outbound envelopes and the inbound
//! decode step.
//!
//! Decoding is a tagged union rather than a yes/no check: a candidate is
//! either a valid `Envelope`, traffic from some other protocol sharing the
//! host channel (`Foreign`), or a protocol envelope that is missing or
//! mistyping a required field (`Malformed`). The dispatch loop treats the
//! last two differently when logging.

use chrono::Utc;
use framebus_types::error::{BusError, DecodeError};
use framebus_types::message::{
    types, Destination, Envelope, Payload, CORRELATION_KEY, PROTOCOL_VERSION,
};
use serde_json::Value;

/// Keys that only appear in other protocols' traffic (devtools bridges,
/// wallet extensions, page analyzers).
const FOREIGN_MARKER_KEYS: &[&str] = &[
    "__REACT_DEVTOOLS_GLOBAL_HOOK__",
    "__VUE_DEVTOOLS_TOAST__",
    "jsonrpc",
    "wappalyzer",
];

/// Prefixes of `source`/`target` values used by browser extension bridges.
const FOREIGN_SOURCE_PREFIXES: &[&str] = &[
    "react-devtools",
    "vue-devtools",
    "apollo-devtools",
    "metamask",
    "@devtools",
];

/// The four fields every envelope must carry.
const REQUIRED_KEYS: [&str; 4] = ["origin", "destination", "type", "payload"];

/// Marker that only our own envelopes carry.
const VERSION_KEY: &str = "protocolVersion";

/// Outcome of decoding one inbound candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed protocol envelope.
    Valid(Envelope),
    /// Not our protocol at all; dropped without logging.
    Foreign,
    /// Looks like our protocol but is missing or mistyping a required field.
    Malformed(DecodeError),
}

/// Build an outbound envelope stamped with the current time and protocol
/// version.
pub fn build(
    origin: impl Into<String>,
    destination: impl Into<Destination>,
    message_type: impl Into<String>,
    payload: Payload,
    correlation_id: Option<String>,
) -> Envelope {
    Envelope {
        origin: origin.into(),
        destination: destination.into(),
        message_type: message_type.into(),
        payload,
        timestamp: Utc::now(),
        correlation_id,
        protocol_version: PROTOCOL_VERSION.to_string(),
    }
}

/// Build a confirmation addressed back to the origin of `original`.
///
/// The original correlation id is carried both on the envelope and inside
/// the payload, alongside the original type, so the waiting side can match
/// it regardless of which draft of the contract the sender follows.
pub fn confirmation(
    origin: impl Into<String>,
    original: &Envelope,
    extra: Payload,
) -> Result<Envelope, BusError> {
    let correlation_id = original
        .correlation()
        .ok_or_else(|| BusError::NotConfirmable(original.message_type.clone()))?
        .to_string();

    let mut payload = extra;
    payload.insert(
        CORRELATION_KEY.to_string(),
        Value::String(correlation_id.clone()),
    );
    payload.insert(
        "originalType".to_string(),
        Value::String(original.message_type.clone()),
    );

    Ok(build(
        origin,
        Destination::Context(original.origin.clone()),
        types::SYSTEM_CONFIRMATION,
        payload,
        Some(correlation_id),
    ))
}

/// Decode and validate an inbound candidate.
///
/// Total and side-effect free: every input maps to exactly one `Decoded`.
pub fn validate(candidate: &Value) -> Decoded {
    let Some(object) = candidate.as_object() else {
        return Decoded::Foreign;
    };

    if has_foreign_marker(object) {
        return Decoded::Foreign;
    }

    if !is_envelope_attempt(object) {
        return Decoded::Foreign;
    }

    for field in REQUIRED_KEYS {
        match object.get(field) {
            None | Some(Value::Null) => return Decoded::Malformed(DecodeError::MissingField(field)),
            Some(_) => {}
        }
    }

    if let Err(err) = check_shape(object) {
        return Decoded::Malformed(err);
    }

    match serde_json::from_value::<Envelope>(candidate.clone()) {
        Ok(envelope) => Decoded::Valid(envelope),
        Err(err) => Decoded::Malformed(DecodeError::InvalidField {
            field: "envelope",
            reason: err.to_string(),
        }),
    }
}

/// A candidate counts as one of ours once it carries the version marker or
/// at least two of the required fields. A lone `type` or `payload` is common
/// page chatter (bundler dev servers, analytics snippets).
fn is_envelope_attempt(object: &serde_json::Map<String, Value>) -> bool {
    object.contains_key(VERSION_KEY)
        || REQUIRED_KEYS
            .iter()
            .filter(|key| object.contains_key(**key))
            .count()
            >= 2
}

fn has_foreign_marker(object: &serde_json::Map<String, Value>) -> bool {
    if FOREIGN_MARKER_KEYS.iter().any(|key| object.contains_key(*key)) {
        return true;
    }

    ["source", "target"].iter().any(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .is_some_and(|value| {
                FOREIGN_SOURCE_PREFIXES
                    .iter()
                    .any(|prefix| value.starts_with(prefix))
            })
    })
}

fn check_shape(object: &serde_json::Map<String, Value>) -> Result<(), DecodeError> {
    for field in ["origin", "destination", "type"] {
        match object.get(field).and_then(Value::as_str) {
            Some(value) if !value.trim().is_empty() => {}
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
            None => {
                return Err(DecodeError::InvalidField {
                    field,
                    reason: "must be a string".to_string(),
                });
            }
        }
    }

    if !object.get("payload").is_some_and(Value::is_object) {
        return Err(DecodeError::InvalidField {
            field: "payload",
            reason: "must be an object".to_string(),
        });
    }

    Ok(())
}
