//! Message bus core for framebus.
//!
//! Everything that does not touch a concrete host lives here: the envelope
//! codec, context registry, handler table, dispatch loop, confirmation
//! engine and the per-context lifecycle. Hosts plug in through the
//! `transport` traits; `framebus-infra` provides the in-process one.

pub mod lifecycle;
pub mod message;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::{BusDirectory, InitState};
pub use message::{ConfirmOptions, MessageBus, SendReport};
pub use transport::{Host, Inbound, Port, RawMessage};
