//! Cross-context messaging.
//!
//! - `envelope` -- build, confirm and validate wire envelopes
//! - `registry` -- known contexts and destination resolution
//! - `handler` -- durable and one-shot handler table
//! - `dispatch` -- inbound loop: decode, address check, route
//! - `bus` -- `MessageBus`, the per-context facade
//! - `confirm` -- request/confirmation with deadlines
//! - `retry` -- backoff schedule for unconfirmed sends

pub mod bus;
pub mod confirm;
pub mod dispatch;
pub mod envelope;
pub mod handler;
pub mod registry;
pub mod retry;

pub use bus::{FailedTarget, MessageBus, SendReport};
pub use confirm::ConfirmOptions;
pub use dispatch::{DispatchLoop, InboundOutcome};
pub use envelope::Decoded;
pub use handler::{handler, DispatchOutcome, Handler, HandlerTable};
pub use registry::{ContextRegistry, PeerSnapshot};
pub use retry::RetryHandler;
