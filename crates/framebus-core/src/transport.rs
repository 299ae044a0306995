//! Host transport seam: how a bus reaches other contexts and hears from them.
//!
//! The host's cross-context channel is untyped and fire-and-forget. A `Port`
//! posts raw JSON to one context; a `Host` hands out ports for the upward
//! link and for configured child frames, and attaches the inbound listener.
//! Implementations live in `framebus-infra`.

use std::fmt;
use std::sync::Arc;

use framebus_types::error::TransportError;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

/// Untyped value as it travels over the host channel.
pub type RawMessage = serde_json::Value;

/// Inbound event stream. Dropping it detaches the listener.
pub type Inbound = mpsc::UnboundedReceiver<RawMessage>;

/// A one-way, non-blocking link to another context.
pub trait Port: Send + Sync + fmt::Debug {
    /// Context id on the other end of this port.
    fn target(&self) -> &str;

    /// Post a raw message. Success only means the host accepted it; delivery
    /// is never confirmed at this layer.
    fn post(&self, message: RawMessage) -> Result<(), TransportError>;
}

/// The execution context a bus instance lives in.
pub trait Host: Send + Sync {
    /// Upward link to the embedding context, or `None` for a top-level page.
    fn parent_port(&self) -> Option<Arc<dyn Port>>;

    /// Port for a configured child frame.
    fn child_port(&self, peer_id: &str) -> Result<Arc<dyn Port>, TransportError>;

    /// Resolves once the host is loaded and its frames can be addressed.
    fn ready(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Attach the inbound listener. A bus calls this exactly once.
    fn listen(&self) -> Result<Inbound, TransportError>;
}
