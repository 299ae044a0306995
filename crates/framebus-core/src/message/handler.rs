//! Handler table: which callback runs for an inbound envelope.
//!
//! Entries are keyed by a structured `(type, correlation id)` pair. A key
//! without a correlation id holds the single durable handler for that type;
//! a key with one holds a one-shot handler used by the confirmation engine.
//! The two can never collide, whatever the strings contain.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use framebus_types::error::HandlerError;
use framebus_types::message::Envelope;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

/// Durable handler: the synchronous call runs inside the dispatch loop, the
/// returned future is spawned.
pub type Handler =
    Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// One-shot handler, consumed on first invocation.
pub type OneShotHandler = Box<dyn FnOnce(Envelope) + Send + Sync>;

/// Wrap an async closure as a durable `Handler`.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |envelope: Envelope| f(envelope).boxed())
}

/// Composite handler key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub message_type: String,
    pub correlation_id: Option<String>,
}

impl HandlerKey {
    pub fn durable(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id: None,
        }
    }

    pub fn one_shot(message_type: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id: Some(correlation_id.into()),
        }
    }
}

/// Returned by `register_once`; pass to `cancel` to drop the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotToken {
    key: HandlerKey,
}

enum Registration {
    Durable(Handler),
    OneShot {
        handler: OneShotHandler,
        deadline: Instant,
    },
}

/// What `dispatch` did with an envelope.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A one-shot handler consumed it.
    OneShot,
    /// The durable handler accepted it; its continuation runs on this task.
    Durable(JoinHandle<Result<(), HandlerError>>),
    /// A matching one-shot had already passed its deadline and was dropped.
    Expired,
    /// The handler's synchronous body panicked.
    Failed(HandlerError),
    /// No handler for this type.
    Unhandled,
}

/// Per-bus handler table.
#[derive(Default)]
pub struct HandlerTable {
    entries: DashMap<HandlerKey, Registration>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the durable handler for `message_type`, replacing any
    /// previous one. Returns `true` if a handler was replaced.
    pub fn register(&self, message_type: impl Into<String>, handler: Handler) -> bool {
        let key = HandlerKey::durable(message_type);
        let replaced = self
            .entries
            .insert(key.clone(), Registration::Durable(handler))
            .is_some();
        if replaced {
            debug!(message_type = %key.message_type, "replaced durable handler");
        }
        replaced
    }

    /// Remove the durable handler for `message_type`.
    pub fn unregister(&self, message_type: &str) -> bool {
        self.entries
            .remove(&HandlerKey::durable(message_type))
            .is_some()
    }

    /// Register a one-shot handler for `(message_type, correlation_id)`.
    ///
    /// The entry is removed by whichever comes first: its invocation, a
    /// `cancel` with the returned token, or a dispatch after `deadline`.
    pub fn register_once(
        &self,
        message_type: impl Into<String>,
        correlation_id: impl Into<String>,
        handler: OneShotHandler,
        deadline: Instant,
    ) -> OneShotToken {
        let key = HandlerKey::one_shot(message_type, correlation_id);
        self.entries
            .insert(key.clone(), Registration::OneShot { handler, deadline });
        OneShotToken { key }
    }

    /// Remove a one-shot entry. Returns `true` only if this call removed it,
    /// which guarantees the handler never runs.
    pub fn cancel(&self, token: &OneShotToken) -> bool {
        self.entries
            .remove_if(&token.key, |_, reg| matches!(reg, Registration::OneShot { .. }))
            .is_some()
    }

    /// Route an envelope to its handler.
    ///
    /// One-shot `(type, correlation id)` first, then the durable handler for
    /// the type. Handler panics and errors are contained here.
    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        if let Some(correlation_id) = envelope.correlation() {
            let key = HandlerKey::one_shot(envelope.message_type.clone(), correlation_id);
            let removed = self
                .entries
                .remove_if(&key, |_, reg| matches!(reg, Registration::OneShot { .. }));
            if let Some((_, Registration::OneShot { handler, deadline })) = removed {
                if Instant::now() >= deadline {
                    debug!(message_type = %key.message_type, "one-shot handler expired before reply");
                    return DispatchOutcome::Expired;
                }
                return invoke_one_shot(handler, envelope);
            }
        }

        // Clone out of the map so no shard lock is held while user code runs.
        let durable = self
            .entries
            .get(&HandlerKey::durable(envelope.message_type.clone()))
            .and_then(|entry| match entry.value() {
                Registration::Durable(handler) => Some(Arc::clone(handler)),
                Registration::OneShot { .. } => None,
            });

        match durable {
            Some(handler) => invoke_durable(&handler, envelope),
            None if envelope.is_confirmation() => {
                debug!(origin = %envelope.origin, correlation_id = ?envelope.correlation(), "confirmation matches no pending request, dropping");
                DispatchOutcome::Unhandled
            }
            None => {
                debug!(message_type = %envelope.message_type, origin = %envelope.origin, "no handler registered, dropping");
                DispatchOutcome::Unhandled
            }
        }
    }

    /// Number of durable handlers.
    pub fn handler_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().correlation_id.is_none())
            .count()
    }

    /// Number of one-shot entries still waiting.
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().correlation_id.is_some())
            .count()
    }

    /// Drop every entry. Pending one-shot handlers are dropped uninvoked.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn invoke_one_shot(handler: OneShotHandler, envelope: Envelope) -> DispatchOutcome {
    let message_type = envelope.message_type.clone();
    match std::panic::catch_unwind(AssertUnwindSafe(move || handler(envelope))) {
        Ok(()) => DispatchOutcome::OneShot,
        Err(panic) => {
            let err = HandlerError::Panicked(panic_message(panic.as_ref()));
            error!(message_type = %message_type, error = %err, "one-shot handler failed");
            DispatchOutcome::Failed(err)
        }
    }
}

fn invoke_durable(handler: &Handler, envelope: Envelope) -> DispatchOutcome {
    let message_type = envelope.message_type.clone();

    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
        Ok(future) => future,
        Err(panic) => {
            let err = HandlerError::Panicked(panic_message(panic.as_ref()));
            error!(message_type = %message_type, error = %err, "handler failed");
            return DispatchOutcome::Failed(err);
        }
    };

    let task = tokio::spawn(async move {
        let result = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        };
        if let Err(err) = &result {
            error!(message_type = %message_type, error = %err, "handler failed");
        }
        result
    });

    DispatchOutcome::Durable(task)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.handler_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}
