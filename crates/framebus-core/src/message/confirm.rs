//! Request/confirmation engine.
//!
//! `send_awaiting_confirmation` composes a send with a one-shot handler on
//! `SYSTEM.CONFIRMACION` keyed by a fresh correlation id, and a deadline.
//! Exactly one of {confirmed, timed out} happens per request: the timeout
//! path only wins if it is the one that removes the one-shot entry.

use std::sync::{Arc, Weak};
use std::time::Duration;

use framebus_types::error::{BusError, HandlerError};
use framebus_types::message::{
    new_correlation_id, types, Destination, Envelope, Payload, CORRELATION_KEY,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use super::bus::{MessageBus, SendReport};
use super::envelope;
use super::handler::{HandlerTable, OneShotToken};

/// Per-request confirmation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOptions {
    /// How long to wait for the confirmation.
    pub timeout: Duration,
    /// On timeout, resolve with `None` instead of failing.
    pub silent: bool,
}

impl ConfirmOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            silent: false,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Removes a request's one-shot entry when the waiting future goes away,
/// however it ends.
struct PendingRequest {
    handlers: Arc<HandlerTable>,
    token: Option<OneShotToken>,
}

impl PendingRequest {
    fn new(handlers: Arc<HandlerTable>, token: OneShotToken) -> Self {
        Self {
            handlers,
            token: Some(token),
        }
    }

    /// Remove the entry now. `true` means the handler can no longer run.
    fn cancel(&mut self) -> bool {
        self.token
            .take()
            .is_some_and(|token| self.handlers.cancel(&token))
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.handlers.cancel(&token);
        }
    }
}

enum Settled {
    Confirmed(Envelope),
    TimedOut,
    Closed,
}

/// Decide a request whose deadline has passed. The timeout only wins if it
/// removes the one-shot entry; otherwise dispatch already took it and the
/// reply (if any) is on the channel.
async fn settle_after_deadline(
    pending: &mut PendingRequest,
    reply_rx: oneshot::Receiver<Envelope>,
) -> Settled {
    if pending.cancel() {
        return Settled::TimedOut;
    }
    match reply_rx.await {
        Ok(reply) => Settled::Confirmed(reply),
        Err(_) => Settled::Closed,
    }
}

impl MessageBus {
    /// Confirmation options from this bus's configuration.
    pub fn default_confirm_options(&self) -> ConfirmOptions {
        ConfirmOptions {
            timeout: self.confirmation_timeout,
            silent: self.silent_timeouts,
        }
    }

    /// Send and wait for the peer to confirm.
    ///
    /// Resolves with the confirmation payload, or `None` when the deadline
    /// passes and `options.silent` is set. Otherwise a missed deadline is
    /// `BusError::ConfirmationTimeout`. Other inbound messages keep flowing
    /// while this waits.
    pub async fn send_awaiting_confirmation(
        &self,
        destination: impl Into<Destination>,
        message_type: impl Into<String>,
        mut payload: Payload,
        options: ConfirmOptions,
    ) -> Result<Option<Payload>, BusError> {
        let destination = destination.into();
        let message_type = message_type.into();
        let correlation_id = new_correlation_id();
        payload.insert(
            CORRELATION_KEY.to_string(),
            Value::String(correlation_id.clone()),
        );

        let request = envelope::build(
            self.context_id(),
            destination.clone(),
            message_type.clone(),
            payload,
            Some(correlation_id.clone()),
        );

        let (reply_tx, mut reply_rx) = oneshot::channel::<Envelope>();
        let deadline = Instant::now() + options.timeout;
        let token = self.handlers.register_once(
            types::SYSTEM_CONFIRMATION,
            correlation_id.clone(),
            Box::new(move |reply: Envelope| {
                let _ = reply_tx.send(reply);
            }),
            deadline,
        );

        let mut pending = PendingRequest::new(Arc::clone(&self.handlers), token);

        self.deliver(&request)?;
        debug!(
            context = %self.context_id(),
            message_type = %message_type,
            destination = %destination,
            correlation_id = %correlation_id,
            "awaiting confirmation"
        );

        let timed_out = || {
            if options.silent {
                debug!(message_type = %message_type, destination = %destination, "no confirmation, resolving silently");
                Ok(None)
            } else {
                Err(BusError::ConfirmationTimeout {
                    message_type: message_type.clone(),
                    destination: destination.to_string(),
                    timeout_ms: options.timeout.as_millis() as u64,
                })
            }
        };

        match tokio::time::timeout_at(deadline, &mut reply_rx).await {
            Ok(Ok(reply)) => Ok(Some(reply.payload)),
            // Entry dropped without a reply: expired at dispatch, or torn down.
            Ok(Err(_)) => self.closed_without_reply(timed_out),
            Err(_) => match settle_after_deadline(&mut pending, reply_rx).await {
                Settled::Confirmed(reply) => Ok(Some(reply.payload)),
                Settled::TimedOut => timed_out(),
                Settled::Closed => self.closed_without_reply(timed_out),
            },
        }
    }

    fn closed_without_reply(
        &self,
        timed_out: impl FnOnce() -> Result<Option<Payload>, BusError>,
    ) -> Result<Option<Payload>, BusError> {
        if self.is_shut_down() {
            Err(BusError::TornDown(self.context_id().to_string()))
        } else {
            timed_out()
        }
    }

    /// Confirm a request received from another context.
    ///
    /// Replies to `original.origin` with `extra` plus the original correlation
    /// id. Fails with `NotConfirmable` when `original` was not sent with
    /// `send_awaiting_confirmation`.
    pub fn send_confirmation(
        &self,
        original: &Envelope,
        extra: Payload,
    ) -> Result<SendReport, BusError> {
        let reply = envelope::confirmation(self.context_id(), original, extra)?;
        self.deliver(&reply)
    }

    /// Answer every confirmable `SYSTEM.PING` with `{"status": "pong"}`.
    pub fn respond_to_pings(self: &Arc<Self>) {
        let bus = Arc::downgrade(self);
        self.on_type(types::SYSTEM_PING, move |ping: Envelope| {
            let bus = Weak::clone(&bus);
            async move {
                let Some(bus) = bus.upgrade() else {
                    return Ok(());
                };
                if ping.correlation().is_none() {
                    return Ok(());
                }
                let mut extra = Payload::new();
                extra.insert("status".to_string(), Value::String("pong".to_string()));
                extra.insert(
                    "context".to_string(),
                    Value::String(bus.context_id().to_string()),
                );
                bus.send_confirmation(&ping, extra)
                    .map_err(HandlerError::failed)?;
                Ok(())
            }
        });
    }
}
