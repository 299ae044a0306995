//! Per-context message bus.
//!
//! A `MessageBus` owns one context's registry and handler table, drains the
//! host listener on a dispatch task, and exposes the collaborator surface:
//! `send`, `send_with_retry`, `on_type`, plus the confirmation methods in
//! `confirm`. Instances are created and torn down through `BusDirectory`.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framebus_types::config::{BusConfig, PeerConfig, RetryPolicy};
use framebus_types::error::{BusError, HandlerError, TransportError};
use framebus_types::message::{Destination, Envelope, Payload};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::DispatchLoop;
use super::envelope;
use super::handler::{handler, HandlerTable};
use super::registry::{ContextRegistry, PeerSnapshot, ResolvedTarget};
use super::retry::RetryHandler;
use crate::transport::{Host, Inbound};

/// Result of posting one envelope to its resolved targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendReport {
    /// Distinct targets the destination resolved to.
    pub attempted: usize,
    /// Targets whose port accepted the envelope.
    pub delivered: usize,
    /// Targets that still failed after the last attempt.
    pub failed: Vec<FailedTarget>,
    /// Post rounds performed (1 unless retried).
    pub attempts: u32,
}

impl SendReport {
    /// Every target accepted the envelope (trivially true for an empty broadcast).
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTarget {
    pub id: String,
    pub error: String,
}

/// Message bus for one execution context.
pub struct MessageBus {
    context_id: String,
    label: String,
    pub(crate) registry: Arc<ContextRegistry>,
    pub(crate) handlers: Arc<HandlerTable>,
    retry: RetryPolicy,
    pub(crate) confirmation_timeout: Duration,
    pub(crate) silent_timeouts: bool,
    pub(crate) shutdown: CancellationToken,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageBus {
    /// Build a bus from `config`, resolving every configured peer on `host`.
    ///
    /// Does not attach a listener; `BusDirectory` calls `start` once the
    /// instance is fully wired.
    pub fn new(config: &BusConfig, host: Arc<dyn Host>) -> Result<Self, BusError> {
        let registry = Arc::new(ContextRegistry::new(&config.context_id, host));
        registry.configure(&config.peers)?;

        Ok(Self {
            context_id: config.context_id.clone(),
            label: config.display_label().to_string(),
            registry,
            handlers: Arc::new(HandlerTable::new()),
            retry: config.retry,
            confirmation_timeout: config.confirmation_timeout(),
            silent_timeouts: config.silent_timeouts,
            shutdown: CancellationToken::new(),
            dispatch_task: Mutex::new(None),
        })
    }

    /// Spawn the dispatch loop over `inbound`.
    pub(crate) fn start(&self, inbound: Inbound) {
        let dispatch = DispatchLoop::new(
            self.context_id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.handlers),
        );
        let task = tokio::spawn(dispatch.run(inbound, self.shutdown.clone()));
        *self.dispatch_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Register the handler for `message_type`, replacing any previous one.
    pub fn on_type<F, Fut>(&self, message_type: impl Into<String>, f: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers.register(message_type, handler(f));
    }

    /// Remove the handler for `message_type`.
    pub fn off(&self, message_type: &str) -> bool {
        self.handlers.unregister(message_type)
    }

    /// Replace the peer list without touching handlers or in-flight requests.
    pub fn reconfigure_peers(&self, peers: &[PeerConfig]) -> Result<(), BusError> {
        self.registry.configure(peers)
    }

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.registry.peers()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.handler_count()
    }

    pub fn pending_count(&self) -> usize {
        self.handlers.pending_count()
    }

    /// Fire-and-forget send.
    ///
    /// Fails only when the destination cannot be resolved (or the envelope
    /// cannot be encoded); per-target transport failures are reported in the
    /// returned `SendReport`.
    pub fn send(
        &self,
        destination: impl Into<Destination>,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Result<SendReport, BusError> {
        let envelope = envelope::build(&self.context_id, destination, message_type, payload, None);
        self.deliver(&envelope)
    }

    /// Send, re-posting to targets that failed with multiplicative backoff
    /// per this bus's `RetryPolicy`.
    pub async fn send_with_retry(
        &self,
        destination: impl Into<Destination>,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Result<SendReport, BusError> {
        let envelope = envelope::build(&self.context_id, destination, message_type, payload, None);
        self.ensure_running()?;
        let targets = self.registry.resolve(&envelope.destination)?;
        let raw = encode(&envelope)?;

        let mut report = SendReport {
            attempted: targets.len(),
            ..SendReport::default()
        };
        let mut pending = targets;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let failures = self.post_all(&pending, &raw);
            report.delivered += pending.len() - failures.len();
            report.attempts = attempt;

            if failures.is_empty() {
                report.failed.clear();
                break;
            }
            if !RetryHandler::should_retry(&self.retry, attempt) {
                report.failed = failures
                    .into_iter()
                    .map(|(target, err)| FailedTarget {
                        id: target.id,
                        error: err.to_string(),
                    })
                    .collect();
                warn!(
                    context = %self.context_id,
                    message_type = %envelope.message_type,
                    failed = report.failed.len(),
                    attempts = attempt,
                    "giving up on send"
                );
                break;
            }

            let delay = RetryHandler::delay_after(&self.retry, attempt);
            debug!(context = %self.context_id, attempt, ?delay, "retrying failed targets");
            tokio::time::sleep(delay).await;
            pending = failures.into_iter().map(|(target, _)| target).collect();
        }

        Ok(report)
    }

    /// Post an already-built envelope once to every resolved target.
    pub(crate) fn deliver(&self, envelope: &Envelope) -> Result<SendReport, BusError> {
        self.ensure_running()?;
        let targets = self.registry.resolve(&envelope.destination)?;
        if targets.is_empty() {
            debug!(context = %self.context_id, message_type = %envelope.message_type, "broadcast with no known contexts");
        }
        let raw = encode(envelope)?;

        let failures = self.post_all(&targets, &raw);
        Ok(SendReport {
            attempted: targets.len(),
            delivered: targets.len() - failures.len(),
            failed: failures
                .into_iter()
                .map(|(target, err)| FailedTarget {
                    id: target.id,
                    error: err.to_string(),
                })
                .collect(),
            attempts: 1,
        })
    }

    fn post_all(
        &self,
        targets: &[ResolvedTarget],
        raw: &serde_json::Value,
    ) -> Vec<(ResolvedTarget, TransportError)> {
        let mut failures = Vec::new();
        for target in targets {
            match target.port.post(raw.clone()) {
                Ok(()) => self.registry.record_delivery(&target.id, true),
                Err(err) => {
                    warn!(context = %self.context_id, target = %target.id, error = %err, "post failed");
                    self.registry.record_delivery(&target.id, false);
                    failures.push((target.clone(), err));
                }
            }
        }
        failures
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::TornDown(self.context_id.clone()));
        }
        Ok(())
    }

    /// Stop the dispatch loop and clear all tables.
    ///
    /// Pending confirmation waits resolve with `BusError::TornDown`. The
    /// listener is released once the dispatch task has unwound; use `close`
    /// to wait for that.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.handlers.clear();
        self.registry.clear();
        if let Some(task) = self.dispatch_task.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            task.abort();
        }
        info!(context = %self.context_id, "bus torn down");
    }

    /// `shutdown`, then wait until the dispatch task has dropped the host
    /// listener so the context can listen again.
    pub async fn close(&self) {
        self.shutdown();
        let task = self.dispatch_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            // Cancelled or finished, the inbound receiver is gone either way.
            let _ = task.await;
            debug!(context = %self.context_id, "listener released");
        }
    }
}

fn encode(envelope: &Envelope) -> Result<serde_json::Value, BusError> {
    serde_json::to_value(envelope).map_err(|e| BusError::Encode(e.to_string()))
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("context_id", &self.context_id)
            .field("peers", &self.registry.peer_count())
            .field("handlers", &self.handlers.handler_count())
            .field("pending_confirmations", &self.handlers.pending_count())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
