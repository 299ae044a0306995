//! Inbound dispatch loop.
//!
//! One loop per bus instance drains the host listener: decode, check that
//! the envelope is addressed to this context, then hand it to the handler
//! table. Foreign traffic and broadcast noise never reach application code.

use std::sync::Arc;

use framebus_types::error::DecodeError;
use framebus_types::message::{Destination, Envelope};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::envelope::{self, Decoded};
use super::handler::{DispatchOutcome, HandlerTable};
use super::registry::ContextRegistry;
use crate::transport::{Inbound, RawMessage};

/// What happened to one inbound event.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Another protocol's traffic; dropped silently.
    Foreign,
    /// A protocol envelope with a missing or invalid field; dropped with a warning.
    Malformed(DecodeError),
    /// Valid, but meant for some other context.
    NotAddressed,
    /// Routed to the handler table.
    Dispatched(DispatchOutcome),
}

/// Reads raw inbound events and routes them for one context.
pub struct DispatchLoop {
    context_id: String,
    registry: Arc<ContextRegistry>,
    handlers: Arc<HandlerTable>,
}

impl DispatchLoop {
    pub fn new(
        context_id: impl Into<String>,
        registry: Arc<ContextRegistry>,
        handlers: Arc<HandlerTable>,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            registry,
            handlers,
        }
    }

    /// Process a single raw event.
    pub fn handle_raw(&self, raw: RawMessage) -> InboundOutcome {
        match envelope::validate(&raw) {
            Decoded::Foreign => {
                trace!(context = %self.context_id, "ignoring foreign message");
                InboundOutcome::Foreign
            }
            Decoded::Malformed(err) => {
                warn!(context = %self.context_id, error = %err, "dropping malformed envelope");
                InboundOutcome::Malformed(err)
            }
            Decoded::Valid(envelope) => {
                if !self.is_addressed_to_me(&envelope) {
                    return InboundOutcome::NotAddressed;
                }
                debug!(
                    context = %self.context_id,
                    message_type = %envelope.message_type,
                    origin = %envelope.origin,
                    "dispatching envelope"
                );
                InboundOutcome::Dispatched(self.handlers.dispatch(envelope))
            }
        }
    }

    fn is_addressed_to_me(&self, envelope: &Envelope) -> bool {
        match &envelope.destination {
            Destination::Broadcast => true,
            Destination::Parent => self.registry.is_parent(),
            Destination::Context(id) => id == &self.context_id,
        }
    }

    /// Drain `inbound` until it closes or `shutdown` fires.
    ///
    /// Handler bodies run one at a time in arrival order; their async
    /// continuations are spawned by the handler table and may overlap.
    /// Returning drops `inbound`, which detaches the listener.
    pub async fn run(self, mut inbound: Inbound, shutdown: CancellationToken) {
        debug!(context = %self.context_id, "dispatch loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                raw = inbound.recv() => match raw {
                    Some(raw) => {
                        self.handle_raw(raw);
                    }
                    None => {
                        debug!(context = %self.context_id, "inbound channel closed");
                        break;
                    }
                },
            }
        }
        debug!(context = %self.context_id, "dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::handler::handler;
    use crate::testing::TestHost;
    use framebus_types::config::PeerConfig;
    use framebus_types::error::HandlerError;
    use framebus_types::message::{types, Payload};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn leaf_loop() -> (DispatchLoop, Arc<HandlerTable>) {
        let host = TestHost::embedded("mapa", "main", &[]);
        let registry = Arc::new(ContextRegistry::new("mapa", host));
        let handlers = Arc::new(HandlerTable::new());
        (
            DispatchLoop::new("mapa", registry, Arc::clone(&handlers)),
            handlers,
        )
    }

    fn raw(origin: &str, destination: &str, message_type: &str) -> RawMessage {
        let env = envelope::build(origin, destination, message_type, Payload::new(), None);
        serde_json::to_value(env).unwrap()
    }

    #[tokio::test]
    async fn foreign_and_malformed_are_distinguished() {
        let (dispatch, _handlers) = leaf_loop();

        let foreign = dispatch.handle_raw(json!({"source": "react-devtools-bridge", "payload": {}}));
        assert!(matches!(foreign, InboundOutcome::Foreign));

        let malformed = dispatch.handle_raw(json!({"origin": "main", "destination": "mapa", "type": "T"}));
        assert!(matches!(
            malformed,
            InboundOutcome::Malformed(DecodeError::MissingField("payload"))
        ));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn warnings(&self) -> usize {
            let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            text.lines().filter(|line| line.contains("WARN")).count()
        }
    }

    /// Run `f` with a TRACE-level subscriber writing into the returned buffer.
    fn with_captured_logs(f: impl FnOnce()) -> CapturedLogs {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        logs
    }

    #[test]
    fn foreign_traffic_is_dropped_without_a_warning() {
        let (dispatch, _handlers) = leaf_loop();

        let logs = with_captured_logs(|| {
            dispatch.handle_raw(json!({"source": "react-devtools-bridge", "payload": {}}));
            dispatch.handle_raw(json!({"type": "webpackOk"}));
            dispatch.handle_raw(json!("plain string"));
        });

        assert_eq!(logs.warnings(), 0);
    }

    #[test]
    fn malformed_envelope_warns_once() {
        let (dispatch, _handlers) = leaf_loop();

        let logs = with_captured_logs(|| {
            dispatch.handle_raw(json!({"origin": "main", "destination": "mapa", "type": "T"}));
        });

        assert_eq!(logs.warnings(), 1);
    }

    #[tokio::test]
    async fn addressing_rules_for_a_leaf_frame() {
        let (dispatch, handlers) = leaf_loop();
        handlers.register(types::SYSTEM_PING, handler(|_| async { Ok(()) }));

        assert!(matches!(
            dispatch.handle_raw(raw("main", "mapa", types::SYSTEM_PING)),
            InboundOutcome::Dispatched(DispatchOutcome::Durable(_))
        ));
        assert!(matches!(
            dispatch.handle_raw(raw("main", "broadcast", types::SYSTEM_PING)),
            InboundOutcome::Dispatched(DispatchOutcome::Durable(_))
        ));
        assert!(matches!(
            dispatch.handle_raw(raw("audio", "parent", types::SYSTEM_PING)),
            InboundOutcome::NotAddressed
        ));
        assert!(matches!(
            dispatch.handle_raw(raw("main", "audio", types::SYSTEM_PING)),
            InboundOutcome::NotAddressed
        ));
    }

    #[tokio::test]
    async fn parent_token_reaches_embedding_context() {
        let host = TestHost::top_level("main", &["mapa"]);
        let registry = Arc::new(ContextRegistry::new("main", host));
        registry
            .configure(&[PeerConfig {
                id: "mapa".to_string(),
                label: "Mapa".to_string(),
            }])
            .unwrap();
        let handlers = Arc::new(HandlerTable::new());
        handlers.register(types::SYSTEM_ERROR, handler(|_| async { Ok(()) }));
        let dispatch = DispatchLoop::new("main", registry, handlers);

        assert!(matches!(
            dispatch.handle_raw(raw("mapa", "parent", types::SYSTEM_ERROR)),
            InboundOutcome::Dispatched(DispatchOutcome::Durable(_))
        ));
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_next_message() {
        let (dispatch, handlers) = leaf_loop();
        handlers.register(
            types::SYSTEM_MODE_CHANGE,
            handler(|_| async { Err(HandlerError::failed("bad mode")) }),
        );
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pings);
        handlers.register(
            types::SYSTEM_PING,
            handler(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(dispatch.run(rx, shutdown.clone()));

        tx.send(raw("main", "mapa", types::SYSTEM_MODE_CHANGE)).unwrap();
        tx.send(raw("main", "mapa", types::SYSTEM_PING)).unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while pings.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loop_stops_when_inbound_closes() {
        let (dispatch, _handlers) = leaf_loop();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch.run(rx, CancellationToken::new()));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
