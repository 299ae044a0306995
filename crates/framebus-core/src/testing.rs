//! In-memory host doubles for core unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framebus_types::error::TransportError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::transport::{Host, Inbound, Port, RawMessage};

/// Port that records everything posted to it.
#[derive(Debug)]
pub struct RecordingPort {
    target: String,
    posted: Mutex<Vec<RawMessage>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingPort {
    pub fn new(target: &str) -> Arc<Self> {
        Arc::new(Self {
            target: target.to_string(),
            posted: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn posted(&self) -> Vec<RawMessage> {
        self.posted.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Port for RecordingPort {
    fn target(&self) -> &str {
        &self.target
    }

    fn post(&self, message: RawMessage) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Detached(self.target.clone()));
        }
        self.posted.lock().unwrap().push(message);
        Ok(())
    }
}

/// Host with recording ports, a counted listener, and an optional load delay.
pub struct TestHost {
    pub parent: Option<Arc<RecordingPort>>,
    pub children: HashMap<String, Arc<RecordingPort>>,
    pub listen_calls: AtomicUsize,
    pub ready_delay: Option<Duration>,
    pub fail_listen: AtomicBool,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<RawMessage>>>,
}

impl TestHost {
    fn build(parent: Option<&str>, children: &[&str], ready_delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            parent: parent.map(RecordingPort::new),
            children: children
                .iter()
                .map(|id| (id.to_string(), RecordingPort::new(id)))
                .collect(),
            listen_calls: AtomicUsize::new(0),
            ready_delay,
            fail_listen: AtomicBool::new(false),
            inbound_tx: Mutex::new(None),
        })
    }

    /// A top-level page embedding `children`.
    pub fn top_level(_self_id: &str, children: &[&str]) -> Arc<Self> {
        Self::build(None, children, None)
    }

    /// A frame embedded in `parent_id`, itself embedding `children`.
    pub fn embedded(_self_id: &str, parent_id: &str, children: &[&str]) -> Arc<Self> {
        Self::build(Some(parent_id), children, None)
    }

    /// A top-level page whose `ready()` takes `delay` to resolve.
    pub fn slow(children: &[&str], delay: Duration) -> Arc<Self> {
        Self::build(None, children, Some(delay))
    }

    pub fn child(&self, id: &str) -> &Arc<RecordingPort> {
        &self.children[id]
    }

    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    /// Push a raw message into the attached listener, as the host would.
    pub fn inject(&self, message: RawMessage) -> bool {
        match self.inbound_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

impl Host for TestHost {
    fn parent_port(&self) -> Option<Arc<dyn Port>> {
        self.parent.clone().map(|p| p as Arc<dyn Port>)
    }

    fn child_port(&self, peer_id: &str) -> Result<Arc<dyn Port>, TransportError> {
        self.children
            .get(peer_id)
            .cloned()
            .map(|p| p as Arc<dyn Port>)
            .ok_or_else(|| TransportError::UnknownFrame(peer_id.to_string()))
    }

    fn ready(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        let delay = self.ready_delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }
        .boxed()
    }

    fn listen(&self) -> Result<Inbound, TransportError> {
        self.listen_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listen.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("listener refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}
