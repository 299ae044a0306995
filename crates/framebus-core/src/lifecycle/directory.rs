//! Bus directory: at most one bus per context id.
//!
//! Each id moves `Uninitialized -> Initializing -> Ready`. Callers that
//! arrive while an initialization is in flight await the same shared
//! future and receive the same instance; a failure returns the id to
//! `Uninitialized` so a later `configure` can try again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use framebus_types::config::BusConfig;
use framebus_types::error::BusError;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::message::MessageBus;
use crate::transport::Host;

/// Lifecycle state of one context id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
}

type InitFuture = Shared<BoxFuture<'static, Result<Arc<MessageBus>, BusError>>>;

enum Slot {
    Initializing {
        generation: u64,
        abandon: CancellationToken,
        future: InitFuture,
    },
    Ready(Arc<MessageBus>),
}

impl Slot {
    fn state(&self) -> InitState {
        match self {
            Slot::Initializing { .. } => InitState::Initializing,
            Slot::Ready(_) => InitState::Ready,
        }
    }

    fn is_initializing(&self, generation: u64) -> bool {
        matches!(self, Slot::Initializing { generation: g, .. } if *g == generation)
    }
}

/// Registry of bus instances, keyed by context id.
///
/// Cheap to clone; clones share the same slots.
#[derive(Clone, Default)]
pub struct BusDirectory {
    slots: Arc<DashMap<String, Slot>>,
    generations: Arc<AtomicU64>,
}

impl BusDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the bus for `config.context_id`.
    ///
    /// - `Uninitialized`: validate, wait for the host to load, build the
    ///   registry, attach the listener once, then mark `Ready`.
    /// - `Initializing`: await the in-flight initialization. This caller's
    ///   peer list is ignored.
    /// - `Ready`: return the existing instance unchanged. Use
    ///   `MessageBus::reconfigure_peers` to replace peers.
    pub async fn configure(
        &self,
        config: BusConfig,
        host: Arc<dyn Host>,
    ) -> Result<Arc<MessageBus>, BusError> {
        let future = match self.slots.entry(config.context_id.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(bus) => {
                    debug!(context = %config.context_id, "bus already configured");
                    return Ok(Arc::clone(bus));
                }
                Slot::Initializing { future, .. } => {
                    debug!(
                        context = %config.context_id,
                        "joining in-flight initialization, ignoring caller's peers"
                    );
                    future.clone()
                }
            },
            Entry::Vacant(entry) => {
                if let Err(err) = config.validate() {
                    return Err(BusError::InitializationFailure {
                        context: config.context_id.clone(),
                        reason: err.to_string(),
                    });
                }
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let abandon = CancellationToken::new();
                let future = spawn_init(
                    Arc::clone(&self.slots),
                    config,
                    host,
                    generation,
                    abandon.clone(),
                );
                entry.insert(Slot::Initializing {
                    generation,
                    abandon,
                    future: future.clone(),
                });
                future
            }
        };

        future.await
    }

    pub fn state(&self, context_id: &str) -> InitState {
        self.slots
            .get(context_id)
            .map(|slot| slot.state())
            .unwrap_or(InitState::Uninitialized)
    }

    /// The bus for `context_id`, if it is `Ready`.
    pub fn get(&self, context_id: &str) -> Option<Arc<MessageBus>> {
        self.slots.get(context_id).and_then(|slot| match slot.value() {
            Slot::Ready(bus) => Some(Arc::clone(bus)),
            Slot::Initializing { .. } => None,
        })
    }

    /// Every known context id with its state, sorted by id.
    pub fn contexts(&self) -> Vec<(String, InitState)> {
        let mut contexts: Vec<_> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        contexts.sort_by(|a, b| a.0.cmp(&b.0));
        contexts
    }

    /// Shut down and forget the bus for `context_id`.
    ///
    /// An in-flight initialization is abandoned and its callers get
    /// `BusError::TornDown`. When this returns the host listener has been
    /// released, so `configure` may be called again right away. Returns
    /// whether the id was known.
    pub async fn teardown(&self, context_id: &str) -> bool {
        let removed = self.slots.remove(context_id);
        match removed {
            Some((_, Slot::Ready(bus))) => {
                bus.close().await;
                true
            }
            Some((_, Slot::Initializing { abandon, future, .. })) => {
                info!(context = %context_id, "initialization abandoned by teardown");
                abandon.cancel();
                let _ = future.await;
                true
            }
            None => false,
        }
    }

    /// Tear down every context.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.teardown(&id).await;
        }
    }
}

impl std::fmt::Debug for BusDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusDirectory")
            .field("contexts", &self.slots.len())
            .finish()
    }
}

/// Run initialization on its own task so it completes even if every caller
/// stops waiting.
fn spawn_init(
    slots: Arc<DashMap<String, Slot>>,
    config: BusConfig,
    host: Arc<dyn Host>,
    generation: u64,
    abandon: CancellationToken,
) -> InitFuture {
    let context_id = config.context_id.clone();
    let task = tokio::spawn(initialize(
        Arc::clone(&slots),
        config,
        host,
        generation,
        abandon,
    ));

    async move {
        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                slots.remove_if(&context_id, |_, slot| slot.is_initializing(generation));
                Err(BusError::InitializationFailure {
                    context: context_id,
                    reason: join_err.to_string(),
                })
            }
        }
    }
    .boxed()
    .shared()
}

async fn initialize(
    slots: Arc<DashMap<String, Slot>>,
    config: BusConfig,
    host: Arc<dyn Host>,
    generation: u64,
    abandon: CancellationToken,
) -> Result<Arc<MessageBus>, BusError> {
    let context_id = config.context_id.clone();

    let outcome = tokio::select! {
        biased;
        _ = abandon.cancelled() => Err(BusError::TornDown(context_id.clone())),
        result = bring_up(&config, host) => result,
    };

    match outcome {
        Ok(bus) => {
            if let Some(mut slot) = slots.get_mut(&context_id) {
                if slot.is_initializing(generation) {
                    *slot = Slot::Ready(Arc::clone(&bus));
                    info!(
                        context = %context_id,
                        label = %bus.label(),
                        peers = bus.peers().len(),
                        "bus ready"
                    );
                    return Ok(bus);
                }
            }
            bus.close().await;
            Err(BusError::TornDown(context_id))
        }
        Err(BusError::TornDown(_)) => {
            debug!(context = %context_id, "initialization stopped before the bus came up");
            Err(BusError::TornDown(context_id))
        }
        Err(err) => {
            slots.remove_if(&context_id, |_, slot| slot.is_initializing(generation));
            warn!(context = %context_id, error = %err, "bus initialization failed");
            Err(err)
        }
    }
}

async fn bring_up(config: &BusConfig, host: Arc<dyn Host>) -> Result<Arc<MessageBus>, BusError> {
    let failure = |reason: String| BusError::InitializationFailure {
        context: config.context_id.clone(),
        reason,
    };

    host.ready().await.map_err(|e| failure(e.to_string()))?;
    let bus = MessageBus::new(config, Arc::clone(&host)).map_err(|e| failure(e.to_string()))?;
    let inbound = host.listen().map_err(|e| failure(e.to_string()))?;
    bus.start(inbound);

    Ok(Arc::new(bus))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
