//! Context registry: how this bus reaches every other context it knows about.
//!
//! Holds the upward link (if this context is embedded) and one registration
//! per configured child frame. Resolves addressing tokens into the ports a
//! send must post to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use framebus_types::config::PeerConfig;
use framebus_types::error::BusError;
use framebus_types::message::{Destination, PARENT_TOKEN};
use serde::Serialize;
use tracing::debug;

use crate::transport::{Host, Port};

/// One known peer context.
#[derive(Debug)]
pub struct PeerRegistration {
    pub id: String,
    pub label: String,
    port: Arc<dyn Port>,
    reachable: AtomicBool,
}

impl PeerRegistration {
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a peer, for diagnostics and CLI output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub id: String,
    pub label: String,
    pub reachable: bool,
}

/// A port a send must post to, tagged with the id used for bookkeeping.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// Peer id, or `"parent"` for the upward link.
    pub id: String,
    pub port: Arc<dyn Port>,
}

/// Registry of reachable contexts for one bus instance.
pub struct ContextRegistry {
    self_id: String,
    host: Arc<dyn Host>,
    parent: Option<Arc<dyn Port>>,
    peers: RwLock<Vec<Arc<PeerRegistration>>>,
}

impl ContextRegistry {
    /// Create a registry with the host's upward link and no peers.
    pub fn new(self_id: impl Into<String>, host: Arc<dyn Host>) -> Self {
        let parent = host.parent_port();
        Self {
            self_id: self_id.into(),
            host,
            parent,
            peers: RwLock::new(Vec::new()),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Replace the peer list.
    ///
    /// All ports are resolved before anything is swapped, so a failure leaves
    /// the previous list in place. Calling it again with the same list is a
    /// no-op in effect. In-flight requests are untouched: they are keyed by
    /// correlation id in the handler table, not by peer.
    pub fn configure(&self, peers: &[PeerConfig]) -> Result<(), BusError> {
        let mut resolved = Vec::with_capacity(peers.len());
        for peer in peers {
            let port = self.host.child_port(&peer.id)?;
            resolved.push(Arc::new(PeerRegistration {
                id: peer.id.clone(),
                label: peer.label.clone(),
                port,
                reachable: AtomicBool::new(true),
            }));
        }

        let count = resolved.len();
        *self.peers.write().unwrap_or_else(|e| e.into_inner()) = resolved;
        debug!(context = %self.self_id, peers = count, "configured context registry");
        Ok(())
    }

    /// Resolve a destination into the ports to post to.
    ///
    /// - `Parent` -> the upward link, or `DestinationNotFound` when this is a
    ///   top-level context.
    /// - `Context(id)` -> exactly one peer (or the parent, when its id
    ///   matches), otherwise `DestinationNotFound`.
    /// - `Broadcast` -> upward link (if any) plus every peer; may be empty.
    pub fn resolve(&self, destination: &Destination) -> Result<Vec<ResolvedTarget>, BusError> {
        match destination {
            Destination::Parent => self
                .parent_target()
                .map(|target| vec![target])
                .ok_or_else(|| BusError::DestinationNotFound(PARENT_TOKEN.to_string())),
            Destination::Context(id) => {
                let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
                if let Some(peer) = peers.iter().find(|p| &p.id == id) {
                    return Ok(vec![ResolvedTarget {
                        id: peer.id.clone(),
                        port: Arc::clone(&peer.port),
                    }]);
                }
                match &self.parent {
                    Some(port) if port.target() == id => Ok(vec![ResolvedTarget {
                        id: PARENT_TOKEN.to_string(),
                        port: Arc::clone(port),
                    }]),
                    _ => Err(BusError::DestinationNotFound(id.clone())),
                }
            }
            Destination::Broadcast => {
                let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
                let mut targets: Vec<ResolvedTarget> = self.parent_target().into_iter().collect();
                targets.extend(peers.iter().map(|peer| ResolvedTarget {
                    id: peer.id.clone(),
                    port: Arc::clone(&peer.port),
                }));
                Ok(targets)
            }
        }
    }

    fn parent_target(&self) -> Option<ResolvedTarget> {
        self.parent.as_ref().map(|port| ResolvedTarget {
            id: PARENT_TOKEN.to_string(),
            port: Arc::clone(port),
        })
    }

    /// Update a peer's reachable flag after a post attempt.
    pub fn record_delivery(&self, target_id: &str, delivered: bool) {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(peer) = peers.iter().find(|p| p.id == target_id) {
            let was = peer.reachable.swap(delivered, Ordering::Relaxed);
            if was != delivered {
                debug!(context = %self.self_id, peer = %target_id, reachable = delivered, "peer reachability changed");
            }
        }
    }

    /// Whether `"parent"`-addressed envelopes are meant for this context.
    ///
    /// A context is a parent when it embeds frames, or when it is the
    /// top-level page.
    pub fn is_parent(&self) -> bool {
        self.parent.is_none() || !self.peers.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|peer| PeerSnapshot {
                id: peer.id.clone(),
                label: peer.label.clone(),
                reachable: peer.is_reachable(),
            })
            .collect()
    }

    /// Drop every peer registration (used on teardown).
    pub fn clear(&self) {
        self.peers.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("self_id", &self.self_id)
            .field("has_parent", &self.parent.is_some())
            .field("peers", &self.peer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHost;

    fn peers(ids: &[&str]) -> Vec<PeerConfig> {
        ids.iter()
            .map(|id| PeerConfig {
                id: id.to_string(),
                label: id.to_uppercase(),
            })
            .collect()
    }

    #[test]
    fn resolve_parent_without_upward_link_fails() {
        let host = TestHost::top_level("main", &["mapa"]);
        let registry = ContextRegistry::new("main", host);

        let result = registry.resolve(&Destination::Parent);
        assert!(matches!(result, Err(BusError::DestinationNotFound(t)) if t == "parent"));
    }

    #[test]
    fn resolve_literal_id() {
        let host = TestHost::top_level("main", &["mapa", "audio"]);
        let registry = ContextRegistry::new("main", host);
        registry.configure(&peers(&["mapa", "audio"])).unwrap();

        let targets = registry.resolve(&Destination::context("audio")).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "audio");
        assert_eq!(targets[0].port.target(), "audio");

        let missing = registry.resolve(&Destination::context("video"));
        assert!(matches!(missing, Err(BusError::DestinationNotFound(t)) if t == "video"));
    }

    #[test]
    fn literal_id_can_name_the_parent() {
        let host = TestHost::embedded("mapa", "main", &[]);
        let registry = ContextRegistry::new("mapa", host);

        let targets = registry.resolve(&Destination::context("main")).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "parent");
    }

    #[test]
    fn broadcast_covers_parent_and_every_peer() {
        let host = TestHost::embedded("panel", "main", &["a", "b", "c"]);
        let registry = ContextRegistry::new("panel", host);
        registry.configure(&peers(&["a", "b", "c"])).unwrap();

        let targets = registry.resolve(&Destination::Broadcast).unwrap();
        let ids: Vec<_> = targets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["parent", "a", "b", "c"]);
    }

    #[test]
    fn broadcast_with_nothing_known_is_empty() {
        let host = TestHost::top_level("main", &[]);
        let registry = ContextRegistry::new("main", host);

        assert!(registry.resolve(&Destination::Broadcast).unwrap().is_empty());
    }

    #[test]
    fn configure_replaces_and_failure_keeps_previous_list() {
        let host = TestHost::top_level("main", &["mapa", "audio"]);
        let registry = ContextRegistry::new("main", host);
        registry.configure(&peers(&["mapa", "audio"])).unwrap();
        registry.configure(&peers(&["mapa"])).unwrap();
        assert_eq!(registry.peer_count(), 1);

        // "video" has no frame on this host
        let result = registry.configure(&peers(&["audio", "video"]));
        assert!(matches!(result, Err(BusError::Transport(_))));
        assert_eq!(registry.peers()[0].id, "mapa");
    }

    #[test]
    fn record_delivery_tracks_reachability() {
        let host = TestHost::top_level("main", &["mapa"]);
        let registry = ContextRegistry::new("main", host);
        registry.configure(&peers(&["mapa"])).unwrap();
        assert!(registry.peers()[0].reachable);

        registry.record_delivery("mapa", false);
        assert!(!registry.peers()[0].reachable);

        registry.record_delivery("mapa", true);
        assert!(registry.peers()[0].reachable);

        // Unknown ids and the parent link are ignored
        registry.record_delivery("parent", false);
    }

    #[test]
    fn is_parent_rules() {
        let top = ContextRegistry::new("main", TestHost::top_level("main", &[]));
        assert!(top.is_parent());

        let leaf = ContextRegistry::new("mapa", TestHost::embedded("mapa", "main", &[]));
        assert!(!leaf.is_parent());

        let middle = ContextRegistry::new("panel", TestHost::embedded("panel", "main", &["x"]));
        middle.configure(&peers(&["x"])).unwrap();
        assert!(middle.is_parent());
    }
}
