//! In-process frame tree implementing the host transport.
//!
//! `LocalHub` models a page and its embedded frames the way a browser
//! exposes them to a bus: each frame has at most one parent and any number
//! of children, posting is fire-and-forget into the target frame's
//! listener, frames can be detached (posts to them then fail) and can be
//! held in a "loading" state that `Host::ready` waits on. `inject` pushes
//! arbitrary traffic into a frame, standing in for other scripts sharing
//! the channel.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use framebus_core::transport::{Host, Inbound, Port, RawMessage};
use framebus_types::error::TransportError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

struct Frame {
    parent: Option<String>,
    children: Vec<String>,
    detached: bool,
    loaded: watch::Sender<bool>,
    listener: Option<mpsc::UnboundedSender<RawMessage>>,
}

impl Frame {
    fn new(parent: Option<String>) -> Self {
        let (loaded, _) = watch::channel(true);
        Self {
            parent,
            children: Vec::new(),
            detached: false,
            loaded,
            listener: None,
        }
    }
}

/// A tree of in-process frames. Cheap to clone; clones share the tree.
#[derive(Clone, Default)]
pub struct LocalHub {
    frames: Arc<DashMap<String, Frame>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level page.
    pub fn add_page(&self, id: &str) -> Result<Arc<LocalHost>, TransportError> {
        self.insert(id, None)
    }

    /// Add a frame embedded in `parent`.
    pub fn add_frame(&self, id: &str, parent: &str) -> Result<Arc<LocalHost>, TransportError> {
        if !self.frames.contains_key(parent) {
            return Err(TransportError::UnknownFrame(parent.to_string()));
        }
        let host = self.insert(id, Some(parent.to_string()))?;
        if let Some(mut frame) = self.frames.get_mut(parent) {
            frame.children.push(id.to_string());
        }
        Ok(host)
    }

    fn insert(&self, id: &str, parent: Option<String>) -> Result<Arc<LocalHost>, TransportError> {
        match self.frames.entry(id.to_string()) {
            Entry::Occupied(_) => Err(TransportError::DuplicateFrame(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Frame::new(parent));
                Ok(self.host(id))
            }
        }
    }

    /// Host handle for frame `id`. The frame need not exist yet.
    pub fn host(&self, id: &str) -> Arc<LocalHost> {
        Arc::new(LocalHost {
            hub: self.clone(),
            id: id.to_string(),
        })
    }

    /// Put `id` back into the loading state; `ready()` blocks until `mark_loaded`.
    pub fn mark_loading(&self, id: &str) -> Result<(), TransportError> {
        self.set_loaded(id, false)
    }

    pub fn mark_loaded(&self, id: &str) -> Result<(), TransportError> {
        self.set_loaded(id, true)
    }

    fn set_loaded(&self, id: &str, loaded: bool) -> Result<(), TransportError> {
        let frame = self
            .frames
            .get(id)
            .ok_or_else(|| TransportError::UnknownFrame(id.to_string()))?;
        frame.loaded.send_replace(loaded);
        Ok(())
    }

    /// Remove `id` from the document. Its listener is dropped and posts to
    /// it fail with `TransportError::Detached`.
    pub fn detach(&self, id: &str) -> Result<(), TransportError> {
        let mut frame = self
            .frames
            .get_mut(id)
            .ok_or_else(|| TransportError::UnknownFrame(id.to_string()))?;
        frame.detached = true;
        frame.listener = None;
        debug!(frame = %id, "frame detached");
        Ok(())
    }

    /// Reattach a detached frame. A new listener must be attached.
    pub fn reattach(&self, id: &str) -> Result<(), TransportError> {
        let mut frame = self
            .frames
            .get_mut(id)
            .ok_or_else(|| TransportError::UnknownFrame(id.to_string()))?;
        frame.detached = false;
        Ok(())
    }

    /// Push raw traffic into `id`'s listener as if another script posted it.
    pub fn inject(&self, id: &str, message: RawMessage) -> Result<(), TransportError> {
        self.post_to(id, message)
    }

    /// Whether `id` currently has a live listener.
    pub fn is_listening(&self, id: &str) -> bool {
        self.frames
            .get(id)
            .and_then(|frame| frame.listener.as_ref().map(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Ids of every frame, sorted.
    pub fn frame_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.frames.iter().map(|f| f.key().clone()).collect();
        ids.sort();
        ids
    }

    fn post_to(&self, target: &str, message: RawMessage) -> Result<(), TransportError> {
        let mut frame = self
            .frames
            .get_mut(target)
            .ok_or_else(|| TransportError::UnknownFrame(target.to_string()))?;
        if frame.detached {
            return Err(TransportError::Detached(target.to_string()));
        }

        // Like the browser channel, posting to a frame nobody listens on
        // succeeds and the message is lost.
        let delivered = match frame.listener.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };
        if !delivered {
            frame.listener = None;
            trace!(frame = %target, "no listener, message dropped");
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHub")
            .field("frames", &self.frames.len())
            .finish()
    }
}

/// One frame's view of the hub.
#[derive(Debug)]
pub struct LocalHost {
    hub: LocalHub,
    id: String,
}

impl LocalHost {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn port(&self, target: String) -> Arc<dyn Port> {
        Arc::new(LocalPort {
            hub: self.hub.clone(),
            target,
        })
    }
}

impl Host for LocalHost {
    fn parent_port(&self) -> Option<Arc<dyn Port>> {
        let parent = self.hub.frames.get(&self.id)?.parent.clone()?;
        Some(self.port(parent))
    }

    fn child_port(&self, peer_id: &str) -> Result<Arc<dyn Port>, TransportError> {
        let is_child = self
            .hub
            .frames
            .get(&self.id)
            .map(|frame| frame.children.iter().any(|c| c == peer_id))
            .unwrap_or(false);
        if !is_child {
            return Err(TransportError::UnknownFrame(peer_id.to_string()));
        }
        Ok(self.port(peer_id.to_string()))
    }

    fn ready(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        let loaded = self
            .hub
            .frames
            .get(&self.id)
            .map(|frame| frame.loaded.subscribe());
        let id = self.id.clone();

        async move {
            let mut loaded = loaded.ok_or_else(|| TransportError::UnknownFrame(id.clone()))?;
            loaded
                .wait_for(|loaded| *loaded)
                .await
                .map_err(|_| TransportError::Closed(format!("frame '{id}' removed while loading")))?;
            Ok(())
        }
        .boxed()
    }

    fn listen(&self) -> Result<Inbound, TransportError> {
        let mut frame = self
            .hub
            .frames
            .get_mut(&self.id)
            .ok_or_else(|| TransportError::UnknownFrame(self.id.clone()))?;
        if frame.detached {
            return Err(TransportError::Detached(self.id.clone()));
        }
        if frame.listener.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(TransportError::AlreadyListening(self.id.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        frame.listener = Some(tx);
        debug!(frame = %self.id, "listener attached");
        Ok(rx)
    }
}

/// Posts into another frame's listener.
#[derive(Debug)]
pub struct LocalPort {
    hub: LocalHub,
    target: String,
}

impl Port for LocalPort {
    fn target(&self) -> &str {
        &self.target
    }

    fn post(&self, message: RawMessage) -> Result<(), TransportError> {
        self.hub.post_to(&self.target, message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
