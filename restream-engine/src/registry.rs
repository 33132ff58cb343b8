use std::{
    fmt::{Display, Formatter},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;

use crate::error::SinkError;

/// Downstream destination for relayed audio bytes.
///
/// `write` is called inline by the relay loop for every chunk and must not
/// block; a slow listener reports [`SinkError::Backpressure`] instead.
pub trait ChunkSink: Send + Sync {
    fn write(&self, chunk: &Bytes) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl Display for SinkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

/// Set of active listener sinks, shared between the relay loop and the
/// HTTP layer. Owned by one engine instance, never process-wide.
///
/// Membership changes are visible from the next [`snapshot`] on; a snapshot
/// already taken by the relay loop is unaffected.
///
/// [`snapshot`]: ConsumerRegistry::snapshot
#[derive(Default)]
pub struct ConsumerRegistry {
    next_id: AtomicU64,
    sinks: Mutex<Vec<(SinkId, Arc<dyn ChunkSink>)>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sinks(&self) -> MutexGuard<'_, Vec<(SinkId, Arc<dyn ChunkSink>)>> {
        // the list stays consistent even if a holder panicked
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, sink: Arc<dyn ChunkSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut sinks = self.sinks();
            sinks.push((id, sink));
            sinks.len()
        };
        log::info!("registry: {} registered, {} listeners", id, count);
        id
    }

    /// Returns false if `id` was not registered (already gone or evicted).
    pub fn unregister(&self, id: SinkId) -> bool {
        let (removed, count) = self.remove(id);
        if removed {
            log::info!("registry: {} unregistered, {} listeners", id, count);
        }
        removed
    }

    /// Remove a sink on behalf of the write-failure policy.
    pub fn evict(&self, id: SinkId) -> bool {
        let (removed, count) = self.remove(id);
        if removed {
            log::warn!("registry: {} evicted, {} listeners", id, count);
        }
        removed
    }

    fn remove(&self, id: SinkId) -> (bool, usize) {
        let mut sinks = self.sinks();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        (sinks.len() != before, sinks.len())
    }

    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks().iter().any(|(sink_id, _)| *sink_id == id)
    }

    /// Sinks in registration order. The lock is released before returning,
    /// so writes never happen while holding it.
    pub fn snapshot(&self) -> Vec<(SinkId, Arc<dyn ChunkSink>)> {
        self.sinks().clone()
    }

    /// Drop every sink. Channel-backed listeners see their stream end.
    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.sinks()).len();
        if removed > 0 {
            log::info!("registry: cleared {} listeners", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sinks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
