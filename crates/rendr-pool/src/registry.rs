use crate::connection::{ConnectionId, WorkerConnection};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Set of live worker connections, ordered by connection id.
///
/// The registry also carries the pool's change signal: it fires whenever a
/// connection becomes ready, a job is released, a connection closes, or the
/// pool shuts down. Dispatchers waiting for capacity park on it instead of
/// polling.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<WorkerConnection>>>,
    next_id: AtomicU64,
    changed: Notify,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next connection id in accept order, starting at 1.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn register(&self, conn: Arc<WorkerConnection>) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn.id(), conn);
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<WorkerConnection>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Connections in id order.
    pub fn snapshot(&self) -> Vec<Arc<WorkerConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Remove and return every connection.
    pub fn drain(&self) -> Vec<Arc<WorkerConnection>> {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *connections).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ready_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.is_ready())
            .count()
    }

    /// Wake every task currently waiting in [`changed`](Self::changed).
    pub fn notify_changed(&self) {
        self.changed.notify_waiters();
    }

    /// Future resolving on the next [`notify_changed`](Self::notify_changed).
    ///
    /// Call `enable()` on the pinned future before inspecting state, or a
    /// notification between the check and the await is lost.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}
