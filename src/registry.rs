//! Registry of in-flight connections.
//!
//! The acceptor never joins its handlers. Instead each handler holds a
//! [`ConnectionGuard`] for as long as it runs, and a stopping server waits
//! on [`ConnectionRegistry::wait_drained`] until every guard is gone.

use slab::Slab;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;

/// Bookkeeping for one accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer: SocketAddr,
    pub accepted_at: Instant,
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert and remove; ids are reused after removal.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<Slab<ConnectionInfo>>,
    active: watch::Sender<usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        let (active, _) = watch::channel(0);
        Arc::new(Self {
            connections: Mutex::new(Slab::new()),
            active,
        })
    }

    /// Record a new connection. It stays registered until the guard drops.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> ConnectionGuard {
        let mut connections = self.lock();
        let id = connections.insert(ConnectionInfo {
            peer,
            accepted_at: Instant::now(),
        });
        self.active.send_replace(connections.len());

        ConnectionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Number of connections currently being handled.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the active connections.
    pub fn connections(&self) -> Vec<(usize, ConnectionInfo)> {
        self.lock()
            .iter()
            .map(|(id, info)| (id, info.clone()))
            .collect()
    }

    /// Resolve once no connection is registered.
    pub async fn wait_drained(&self) {
        let mut active = self.active.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;
    }

    fn remove(&self, id: usize) {
        let mut connections = self.lock();
        if connections.contains(id) {
            connections.remove(id);
        }
        self.active.send_replace(connections.len());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slab<ConnectionInfo>> {
        // The slab stays consistent even if a holder panicked.
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a connection registered; removes it on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: usize,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_and_drop() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        let a = registry.register(peer(1000));
        let b = registry.register(peer(1001));
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id(), b.id());

        drop(a);
        assert_eq!(registry.len(), 1);
        let remaining = registry.connections();
        assert_eq!(remaining[0].1.peer, peer(1001));

        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_reused() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(peer(1000));
        let id = a.id();
        drop(a);
        let b = registry.register(peer(1001));
        assert_eq!(b.id(), id);
    }

    #[tokio::test]
    async fn test_wait_drained_empty() {
        let registry = ConnectionRegistry::new();
        tokio::time::timeout(Duration::from_secs(1), registry.wait_drained())
            .await
            .expect("empty registry is drained");
    }

    #[tokio::test]
    async fn test_wait_drained_after_release() {
        let registry = ConnectionRegistry::new();
        let guard = registry.register(peer(1000));

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_drained().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain should complete")
            .unwrap();
    }
}
