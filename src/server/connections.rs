//! Server-wide set of live connections
//!
//! Connections register on start and unregister when their task ends. Each
//! gets a child of the set's root cancellation token, so [`ConnectionSet::shutdown`]
//! stops all of them at once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Snapshot of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub session_id: u64,
    pub peer_addr: SocketAddr,
    pub started_at: Instant,
}

#[derive(Debug)]
struct Entry {
    info: ConnectionInfo,
    cancel: CancellationToken,
}

/// Live connections, keyed by session id
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: RwLock<HashMap<u64, Entry>>,
    root: CancellationToken,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the token that stops it
    pub async fn register(&self, session_id: u64, peer_addr: SocketAddr) -> CancellationToken {
        let cancel = self.root.child_token();
        let info = ConnectionInfo {
            session_id,
            peer_addr,
            started_at: Instant::now(),
        };
        self.connections.write().await.insert(
            session_id,
            Entry {
                info,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Forget a finished connection
    pub async fn unregister(&self, session_id: u64) -> Option<ConnectionInfo> {
        let entry = self.connections.write().await.remove(&session_id)?;
        tracing::debug!(
            session_id = session_id,
            peer = %entry.info.peer_addr,
            duration = ?entry.info.started_at.elapsed(),
            "Connection unregistered"
        );
        Some(entry.info)
    }

    /// Stop one connection
    pub async fn close(&self, session_id: u64) -> bool {
        match self.connections.read().await.get(&session_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all live connections
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Stop every connection, current and future
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let set = ConnectionSet::new();
        set.register(1, addr(1000)).await;
        set.register(2, addr(1001)).await;
        assert_eq!(set.len().await, 2);

        let info = set.unregister(1).await.unwrap();
        assert_eq!(info.peer_addr, addr(1000));
        assert!(set.unregister(1).await.is_none());
        assert_eq!(set.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_one() {
        let set = ConnectionSet::new();
        let a = set.register(1, addr(1000)).await;
        let b = set.register(2, addr(1001)).await;

        assert!(set.close(1).await);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!set.close(3).await);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all() {
        let set = ConnectionSet::new();
        let a = set.register(1, addr(1000)).await;
        set.shutdown();

        assert!(a.is_cancelled());
        assert!(set.is_shutdown());
        // Late registrations are born cancelled
        let late = set.register(2, addr(1001)).await;
        assert!(late.is_cancelled());
    }
}
