//! Registry of WebSocket clients.
//!
//! Clients are the out-of-process discovery controller, player and UIs.
//! Each registered client carries its own cancellation token and counters for
//! the collaborator callbacks it has delivered, which `/health` reports so an
//! operator can tell whether the discovery process is actually talking to us.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::utils::now_millis;

struct ClientEntry {
    connected_at: u64,
    events_received: u64,
    last_event_at: Option<u64>,
    cancel: CancellationToken,
}

/// Point-in-time view of one connected client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WsClientInfo {
    pub id: u64,
    pub connected_at: u64,
    pub events_received: u64,
    pub last_event_at: Option<u64>,
}

/// Tracks connected WebSocket clients and can force-close all of them.
pub struct WsConnectionManager {
    clients: DashMap<u64, ClientEntry>,
    next_id: AtomicU64,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a client. It stays registered until the returned guard drops.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        self.clients.insert(
            id,
            ClientEntry {
                connected_at: now_millis(),
                events_received: 0,
                last_event_at: None,
                cancel: cancel.clone(),
            },
        );
        log::info!("[WS] Client ws-{} connected ({} total)", id, self.clients.len());

        ConnectionGuard {
            id,
            label: format!("ws-{}", id),
            manager: Arc::clone(self),
            cancel,
        }
    }

    fn record_event(&self, id: u64) {
        if let Some(mut entry) = self.clients.get_mut(&id) {
            entry.events_received += 1;
            entry.last_event_at = Some(now_millis());
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Connected clients ordered by connection id.
    pub fn clients(&self) -> Vec<WsClientInfo> {
        let mut clients: Vec<WsClientInfo> = self
            .clients
            .iter()
            .map(|entry| WsClientInfo {
                id: *entry.key(),
                connected_at: entry.connected_at,
                events_received: entry.events_received,
                last_event_at: entry.last_event_at,
            })
            .collect();
        clients.sort_by_key(|c| c.id);
        clients
    }

    /// Cancels every registered client. Clients connecting afterwards are
    /// unaffected. Returns how many were signaled.
    pub fn close_all(&self) -> usize {
        let mut signaled = 0;
        for entry in self.clients.iter() {
            entry.cancel.cancel();
            signaled += 1;
        }
        if signaled > 0 {
            log::info!("[WS] Force-closing {} client(s)", signaled);
        }
        signaled
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a client registered for as long as its socket task runs.
pub struct ConnectionGuard {
    id: u64,
    label: String,
    manager: Arc<WsConnectionManager>,
    cancel: CancellationToken,
}

impl ConnectionGuard {
    /// Log label, `ws-<id>`.
    pub fn id(&self) -> &str {
        &self.label
    }

    /// Cancelled by [`WsConnectionManager::close_all`].
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Counts a collaborator callback delivered by this client.
    pub fn record_event(&self) {
        self.manager.record_event(self.id);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.manager.clients.remove(&self.id).is_some() {
            log::info!(
                "[WS] Client {} disconnected ({} remaining)",
                self.label,
                self.manager.clients.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_the_guard_removes_the_client() {
        let manager = Arc::new(WsConnectionManager::new());

        let first = manager.register();
        let second = manager.register();
        assert_ne!(first.id(), second.id());
        assert_eq!(manager.connection_count(), 2);

        drop(first);
        let remaining = manager.clients();
        assert_eq!(remaining.len(), 1);
        assert_eq!(second.id(), format!("ws-{}", remaining[0].id));
    }

    #[test]
    fn events_are_counted_per_client() {
        let manager = Arc::new(WsConnectionManager::new());
        let discovery = manager.register();
        let _ui = manager.register();

        discovery.record_event();
        discovery.record_event();

        let clients = manager.clients();
        assert_eq!(clients[0].events_received, 2);
        assert!(clients[0].last_event_at.is_some());
        assert_eq!(clients[1].events_received, 0);
        assert_eq!(clients[1].last_event_at, None);
    }

    #[test]
    fn close_all_only_signals_registered_clients() {
        let manager = Arc::new(WsConnectionManager::new());
        let before = manager.register();

        assert_eq!(manager.close_all(), 1);
        let after = manager.register();

        assert!(before.cancel_token().is_cancelled());
        assert!(!after.cancel_token().is_cancelled());
    }
}
