//! Client connection registry and event fan-out
//!
//! At most one live connection is tracked per client; a later registration
//! silently replaces an earlier one. Registrations are process-local and lost
//! on restart; reconnecting clients re-register.
//!
//! `notify*` never blocks on delivery acknowledgment. A failed push (e.g. a
//! connection mid-close) is logged and dropped, never surfaced to the
//! triggering admin request.

use hearthlink_core::{Event, EventKind};
use hearthlink_store::{ClientId, ClientStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacity of the admin broadcast channel
const ADMIN_CHANNEL_CAPACITY: usize = 64;

/// Messages delivered to a connection task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Push an event to the peer
    Event(Event),
    /// Close the connection
    Close,
}

/// Sending half of a live client connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Identifies this particular connection, so a replaced connection's
    /// cleanup cannot drop its successor's registration
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end for the connection task
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    fn send(&self, msg: Outbound) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// In-memory pub/sub mapping client identity to live connection handles
pub struct NotificationRegistry {
    /// Live client connections; shared with delayed-disconnect tasks
    connections: Arc<RwLock<HashMap<ClientId, ConnectionHandle>>>,
    /// Fan-out channel for admin-facing events
    admin_tx: broadcast::Sender<Event>,
    /// Queried for area-targeted delivery; no secondary index is kept
    store: Arc<ClientStore>,
    /// Delay between a terminal event and the forced close
    disconnect_grace: Duration,
}

impl NotificationRegistry {
    /// Create a new registry backed by the given store
    pub fn new(store: Arc<ClientStore>, disconnect_grace: Duration) -> Self {
        let (admin_tx, _) = broadcast::channel(ADMIN_CHANNEL_CAPACITY);
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            admin_tx,
            store,
            disconnect_grace,
        }
    }

    /// Associate a client with its current live connection
    ///
    /// Replaces any prior handle for that client; the replaced connection's
    /// channel closes, which ends its socket task.
    pub async fn register(&self, client_id: ClientId, handle: ConnectionHandle) {
        let mut connections = self.connections.write().await;
        if connections.insert(client_id.clone(), handle).is_some() {
            debug!("Replaced existing connection for client {}", client_id);
        }
    }

    /// Remove the association for a connection on disconnect
    ///
    /// Only removes the entry if it still belongs to the given connection,
    /// so a stale task cannot unregister a newer connection.
    pub async fn unregister(&self, client_id: &ClientId, conn_id: Uuid) {
        let mut connections = self.connections.write().await;
        if connections
            .get(client_id)
            .is_some_and(|h| h.conn_id == conn_id)
        {
            connections.remove(client_id);
        }
    }

    /// Whether a client currently has a live connection
    pub async fn is_connected(&self, client_id: &ClientId) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(client_id)
    }

    /// Number of live client connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Push an event to a client's live connection
    ///
    /// Silent no-op if the client has no registered connection.
    pub async fn notify(&self, client_id: &ClientId, kind: EventKind) {
        let connections = self.connections.read().await;
        let Some(handle) = connections.get(client_id) else {
            debug!("No live connection for client {}, dropping event", client_id);
            return;
        };

        let event = Event::new(kind);
        if !handle.send(Outbound::Event(event)) {
            warn!("Failed to deliver event to client {}", client_id);
        }
    }

    /// Push an event to every active, connected client assigned to an area
    ///
    /// Resolves the audience by querying the store at call time; an
    /// O(active-clients) scan per call, acceptable at expected fleet sizes.
    pub async fn notify_by_area(&self, area_id: &str, kind: EventKind) {
        let audience = self.store.active_clients_in_area(area_id).await;
        for client in audience {
            self.notify(&client.id, kind.clone()).await;
        }
    }

    /// Broadcast an event to all connected admin consoles
    pub fn notify_admins(&self, kind: EventKind) {
        // Send fails only when no admin is listening, which is fine
        let _ = self.admin_tx.send(Event::new(kind));
    }

    /// Subscribe to the admin event stream
    pub fn subscribe_admins(&self) -> broadcast::Receiver<Event> {
        self.admin_tx.subscribe()
    }

    /// Emit a terminal `token_revoked` event, then force-disconnect
    ///
    /// The close is delayed by the configured grace period so the event can
    /// flush before teardown. Runs in the background; the caller returns
    /// immediately.
    pub fn disconnect_client(&self, client_id: ClientId, reason: String) {
        let connections = Arc::clone(&self.connections);
        let grace = self.disconnect_grace;
        tokio::spawn(async move {
            let handle = {
                let map = connections.read().await;
                map.get(&client_id).cloned()
            };

            let Some(handle) = handle else {
                debug!("No live connection for client {}, nothing to disconnect", client_id);
                return;
            };

            let event = Event::new(EventKind::TokenRevoked { reason });
            if !handle.send(Outbound::Event(event)) {
                warn!("Failed to deliver revocation event to client {}", client_id);
            }

            tokio::time::sleep(grace).await;

            if !handle.send(Outbound::Close) {
                debug!("Connection for client {} already gone", client_id);
            }

            let mut map = connections.write().await;
            if map
                .get(&client_id)
                .is_some_and(|h| h.conn_id == handle.conn_id)
            {
                map.remove(&client_id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthlink_store::{Client, DeviceType};
    use tempfile::tempdir;

    async fn create_test_registry() -> (Arc<NotificationRegistry>, Arc<ClientStore>, tempfile::TempDir)
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_store.json");
        let store = Arc::new(ClientStore::with_path(path).await.unwrap());
        let registry = Arc::new(NotificationRegistry::new(
            store.clone(),
            Duration::from_millis(10),
        ));
        (registry, store, dir)
    }

    async fn paired_client(store: &ClientStore, name: &str, areas: &[&str]) -> ClientId {
        let client = Client::new(
            name.to_string(),
            DeviceType::Tablet,
            areas.iter().map(|a| a.to_string()).collect(),
        );
        let id = client.id.clone();
        store.save_client(client).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_notify_unregistered_is_noop() {
        let (registry, _store, _dir) = create_test_registry().await;

        // Must not panic or error
        registry
            .notify(
                &ClientId::new(),
                EventKind::AreaAdded {
                    area_id: "area_1".to_string(),
                },
            )
            .await;
    }

    #[tokio::test]
    async fn test_register_and_notify() {
        let (registry, _store, _dir) = create_test_registry().await;
        let client_id = ClientId::new();

        let (handle, mut rx) = ConnectionHandle::new();
        registry.register(client_id.clone(), handle).await;
        assert!(registry.is_connected(&client_id).await);

        registry
            .notify(
                &client_id,
                EventKind::AreaAdded {
                    area_id: "area_1".to_string(),
                },
            )
            .await;

        match rx.recv().await {
            Some(Outbound::Event(event)) => match event.kind {
                EventKind::AreaAdded { area_id } => assert_eq!(area_id, "area_1"),
                other => panic!("unexpected event: {:?}", other),
            },
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registration_replaces_prior_handle() {
        let (registry, _store, _dir) = create_test_registry().await;
        let client_id = ClientId::new();

        let (first, mut first_rx) = ConnectionHandle::new();
        registry.register(client_id.clone(), first).await;

        let (second, mut second_rx) = ConnectionHandle::new();
        registry.register(client_id.clone(), second).await;

        // The first connection's channel closed with the replaced sender
        assert!(first_rx.recv().await.is_none());

        registry
            .notify(
                &client_id,
                EventKind::AreaUpdated {
                    areas: vec!["area_2".to_string()],
                },
            )
            .await;
        assert!(matches!(
            second_rx.recv().await,
            Some(Outbound::Event(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_new_connection() {
        let (registry, _store, _dir) = create_test_registry().await;
        let client_id = ClientId::new();

        let (first, _first_rx) = ConnectionHandle::new();
        let stale_conn_id = first.conn_id;
        registry.register(client_id.clone(), first).await;

        let (second, _second_rx) = ConnectionHandle::new();
        registry.register(client_id.clone(), second).await;

        // The replaced connection's cleanup must not drop the new handle
        registry.unregister(&client_id, stale_conn_id).await;
        assert!(registry.is_connected(&client_id).await);
    }

    #[tokio::test]
    async fn test_notify_by_area_targets_exactly_assigned_clients() {
        let (registry, store, _dir) = create_test_registry().await;

        let in_area = paired_client(&store, "In Area", &["area_1"]).await;
        let other_area = paired_client(&store, "Other Area", &["area_2"]).await;

        let mut suspended = Client::new(
            "Suspended".to_string(),
            DeviceType::Tablet,
            vec!["area_1".to_string()],
        );
        suspended.is_active = false;
        let suspended_id = suspended.id.clone();
        store.save_client(suspended).await.unwrap();

        let (h1, mut rx1) = ConnectionHandle::new();
        registry.register(in_area.clone(), h1).await;
        let (h2, mut rx2) = ConnectionHandle::new();
        registry.register(other_area, h2).await;
        let (h3, mut rx3) = ConnectionHandle::new();
        registry.register(suspended_id, h3).await;

        registry
            .notify_by_area(
                "area_1",
                EventKind::AreaDisabled {
                    area_id: "area_1".to_string(),
                },
            )
            .await;

        assert!(matches!(rx1.recv().await, Some(Outbound::Event(_))));
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_sends_revoked_then_close() {
        let (registry, _store, _dir) = create_test_registry().await;
        let client_id = ClientId::new();

        let (handle, mut rx) = ConnectionHandle::new();
        registry.register(client_id.clone(), handle).await;

        registry.disconnect_client(client_id.clone(), "revoked by admin".to_string());

        match rx.recv().await {
            Some(Outbound::Event(event)) => match event.kind {
                EventKind::TokenRevoked { reason } => {
                    assert_eq!(reason, "revoked by admin")
                }
                other => panic!("unexpected event: {:?}", other),
            },
            other => panic!("unexpected message: {:?}", other),
        }

        assert!(matches!(rx.recv().await, Some(Outbound::Close)));

        // Give the background task a moment to unregister
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!registry.is_connected(&client_id).await);
    }

    #[tokio::test]
    async fn test_admin_broadcast() {
        let (registry, _store, _dir) = create_test_registry().await;

        let mut rx = registry.subscribe_admins();
        registry.notify_admins(EventKind::PairingVerified {
            session_id: "s1".to_string(),
            device_name: "Tablet".to_string(),
            device_type: "tablet".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::PairingVerified { .. }));
    }
}
