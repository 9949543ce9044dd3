//! Shared application state

use hearthlink_auth::{AuthGate, PairingManager, TokenService};
use hearthlink_core::Config;
use hearthlink_notify::NotificationRegistry;
use hearthlink_store::ClientStore;
use std::sync::Arc;

/// State shared by every handler
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Persistent store for clients, tokens and sessions
    pub store: Arc<ClientStore>,
    /// Credential issuance and verification
    pub tokens: Arc<TokenService>,
    /// Pairing session state machine
    pub pairing: Arc<PairingManager>,
    /// Authentication dispatcher for requests and connections
    pub gate: Arc<AuthGate>,
    /// Live connection registry and event fan-out
    pub registry: Arc<NotificationRegistry>,
}

impl AppState {
    /// Create a new application state
    pub fn new(
        config: Config,
        store: Arc<ClientStore>,
        tokens: Arc<TokenService>,
        pairing: Arc<PairingManager>,
        gate: Arc<AuthGate>,
        registry: Arc<NotificationRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            tokens,
            pairing,
            gate,
            registry,
        }
    }
}
