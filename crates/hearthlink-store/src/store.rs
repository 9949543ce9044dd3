//! Persistent storage for clients, tokens and pairing sessions
//!
//! Uses JSON file storage in ~/.config/hearthlink/store.json. All mutations
//! happen under a single write lock and are flushed to disk before returning,
//! so the store is the single source of truth and every read reflects the
//! latest revocation state.
//!
//! Conditional transitions (`update_session`, `revoke_token`, the expiry
//! sweeps) check their precondition and apply the mutation under the same
//! lock acquisition. A sweep racing a live verify call therefore resolves to
//! exactly one winner.

use crate::client::{Client, ClientId};
use crate::session::{PairingSession, SessionStatus};
use crate::token::{ClientToken, TokenId, TokenStats};
use chrono::{DateTime, Duration, Utc};
use hearthlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Stored data structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredData {
    /// Pairing sessions indexed by session ID
    sessions: HashMap<String, PairingSession>,
    /// Paired clients indexed by client ID
    clients: HashMap<String, Client>,
    /// Issued credentials indexed by token ID
    tokens: HashMap<String, ClientToken>,
}

/// Store manager with file persistence
pub struct ClientStore {
    /// Path to the storage file
    path: PathBuf,
    /// In-memory state, flushed to disk on every mutation
    data: Arc<RwLock<StoredData>>,
}

impl ClientStore {
    /// Create a new store instance
    ///
    /// Loads existing data from disk if present.
    pub async fn new() -> Result<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Create a store at a specific path
    pub async fn with_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded store from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse store file, starting fresh: {}", e);
                    StoredData::default()
                }
            }
        } else {
            debug!("No existing store file, creating new");
            StoredData::default()
        };

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Get the default storage path (~/.config/hearthlink/store.json)
    fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::internal("could not determine config directory"))?;
        Ok(config_dir.join("hearthlink").join("store.json"))
    }

    /// Flush state to disk; callers hold the data lock around the mutation
    async fn save(&self) -> Result<()> {
        let data = self.data.read().await;
        let json = serde_json::to_string_pretty(&*data)?;
        std::fs::write(&self.path, json)?;
        debug!("Saved store to {:?}", self.path);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pairing sessions
    // ------------------------------------------------------------------

    /// Persist a new pairing session
    pub async fn insert_session(&self, session: PairingSession) -> Result<()> {
        let id = session.id.clone();
        {
            let mut data = self.data.write().await;
            data.sessions.insert(id.clone(), session);
        }
        self.save().await?;
        debug!("Inserted pairing session {}", id);
        Ok(())
    }

    /// Get a pairing session by ID
    pub async fn get_session(&self, id: &str) -> Option<PairingSession> {
        let data = self.data.read().await;
        data.sessions.get(id).cloned()
    }

    /// Conditionally mutate a session under the write lock
    ///
    /// The closure inspects the current record and either mutates it and
    /// returns a value, or fails; on failure nothing is persisted. This is
    /// the compare-and-swap primitive the pairing state machine builds on.
    pub async fn update_session<F, T>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut PairingSession) -> Result<T>,
    {
        let result = {
            let mut data = self.data.write().await;
            let session = data
                .sessions
                .get(id)
                .ok_or_else(|| Error::not_found(format!("pairing session {}", id)))?;

            let mut updated = session.clone();
            let value = f(&mut updated)?;
            data.sessions.insert(id.to_string(), updated);
            value
        };
        self.save().await?;
        Ok(result)
    }

    /// Remove a session by ID, returning the removed record
    pub async fn remove_session(&self, id: &str) -> Result<PairingSession> {
        let removed = {
            let mut data = self.data.write().await;
            data.sessions
                .remove(id)
                .ok_or_else(|| Error::not_found(format!("pairing session {}", id)))?
        };
        self.save().await?;
        debug!("Removed pairing session {}", id);
        Ok(removed)
    }

    /// Expire stale sessions with a conditional write
    ///
    /// Transitions `pending` sessions past their PIN window and `verified`
    /// sessions past their completion deadline to `expired`. Returns the
    /// number of sessions expired.
    pub async fn expire_stale_sessions(
        &self,
        now: DateTime<Utc>,
        completion_deadline: Duration,
    ) -> Result<usize> {
        let count = {
            let mut data = self.data.write().await;
            let mut count = 0;
            for session in data.sessions.values_mut() {
                let stale = match session.status {
                    SessionStatus::Pending => session.is_pin_window_elapsed(now),
                    SessionStatus::Verified => {
                        session.is_completion_overdue(now, completion_deadline)
                    }
                    _ => false,
                };
                if stale {
                    session.status = SessionStatus::Expired;
                    count += 1;
                }
            }
            count
        };
        if count > 0 {
            self.save().await?;
        }
        Ok(count)
    }

    /// Purge terminal sessions created before the cutoff; returns the count
    pub async fn purge_terminal_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let count = {
            let mut data = self.data.write().await;
            let before = data.sessions.len();
            data.sessions
                .retain(|_, s| !(s.status.is_terminal() && s.created_at < cutoff));
            before - data.sessions.len()
        };
        if count > 0 {
            self.save().await?;
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    /// Add or update a client
    pub async fn save_client(&self, client: Client) -> Result<()> {
        let id = client.id.to_string();
        {
            let mut data = self.data.write().await;
            data.clients.insert(id.clone(), client);
        }
        self.save().await?;
        info!("Saved client {}", id);
        Ok(())
    }

    /// Get a client by ID
    pub async fn get_client(&self, id: &ClientId) -> Option<Client> {
        let data = self.data.read().await;
        data.clients.get(&id.to_string()).cloned()
    }

    /// List all clients
    pub async fn list_clients(&self) -> Vec<Client> {
        let data = self.data.read().await;
        data.clients.values().cloned().collect()
    }

    /// Active clients assigned to the given area
    pub async fn active_clients_in_area(&self, area_id: &str) -> Vec<Client> {
        let data = self.data.read().await;
        data.clients
            .values()
            .filter(|c| c.is_active && c.has_area(area_id))
            .cloned()
            .collect()
    }

    /// Conditionally mutate a client under the write lock
    pub async fn update_client<F, T>(&self, id: &ClientId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Client) -> Result<T>,
    {
        let result = {
            let mut data = self.data.write().await;
            let client = data
                .clients
                .get(&id.to_string())
                .ok_or_else(|| Error::not_found(format!("client {}", id)))?;

            let mut updated = client.clone();
            let value = f(&mut updated)?;
            data.clients.insert(id.to_string(), updated);
            value
        };
        self.save().await?;
        Ok(result)
    }

    /// Remove a client by ID, returning the removed record
    pub async fn remove_client(&self, id: &ClientId) -> Result<Client> {
        let removed = {
            let mut data = self.data.write().await;
            data.clients
                .remove(&id.to_string())
                .ok_or_else(|| Error::not_found(format!("client {}", id)))?
        };
        self.save().await?;
        info!("Removed client {}", id);
        Ok(removed)
    }

    /// Update a client's last_seen_at timestamp
    pub async fn touch_client(&self, id: &ClientId) -> Result<()> {
        {
            let mut data = self.data.write().await;
            if let Some(client) = data.clients.get_mut(&id.to_string()) {
                client.touch();
            } else {
                return Err(Error::not_found(format!("client {}", id)));
            }
        }
        self.save().await
    }

    /// Get the number of paired clients
    pub async fn client_count(&self) -> usize {
        let data = self.data.read().await;
        data.clients.len()
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Persist a new token record
    ///
    /// Fails with a conflict if the token hash is already present; the hash
    /// is the unique storage key for credential lookups.
    pub async fn insert_token(&self, token: ClientToken) -> Result<()> {
        let id = token.id.to_string();
        {
            let mut data = self.data.write().await;
            if data
                .tokens
                .values()
                .any(|t| t.token_hash == token.token_hash)
            {
                return Err(Error::conflict("token hash already exists"));
            }
            data.tokens.insert(id.clone(), token);
        }
        self.save().await?;
        debug!("Inserted token {}", id);
        Ok(())
    }

    /// Get a token by ID
    pub async fn get_token(&self, id: &TokenId) -> Option<ClientToken> {
        let data = self.data.read().await;
        data.tokens.get(&id.to_string()).cloned()
    }

    /// Get a token by credential hash
    pub async fn get_token_by_hash(&self, token_hash: &str) -> Option<ClientToken> {
        let data = self.data.read().await;
        data.tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned()
    }

    /// List tokens, optionally filtered by client
    pub async fn list_tokens(&self, client_id: Option<&ClientId>) -> Vec<ClientToken> {
        let data = self.data.read().await;
        data.tokens
            .values()
            .filter(|t| client_id.map_or(true, |id| &t.client_id == id))
            .cloned()
            .collect()
    }

    /// Revoke a token by hash; idempotent
    ///
    /// Returns `true` on the first successful revocation, `false` if the
    /// token is unknown or already revoked. A revoked token is never
    /// un-revoked.
    pub async fn revoke_token(&self, token_hash: &str, reason: &str) -> Result<bool> {
        let revoked = {
            let mut data = self.data.write().await;
            match data
                .tokens
                .values_mut()
                .find(|t| t.token_hash == token_hash)
            {
                Some(token) if !token.is_revoked => {
                    token.is_revoked = true;
                    token.revoked_at = Some(Utc::now());
                    token.revoked_reason = Some(reason.to_string());
                    true
                }
                _ => false,
            }
        };
        if revoked {
            self.save().await?;
        }
        Ok(revoked)
    }

    /// Replace a token's area scope
    pub async fn update_token_areas(
        &self,
        id: &TokenId,
        assigned_areas: Vec<String>,
    ) -> Result<ClientToken> {
        let updated = {
            let mut data = self.data.write().await;
            let token = data
                .tokens
                .get_mut(&id.to_string())
                .ok_or_else(|| Error::not_found(format!("token {}", id)))?;
            token.assigned_areas = assigned_areas;
            token.clone()
        };
        self.save().await?;
        Ok(updated)
    }

    /// Record a successful verification against the store
    ///
    /// Updates the token's `last_used_at` and returns the updated record.
    pub async fn mark_token_used(&self, token_hash: &str) -> Result<ClientToken> {
        let updated = {
            let mut data = self.data.write().await;
            let token = data
                .tokens
                .values_mut()
                .find(|t| t.token_hash == token_hash)
                .ok_or_else(|| Error::not_found("token".to_string()))?;
            token.last_used_at = Some(Utc::now());
            token.clone()
        };
        self.save().await?;
        Ok(updated)
    }

    /// Delete token records whose natural validity has elapsed
    pub async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        let count = {
            let mut data = self.data.write().await;
            let before = data.tokens.len();
            data.tokens.retain(|_, t| !t.is_expired(now));
            before - data.tokens.len()
        };
        if count > 0 {
            self.save().await?;
        }
        Ok(count)
    }

    /// Remove all tokens belonging to a client; returns the count
    pub async fn remove_tokens_for_client(&self, client_id: &ClientId) -> Result<usize> {
        let count = {
            let mut data = self.data.write().await;
            let before = data.tokens.len();
            data.tokens.retain(|_, t| &t.client_id != client_id);
            before - data.tokens.len()
        };
        if count > 0 {
            self.save().await?;
        }
        Ok(count)
    }

    /// Aggregate token counts
    pub async fn token_stats(&self, now: DateTime<Utc>) -> TokenStats {
        let data = self.data.read().await;
        let recent_cutoff = now - Duration::hours(24);
        let mut stats = TokenStats::default();
        for token in data.tokens.values() {
            stats.total += 1;
            if token.is_revoked {
                stats.revoked += 1;
            } else if token.is_expired(now) {
                stats.expired += 1;
            } else {
                stats.active += 1;
            }
            if token.last_used_at.is_some_and(|t| t >= recent_cutoff) {
                stats.recently_used += 1;
            }
        }
        stats
    }
}
