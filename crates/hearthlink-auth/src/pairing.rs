//! Pairing session lifecycle
//!
//! Drives the PIN state machine from creation through verification to
//! credential issuance:
//!
//! 1. Admin requests a session; a 6-digit PIN with a 5-minute window is
//!    generated and shown to the admin exactly once.
//! 2. The pairing device submits the PIN together with its device info.
//! 3. The admin completes the pairing with a client name and area
//!    assignment; a Client and its credential are materialized.
//!
//! A background sweep expires stale sessions with conditional writes, so a
//! sweep racing a live verification resolves to exactly one winner.

use crate::token::TokenService;
use chrono::{DateTime, Duration, Utc};
use hearthlink_core::{Config, Error, EventKind, Result};
use hearthlink_notify::NotificationRegistry;
use hearthlink_store::{
    Client, ClientInfo, ClientStore, DeviceType, PairingSession, SessionStatus,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Response when starting a pairing session
///
/// The PIN appears here and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingStartResponse {
    pub session_id: String,
    /// The 6-digit PIN to hand to the pairing device
    pub pin: String,
    pub expires_at: DateTime<Utc>,
}

/// Request to verify a PIN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingVerifyRequest {
    pub session_id: String,
    /// The PIN entered on the device
    pub pin: String,
    /// Device name reported by the client
    pub device_name: String,
    /// Device type hint
    #[serde(default)]
    pub device_type: Option<String>,
}

/// Request to complete a verified session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePairingRequest {
    /// Name the new client will carry
    pub client_name: String,
    /// Areas the new client may interact with
    #[serde(default)]
    pub assigned_areas: Vec<String>,
}

/// Response after completing a pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePairingResponse {
    pub client: ClientInfo,
    pub token_id: String,
    /// One-time plaintext credential; never retrievable again
    pub credential: String,
}

/// Session state snapshot for status polling
///
/// Deliberately excludes the PIN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub device_name: Option<String>,
    pub device_type: Option<DeviceType>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl SessionStatusResponse {
    fn from_session(session: &PairingSession) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            device_name: session.device_name.clone(),
            device_type: session.device_type,
            created_at: session.created_at,
            expires_at: session.expires_at,
            verified_at: session.verified_at,
        }
    }
}

/// Generate a cryptographically random 6-digit PIN
///
/// Uniform over [100000, 999999]; `thread_rng` is a CSPRNG.
fn generate_pin() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Whether a submitted PIN has the required shape
fn is_valid_pin_format(pin: &str) -> bool {
    pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Manages the pairing session state machine
pub struct PairingManager {
    store: Arc<ClientStore>,
    tokens: Arc<TokenService>,
    registry: Arc<NotificationRegistry>,
    session_ttl: Duration,
    completion_deadline: Duration,
    retention: Duration,
}

impl PairingManager {
    /// Create a new pairing manager
    pub fn new(
        store: Arc<ClientStore>,
        tokens: Arc<TokenService>,
        registry: Arc<NotificationRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            tokens,
            registry,
            session_ttl: config.session_ttl(),
            completion_deadline: config.completion_deadline(),
            retention: config.session_retention(),
        }
    }

    /// Start a new pairing session
    pub async fn create_session(&self) -> Result<PairingStartResponse> {
        let session = PairingSession::new(generate_pin(), self.session_ttl);
        let response = PairingStartResponse {
            session_id: session.id.clone(),
            pin: session.pin.clone(),
            expires_at: session.expires_at,
        };

        self.store.insert_session(session).await?;
        info!("Started pairing session {}", response.session_id);
        Ok(response)
    }

    /// Verify a PIN submitted by the pairing device
    ///
    /// A PIN mismatch, an unknown session, a session in the wrong state and
    /// an elapsed PIN window all fail identically, so the response gives no
    /// hint which check broke.
    pub async fn verify_pin(&self, request: PairingVerifyRequest) -> Result<SessionStatusResponse> {
        if !is_valid_pin_format(&request.pin) {
            return Err(Error::validation("pin", "must be exactly 6 digits"));
        }
        if request.device_name.trim().is_empty() {
            return Err(Error::validation("device_name", "must not be empty"));
        }

        let device_type = request
            .device_type
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DeviceType::Other);

        let now = Utc::now();
        let pin = request.pin;
        let device_name = request.device_name;

        let result = self
            .store
            .update_session(&request.session_id, move |session| {
                if session.status != SessionStatus::Pending
                    || session.is_pin_window_elapsed(now)
                    || session.pin != pin
                {
                    return Err(Error::Authentication);
                }
                session.status = SessionStatus::Verified;
                session.verified_at = Some(now);
                session.device_name = Some(device_name);
                session.device_type = Some(device_type);
                Ok(session.clone())
            })
            .await;

        let session = match result {
            Ok(session) => session,
            Err(Error::NotFound(_)) | Err(Error::Authentication) => {
                warn!(
                    "PIN verification failed for session {}",
                    request.session_id
                );
                return Err(Error::Authentication);
            }
            Err(e) => return Err(e),
        };

        info!("Pairing session {} verified", session.id);
        self.registry.notify_admins(EventKind::PairingVerified {
            session_id: session.id.clone(),
            device_name: session.device_name.clone().unwrap_or_default(),
            device_type: session
                .device_type
                .map(|t| t.to_string())
                .unwrap_or_default(),
        });

        Ok(SessionStatusResponse::from_session(&session))
    }

    /// Complete a verified session: create the client and issue its
    /// credential
    ///
    /// The plaintext credential is returned to the admin exactly once. If
    /// the new client already has a live connection, a `pairing_completed`
    /// event is pushed to it as well.
    pub async fn complete_pairing(
        &self,
        session_id: &str,
        request: CompletePairingRequest,
    ) -> Result<CompletePairingResponse> {
        if request.client_name.trim().is_empty() {
            return Err(Error::validation("client_name", "must not be empty"));
        }
        if request.assigned_areas.iter().any(|a| a.trim().is_empty()) {
            return Err(Error::validation("assigned_areas", "area ids must not be empty"));
        }

        let areas = request.assigned_areas;
        let snapshot = areas.clone();
        let session = self
            .store
            .update_session(session_id, move |session| {
                if session.status != SessionStatus::Verified {
                    return Err(Error::conflict(format!(
                        "session is {}, expected verified",
                        session.status
                    )));
                }
                session.status = SessionStatus::Completed;
                session.assigned_areas_snapshot = Some(snapshot);
                Ok(session.clone())
            })
            .await?;

        let client = Client::new(
            request.client_name,
            session.device_type.unwrap_or_default(),
            areas.clone(),
        );
        let client_info = ClientInfo::from(&client);
        let client_id = client.id.clone();
        self.store.save_client(client).await?;

        let (credential, record) = self.tokens.issue(&client_id, areas).await?;

        info!(
            "Pairing session {} completed, client {} created",
            session.id, client_id
        );

        self.registry
            .notify(
                &client_id,
                EventKind::PairingCompleted {
                    client_id: client_id.to_string(),
                    name: client_info.name.clone(),
                    assigned_areas: client_info.assigned_areas.clone(),
                    credential: credential.clone(),
                },
            )
            .await;

        Ok(CompletePairingResponse {
            client: client_info,
            token_id: record.id.to_string(),
            credential,
        })
    }

    /// Cancel a session that has not reached a terminal state
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .ok_or_else(|| Error::not_found(format!("pairing session {}", session_id)))?;

        if session.status.is_terminal() {
            return Err(Error::conflict(format!(
                "session is already {}",
                session.status
            )));
        }

        self.store.remove_session(session_id).await?;
        info!("Cancelled pairing session {}", session_id);
        Ok(())
    }

    /// Session state for status polling; never includes the PIN
    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatusResponse> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .ok_or_else(|| Error::not_found(format!("pairing session {}", session_id)))?;
        Ok(SessionStatusResponse::from_session(&session))
    }

    /// Expire stale sessions and purge old terminal ones
    ///
    /// Returns (expired, purged) counts.
    pub async fn sweep_sessions(&self) -> Result<(usize, usize)> {
        let now = Utc::now();
        let expired = self
            .store
            .expire_stale_sessions(now, self.completion_deadline)
            .await?;
        let purged = self.store.purge_terminal_sessions(now - self.retention).await?;

        if expired > 0 || purged > 0 {
            info!(
                "Session sweep: {} expired, {} purged",
                expired, purged
            );
        }
        Ok((expired, purged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SigningKeys;
    use crate::token::hash_credential;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    struct TestContext {
        manager: PairingManager,
        store: Arc<ClientStore>,
        _dir: tempfile::TempDir,
    }

    async fn create_test_context() -> TestContext {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_store.json");
        let store = Arc::new(ClientStore::with_path(path).await.unwrap());
        let config = Config::default();
        let tokens = Arc::new(TokenService::new(
            store.clone(),
            SigningKeys::from_secret(b"test-secret-key-material".to_vec()),
            config.client_token_ttl(),
            config.admin_token_ttl(),
        ));
        let registry = Arc::new(NotificationRegistry::new(
            store.clone(),
            StdDuration::from_millis(10),
        ));
        let manager = PairingManager::new(store.clone(), tokens, registry, &config);
        TestContext {
            manager,
            store,
            _dir: dir,
        }
    }

    fn verify_request(session_id: &str, pin: &str) -> PairingVerifyRequest {
        PairingVerifyRequest {
            session_id: session_id.to_string(),
            pin: pin.to_string(),
            device_name: "Kitchen Tablet".to_string(),
            device_type: Some("tablet".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_session_shape() {
        let ctx = create_test_context().await;

        let start = ctx.manager.create_session().await.unwrap();
        assert_eq!(start.pin.len(), 6);
        let pin: u32 = start.pin.parse().unwrap();
        assert!((100_000..=999_999).contains(&pin));

        let session = ctx.store.get_session(&start.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(
            session.expires_at,
            session.created_at + Duration::seconds(300)
        );
    }

    #[tokio::test]
    async fn test_pins_are_not_constant() {
        let ctx = create_test_context().await;

        let mut pins = std::collections::HashSet::new();
        for _ in 0..50 {
            let start = ctx.manager.create_session().await.unwrap();
            let pin: u32 = start.pin.parse().unwrap();
            assert!((100_000..=999_999).contains(&pin));
            pins.insert(start.pin);
        }
        assert!(pins.len() > 1);
    }

    #[tokio::test]
    async fn test_verify_transitions_once() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        let status = ctx
            .manager
            .verify_pin(verify_request(&start.session_id, &start.pin))
            .await
            .unwrap();
        assert_eq!(status.status, SessionStatus::Verified);
        assert!(status.verified_at.is_some());
        assert_eq!(status.device_name.as_deref(), Some("Kitchen Tablet"));

        // Verifying again with the same PIN fails: no longer pending
        let again = ctx
            .manager
            .verify_pin(verify_request(&start.session_id, &start.pin))
            .await;
        assert!(matches!(again, Err(Error::Authentication)));
    }

    #[tokio::test]
    async fn test_wrong_pin_is_rejected_and_session_stays_pending() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        let wrong = if start.pin == "100000" { "100001" } else { "100000" };
        let result = ctx
            .manager
            .verify_pin(verify_request(&start.session_id, wrong))
            .await;
        assert!(matches!(result, Err(Error::Authentication)));

        let session = ctx.store.get_session(&start.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_session_fails_like_wrong_pin() {
        let ctx = create_test_context().await;

        let result = ctx
            .manager
            .verify_pin(verify_request("nonexistent", "123456"))
            .await;
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[tokio::test]
    async fn test_malformed_pin_is_a_validation_error() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        for bad in ["12345", "1234567", "12a456", ""] {
            let result = ctx
                .manager
                .verify_pin(verify_request(&start.session_id, bad))
                .await;
            assert!(matches!(result, Err(Error::Validation { .. })), "pin: {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_correct_pin_after_expiry_fails() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        // Backdate the PIN window
        ctx.store
            .update_session(&start.session_id, |s| {
                s.expires_at = s.created_at - Duration::seconds(1);
                Ok(())
            })
            .await
            .unwrap();

        let result = ctx
            .manager
            .verify_pin(verify_request(&start.session_id, &start.pin))
            .await;
        assert!(matches!(result, Err(Error::Authentication)));

        // The sweep marks it expired
        ctx.manager.sweep_sessions().await.unwrap();
        let session = ctx.store.get_session(&start.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_complete_requires_verified_state() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        let request = CompletePairingRequest {
            client_name: "Kitchen Tablet".to_string(),
            assigned_areas: vec!["area_1".to_string()],
        };
        let result = ctx
            .manager
            .complete_pairing(&start.session_id, request)
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_complete_creates_client_and_matching_token() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        ctx.manager
            .verify_pin(verify_request(&start.session_id, &start.pin))
            .await
            .unwrap();

        let response = ctx
            .manager
            .complete_pairing(
                &start.session_id,
                CompletePairingRequest {
                    client_name: "Kitchen Tablet".to_string(),
                    assigned_areas: vec!["area_1".to_string()],
                },
            )
            .await
            .unwrap();

        assert_eq!(response.client.assigned_areas, vec!["area_1".to_string()]);

        // Returned plaintext hashes to the stored token hash
        let client_id = hearthlink_store::ClientId::parse(&response.client.id).unwrap();
        let tokens = ctx.store.list_tokens(Some(&client_id)).await;
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token_hash, hash_credential(&response.credential));
        assert_eq!(tokens[0].assigned_areas, vec!["area_1".to_string()]);

        let session = ctx.store.get_session(&start.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(
            session.assigned_areas_snapshot,
            Some(vec!["area_1".to_string()])
        );

        // Completing again fails: the session is terminal
        let again = ctx
            .manager
            .complete_pairing(
                &start.session_id,
                CompletePairingRequest {
                    client_name: "Another".to_string(),
                    assigned_areas: vec![],
                },
            )
            .await;
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cancel_session() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        ctx.manager.cancel_session(&start.session_id).await.unwrap();
        assert!(ctx.store.get_session(&start.session_id).await.is_none());

        let missing = ctx.manager.cancel_session(&start.session_id).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_terminal_session_conflicts() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        ctx.store
            .update_session(&start.session_id, |s| {
                s.status = SessionStatus::Expired;
                Ok(())
            })
            .await
            .unwrap();

        let result = ctx.manager.cancel_session(&start.session_id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_status_never_echoes_pin() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        let status = ctx.manager.session_status(&start.session_id).await.unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("pin").is_none());
        assert_eq!(status.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_verified_sessions() {
        let ctx = create_test_context().await;
        let start = ctx.manager.create_session().await.unwrap();

        ctx.manager
            .verify_pin(verify_request(&start.session_id, &start.pin))
            .await
            .unwrap();

        // Backdate the verification past the completion deadline
        ctx.store
            .update_session(&start.session_id, |s| {
                s.verified_at = Some(Utc::now() - Duration::seconds(601));
                Ok(())
            })
            .await
            .unwrap();

        let (expired, _) = ctx.manager.sweep_sessions().await.unwrap();
        assert_eq!(expired, 1);

        let session = ctx.store.get_session(&start.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Expired);
    }
}
