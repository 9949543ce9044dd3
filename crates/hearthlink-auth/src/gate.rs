//! Unified authentication gate
//!
//! Single entry point used by both the HTTP layer and the realtime
//! connection layer. A bearer credential's role claim is peeked at without
//! signature verification purely to pick a verification path; trust is only
//! established by the full verification that follows.

use crate::token::{TokenService, ROLE_ADMIN, ROLE_CLIENT};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hearthlink_core::{Error, Result};
use hearthlink_store::ClientId;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The authenticated identity resolved from a verified credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Admin {
        username: String,
    },
    Client {
        client_id: ClientId,
        assigned_areas: Vec<String>,
    },
}

impl Principal {
    /// The admin username, if this is an admin principal
    pub fn admin_username(&self) -> Option<&str> {
        match self {
            Principal::Admin { username } => Some(username),
            Principal::Client { .. } => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin { .. })
    }
}

/// Read the role claim from an unverified credential payload
///
/// Routing only: this establishes no trust. The selected path performs full
/// cryptographic verification.
fn peek_role(credential: &str) -> Option<String> {
    let mut parts = credential.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return None,
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("role")?.as_str().map(|s| s.to_string())
}

/// Per-request/per-connection authentication dispatcher
pub struct AuthGate {
    tokens: Arc<TokenService>,
    admin_username: String,
    admin_password_digest: [u8; 32],
}

impl AuthGate {
    /// Create a gate with the configured admin credentials
    pub fn new(tokens: Arc<TokenService>, admin_username: String, admin_password: &str) -> Self {
        Self {
            tokens,
            admin_username,
            admin_password_digest: Sha256::digest(admin_password.as_bytes()).into(),
        }
    }

    /// Check admin credentials and issue a short-lived admin credential
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let password_digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        if username != self.admin_username || password_digest != self.admin_password_digest {
            warn!("Rejected admin login for {:?}", username);
            return Err(Error::Authentication);
        }

        info!("Admin {} logged in", username);
        self.tokens.issue_admin(username)
    }

    /// Resolve a bearer credential to a principal
    ///
    /// Every failure collapses to a single authentication error; the
    /// specific cause stays in the logs.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Principal> {
        let credential = credential.ok_or_else(|| {
            debug!("No credential presented");
            Error::Authentication
        })?;

        match peek_role(credential).as_deref() {
            Some(ROLE_ADMIN) => {
                let claims = self.tokens.verify_admin(credential)?;
                Ok(Principal::Admin {
                    username: claims.sub,
                })
            }
            Some(ROLE_CLIENT) => {
                let (client_id, assigned_areas) = self.tokens.authenticate(credential).await?;
                Ok(Principal::Client {
                    client_id,
                    assigned_areas,
                })
            }
            other => {
                debug!("Credential carries unknown role: {:?}", other);
                Err(Error::Authentication)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SigningKeys;
    use chrono::Duration;
    use hearthlink_store::{Client, ClientStore, DeviceType};
    use tempfile::tempdir;

    async fn create_test_gate() -> (AuthGate, Arc<TokenService>, Arc<ClientStore>, tempfile::TempDir)
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_store.json");
        let store = Arc::new(ClientStore::with_path(path).await.unwrap());
        let tokens = Arc::new(TokenService::new(
            store.clone(),
            SigningKeys::from_secret(b"test-secret-key-material".to_vec()),
            Duration::days(3650),
            Duration::hours(12),
        ));
        let gate = AuthGate::new(tokens.clone(), "admin".to_string(), "hunter2");
        (gate, tokens, store, dir)
    }

    async fn paired_client(store: &ClientStore, areas: &[&str]) -> ClientId {
        let client = Client::new(
            "Test Tablet".to_string(),
            DeviceType::Tablet,
            areas.iter().map(|a| a.to_string()).collect(),
        );
        let id = client.id.clone();
        store.save_client(client).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_missing_credential_fails() {
        let (gate, _, _, _dir) = create_test_gate().await;
        assert!(matches!(
            gate.authenticate(None).await,
            Err(Error::Authentication)
        ));
    }

    #[tokio::test]
    async fn test_garbage_credential_fails() {
        let (gate, _, _, _dir) = create_test_gate().await;
        assert!(matches!(
            gate.authenticate(Some("not-a-credential")).await,
            Err(Error::Authentication)
        ));
    }

    #[tokio::test]
    async fn test_login_and_admin_principal() {
        let (gate, _, _, _dir) = create_test_gate().await;

        assert!(matches!(
            gate.login("admin", "wrong"),
            Err(Error::Authentication)
        ));
        assert!(matches!(
            gate.login("root", "hunter2"),
            Err(Error::Authentication)
        ));

        let credential = gate.login("admin", "hunter2").unwrap();
        let principal = gate.authenticate(Some(&credential)).await.unwrap();
        assert_eq!(
            principal,
            Principal::Admin {
                username: "admin".to_string()
            }
        );
        assert!(principal.is_admin());
    }

    #[tokio::test]
    async fn test_client_principal_carries_token_scope() {
        let (gate, tokens, store, _dir) = create_test_gate().await;
        let client_id = paired_client(&store, &["area_1", "area_2"]).await;

        let (credential, _) = tokens
            .issue(&client_id, vec!["area_1".to_string(), "area_2".to_string()])
            .await
            .unwrap();

        let principal = gate.authenticate(Some(&credential)).await.unwrap();
        match principal {
            Principal::Client {
                client_id: id,
                assigned_areas,
            } => {
                assert_eq!(id, client_id);
                assert_eq!(
                    assigned_areas,
                    vec!["area_1".to_string(), "area_2".to_string()]
                );
            }
            other => panic!("expected client principal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_revoked_credential_fails_at_the_gate() {
        let (gate, tokens, store, _dir) = create_test_gate().await;
        let client_id = paired_client(&store, &[]).await;

        let (credential, record) = tokens.issue(&client_id, vec![]).await.unwrap();
        assert!(gate.authenticate(Some(&credential)).await.is_ok());

        tokens
            .revoke(&record.token_hash, "revoked by admin")
            .await
            .unwrap();

        assert!(matches!(
            gate.authenticate(Some(&credential)).await,
            Err(Error::Authentication)
        ));
    }

    #[tokio::test]
    async fn test_unknown_role_fails() {
        let (gate, _, _, _dir) = create_test_gate().await;

        // Well-formed JWT with an unrecognized role claim; the peek rejects
        // it before any verification path is selected
        #[derive(serde::Serialize)]
        struct OddClaims {
            sub: String,
            role: String,
            exp: i64,
        }
        let forged = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &OddClaims {
                sub: "x".to_string(),
                role: "gremlin".to_string(),
                exp: (chrono::Utc::now() + Duration::hours(1)).timestamp(),
            },
            &jsonwebtoken::EncodingKey::from_secret(b"whatever"),
        )
        .unwrap();

        assert!(matches!(
            gate.authenticate(Some(&forged)).await,
            Err(Error::Authentication)
        ));
    }
}
