//! Credential issuance, verification and revocation
//!
//! Two credential shapes share one signing secret, separated by audience:
//! long-lived client credentials carrying an area scope, and short-lived
//! stateless admin credentials. Client credentials are additionally anchored
//! in the store by a one-way hash, which is what makes them revocable.

use crate::keys::SigningKeys;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Duration, Utc};
use hearthlink_core::{Error, Result};
use hearthlink_store::{ClientId, ClientStore, ClientToken, TokenStats};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Issuer claim on every credential
pub const ISSUER: &str = "hearthlink";
/// Audience claim on client credentials
pub const AUD_CLIENT: &str = "hearthlink-client";
/// Audience claim on admin credentials
pub const AUD_ADMIN: &str = "hearthlink-admin";
/// Role tag on client credentials
pub const ROLE_CLIENT: &str = "client";
/// Role tag on admin credentials
pub const ROLE_ADMIN: &str = "admin";

/// Claims embedded in a client credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientClaims {
    /// Client ID
    pub sub: String,
    pub role: String,
    /// Area scope at issuance
    pub areas: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims embedded in an admin credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Admin username
    pub sub: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Hash a plaintext credential for storage and lookup
///
/// Deterministic one-way digest; the plaintext is never recoverable.
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    let result = hasher.finalize();
    BASE64.encode(result)
}

/// Issues, verifies and revokes credentials
pub struct TokenService {
    store: Arc<ClientStore>,
    keys: SigningKeys,
    client_ttl: Duration,
    admin_ttl: Duration,
}

impl TokenService {
    /// Create a new token service
    pub fn new(
        store: Arc<ClientStore>,
        keys: SigningKeys,
        client_ttl: Duration,
        admin_ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            client_ttl,
            admin_ttl,
        }
    }

    /// Mint a client credential scoped to the given areas and persist its
    /// record
    ///
    /// Returns the plaintext credential together with the stored record. The
    /// plaintext exists only in this return value; only its hash is kept.
    pub async fn issue(
        &self,
        client_id: &ClientId,
        assigned_areas: Vec<String>,
    ) -> Result<(String, ClientToken)> {
        let now = Utc::now();
        let claims = ClientClaims {
            sub: client_id.to_string(),
            role: ROLE_CLIENT.to_string(),
            areas: assigned_areas.clone(),
            iss: ISSUER.to_string(),
            aud: AUD_CLIENT.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.client_ttl).timestamp(),
        };

        let credential = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys.encoding_key(),
        )
        .map_err(|e| Error::internal(format!("failed to sign credential: {}", e)))?;

        let record = ClientToken::new(
            client_id.clone(),
            hash_credential(&credential),
            assigned_areas,
            self.client_ttl,
        );
        self.store.insert_token(record.clone()).await?;

        info!("Issued credential for client {}", client_id);
        Ok((credential, record))
    }

    /// Verify a client credential's signature and claims
    ///
    /// The precise failure cause is logged; callers only see an
    /// undifferentiated authentication failure.
    pub fn verify(&self, credential: &str) -> Result<ClientClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUD_CLIENT]);

        let data = decode::<ClientClaims>(credential, &self.keys.decoding_key(), &validation)
            .map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => debug!("Client credential expired"),
                    _ => debug!("Client credential rejected: {}", e),
                }
                Error::Authentication
            })?;

        if data.claims.role != ROLE_CLIENT {
            debug!("Credential carries wrong role: {}", data.claims.role);
            return Err(Error::Authentication);
        }

        Ok(data.claims)
    }

    /// Full client-credential check: signature, store lookup, revocation and
    /// liveness
    ///
    /// On success the matching token row's `last_used_at` and the client's
    /// `last_seen_at` are updated, and the token row's area scope is
    /// returned.
    pub async fn authenticate(&self, credential: &str) -> Result<(ClientId, Vec<String>)> {
        let claims = self.verify(credential)?;
        let now = Utc::now();

        let token_hash = hash_credential(credential);
        let token = self
            .store
            .get_token_by_hash(&token_hash)
            .await
            .ok_or_else(|| {
                debug!("Credential has no matching token record");
                Error::Authentication
            })?;

        if !token.is_usable(now) {
            debug!(
                "Token {} unusable (revoked: {}, expired: {})",
                token.id,
                token.is_revoked,
                token.is_expired(now)
            );
            return Err(Error::Authentication);
        }

        let client_id = ClientId::parse(&claims.sub).map_err(|_| {
            warn!("Credential subject is not a valid client id");
            Error::Authentication
        })?;

        let client = self.store.get_client(&client_id).await.ok_or_else(|| {
            debug!("Credential references unknown client {}", client_id);
            Error::Authentication
        })?;

        if !client.is_active {
            debug!("Client {} is suspended", client_id);
            return Err(Error::Authentication);
        }

        self.store.mark_token_used(&token_hash).await?;
        self.store.touch_client(&client_id).await?;

        Ok((client_id, token.assigned_areas))
    }

    /// Revoke a credential by hash; idempotent
    pub async fn revoke(&self, token_hash: &str, reason: &str) -> Result<bool> {
        let revoked = self.store.revoke_token(token_hash, reason).await?;
        if revoked {
            info!("Revoked token ({})", reason);
        }
        Ok(revoked)
    }

    /// Delete token records whose natural validity has elapsed
    pub async fn sweep_expired(&self) -> Result<usize> {
        let count = self.store.delete_expired_tokens(Utc::now()).await?;
        if count > 0 {
            info!("Deleted {} expired token(s)", count);
        }
        Ok(count)
    }

    /// Aggregate token counts
    pub async fn stats(&self) -> TokenStats {
        self.store.token_stats(Utc::now()).await
    }

    /// Mint a short-lived stateless admin credential
    pub fn issue_admin(&self, username: &str) -> Result<String> {
        let now = Utc::now();
        let claims = AdminClaims {
            sub: username.to_string(),
            role: ROLE_ADMIN.to_string(),
            iss: ISSUER.to_string(),
            aud: AUD_ADMIN.to_string(),
            iat: now.timestamp(),
            exp: (now + self.admin_ttl).timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys.encoding_key(),
        )
        .map_err(|e| Error::internal(format!("failed to sign admin credential: {}", e)))
    }

    /// Verify an admin credential
    ///
    /// Stateless: no store lookup is involved.
    pub fn verify_admin(&self, credential: &str) -> Result<AdminClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUD_ADMIN]);

        let data = decode::<AdminClaims>(credential, &self.keys.decoding_key(), &validation)
            .map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => debug!("Admin credential expired"),
                    _ => debug!("Admin credential rejected: {}", e),
                }
                Error::Authentication
            })?;

        if data.claims.role != ROLE_ADMIN {
            debug!("Admin credential carries wrong role: {}", data.claims.role);
            return Err(Error::Authentication);
        }

        Ok(data.claims)
    }
}
