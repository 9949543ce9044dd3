//! Client token records
//!
//! The plaintext credential is never persisted; tokens are stored and looked
//! up by a one-way hash. Revocation is permanent.

use crate::client::ClientId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a token record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub Uuid);

impl TokenId {
    /// Generate a new random token ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted client credential record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientToken {
    /// Unique token record identifier
    pub id: TokenId,
    /// The client this credential belongs to
    pub client_id: ClientId,
    /// One-way hash of the issued credential; unique across all tokens
    pub token_hash: String,
    /// Area scope at issuance; governs live authorization
    pub assigned_areas: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Last successful verification against the store
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl ClientToken {
    /// Create a new token record with the given scope and validity
    pub fn new(
        client_id: ClientId,
        token_hash: String,
        assigned_areas: Vec<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TokenId::new(),
            client_id,
            token_hash,
            assigned_areas,
            created_at: now,
            expires_at: now + ttl,
            last_used_at: None,
            is_revoked: false,
            revoked_at: None,
            revoked_reason: None,
        }
    }

    /// Whether the token's natural validity has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A token is usable if it is neither revoked nor expired
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired(now)
    }
}

/// Summary information about a token for API responses
///
/// The stored hash is not exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: String,
    pub client_id: String,
    pub assigned_areas: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl From<&ClientToken> for TokenInfo {
    fn from(token: &ClientToken) -> Self {
        Self {
            id: token.id.to_string(),
            client_id: token.client_id.to_string(),
            assigned_areas: token.assigned_areas.clone(),
            created_at: token.created_at,
            expires_at: token.expires_at,
            last_used_at: token.last_used_at,
            is_revoked: token.is_revoked,
            revoked_at: token.revoked_at,
            revoked_reason: token.revoked_reason.clone(),
        }
    }
}

/// Aggregate token counts for the stats endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenStats {
    pub total: usize,
    /// Neither revoked nor expired
    pub active: usize,
    pub revoked: usize,
    pub expired: usize,
    /// Used within the last 24 hours
    pub recently_used: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_usable() {
        let token = ClientToken::new(
            ClientId::new(),
            "hash".to_string(),
            vec!["area_1".to_string()],
            Duration::days(3650),
        );
        let now = Utc::now();
        assert!(token.is_usable(now));
        assert!(!token.is_expired(now));
        assert!(!token.is_revoked);
    }

    #[test]
    fn test_expired_token_is_unusable() {
        let token = ClientToken::new(
            ClientId::new(),
            "hash".to_string(),
            vec![],
            Duration::days(3650),
        );
        let later = token.expires_at + Duration::seconds(1);
        assert!(token.is_expired(later));
        assert!(!token.is_usable(later));
    }
}
