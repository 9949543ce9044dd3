//! Pairing session records
//!
//! A pairing session tracks a PIN from creation to device-credential
//! issuance. Sessions are single-use: once `completed` or `expired` they can
//! never re-enter an earlier state.

use crate::client::DeviceType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a pairing session
///
/// Transitions are monotonic:
/// `pending -> verified -> completed`, with `expired` reachable from
/// `pending` (PIN window elapsed) and `verified` (completion deadline
/// elapsed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Verified,
    Completed,
    Expired,
}

impl SessionStatus {
    /// Terminal states are retained for audit and never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Verified => "verified",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// A pairing session awaiting PIN verification and completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingSession {
    /// Opaque session identifier
    pub id: String,
    /// The 6-digit PIN
    pub pin: String,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// Device name reported at PIN verification
    pub device_name: Option<String>,
    /// Device type reported at PIN verification
    pub device_type: Option<DeviceType>,
    /// Area assignment captured when the session completed
    pub assigned_areas_snapshot: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    /// End of the PIN validity window
    pub expires_at: DateTime<Utc>,
    /// When the PIN was successfully verified
    pub verified_at: Option<DateTime<Utc>>,
}

impl PairingSession {
    /// Create a new pending session around a freshly generated PIN
    pub fn new(pin: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            pin,
            status: SessionStatus::Pending,
            device_name: None,
            device_type: None,
            assigned_areas_snapshot: None,
            created_at: now,
            expires_at: now + ttl,
            verified_at: None,
        }
    }

    /// Whether the PIN window has elapsed
    pub fn is_pin_window_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a verified session has outlived its completion deadline
    pub fn is_completion_overdue(&self, now: DateTime<Utc>, deadline: Duration) -> bool {
        match self.verified_at {
            Some(verified_at) => now >= verified_at + deadline,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_pending() {
        let session = PairingSession::new("482913".to_string(), Duration::seconds(300));
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.expires_at, session.created_at + Duration::seconds(300));
        assert!(session.verified_at.is_none());
    }

    #[test]
    fn test_pin_window() {
        let session = PairingSession::new("482913".to_string(), Duration::seconds(300));
        let now = session.created_at;
        assert!(!session.is_pin_window_elapsed(now));
        assert!(session.is_pin_window_elapsed(now + Duration::seconds(300)));
    }

    #[test]
    fn test_completion_deadline() {
        let mut session = PairingSession::new("482913".to_string(), Duration::seconds(300));
        let now = session.created_at;

        // Never verified: no deadline applies
        assert!(!session.is_completion_overdue(now + Duration::hours(1), Duration::seconds(600)));

        session.verified_at = Some(now);
        session.status = SessionStatus::Verified;
        assert!(!session.is_completion_overdue(now + Duration::seconds(599), Duration::seconds(600)));
        assert!(session.is_completion_overdue(now + Duration::seconds(600), Duration::seconds(600)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Verified.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
    }
}
