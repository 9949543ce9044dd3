//! Realtime event protocol
//!
//! Events pushed to connected clients and admin consoles over WebSocket.
//! Every event carries an ISO-8601 timestamp next to its payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event payloads, tagged by event type on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Sent once after a connection authenticates
    Connected {
        /// Client id or admin username
        subject: String,
        role: String,
    },
    /// A pairing device entered the correct PIN (sent to admins)
    PairingVerified {
        session_id: String,
        device_name: String,
        device_type: String,
    },
    /// Pairing finished; carries the one-time plaintext credential
    PairingCompleted {
        client_id: String,
        name: String,
        assigned_areas: Vec<String>,
        credential: String,
    },
    /// An area was added to the client's assignment
    AreaAdded { area_id: String },
    /// An area was removed from the client's assignment
    AreaRemoved { area_id: String },
    /// The client's area assignment was replaced
    AreaUpdated { areas: Vec<String> },
    /// An area the client is assigned to was enabled
    AreaEnabled { area_id: String },
    /// An area the client is assigned to was disabled
    AreaDisabled { area_id: String },
    /// The client's credential was revoked; the connection closes shortly after
    TokenRevoked { reason: String },
}

impl EventKind {
    /// Wire name of the event type
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected { .. } => "connected",
            EventKind::PairingVerified { .. } => "pairing_verified",
            EventKind::PairingCompleted { .. } => "pairing_completed",
            EventKind::AreaAdded { .. } => "area_added",
            EventKind::AreaRemoved { .. } => "area_removed",
            EventKind::AreaUpdated { .. } => "area_updated",
            EventKind::AreaEnabled { .. } => "area_enabled",
            EventKind::AreaDisabled { .. } => "area_disabled",
            EventKind::TokenRevoked { .. } => "token_revoked",
        }
    }
}

/// A timestamped event as delivered on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    /// When the event was emitted (ISO-8601)
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Stamp an event payload with the current time
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(EventKind::AreaAdded {
            area_id: "area_1".to_string(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "area_added");
        assert_eq!(json["area_id"], "area_1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_event_roundtrip() {
        let event = Event::new(EventKind::TokenRevoked {
            reason: "revoked by admin".to_string(),
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        match parsed.kind {
            EventKind::TokenRevoked { reason } => assert_eq!(reason, "revoked by admin"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_names() {
        let kind = EventKind::PairingCompleted {
            client_id: "c1".to_string(),
            name: "Kitchen Tablet".to_string(),
            assigned_areas: vec!["area_1".to_string()],
            credential: "secret".to_string(),
        };
        assert_eq!(kind.name(), "pairing_completed");
    }
}
