//! Client identity and management
//!
//! Represents paired client devices with their identity, area assignment and
//! liveness metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a paired client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Generate a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A paired client device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier
    pub id: ClientId,
    /// Human-readable name (e.g., "Kitchen Tablet", "Hallway Panel")
    pub name: String,
    /// Device type/platform hint
    pub device_type: DeviceType,
    /// Areas this client is permitted to interact with
    pub assigned_areas: Vec<String>,
    /// Soft-suspend flag; suspended clients fail authentication
    pub is_active: bool,
    /// When this client was paired
    pub created_at: DateTime<Utc>,
    /// Last successful credential verification
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Client {
    /// Create a new active client with the given details
    pub fn new(name: String, device_type: DeviceType, assigned_areas: Vec<String>) -> Self {
        Self {
            id: ClientId::new(),
            name,
            device_type,
            assigned_areas,
            is_active: true,
            created_at: Utc::now(),
            last_seen_at: None,
        }
    }

    /// Update the last seen timestamp
    pub fn touch(&mut self) {
        self.last_seen_at = Some(Utc::now());
    }

    /// Whether the client is assigned to the given area
    pub fn has_area(&self, area_id: &str) -> bool {
        self.assigned_areas.iter().any(|a| a == area_id)
    }
}

/// Type of device connecting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Phone-class device
    Mobile,
    /// Tablet or wall-mounted panel
    Tablet,
    /// Desktop browser
    Desktop,
    /// Anything else
    #[default]
    Other,
}

impl std::str::FromStr for DeviceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mobile" | "phone" => Ok(Self::Mobile),
            "tablet" | "panel" => Ok(Self::Tablet),
            "desktop" => Ok(Self::Desktop),
            _ => Ok(Self::Other),
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Summary information about a client for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub assigned_areas: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl From<&Client> for ClientInfo {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id.to_string(),
            name: client.name.clone(),
            device_type: client.device_type,
            assigned_areas: client.assigned_areas.clone(),
            is_active: client.is_active,
            created_at: client.created_at,
            last_seen_at: client.last_seen_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_generation() {
        let id1 = ClientId::new();
        let id2 = ClientId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(
            "Kitchen Tablet".to_string(),
            DeviceType::Tablet,
            vec!["area_1".to_string()],
        );
        assert_eq!(client.name, "Kitchen Tablet");
        assert!(client.is_active);
        assert!(client.has_area("area_1"));
        assert!(!client.has_area("area_2"));
        assert!(client.last_seen_at.is_none());
    }

    #[test]
    fn test_device_type_parsing() {
        assert_eq!("mobile".parse::<DeviceType>().unwrap(), DeviceType::Mobile);
        assert_eq!("tablet".parse::<DeviceType>().unwrap(), DeviceType::Tablet);
        assert_eq!(
            "desktop".parse::<DeviceType>().unwrap(),
            DeviceType::Desktop
        );
        assert_eq!("kiosk".parse::<DeviceType>().unwrap(), DeviceType::Other);
    }
}
