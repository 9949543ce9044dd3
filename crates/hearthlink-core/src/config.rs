//! Configuration types for HearthLink

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Main configuration for the HearthLink service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Admin username accepted by the login endpoint
    pub admin_username: String,
    /// Pairing session validity in seconds (pending -> expired)
    pub session_ttl_secs: u64,
    /// Deadline for completing a verified session, in seconds
    pub completion_deadline_secs: u64,
    /// How long terminal sessions are retained before being purged, in seconds
    pub session_retention_secs: u64,
    /// Background sweep interval in seconds
    pub sweep_interval_secs: u64,
    /// Client credential validity in days
    pub client_token_ttl_days: i64,
    /// Admin credential validity in hours
    pub admin_token_ttl_hours: i64,
    /// Delay between a terminal event and the forced disconnect, in milliseconds
    pub disconnect_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8445,
            admin_username: "admin".to_string(),
            session_ttl_secs: 300,
            completion_deadline_secs: 600,
            session_retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
            client_token_ttl_days: 10 * 365,
            admin_token_ttl_hours: 12,
            disconnect_grace_ms: 500,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set admin username
    pub fn with_admin_username(mut self, username: impl Into<String>) -> Self {
        self.admin_username = username.into();
        self
    }

    /// Builder pattern: set session TTL in seconds
    pub fn with_session_ttl_secs(mut self, secs: u64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    /// Builder pattern: set sweep interval in seconds
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Session validity as a chrono duration
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl_secs as i64)
    }

    /// Completion deadline for verified sessions as a chrono duration
    pub fn completion_deadline(&self) -> Duration {
        Duration::seconds(self.completion_deadline_secs as i64)
    }

    /// Terminal session retention as a chrono duration
    pub fn session_retention(&self) -> Duration {
        Duration::seconds(self.session_retention_secs as i64)
    }

    /// Client credential validity as a chrono duration
    pub fn client_token_ttl(&self) -> Duration {
        Duration::days(self.client_token_ttl_days)
    }

    /// Admin credential validity as a chrono duration
    pub fn admin_token_ttl(&self) -> Duration {
        Duration::hours(self.admin_token_ttl_hours)
    }
}
