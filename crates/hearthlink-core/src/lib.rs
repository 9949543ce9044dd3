//! HearthLink Core - Shared types and protocol definitions
//!
//! This crate provides the foundational types used across all HearthLink
//! components: the service configuration, the unified error type, and the
//! realtime event protocol.

pub mod config;
pub mod error;
pub mod protocol;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{Event, EventKind};
