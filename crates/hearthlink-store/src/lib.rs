//! HearthLink Store - Persistence for clients, tokens and pairing sessions
//!
//! A JSON-file backed store owning the three persisted record kinds: paired
//! clients, their issued credentials (stored as one-way hashes), and pairing
//! sessions. All conditional state transitions happen under the store's write
//! lock, so a background sweep and a live request resolve to exactly one
//! winner.

pub mod client;
pub mod session;
pub mod store;
pub mod token;

pub use client::{Client, ClientId, ClientInfo, DeviceType};
pub use session::{PairingSession, SessionStatus};
pub use store::ClientStore;
pub use token::{ClientToken, TokenId, TokenInfo, TokenStats};
