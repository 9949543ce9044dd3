//! HearthLink Auth - Device pairing and credential management
//!
//! Provides PIN-based device pairing, long-lived revocable area-scoped
//! client credentials, and the unified authentication gate shared by the
//! HTTP and realtime layers.
//!
//! # Pairing Flow
//!
//! 1. An admin calls `PairingManager::create_session()` and hands the
//!    returned 6-digit PIN to the device being paired
//! 2. The device submits the PIN and its device info via
//!    `POST /api/pairing/verify`
//! 3. The admin completes the pairing with a client name and area
//!    assignment; the device receives its one-time plaintext credential
//! 4. The device authenticates every request and WebSocket connection with
//!    that credential until it expires or an admin revokes it

pub mod gate;
pub mod keys;
pub mod pairing;
pub mod token;

pub use gate::{AuthGate, Principal};
pub use keys::SigningKeys;
pub use pairing::{
    CompletePairingRequest, CompletePairingResponse, PairingManager, PairingStartResponse,
    PairingVerifyRequest, SessionStatusResponse,
};
pub use token::{
    hash_credential, AdminClaims, ClientClaims, TokenService, AUD_ADMIN, AUD_CLIENT, ISSUER,
    ROLE_ADMIN, ROLE_CLIENT,
};
