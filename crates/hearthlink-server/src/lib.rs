//! HearthLink Server - Axum-based HTTP and WebSocket server
//!
//! This crate provides the admin/pairing HTTP API and the realtime
//! WebSocket endpoint, both authenticated through the unified auth gate.

pub mod error;
pub mod http;
pub mod state;
pub mod tls;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use http::create_router;
pub use state::AppState;
pub use tls::{calculate_cert_fingerprint, create_rustls_config, TlsManager};
