//! HTTP request handlers
//!
//! Pairing, client and token management endpoints. Admin routes resolve the
//! bearer credential through the auth gate and require an admin principal;
//! pairing verification and status polling are public.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use hearthlink_auth::{
    CompletePairingRequest, CompletePairingResponse, PairingStartResponse, PairingVerifyRequest,
    Principal, SessionStatusResponse,
};
use hearthlink_core::{Error, EventKind};
use hearthlink_store::{ClientId, ClientInfo, TokenId, TokenInfo, TokenStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Admin login
        .route("/api/auth/login", post(login_handler))
        // Realtime endpoint
        .route("/ws", get(crate::websocket::ws_handler))
        // Pairing API
        .route("/api/pairing/sessions", post(create_session_handler))
        .route(
            "/api/pairing/sessions/:id",
            get(session_status_handler).delete(cancel_session_handler),
        )
        .route("/api/pairing/verify", post(verify_pin_handler))
        .route(
            "/api/pairing/sessions/:id/complete",
            post(complete_pairing_handler),
        )
        // Client management API
        .route("/api/clients", get(list_clients_handler))
        .route(
            "/api/clients/:id",
            get(get_client_handler)
                .patch(update_client_handler)
                .delete(delete_client_handler),
        )
        // Area state fan-out
        .route("/api/areas/:id/state", post(area_state_handler))
        // Token management API
        .route("/api/tokens", post(issue_token_handler).get(list_tokens_handler))
        .route("/api/tokens/:id", get(get_token_handler).patch(update_token_handler))
        .route("/api/tokens/:id/revoke", post(revoke_token_handler))
        .route("/api/tokens/cleanup", post(cleanup_tokens_handler))
        .route("/api/tokens/stats", get(token_stats_handler))
        // Server info
        .route("/api/info", get(server_info_handler))
        .with_state(state)
}

/// Extract a bearer credential from the Authorization header
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Resolve the request's principal and require it to be an admin
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let credential = extract_bearer(headers);
    let principal = state.gate.authenticate(credential.as_deref()).await?;
    match principal {
        Principal::Admin { username } => Ok(username),
        Principal::Client { client_id, .. } => {
            warn!("Client {} attempted an admin operation", client_id);
            Err(ApiError(Error::Authentication))
        }
    }
}

fn parse_client_id(raw: &str) -> Result<ClientId, ApiError> {
    ClientId::parse(raw).map_err(|_| ApiError(Error::not_found(format!("client {}", raw))))
}

fn parse_token_id(raw: &str) -> Result<TokenId, ApiError> {
    TokenId::parse(raw).map_err(|_| ApiError(Error::not_found(format!("token {}", raw))))
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Short-lived admin credential
    pub token: String,
}

/// Admin login: exchange configured credentials for an admin token
async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let token = state.gate.login(&request.username, &request.password)?;
    Ok(Json(LoginResponse { token }))
}

// ============================================================================
// Pairing
// ============================================================================

/// Start a new pairing session
///
/// The response is the only place the PIN ever appears.
async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<PairingStartResponse>> {
    require_admin(&state, &headers).await?;
    let response = state.pairing.create_session().await?;
    Ok(Json(response))
}

/// Check pairing session status; never echoes the PIN
async fn session_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let status = state.pairing.session_status(&id).await?;
    Ok(Json(status))
}

/// Verify a pairing PIN; called by the pairing device itself
async fn verify_pin_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PairingVerifyRequest>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let status = state.pairing.verify_pin(request).await?;
    Ok(Json(status))
}

/// Complete a verified session, creating the client and its credential
async fn complete_pairing_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<CompletePairingRequest>,
) -> ApiResult<Json<CompletePairingResponse>> {
    require_admin(&state, &headers).await?;
    let response = state.pairing.complete_pairing(&id, request).await?;
    Ok(Json(response))
}

/// Cancel a pairing session that has not reached a terminal state
async fn cancel_session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require_admin(&state, &headers).await?;
    state.pairing.cancel_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Clients
// ============================================================================

/// List all paired clients
async fn list_clients_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ClientInfo>>> {
    require_admin(&state, &headers).await?;
    let clients = state.store.list_clients().await;
    let infos: Vec<ClientInfo> = clients.iter().map(ClientInfo::from).collect();
    Ok(Json(infos))
}

/// Get a single client
async fn get_client_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ClientInfo>> {
    require_admin(&state, &headers).await?;
    let client_id = parse_client_id(&id)?;
    let client = state
        .store
        .get_client(&client_id)
        .await
        .ok_or_else(|| Error::not_found(format!("client {}", id)))?;
    Ok(Json(ClientInfo::from(&client)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub assigned_areas: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

/// Update a client's name, area assignment or active flag
///
/// Area changes are pushed to the client's live connection as
/// `area_added`/`area_removed` events plus a final `area_updated` with the
/// full assignment, and the client's usable tokens are re-scoped to match.
async fn update_client_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateClientRequest>,
) -> ApiResult<Json<ClientInfo>> {
    require_admin(&state, &headers).await?;
    let client_id = parse_client_id(&id)?;

    if let Some(name) = &request.name {
        if name.trim().is_empty() {
            return Err(ApiError(Error::validation("name", "must not be empty")));
        }
    }
    if let Some(areas) = &request.assigned_areas {
        if areas.iter().any(|a| a.trim().is_empty()) {
            return Err(ApiError(Error::validation(
                "assigned_areas",
                "area ids must not be empty",
            )));
        }
    }

    let name = request.name;
    let areas = request.assigned_areas;
    let is_active = request.is_active;

    let (before, after) = state
        .store
        .update_client(&client_id, move |client| {
            let before = client.clone();
            if let Some(name) = name {
                client.name = name;
            }
            if let Some(areas) = areas {
                client.assigned_areas = areas;
            }
            if let Some(active) = is_active {
                client.is_active = active;
            }
            Ok((before, client.clone()))
        })
        .await?;

    if before.assigned_areas != after.assigned_areas {
        // Keep live authorization in step with the admin-facing assignment
        for token in state.store.list_tokens(Some(&client_id)).await {
            if token.is_usable(Utc::now()) {
                state
                    .store
                    .update_token_areas(&token.id, after.assigned_areas.clone())
                    .await?;
            }
        }

        for area in after
            .assigned_areas
            .iter()
            .filter(|a| !before.has_area(a))
        {
            state
                .registry
                .notify(&client_id, EventKind::AreaAdded { area_id: area.clone() })
                .await;
        }
        for area in before
            .assigned_areas
            .iter()
            .filter(|a| !after.has_area(a))
        {
            state
                .registry
                .notify(
                    &client_id,
                    EventKind::AreaRemoved { area_id: area.clone() },
                )
                .await;
        }
        state
            .registry
            .notify(
                &client_id,
                EventKind::AreaUpdated {
                    areas: after.assigned_areas.clone(),
                },
            )
            .await;
    }

    Ok(Json(ClientInfo::from(&after)))
}

/// Remove a client, delete its tokens and force-disconnect it
async fn delete_client_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require_admin(&state, &headers).await?;
    let client_id = parse_client_id(&id)?;

    state.store.remove_client(&client_id).await?;
    state.store.remove_tokens_for_client(&client_id).await?;
    state
        .registry
        .disconnect_client(client_id, "client removed".to_string());

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Areas
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AreaStateRequest {
    pub enabled: bool,
}

/// Fan an area enable/disable change out to every affected client
///
/// The area registry itself lives in the home-automation backend; this
/// endpoint only propagates the change to connected clients assigned to the
/// area.
async fn area_state_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AreaStateRequest>,
) -> ApiResult<StatusCode> {
    require_admin(&state, &headers).await?;

    let kind = if request.enabled {
        EventKind::AreaEnabled { area_id: id.clone() }
    } else {
        EventKind::AreaDisabled { area_id: id.clone() }
    };
    state.registry.notify_by_area(&id, kind).await;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub client_id: String,
    /// Defaults to the client's current area assignment
    pub assigned_areas: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    pub token_id: String,
    pub client_id: String,
    /// One-time plaintext credential; never retrievable again
    pub credential: String,
    pub expires_at: DateTime<Utc>,
}

/// Issue a credential for an existing client, outside the pairing flow
async fn issue_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<IssueTokenRequest>,
) -> ApiResult<Json<IssueTokenResponse>> {
    require_admin(&state, &headers).await?;
    let client_id = parse_client_id(&request.client_id)?;

    let client = state
        .store
        .get_client(&client_id)
        .await
        .ok_or_else(|| Error::not_found(format!("client {}", request.client_id)))?;

    let areas = request
        .assigned_areas
        .unwrap_or_else(|| client.assigned_areas.clone());
    let (credential, record) = state.tokens.issue(&client_id, areas).await?;

    Ok(Json(IssueTokenResponse {
        token_id: record.id.to_string(),
        client_id: client_id.to_string(),
        credential,
        expires_at: record.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TokenListQuery {
    pub client_id: Option<String>,
}

/// List token records, optionally filtered by client
async fn list_tokens_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TokenListQuery>,
) -> ApiResult<Json<Vec<TokenInfo>>> {
    require_admin(&state, &headers).await?;

    let client_id = match &query.client_id {
        Some(raw) => Some(parse_client_id(raw)?),
        None => None,
    };
    let tokens = state.store.list_tokens(client_id.as_ref()).await;
    let infos: Vec<TokenInfo> = tokens.iter().map(TokenInfo::from).collect();
    Ok(Json(infos))
}

/// Get a single token record
async fn get_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<TokenInfo>> {
    require_admin(&state, &headers).await?;
    let token_id = parse_token_id(&id)?;
    let token = state
        .store
        .get_token(&token_id)
        .await
        .ok_or_else(|| Error::not_found(format!("token {}", id)))?;
    Ok(Json(TokenInfo::from(&token)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeTokenRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevokeTokenResponse {
    /// False if the token was already revoked
    pub revoked: bool,
}

/// Revoke a token; idempotent
///
/// On the first revocation the owning client receives a `token_revoked`
/// event and is disconnected after a short grace delay.
async fn revoke_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    request: Option<Json<RevokeTokenRequest>>,
) -> ApiResult<Json<RevokeTokenResponse>> {
    require_admin(&state, &headers).await?;
    let token_id = parse_token_id(&id)?;

    let token = state
        .store
        .get_token(&token_id)
        .await
        .ok_or_else(|| Error::not_found(format!("token {}", id)))?;

    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "revoked by admin".to_string());

    let revoked = state.tokens.revoke(&token.token_hash, &reason).await?;
    if revoked {
        state.registry.disconnect_client(token.client_id, reason);
    }

    Ok(Json(RevokeTokenResponse { revoked }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTokenRequest {
    pub assigned_areas: Vec<String>,
}

/// Replace a token's area scope
///
/// The owning client record is re-scoped to match and notified.
async fn update_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateTokenRequest>,
) -> ApiResult<Json<TokenInfo>> {
    require_admin(&state, &headers).await?;
    let token_id = parse_token_id(&id)?;

    if request.assigned_areas.iter().any(|a| a.trim().is_empty()) {
        return Err(ApiError(Error::validation(
            "assigned_areas",
            "area ids must not be empty",
        )));
    }

    let updated = state
        .store
        .update_token_areas(&token_id, request.assigned_areas.clone())
        .await?;

    let areas = request.assigned_areas;
    let client_id = updated.client_id.clone();
    let aligned = areas.clone();
    match state
        .store
        .update_client(&client_id, move |client| {
            client.assigned_areas = aligned;
            Ok(())
        })
        .await
    {
        Ok(()) => {
            state
                .registry
                .notify(&client_id, EventKind::AreaUpdated { areas })
                .await;
        }
        // The owning client may have been removed already
        Err(Error::NotFound(_)) => {}
        Err(e) => return Err(ApiError(e)),
    }

    Ok(Json(TokenInfo::from(&updated)))
}

#[derive(Debug, Serialize)]
pub struct CleanupTokensResponse {
    pub deleted: usize,
}

/// Delete token records whose natural validity has elapsed
async fn cleanup_tokens_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<CleanupTokensResponse>> {
    require_admin(&state, &headers).await?;
    let deleted = state.tokens.sweep_expired().await?;
    Ok(Json(CleanupTokensResponse { deleted }))
}

/// Aggregate token counts
async fn token_stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<TokenStats>> {
    require_admin(&state, &headers).await?;
    let stats = state.tokens.stats().await;
    Ok(Json(stats))
}

// ============================================================================
// Server info
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub version: String,
    pub paired_clients: usize,
    pub active_connections: usize,
    /// How long a pairing PIN stays valid, in seconds
    pub session_ttl_secs: u64,
}

/// Get server information
async fn server_info_handler(State(state): State<Arc<AppState>>) -> Json<ServerInfo> {
    Json(ServerInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        paired_clients: state.store.client_count().await,
        active_connections: state.registry.connection_count().await,
        session_ttl_secs: state.config.session_ttl_secs,
    })
}
