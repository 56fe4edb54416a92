// src/handlers.rs
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::engine::VotingEngine;
use crate::error::VoteError;
use crate::history::IdentityStatus;
use crate::models::{AuditLogEntry, OperationOutcome, ReleaseRequest, Role, VoteRecord, VoteRequest};
use crate::poll::{PollResult, PollView};

pub const ROLE_HEADER: &str = "x-user-role";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<VotingEngine>,
}

impl AppState {
    pub fn new(engine: VotingEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Vote(VoteError),
    Forbidden(&'static str),
    BadRequest(String),
}

impl From<VoteError> for ApiError {
    fn from(err: VoteError) -> Self {
        Self::Vote(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Vote(err) => {
                let status = match &err {
                    VoteError::PollNotFound(_) | VoteError::OptionNotFound { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    VoteError::AlreadyVoted { .. } | VoteError::NoActiveVote { .. } => {
                        StatusCode::CONFLICT
                    }
                    VoteError::IntegrityFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                    VoteError::Storage(detail) => {
                        error!(%detail, "Storage failure");
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(OperationOutcome::failed("Internal storage error")),
                        )
                            .into_response();
                    }
                };
                (status, err.to_string())
            }
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(OperationOutcome::failed(message))).into_response()
    }
}

/// Role flag from the `X-User-Role` header. Missing means `USER`.
pub struct CallerRole(pub Role);

impl<S> FromRequestParts<S> for CallerRole
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(ROLE_HEADER) else {
            return Ok(CallerRole(Role::User));
        };
        value
            .to_str()
            .ok()
            .and_then(|s| s.parse().ok())
            .map(CallerRole)
            .ok_or_else(|| ApiError::BadRequest("Invalid X-User-Role header".to_string()))
    }
}

/// Network identity of the caller: first `X-Forwarded-For` hop, else the peer IP.
pub struct ClientAddr(pub Option<String>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };

        Ok(ClientAddr(forwarded.or_else(peer)))
    }
}

/// Unwrap a JSON body, turning axum's plain-text rejection into an `ApiError`.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub votes: Vec<VoteRecord>,
    pub audit: Vec<AuditLogEntry>,
    pub identities: Vec<IdentityStatus>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// All polls with their current results
pub async fn list_polls(State(state): State<AppState>) -> Result<Json<Vec<PollView>>, ApiError> {
    Ok(Json(state.engine.list_polls().await?))
}

pub async fn poll_results(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
) -> Result<Json<Vec<PollResult>>, ApiError> {
    Ok(Json(state.engine.results(&poll_id).await?))
}

/// Vote on a poll
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
    CallerRole(role): CallerRole,
    ClientAddr(addr): ClientAddr,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<OperationOutcome>, ApiError> {
    if !role.can_vote() {
        return Err(ApiError::Forbidden("Log in to vote"));
    }
    let body = json_body(body)?;

    let identity = body
        .identity
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .or(addr)
        .ok_or_else(|| ApiError::BadRequest("Unable to determine voter identity".to_string()))?;

    let transition = state
        .engine
        .cast_vote(&poll_id, &body.option_id, &identity)
        .await?;
    Ok(Json(OperationOutcome::ok(transition.message)))
}

/// Vote ledger, audit trail and per-identity status (admin only)
pub async fn history(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
    CallerRole(role): CallerRole,
) -> Result<Json<HistoryResponse>, ApiError> {
    if !role.is_admin() {
        return Err(ApiError::Forbidden("Admin role required"));
    }

    let history = state.engine.history(&poll_id).await?;
    let identities = history.identity_statuses();
    Ok(Json(HistoryResponse {
        votes: history.votes,
        audit: history.audit,
        identities,
    }))
}

/// Release an identity's active vote (admin only)
pub async fn release_identity(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
    CallerRole(role): CallerRole,
    body: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Result<Json<OperationOutcome>, ApiError> {
    if !role.is_admin() {
        return Err(ApiError::Forbidden("Admin role required"));
    }

    let body = json_body(body)?;
    let identity = body.identity.trim();
    if identity.is_empty() {
        return Err(ApiError::BadRequest("identity must not be empty".to_string()));
    }

    let transition = state.engine.release_identity(&poll_id, identity).await?;
    Ok(Json(OperationOutcome::ok(transition.message)))
}
