//! JSON API handlers for sessions, conversations and operators.

use std::collections::HashMap;

use {
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
    },
    serde::Deserialize,
    switchboard_channels::{BotAffinity, ChannelSessionConfig, ConnectionKind, TemplateEvent},
    switchboard_conversations::OperatorStatus,
    tracing::warn,
};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

// ── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub session: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ConnectionKind,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub fair_distribution: Option<bool>,
    #[serde(default)]
    pub bot: BotAffinity,
    #[serde(default)]
    pub templates: HashMap<TemplateEvent, String>,
}

impl From<CreateSessionRequest> for ChannelSessionConfig {
    fn from(req: CreateSessionRequest) -> Self {
        let mut config = ChannelSessionConfig::new(String::new(), req.session, req.kind);
        if let Some(name) = req.name {
            config.name = name;
        }
        config.is_default = req.is_default;
        config.auto_connect = req.auto_connect;
        config.departments = req.departments;
        if let Some(fair) = req.fair_distribution {
            config.fair_distribution = fair;
        }
        config.bot = req.bot;
        config.templates = req.templates;
        config
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.registry.list_sessions().await?))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let config = state.registry.create_session(req.into()).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.registry.get_session_info(&session).await?))
}

/// Replace a session's configuration; the `session` key must match the path.
pub async fn update_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let existing = state.registry.get_session_info(&session).await?;
    let mut config = ChannelSessionConfig::from(req);
    config.id = existing.id;
    Ok(Json(state.registry.update_session(config).await?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.delete_session(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Starts the connect in the background; progress is reported through the
/// session status and the event stream.
pub async fn connect_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let info = state.registry.get_session_info(&session).await?;
    let registry = state.registry.clone();
    tokio::spawn(async move {
        if let Err(e) = registry.connect(&session).await {
            warn!(session = %session, error = %e, "connect request failed");
        }
    });
    Ok((StatusCode::ACCEPTED, Json(info)))
}

pub async fn disconnect_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.disconnect(&session).await?;
    Ok(Json(state.registry.get_session_info(&session).await?))
}

pub async fn login_challenge(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.get_session_info(&session).await?;
    state
        .registry
        .get_login_challenge(&session)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no pending login challenge for {session}")))
}

pub async fn set_default_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.set_default(&session).await?;
    Ok(Json(state.registry.get_session_info(&session).await?))
}

// ── Conversations ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OperatorRequest {
    pub operator_id: String,
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .conversations
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("conversation not found: {id}")))
}

pub async fn accept_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OperatorRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.distribution.accept(&id, &req.operator_id).await?))
}

pub async fn decline_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OperatorRequest>,
) -> ApiResult<StatusCode> {
    state.distribution.decline(&id, &req.operator_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resolve_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.distribution.resolve(&id).await?))
}

// ── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub async fn set_operator_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let status = OperatorStatus::parse(&req.status)
        .ok_or_else(|| ApiError::bad_request(format!("unknown operator status: {}", req.status)))?;
    state.distribution.set_operator_status(&id, status).await?;
    let operator = state
        .operators
        .get_operator(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("operator not found: {id}")))?;
    Ok(Json(operator))
}
