//! In-memory runtime state of a session and its read model.

use {
    serde::Serialize,
    switchboard_channels::{ChannelSessionConfig, ClientHandle, ConnectionKind, ConnectionStatus},
    tokio::{task::JoinHandle, time::Instant},
};

/// A login challenge as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginChallenge {
    pub code: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Runtime record of one session. Never persisted.
pub(crate) struct SessionRuntime {
    pub handle: Option<ClientHandle>,
    pub status: ConnectionStatus,
    pub challenge: Option<(LoginChallenge, Instant)>,
    /// Set while a launch (including its retries) is in flight.
    pub connecting: bool,
    pub ever_authenticated: bool,
    /// Fences events from clients launched by an earlier connect.
    pub generation: u64,
    pub last_error: Option<String>,
    pub pump: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    pub fn new(generation: u64) -> Self {
        Self {
            handle: None,
            status: ConnectionStatus::Disconnected,
            challenge: None,
            connecting: false,
            ever_authenticated: false,
            generation,
            last_error: None,
            pump: None,
        }
    }

    /// A handle can exist before authentication; only both together count.
    pub fn is_connected(&self) -> bool {
        self.ever_authenticated && self.handle.is_some()
    }
}

/// Configuration joined with runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub session: String,
    pub kind: ConnectionKind,
    pub is_default: bool,
    pub auto_connect: bool,
    pub fair_distribution: bool,
    pub departments: Vec<String>,
    pub status: ConnectionStatus,
    pub connected: bool,
    pub has_login_challenge: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionInfo {
    pub(crate) fn project(
        config: &ChannelSessionConfig,
        runtime: Option<&SessionRuntime>,
        challenge_live: bool,
    ) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            session: config.session.clone(),
            kind: config.kind,
            is_default: config.is_default,
            auto_connect: config.auto_connect,
            fair_distribution: config.fair_distribution,
            departments: config.departments.clone(),
            status: runtime.map(|r| r.status).unwrap_or_default(),
            connected: runtime.is_some_and(SessionRuntime::is_connected),
            has_login_challenge: challenge_live,
            last_error: runtime.and_then(|r| r.last_error.clone()),
        }
    }
}
