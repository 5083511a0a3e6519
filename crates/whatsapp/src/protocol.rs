//! Stdio wire format between the driver and a sidecar.

use {
    serde::{Deserialize, Serialize},
    switchboard_channels::{ClientEvent, ClientState, ConnectionKind, InboundMessage},
};

/// One line written by the sidecar on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        qr: String,
    },
    State {
        state: ConnectionState,
        #[serde(default)]
        reason: Option<String>,
    },
    LoggedOut,
    Message {
        id: String,
        from: String,
        #[serde(default)]
        push_name: Option<String>,
        #[serde(default)]
        text: Option<String>,
        /// Seconds since the epoch.
        timestamp: i64,
        #[serde(default)]
        from_me: bool,
        #[serde(default)]
        is_group: bool,
    },
    Token {
        request_id: String,
        #[serde(default)]
        token: Option<String>,
    },
    SendResult {
        request_id: String,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// One line written to the sidecar's stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarCommand {
    /// Seed the auth state from a stored credential.
    Restore { token: String },
    Send {
        request_id: String,
        to: String,
        text: String,
    },
    ExportToken { request_id: String },
    MarkRead { to: String, message_id: String },
    Logout,
    Shutdown,
}

impl SidecarCommand {
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl SidecarMessage {
    /// Lifecycle and inbound messages map onto client events. Replies to
    /// requests (`token`, `send_result`) return `None`.
    pub fn into_client_event(self) -> Option<ClientEvent> {
        match self {
            Self::Qr { qr } => Some(ClientEvent::LoginChallenge { code: qr }),
            Self::State { state, reason } => Some(ClientEvent::StateChanged(match state {
                ConnectionState::Connecting => ClientState::Opening,
                ConnectionState::Open => ClientState::Authenticated,
                ConnectionState::Close => ClientState::Disconnected { reason },
            })),
            Self::LoggedOut => Some(ClientEvent::StateChanged(ClientState::LoggedOut)),
            Self::Message {
                id,
                from,
                push_name,
                text,
                timestamp,
                from_me,
                is_group,
            } => Some(ClientEvent::Inbound(InboundMessage {
                message_id: id,
                contact_id: normalize_jid(&from),
                contact_name: push_name,
                channel_kind: ConnectionKind::NativeAutomation,
                body: text.unwrap_or_default(),
                timestamp_ms: timestamp.saturating_mul(1_000),
                from_me,
                is_group,
            })),
            Self::Token { .. } | Self::SendResult { .. } => None,
        }
    }
}

/// `5511999999999@s.whatsapp.net` → `5511999999999`. Group ids keep their
/// suffix so they never collide with a person.
pub fn normalize_jid(jid: &str) -> String {
    match jid.split_once('@') {
        Some((user, "s.whatsapp.net" | "c.us")) => {
            user.split(':').next().unwrap_or(user).to_string()
        },
        _ => jid.to_string(),
    }
}
