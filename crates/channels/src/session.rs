use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

/// How a session reaches the messaging network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// A local automation process driving the consumer client.
    NativeAutomation,
    /// A hosted provider API.
    ManagedApi,
}

impl ConnectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NativeAutomation => "native_automation",
            Self::ManagedApi => "managed_api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "native_automation" => Some(Self::NativeAutomation),
            "managed_api" => Some(Self::ManagedApi),
            _ => None,
        }
    }
}

/// Runtime connection status of a session.
///
/// ```text
/// disconnected → connecting → {qrcode ⇄ connecting} → connected → (disconnected | error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Qrcode,
    Connected,
    /// Connect retries exhausted or the client crashed. Requires an explicit
    /// reconnect.
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Qrcode => "qrcode",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    ///
    /// Any state may fall back to `disconnected` or `error` (teardown and
    /// crash paths). `connecting` is only entered from `disconnected`,
    /// `error`, or a `qrcode` refresh, never straight from `connected`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (_, Disconnected | Error) => true,
            (Disconnected | Error | Qrcode, Connecting) => true,
            (Connecting, Qrcode | Connected) => true,
            (Qrcode, Connected) => true,
            _ => false,
        }
    }

    /// In progress towards authentication.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Qrcode)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle points at which a session sends an automated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateEvent {
    /// A new conversation entered the human queue.
    Welcome,
    /// An operator accepted the conversation. Supports `{operator}`.
    Assigned,
    /// The conversation was resolved.
    Resolved,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotAffinity {
    pub enabled: bool,
    pub handler_id: Option<String>,
}

impl BotAffinity {
    /// Handler to route through, if the bot path is active.
    pub fn active_handler(&self) -> Option<&str> {
        if self.enabled {
            self.handler_id.as_deref()
        } else {
            None
        }
    }
}

/// Durable configuration of one channel session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSessionConfig {
    pub id: String,
    /// Display name.
    pub name: String,
    /// Stable key shared by the external client, its working directory and
    /// credential storage.
    pub session: String,
    pub kind: ConnectionKind,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub auto_connect: bool,
    /// Department affinity, in priority order.
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default = "default_true")]
    pub fair_distribution: bool,
    #[serde(default)]
    pub bot: BotAffinity,
    #[serde(default)]
    pub templates: HashMap<TemplateEvent, String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_true() -> bool {
    true
}

impl ChannelSessionConfig {
    /// Minimal config for a session key; all flags take their defaults.
    pub fn new(id: impl Into<String>, session: impl Into<String>, kind: ConnectionKind) -> Self {
        let session = session.into();
        Self {
            id: id.into(),
            name: session.clone(),
            session,
            kind,
            is_default: false,
            auto_connect: false,
            departments: Vec::new(),
            fair_distribution: true,
            bot: BotAffinity::default(),
            templates: HashMap::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Department used when a conversation has none of its own.
    pub fn primary_department(&self) -> Option<&str> {
        self.departments.first().map(String::as_str)
    }

    pub fn template(&self, event: TemplateEvent) -> Option<&str> {
        self.templates
            .get(&event)
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
    }

    /// Reject keys that cannot double as a directory name.
    pub fn validate(&self) -> crate::Result<()> {
        let key = self.session.as_str();
        if key.is_empty()
            || key.len() > 64
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        {
            return Err(crate::Error::invalid_input(format!(
                "session key must be 1-64 chars of [A-Za-z0-9_-], got {key:?}"
            )));
        }
        if self.bot.enabled && self.bot.handler_id.is_none() {
            return Err(crate::Error::invalid_input(
                "bot affinity enabled without a handler id",
            ));
        }
        Ok(())
    }
}
