use serde::{Deserialize, Serialize};

use crate::session::ConnectionKind;

/// One inbound message as reported by an automation client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Network message id, used for logging and idempotency.
    pub message_id: String,
    /// Peer identifier (phone number or network user id).
    pub contact_id: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    pub channel_kind: ConnectionKind,
    #[serde(default)]
    pub body: String,
    pub timestamp_ms: i64,
    /// Sent from the linked device itself rather than by the contact.
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
}

/// An inbound message tagged with the session that received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundEnvelope {
    pub session: String,
    pub message: InboundMessage,
}

/// Producer side of the inbound ordering queue.
///
/// `push` never blocks and never fails: every session worker may call it at
/// any time, from any task.
pub trait InboundSink: Send + Sync {
    fn push(&self, envelope: InboundEnvelope);
}
