//! Domain events published by the core components.
//!
//! Sessions, the distribution scheduler and the inbound router never call
//! realtime or webhook collaborators directly. They publish a [`DomainEvent`]
//! on the [`EventBus`] and move on; subscribers consume at their own pace and
//! a slow or absent subscriber cannot fail the publishing operation.

use {serde::Serialize, tokio::sync::broadcast, tracing::trace};

/// Default number of events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Who should receive an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Audience {
    Admins,
    Conversation(String),
    Operator(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    SessionStatusChanged {
        session: String,
        status: String,
    },
    LoginChallengeIssued {
        session: String,
        code: String,
        expires_at_ms: i64,
    },
    SessionConnected {
        session: String,
    },
    SessionDisconnected {
        session: String,
        reason: Option<String>,
    },
    SessionFailed {
        session: String,
        error: String,
    },
    MessageReceived {
        conversation_id: String,
        session: String,
        contact_id: String,
        message_id: String,
    },
    ConversationCreated {
        conversation_id: String,
        session_id: String,
        contact_id: String,
    },
    OfferIssued {
        conversation_id: String,
        operator_id: String,
        operator_name: String,
        expires_at_ms: i64,
        attempt: u32,
    },
    OfferExpired {
        conversation_id: String,
        operator_id: String,
    },
    OfferDeclined {
        conversation_id: String,
        operator_id: String,
    },
    ConversationAssigned {
        conversation_id: String,
        session_id: String,
        contact_id: String,
        operator_id: String,
        operator_name: String,
    },
    ConversationResolved {
        conversation_id: String,
        session_id: String,
        contact_id: String,
        operator_id: Option<String>,
    },
    OperatorStatusChanged {
        operator_id: String,
        status: String,
    },
}

impl DomainEvent {
    /// Stable event name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStatusChanged { .. } => "session_status_changed",
            Self::LoginChallengeIssued { .. } => "login_challenge_issued",
            Self::SessionConnected { .. } => "session_connected",
            Self::SessionDisconnected { .. } => "session_disconnected",
            Self::SessionFailed { .. } => "session_failed",
            Self::MessageReceived { .. } => "message_received",
            Self::ConversationCreated { .. } => "conversation_created",
            Self::OfferIssued { .. } => "offer_issued",
            Self::OfferExpired { .. } => "offer_expired",
            Self::OfferDeclined { .. } => "offer_declined",
            Self::ConversationAssigned { .. } => "conversation_assigned",
            Self::ConversationResolved { .. } => "conversation_resolved",
            Self::OperatorStatusChanged { .. } => "operator_status_changed",
        }
    }

    /// Audiences this event is scoped to.
    pub fn audiences(&self) -> Vec<Audience> {
        match self {
            Self::SessionStatusChanged { .. }
            | Self::LoginChallengeIssued { .. }
            | Self::SessionConnected { .. }
            | Self::SessionDisconnected { .. }
            | Self::SessionFailed { .. } => vec![Audience::Admins],
            Self::MessageReceived {
                conversation_id, ..
            }
            | Self::ConversationCreated {
                conversation_id, ..
            } => vec![
                Audience::Admins,
                Audience::Conversation(conversation_id.clone()),
            ],
            Self::OfferIssued {
                conversation_id,
                operator_id,
                ..
            }
            | Self::OfferExpired {
                conversation_id,
                operator_id,
            }
            | Self::OfferDeclined {
                conversation_id,
                operator_id,
            }
            | Self::ConversationAssigned {
                conversation_id,
                operator_id,
                ..
            } => vec![
                Audience::Conversation(conversation_id.clone()),
                Audience::Admins,
                Audience::Operator(operator_id.clone()),
            ],
            Self::ConversationResolved {
                conversation_id,
                operator_id,
                ..
            } => {
                let mut audiences = vec![
                    Audience::Conversation(conversation_id.clone()),
                    Audience::Admins,
                ];
                if let Some(op) = operator_id {
                    audiences.push(Audience::Operator(op.clone()));
                }
                audiences
            },
            Self::OperatorStatusChanged { operator_id, .. } => vec![
                Audience::Admins,
                Audience::Operator(operator_id.clone()),
            ],
        }
    }
}

/// Fan-out bus for [`DomainEvent`]s.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never fails; with no subscribers the event is dropped.
    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!(event = name, "no event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_events_reach_conversation_admins_and_operator() {
        let event = DomainEvent::OfferIssued {
            conversation_id: "c1".into(),
            operator_id: "op1".into(),
            operator_name: "Ana".into(),
            expires_at_ms: 0,
            attempt: 1,
        };
        assert_eq!(event.audiences(), vec![
            Audience::Conversation("c1".into()),
            Audience::Admins,
            Audience::Operator("op1".into()),
        ]);
    }

    #[test]
    fn serializes_with_event_tag() {
        let event = DomainEvent::SessionConnected {
            session: "sales".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session_connected");
        assert_eq!(json["session"], "sales");
        assert_eq!(event.name(), "session_connected");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::SessionConnected {
            session: "s".into(),
        });

        let mut rx = bus.subscribe();
        bus.publish(DomainEvent::SessionFailed {
            session: "s".into(),
            error: "boom".into(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "session_failed");
    }
}
