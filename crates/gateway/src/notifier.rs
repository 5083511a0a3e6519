//! Sends the `assigned` and `resolved` automated messages.
//!
//! The distribution service only publishes events; this subscriber turns
//! them into messages through the conversation's session, so a failed send
//! never affects the accept or resolve that triggered it.

use std::sync::Arc;

use {
    switchboard_channels::{OutboundSender, SessionDirectory, TemplateEvent},
    switchboard_common::{DomainEvent, EventBus},
    switchboard_routing::template,
    tokio::{sync::broadcast::error::RecvError, task::JoinHandle},
    tracing::{debug, warn},
};

pub struct TemplateNotifier {
    sessions: Arc<dyn SessionDirectory>,
    outbound: Arc<dyn OutboundSender>,
}

impl TemplateNotifier {
    pub fn new(sessions: Arc<dyn SessionDirectory>, outbound: Arc<dyn OutboundSender>) -> Self {
        Self { sessions, outbound }
    }

    /// Consume events until the bus closes.
    pub fn spawn(self, events: &EventBus) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "template notifier lagged, events dropped");
                    },
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::ConversationAssigned {
                session_id,
                contact_id,
                operator_name,
                ..
            } => {
                let vars = [("operator", operator_name.as_str())];
                self.send(session_id, contact_id, TemplateEvent::Assigned, &vars)
                    .await;
            },
            DomainEvent::ConversationResolved {
                session_id,
                contact_id,
                ..
            } => {
                self.send(session_id, contact_id, TemplateEvent::Resolved, &[])
                    .await;
            },
            _ => {},
        }
    }

    async fn send(&self, session: &str, to: &str, kind: TemplateEvent, vars: &[(&str, &str)]) {
        let Some(config) = self.sessions.by_session(session).await else {
            debug!(session, "no session config for template");
            return;
        };
        let Some(text) = config.template(kind) else {
            return;
        };
        let text = template::render(text, vars);
        if let Err(e) = self.outbound.send_text(session, to, &text).await {
            warn!(session, ?kind, error = %e, "failed to send automated message");
        }
    }
}
