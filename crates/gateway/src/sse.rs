//! Server-sent stream of domain events, filtered per subscriber.

use std::convert::Infallible;

use {
    axum::{
        extract::{Query, State},
        response::sse::{Event, KeepAlive, Sse},
    },
    serde::Deserialize,
    switchboard_common::{Audience, DomainEvent},
    tokio_stream::{
        Stream, StreamExt,
        wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
    },
    tracing::{debug, warn},
};

use crate::state::AppState;

/// Which events a subscriber receives.
///
/// An event is delivered when one of its audiences matches: `admin=true`
/// matches admin-scoped events, `operator_id` and `conversation_id` match
/// events scoped to that operator or conversation. A subscriber with no
/// filter at all receives everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub admin: bool,
    pub operator_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl EventFilter {
    pub fn is_unfiltered(&self) -> bool {
        !self.admin && self.operator_id.is_none() && self.conversation_id.is_none()
    }

    pub fn accepts(&self, event: &DomainEvent) -> bool {
        if self.is_unfiltered() {
            return true;
        }
        event.audiences().iter().any(|audience| match audience {
            Audience::Admins => self.admin,
            Audience::Operator(id) => self.operator_id.as_deref() == Some(id.as_str()),
            Audience::Conversation(id) => self.conversation_id.as_deref() == Some(id.as_str()),
        })
    }
}

pub async fn events_handler(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(?filter, "event stream opened");
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(move |item| {
        match item {
            Ok(event) if filter.accepts(&event) => match Event::default()
                .event(event.name())
                .json_data(&event)
            {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    warn!(event = event.name(), error = %e, "failed to encode event");
                    None
                },
            },
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream subscriber lagged");
                None
            },
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
