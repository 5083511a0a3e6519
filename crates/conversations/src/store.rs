//! Persistence traits for conversations, operators and departments.
//!
//! Offer and assignment updates are conditional writes: each checks the
//! state it expects and reports whether it applied, so two callers racing on
//! the same conversation can never both win.

use std::collections::HashMap;

use {async_trait::async_trait, switchboard_channels::ConnectionKind};

use crate::{
    Result,
    types::{Conversation, Department, Offer, Operator, OperatorStatus},
};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// The non-archived conversation for a contact on a channel kind.
    async fn find_open(
        &self,
        contact_id: &str,
        channel_kind: ConnectionKind,
    ) -> Result<Option<Conversation>>;

    /// Insert a new conversation. Fails with [`crate::Error::Duplicate`] when
    /// an open conversation for the same contact and kind already exists.
    async fn insert(&self, conversation: &Conversation) -> Result<()>;

    /// Record message activity and refresh the contact's display name.
    async fn touch(&self, id: &str, contact_name: Option<&str>, at_ms: i64) -> Result<()>;

    /// Reopen a finalized conversation: unassigned, no offer, not with a bot.
    /// The last-operator fields are kept for the re-offer cooldown.
    async fn reopen(&self, id: &str, now_ms: i64) -> Result<()>;

    async fn set_bot_active(&self, id: &str, active: bool, now_ms: i64) -> Result<()>;

    async fn set_department(&self, id: &str, department_id: &str, now_ms: i64) -> Result<()>;

    /// Conversations holding an offer that expired at or before `now_ms`.
    async fn expired_offers(&self, now_ms: i64) -> Result<Vec<Conversation>>;

    /// Clear the offer if `operator_id` still holds it. Returns whether it did.
    async fn clear_offer_if(&self, id: &str, operator_id: &str, now_ms: i64) -> Result<bool>;

    /// Distribution candidates, oldest first, at most `limit`.
    async fn candidates(&self, now_ms: i64, limit: usize) -> Result<Vec<Conversation>>;

    /// Write an offer if the conversation is still a candidate at `now_ms`,
    /// incrementing the attempt counter. Returns whether the offer was written.
    async fn write_offer(&self, id: &str, offer: &Offer, now_ms: i64) -> Result<bool>;

    /// Turn `operator_id`'s unexpired offer into an assignment in one step.
    /// Fails with [`crate::Error::OfferNotHeld`] otherwise.
    async fn accept_offer(&self, id: &str, operator_id: &str, now_ms: i64)
    -> Result<Conversation>;

    /// Finalize the conversation, remembering who resolved it and when.
    async fn resolve(&self, id: &str, now_ms: i64) -> Result<Conversation>;

    /// Open chats per operator: assignments plus offers still running.
    async fn active_chat_counts(&self, now_ms: i64) -> Result<HashMap<String, u32>>;
}

#[async_trait]
pub trait OperatorStore: Send + Sync {
    async fn get_operator(&self, id: &str) -> Result<Option<Operator>>;
    async fn list_operators(&self) -> Result<Vec<Operator>>;
    async fn upsert_operator(&self, operator: &Operator) -> Result<()>;
    /// Returns false when the operator does not exist.
    async fn set_operator_status(&self, id: &str, status: OperatorStatus) -> Result<bool>;
}

#[async_trait]
pub trait DepartmentStore: Send + Sync {
    async fn get_department(&self, id: &str) -> Result<Option<Department>>;
    async fn list_departments(&self) -> Result<Vec<Department>>;
    async fn upsert_department(&self, department: &Department) -> Result<()>;
}

/// Fires a single distribution pass for one conversation as soon as it is
/// created, instead of waiting for the next periodic tick.
#[async_trait]
pub trait OfferTrigger: Send + Sync {
    async fn offer_now(&self, conversation_id: &str);
}
