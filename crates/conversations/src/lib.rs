//! Conversations, operators and departments.
//!
//! Everything here is storage: the records the inbound router and the
//! distribution scheduler read and update, and the conditional writes that
//! keep at most one active offer per conversation.

pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    store::{ConversationStore, DepartmentStore, OfferTrigger, OperatorStore},
    store_memory::InMemoryConversationStore,
    store_sqlite::SqliteConversationStore,
    types::{Conversation, Department, Offer, Operator, OperatorStatus},
};

/// Run database migrations for the conversations crate.
///
/// Creates the `conversations`, `operators` and `departments` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
