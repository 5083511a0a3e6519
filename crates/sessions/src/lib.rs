//! Channel session lifecycle.
//!
//! The [`SessionRegistry`] supervises every configured channel session. Each
//! session is backed by an external automation client launched through an
//! [`switchboard_channels::AutomationDriver`]; the registry performs connect
//! with bounded retry and lock cleanup, tracks runtime state, persists
//! credentials once a client authenticates, and tears everything down again.
//!
//! Runtime state is never persisted: after a restart every session starts
//! `disconnected`.

pub mod error;
pub mod registry;
pub mod runtime;
pub mod store_memory;
pub mod store_sqlite;
mod worker;

pub use {
    error::{Error, Result},
    registry::{RegistryConfig, SessionRegistry},
    runtime::{LoginChallenge, SessionInfo},
    store_memory::{InMemoryCredentialStore, InMemorySessionStore},
    store_sqlite::{SqliteCredentialStore, SqliteSessionStore},
};

/// Run database migrations for the sessions crate.
///
/// Creates the `channel_sessions` and `session_credentials` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
