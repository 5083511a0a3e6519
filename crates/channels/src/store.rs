use {async_trait::async_trait, secrecy::SecretString};

use crate::{Result, session::ChannelSessionConfig};

/// Persistent storage for channel session configurations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ChannelSessionConfig>>;
    async fn get(&self, id: &str) -> Result<Option<ChannelSessionConfig>>;
    async fn get_by_session(&self, session: &str) -> Result<Option<ChannelSessionConfig>>;
    async fn upsert(&self, config: ChannelSessionConfig) -> Result<()>;
    /// Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
    /// Mark `id` as the default and clear the flag on every other session.
    async fn set_default(&self, id: &str) -> Result<()>;
}

/// Authentication tokens keyed by session identifier.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, session: &str) -> Result<Option<SecretString>>;
    async fn set(&self, session: &str, token: SecretString) -> Result<()>;
    async fn remove(&self, session: &str) -> Result<()>;
}
