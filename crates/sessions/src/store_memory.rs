//! In-memory session and credential stores for tests and ephemeral runs.

use std::{collections::HashMap, sync::Mutex};

use {
    async_trait::async_trait,
    secrecy::SecretString,
    switchboard_channels::{ChannelSessionConfig, CredentialStore, Result, SessionStore},
};

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, ChannelSessionConfig>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn list(&self) -> Result<Vec<ChannelSessionConfig>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = sessions.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn get(&self, id: &str) -> Result<Option<ChannelSessionConfig>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(id).cloned())
    }

    async fn get_by_session(&self, session: &str) -> Result<Option<ChannelSessionConfig>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.values().find(|s| s.session == session).cloned())
    }

    async fn upsert(&self, config: ChannelSessionConfig) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(config.id.clone(), config);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.remove(id).is_some())
    }

    async fn set_default(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if !sessions.contains_key(id) {
            return Err(switchboard_channels::Error::unknown_session(id));
        }
        for (key, cfg) in sessions.iter_mut() {
            cfg.is_default = key == id;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    tokens: Mutex<HashMap<String, SecretString>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, session: &str) -> Result<Option<SecretString>> {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tokens.get(session).cloned())
    }

    async fn set(&self, session: &str, token: SecretString) -> Result<()> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert(session.to_string(), token);
        Ok(())
    }

    async fn remove(&self, session: &str) -> Result<()> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(session);
        Ok(())
    }
}
