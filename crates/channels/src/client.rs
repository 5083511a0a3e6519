//! Capability interface of an external automation client.
//!
//! A driver launches one client per session. The client reports everything it
//! observes through [`ClientEvent`]s on the channel handed to it at launch, and
//! exposes its operations through a [`ClientHandle`]. Optional operations are
//! `Option` members of [`ClientCapabilities`], fixed when the handle is built,
//! so callers check presence once instead of probing per call.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    futures::future::BoxFuture,
    secrecy::SecretString,
    tokio::sync::mpsc,
};

use crate::{Result, inbound::InboundMessage, session::ConnectionKind};

pub type SendTextFn = Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type CloseFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type ExportTokenFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<SecretString>>> + Send + Sync>;
pub type MarkReadFn = Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Connection state reported by the client itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// (Re)opening the network connection, e.g. after a login challenge
    /// was refreshed.
    Opening,
    /// Logged in; the client can send and receive.
    Authenticated,
    /// Connection dropped. The process may still be alive.
    Disconnected { reason: Option<String> },
    /// The stored login was revoked from the phone.
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A fresh login challenge (QR payload) is available.
    LoginChallenge { code: String },
    StateChanged(ClientState),
    Inbound(InboundMessage),
    /// The client process exited. `crashed` is false for a requested shutdown.
    Exited {
        code: Option<i32>,
        reason: Option<String>,
        crashed: bool,
    },
}

/// Everything a driver needs to start a client for one session.
pub struct LaunchRequest {
    pub session: String,
    /// Persistent, session-specific working directory. Reused across
    /// restarts so a prior login survives.
    pub work_dir: PathBuf,
    /// Previously stored credential, if any.
    pub token: Option<SecretString>,
    pub events: mpsc::Sender<ClientEvent>,
}

impl fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("session", &self.session)
            .field("work_dir", &self.work_dir)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// Optional client operations.
#[derive(Clone, Default)]
pub struct ClientCapabilities {
    /// Extract the current authentication token for persistence. May return
    /// `Ok(None)` right after authentication while the token is still being
    /// written by the client.
    pub export_token: Option<ExportTokenFn>,
    /// Revoke the login on the network side.
    pub logout: Option<CloseFn>,
    /// Acknowledge a message as read (contact id, message id).
    pub mark_read: Option<MarkReadFn>,
}

impl fmt::Debug for ClientCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCapabilities")
            .field("export_token", &self.export_token.is_some())
            .field("logout", &self.logout.is_some())
            .field("mark_read", &self.mark_read.is_some())
            .finish()
    }
}

/// Live handle to a launched client.
#[derive(Clone)]
pub struct ClientHandle {
    send_text: SendTextFn,
    close: CloseFn,
    capabilities: ClientCapabilities,
    pid: Option<u32>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("capabilities", &self.capabilities)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    pub fn new(send_text: SendTextFn, close: CloseFn) -> Self {
        Self {
            send_text,
            close,
            capabilities: ClientCapabilities::default(),
            pid: None,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.capabilities
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        (self.send_text)(to.to_string(), text.to_string()).await
    }

    pub async fn close(&self) -> Result<()> {
        (self.close)().await
    }
}

/// Launches and cleans up external clients of one [`ConnectionKind`].
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    fn kind(&self) -> ConnectionKind;

    /// Start a client. Returns [`crate::Error::ResourceBusy`] when a stale
    /// lock or orphaned process prevented startup.
    async fn launch(&self, request: LaunchRequest) -> Result<ClientHandle>;

    /// Remove stale lock files left in `work_dir`. Idempotent.
    async fn release_locks(&self, session: &str, work_dir: &Path) -> Result<()>;

    /// Kill leftover client processes bound to `work_dir`. Returns how many
    /// were signalled. Idempotent.
    async fn kill_orphans(&self, session: &str, work_dir: &Path) -> Result<usize>;

    /// Delete the working directory, sacrificing the stored login.
    async fn wipe_work_dir(&self, work_dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(work_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
