use async_trait::async_trait;

use crate::{Result, session::ChannelSessionConfig};

/// Read access to configured sessions for components outside the registry.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn by_session(&self, session: &str) -> Option<ChannelSessionConfig>;
    async fn by_id(&self, id: &str) -> Option<ChannelSessionConfig>;
}

/// Send text through a session's live client.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, session: &str, to: &str, text: &str) -> Result<()>;

    /// Acknowledge an inbound message as read.
    async fn mark_read(&self, _session: &str, _contact_id: &str, _message_id: &str) -> Result<()> {
        Ok(())
    }
}
