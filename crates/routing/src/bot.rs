//! Automated handlers for sessions with a bot affinity.

use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    switchboard_channels::InboundMessage,
    switchboard_conversations::Conversation,
};

use crate::Result;

/// What a handler wants done after seeing one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotReply {
    /// Texts sent back to the contact, in order.
    pub messages: Vec<String>,
    /// Hand the conversation to the human queue after sending `messages`.
    pub hand_off: bool,
}

impl BotReply {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            hand_off: false,
        }
    }

    pub fn hand_off() -> Self {
        Self {
            messages: Vec::new(),
            hand_off: true,
        }
    }

    #[must_use]
    pub fn then_hand_off(mut self) -> Self {
        self.hand_off = true;
        self
    }
}

#[async_trait]
pub trait BotHandler: Send + Sync {
    fn id(&self) -> &str;

    async fn handle(
        &self,
        conversation: &Conversation,
        message: &InboundMessage,
    ) -> Result<BotReply>;
}

/// Bot handlers by id.
#[derive(Default, Clone)]
pub struct BotRegistry {
    handlers: HashMap<String, Arc<dyn BotHandler>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn BotHandler>) {
        self.handlers.insert(handler.id().to_string(), handler);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn BotHandler>> {
        self.handlers.get(id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
