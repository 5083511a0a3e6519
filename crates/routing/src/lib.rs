//! Inbound ordering and routing.
//!
//! Session workers push every inbound message into one [`InboundQueue`].
//! The queue hands them, one at a time and in arrival order, to the
//! [`Router`], which finds or creates the contact's conversation and sends it
//! down the bot path or into the human queue for distribution.

pub mod bot;
pub mod error;
pub mod queue;
pub mod router;
pub mod template;

pub use {
    bot::{BotHandler, BotRegistry, BotReply},
    error::{Error, Result},
    queue::{InboundProcessor, InboundQueue},
    router::{Route, Router, Upsert},
};
