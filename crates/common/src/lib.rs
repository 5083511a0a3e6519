//! Shared events, error helpers and clock utilities for the switchboard crates.

pub mod error;
pub mod events;
pub mod time;

pub use {
    error::FromMessage,
    events::{Audience, DomainEvent, EventBus},
};
