//! Fair distribution of waiting conversations to operators.
//!
//! A periodic tick reclaims expired offers and offers each waiting
//! conversation to the next available member of its department, in
//! round-robin order. Operators accept or decline; accepted conversations
//! leave the pool until they are resolved and the contact writes again.

pub mod config;
pub mod error;
pub mod rotation;
pub mod service;

pub use {
    config::SchedulerConfig,
    error::{Error, Result},
    service::{Clock, DistributionService, IssuedOffer, SkipReason, TickReport},
};
