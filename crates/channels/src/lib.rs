//! Channel session model and the seams around it.
//!
//! A channel session is one independently authenticated connection to a
//! messaging network, backed by an external automation client. This crate
//! holds the durable configuration model, the capability interface every
//! client driver implements, and the traits through which the session
//! registry talks to stores, the inbound queue and the outbound path.

pub mod client;
pub mod directory;
pub mod error;
pub mod inbound;
pub mod session;
pub mod store;

pub use {
    client::{
        AutomationDriver, ClientCapabilities, ClientEvent, ClientHandle, ClientState,
        LaunchRequest,
    },
    directory::{OutboundSender, SessionDirectory},
    error::{Error, Result},
    inbound::{InboundEnvelope, InboundMessage, InboundSink},
    session::{
        BotAffinity, ChannelSessionConfig, ConnectionKind, ConnectionStatus, TemplateEvent,
    },
    store::{CredentialStore, SessionStore},
};
