//! WhatsApp Web driver for switchboard sessions.
//!
//! Every session runs its own Node.js sidecar (Baileys) as a child process.
//! The sidecar speaks newline-delimited JSON over stdio: protocol messages on
//! stdout, commands on stdin, pino logs on stderr. Its auth state lives in the
//! session's working directory, so reusing that directory keeps the login.

pub mod client;
pub mod config;
pub mod driver;
pub mod janitor;
pub mod process;
pub mod protocol;

pub use {
    config::WhatsAppDriverConfig,
    driver::WhatsAppDriver,
    process::{find_sidecar_dir, is_sidecar_built},
};
