//! HTTP surface and process wiring for switchboard.
//!
//! [`Gateway::assemble`] builds every long-lived component once (session
//! registry, inbound queue and router, distribution scheduler, template
//! notifier) and [`build_app`] exposes them over a thin JSON + SSE API.

pub mod api;
pub mod error;
#[cfg(feature = "prometheus")]
pub mod metrics_routes;
pub mod notifier;
pub mod server;
pub mod sse;
pub mod state;

pub use {
    error::{ApiError, ApiResult},
    server::{Gateway, Stores, build_app, default_database_url, start_gateway},
    state::AppState,
};
