//! Metrics collection and export for switchboard.
//!
//! Library crates record through the `metrics` facade macros re-exported here,
//! behind their own `metrics` feature. With the `prometheus` feature the binary
//! installs a recorder and renders the text format for `/metrics`.
//!
//! ```rust,ignore
//! use switchboard_metrics::{counter, distribution as dist_metrics};
//!
//! counter!(dist_metrics::OFFERS_ISSUED_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
