//! Metric name definitions.
//!
//! All metric names used across switchboard live here so dashboards have a
//! single place to look.

/// Channel session lifecycle metrics
pub mod sessions {
    /// Launch attempts, including retries
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "switchboard_session_connect_attempts_total";
    /// Connects that ended in the `error` state
    pub const CONNECT_FAILURES_TOTAL: &str = "switchboard_session_connect_failures_total";
    /// Sessions currently authenticated
    pub const CONNECTED: &str = "switchboard_sessions_connected";
    /// Login challenges issued by external clients
    pub const LOGIN_CHALLENGES_TOTAL: &str = "switchboard_session_login_challenges_total";
    /// Credential persistence attempts that failed
    pub const CREDENTIAL_SAVE_FAILURES_TOTAL: &str =
        "switchboard_session_credential_save_failures_total";
}

/// Distribution scheduler metrics
pub mod distribution {
    /// Offers written to conversations
    pub const OFFERS_ISSUED_TOTAL: &str = "switchboard_offers_issued_total";
    /// Offers reclaimed after expiry
    pub const OFFERS_EXPIRED_TOTAL: &str = "switchboard_offers_expired_total";
    /// Offers accepted by operators
    pub const OFFERS_ACCEPTED_TOTAL: &str = "switchboard_offers_accepted_total";
    /// Candidates skipped because no operator was eligible
    pub const CANDIDATES_SKIPPED_TOTAL: &str = "switchboard_distribution_candidates_skipped_total";
    /// Tick duration in seconds
    pub const TICK_DURATION_SECONDS: &str = "switchboard_distribution_tick_duration_seconds";
}

/// Inbound routing metrics
pub mod routing {
    /// Inbound events fully processed
    pub const INBOUND_PROCESSED_TOTAL: &str = "switchboard_inbound_processed_total";
    /// Inbound events whose processing failed
    pub const INBOUND_ERRORS_TOTAL: &str = "switchboard_inbound_errors_total";
    /// Events waiting in the ordering queue
    pub const QUEUE_DEPTH: &str = "switchboard_inbound_queue_depth";
    /// Conversation upserts recovered from a unique-key race
    pub const UPSERT_RACES_TOTAL: &str = "switchboard_conversation_upsert_races_total";
}

/// Histogram buckets
pub mod buckets {
    /// Scheduler ticks: mostly fast, long tail when stores are slow
    pub const TICK_DURATION: [f64; 9] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];
}
