//! Semantic validation of a loaded configuration.
//!
//! Parsing already rejects malformed files; this pass catches values that
//! parse fine but would stall or misbehave at runtime.

use crate::schema::SwitchboardConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "distribution.batch_size"
    pub path: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn error(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path,
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path,
            message: message.into(),
        });
    }
}

pub fn validate(config: &SwitchboardConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let sessions = &config.sessions;
    if sessions.connect_max_attempts == 0 {
        result.error(
            "sessions.connect_max_attempts",
            "must be at least 1 or no session can ever connect",
        );
    }
    if sessions.credential_save_attempts == 0 {
        result.error(
            "sessions.credential_save_attempts",
            "must be at least 1 or credentials are never stored",
        );
    }
    if sessions.login_challenge_ttl_secs == 0 {
        result.error(
            "sessions.login_challenge_ttl_secs",
            "a zero TTL expires every login challenge immediately",
        );
    }
    if sessions.wipe_profile_on_final_retry {
        result.warning(
            "sessions.wipe_profile_on_final_retry",
            "the final connect retry deletes the stored login; sessions may need a new QR scan",
        );
    }

    let dist = &config.distribution;
    if dist.tick_interval_secs == 0 {
        result.error("distribution.tick_interval_secs", "must be greater than 0");
    }
    if dist.offer_duration_secs == 0 {
        result.error(
            "distribution.offer_duration_secs",
            "offers would expire the moment they are issued",
        );
    }
    if dist.batch_size == 0 {
        result.error("distribution.batch_size", "must be greater than 0");
    }
    if dist.enabled && dist.offer_duration_secs < dist.tick_interval_secs {
        result.warning(
            "distribution.offer_duration_secs",
            format!(
                "offers ({}s) are shorter than the tick interval ({}s); expiry is only noticed on the next tick",
                dist.offer_duration_secs, dist.tick_interval_secs
            ),
        );
    }

    if config.server.port == 0 {
        result.warning("server.port", "port 0 binds a random port");
    }

    result
}
