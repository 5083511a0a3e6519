//! Config schema types (server, database, sessions, distribution, metrics).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sessions: SessionsConfig,
    pub distribution: DistributionConfig,
    pub metrics: MetricsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8480,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL. When unset, `<data_dir>/switchboard.db` is used.
    pub url: Option<String>,
}

/// Channel session lifecycle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Root for per-session persistent working directories. Each session gets
    /// `<data_dir>/<session>`; reusing it across restarts keeps the login.
    pub data_dir: Option<PathBuf>,
    /// Directory containing the automation sidecar (package.json + dist/).
    pub sidecar_dir: Option<PathBuf>,
    /// Seconds a login challenge stays valid. Defaults to 120.
    pub login_challenge_ttl_secs: u64,
    /// Launch attempts on resource-lock failures. Defaults to 3.
    pub connect_max_attempts: u32,
    /// Fixed back-off between launch attempts, in milliseconds.
    pub connect_retry_delay_ms: u64,
    /// Wipe the session working directory before the final launch attempt.
    /// Sacrifices the stored login.
    pub wipe_profile_on_final_retry: bool,
    /// Attempts to extract and store the credential after authentication.
    pub credential_save_attempts: u32,
    pub credential_save_delay_ms: u64,
    /// How long a freshly spawned client must stay alive to count as started.
    pub startup_timeout_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sidecar_dir: None,
            login_challenge_ttl_secs: 120,
            connect_max_attempts: 3,
            connect_retry_delay_ms: 2_000,
            wipe_profile_on_final_retry: false,
            credential_save_attempts: 3,
            credential_save_delay_ms: 2_000,
            startup_timeout_ms: 1_500,
        }
    }
}

impl SessionsConfig {
    pub fn login_challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.login_challenge_ttl_secs)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn credential_save_delay(&self) -> Duration {
        Duration::from_millis(self.credential_save_delay_ms)
    }
}

/// Fair distribution scheduler parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Whether the periodic tick runs. Defaults to true.
    pub enabled: bool,
    pub tick_interval_secs: u64,
    /// Lifetime of an unanswered offer. Defaults to 180 (3 minutes).
    pub offer_duration_secs: u64,
    /// Window during which the operator who resolved a conversation is
    /// skipped when it is offered again. Defaults to 300 (5 minutes).
    pub cooldown_secs: u64,
    /// Candidate conversations examined per tick. Defaults to 25.
    pub batch_size: u32,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 10,
            offer_duration_secs: 180,
            cooldown_secs: 300,
            batch_size: 25,
        }
    }
}

impl DistributionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn offer_duration_ms(&self) -> i64 {
        (self.offer_duration_secs as i64) * 1_000
    }

    pub fn cooldown_ms(&self) -> i64 {
        (self.cooldown_secs as i64) * 1_000
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}
