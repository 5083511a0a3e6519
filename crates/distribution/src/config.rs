use std::time::Duration;

use switchboard_config::DistributionConfig;

/// Runtime parameters of the scheduler, resolved from configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval: Duration,
    pub offer_duration_ms: i64,
    pub cooldown_ms: i64,
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&DistributionConfig::default())
    }
}

impl From<&DistributionConfig> for SchedulerConfig {
    fn from(config: &DistributionConfig) -> Self {
        Self {
            enabled: config.enabled,
            tick_interval: config.tick_interval(),
            offer_duration_ms: config.offer_duration_ms(),
            cooldown_ms: config.cooldown_ms(),
            batch_size: config.batch_size as usize,
        }
    }
}
