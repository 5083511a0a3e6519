use std::sync::Arc;

#[cfg(feature = "metrics")]
use switchboard_metrics::MetricsHandle;

use {
    switchboard_common::EventBus,
    switchboard_conversations::{ConversationStore, OperatorStore},
    switchboard_distribution::DistributionService,
    switchboard_sessions::SessionRegistry,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub distribution: Arc<DistributionService>,
    pub conversations: Arc<dyn ConversationStore>,
    pub operators: Arc<dyn OperatorStore>,
    pub events: EventBus,
    pub version: &'static str,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<MetricsHandle>,
}
