use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use {
    axum::{
        Router,
        extract::State,
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    sqlx::sqlite::SqlitePoolOptions,
    switchboard_channels::{
        AutomationDriver, CredentialStore, InboundEnvelope, InboundSink, OutboundSender,
        SessionDirectory, SessionStore,
    },
    switchboard_common::EventBus,
    switchboard_config::SwitchboardConfig,
    switchboard_conversations::{
        ConversationStore, DepartmentStore, InMemoryConversationStore, OperatorStore,
        SqliteConversationStore,
    },
    switchboard_distribution::{DistributionService, SchedulerConfig},
    switchboard_routing::{BotRegistry, InboundQueue},
    switchboard_sessions::{
        InMemoryCredentialStore, InMemorySessionStore, RegistryConfig, SessionRegistry,
        SqliteCredentialStore, SqliteSessionStore,
    },
    switchboard_whatsapp::{WhatsAppDriver, WhatsAppDriverConfig},
    tokio::task::JoinHandle,
    tracing::{info, warn},
};

use crate::{api, notifier::TemplateNotifier, sse, state::AppState};

// ── Router ──────────────────────────────────────────────────────────────────

/// Build the HTTP router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/sessions",
            get(api::list_sessions).post(api::create_session),
        )
        .route(
            "/api/sessions/{session}",
            get(api::get_session)
                .put(api::update_session)
                .delete(api::delete_session),
        )
        .route("/api/sessions/{session}/connect", post(api::connect_session))
        .route(
            "/api/sessions/{session}/disconnect",
            post(api::disconnect_session),
        )
        .route("/api/sessions/{session}/qr", get(api::login_challenge))
        .route(
            "/api/sessions/{session}/default",
            post(api::set_default_session),
        )
        .route("/api/conversations/{id}", get(api::get_conversation))
        .route("/api/conversations/{id}/accept", post(api::accept_offer))
        .route("/api/conversations/{id}/decline", post(api::decline_offer))
        .route(
            "/api/conversations/{id}/resolve",
            post(api::resolve_conversation),
        )
        .route("/api/operators/{id}/status", post(api::set_operator_status))
        .route("/api/events", get(sse::events_handler));

    #[cfg(feature = "prometheus")]
    let router = router.route(
        "/metrics",
        get(crate::metrics_routes::prometheus_metrics_handler),
    );

    router.with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.registry.list_sessions().await.unwrap_or_default();
    let connected = sessions.iter().filter(|s| s.connected).count();
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "sessions": sessions.len(),
        "connected": connected,
    }))
}

// ── Wiring ──────────────────────────────────────────────────────────────────

/// Persistence backing the gateway.
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub operators: Arc<dyn OperatorStore>,
    pub departments: Arc<dyn DepartmentStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let conversations = Arc::new(InMemoryConversationStore::new());
        Self {
            sessions: Arc::new(InMemorySessionStore::new()),
            credentials: Arc::new(InMemoryCredentialStore::new()),
            conversations: conversations.clone(),
            operators: conversations.clone(),
            departments: conversations,
        }
    }

    /// Open the SQLite database at `url` and run every crate's migrations.
    pub async fn sqlite(url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().connect(url).await?;
        switchboard_sessions::run_migrations(&pool).await?;
        switchboard_conversations::run_migrations(&pool).await?;
        let conversations = Arc::new(SqliteConversationStore::new(pool.clone()));
        Ok(Self {
            sessions: Arc::new(SqliteSessionStore::new(pool.clone())),
            credentials: Arc::new(SqliteCredentialStore::new(pool)),
            conversations: conversations.clone(),
            operators: conversations.clone(),
            departments: conversations,
        })
    }
}

/// Inbound sink handed to the registry before the queue exists. The queue
/// depends on the router, which depends on the registry.
#[derive(Default)]
struct DeferredSink(OnceLock<InboundQueue>);

impl InboundSink for DeferredSink {
    fn push(&self, envelope: InboundEnvelope) {
        match self.0.get() {
            Some(queue) => queue.push(envelope),
            None => {
                warn!(session = %envelope.session, "inbound message before routing is ready, dropped");
            },
        }
    }
}

/// Every long-lived component, constructed once and owned here.
pub struct Gateway {
    pub state: AppState,
    pub queue: InboundQueue,
    notifier: Option<TemplateNotifier>,
    notifier_task: Option<JoinHandle<()>>,
}

impl Gateway {
    pub fn assemble(
        config: &SwitchboardConfig,
        data_dir: &Path,
        stores: Stores,
        drivers: Vec<Arc<dyn AutomationDriver>>,
        bots: BotRegistry,
    ) -> Self {
        let events = EventBus::default();
        let sink = Arc::new(DeferredSink::default());

        let mut registry = SessionRegistry::new(
            RegistryConfig::from_config(&config.sessions, data_dir),
            stores.sessions,
            stores.credentials,
            sink.clone(),
            events.clone(),
        );
        for driver in drivers {
            registry = registry.with_driver(driver);
        }
        let registry = Arc::new(registry);

        let distribution = DistributionService::new(
            SchedulerConfig::from(&config.distribution),
            stores.conversations.clone(),
            stores.operators.clone(),
            stores.departments,
            registry.clone(),
            events.clone(),
        );

        let router = switchboard_routing::Router::new(
            stores.conversations.clone(),
            registry.clone(),
            registry.clone(),
            events.clone(),
        )
        .with_bots(bots)
        .with_offer_trigger(distribution.clone());
        let queue = InboundQueue::new(Arc::new(router));
        if sink.0.set(queue.clone()).is_err() {
            warn!("inbound queue already installed");
        }

        let directory: Arc<dyn SessionDirectory> = registry.clone();
        let outbound: Arc<dyn OutboundSender> = registry.clone();
        let notifier = TemplateNotifier::new(directory, outbound);

        Self {
            state: AppState {
                registry,
                distribution,
                conversations: stores.conversations,
                operators: stores.operators,
                events,
                version: env!("CARGO_PKG_VERSION"),
                #[cfg(feature = "metrics")]
                metrics_handle: None,
            },
            queue,
            notifier: Some(notifier),
            notifier_task: None,
        }
    }

    /// Start background work: template notifier, session startup sweep and
    /// auto-connect, distribution loop.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if let Some(notifier) = self.notifier.take() {
            self.notifier_task = Some(notifier.spawn(&self.state.events));
        }
        self.state.registry.start().await?;
        self.state.distribution.start().await;
        Ok(())
    }

    pub fn app(&self) -> Router {
        build_app(self.state.clone())
    }

    pub async fn shutdown(&mut self) {
        self.state.distribution.stop().await;
        // Replies to in-flight inbound messages still need live sessions.
        self.queue.wait_idle().await;
        self.state.registry.shutdown().await;
        if let Some(task) = self.notifier_task.take() {
            task.abort();
        }
        info!("gateway stopped");
    }
}

/// Default database location under the data directory.
pub fn default_database_url(data_dir: &Path) -> String {
    format!(
        "sqlite:{}?mode=rwc",
        data_dir.join("switchboard.db").display()
    )
}

/// Load stores, wire every component and serve HTTP until Ctrl-C.
pub async fn start_gateway(
    config: SwitchboardConfig,
    bind: &str,
    port: u16,
    data_dir: PathBuf,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(&data_dir)?;

    #[cfg(feature = "metrics")]
    let metrics_handle = {
        let handle = switchboard_metrics::init_metrics(switchboard_metrics::MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: Vec::new(),
        })?;
        config.metrics.enabled.then_some(handle)
    };

    let db_url = config
        .database
        .url
        .clone()
        .unwrap_or_else(|| default_database_url(&data_dir));
    let stores = Stores::sqlite(&db_url).await?;

    let whatsapp = WhatsAppDriver::new(WhatsAppDriverConfig {
        sidecar_dir: config.sessions.sidecar_dir.clone(),
        startup_timeout: std::time::Duration::from_millis(config.sessions.startup_timeout_ms),
        ..Default::default()
    });
    let mut gateway = Gateway::assemble(
        &config,
        &data_dir,
        stores,
        vec![Arc::new(whatsapp)],
        BotRegistry::new(),
    );
    #[cfg(feature = "metrics")]
    {
        gateway.state.metrics_handle = metrics_handle;
    }
    gateway.start().await?;

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, data_dir = %data_dir.display(), "switchboard gateway listening");
    axum::serve(listener, gateway.app())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        })
        .await?;

    gateway.shutdown().await;
    Ok(())
}
