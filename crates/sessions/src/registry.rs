//! Session registry: owns the runtime state of every configured session and
//! drives the connect / disconnect lifecycle of their external clients.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    secrecy::SecretString,
    switchboard_channels::{
        AutomationDriver, ChannelSessionConfig, ClientEvent, ClientHandle, ClientState,
        ConnectionKind, ConnectionStatus, CredentialStore, InboundEnvelope, InboundSink,
        LaunchRequest, OutboundSender, SessionDirectory, SessionStore,
    },
    switchboard_common::{DomainEvent, EventBus, time::now_ms},
    switchboard_config::SessionsConfig,
    tokio::{sync::mpsc, time::Instant},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, gauge, sessions as session_metrics};

use crate::{
    error::{Context, Error, Result},
    runtime::{LoginChallenge, SessionInfo, SessionRuntime},
    worker,
};

const CLIENT_EVENT_BUFFER: usize = 256;

/// Lifecycle parameters for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Root of the per-session working directories.
    pub data_dir: PathBuf,
    pub login_challenge_ttl: Duration,
    pub connect_max_attempts: u32,
    pub connect_retry_delay: Duration,
    pub wipe_profile_on_final_retry: bool,
    pub credential_save_attempts: u32,
    pub credential_save_delay: Duration,
}

impl RegistryConfig {
    /// Build from the `[sessions]` config section. Profiles default to
    /// `<data_dir>/sessions`.
    pub fn from_config(cfg: &SessionsConfig, data_dir: &Path) -> Self {
        Self {
            data_dir: cfg
                .data_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("sessions")),
            login_challenge_ttl: cfg.login_challenge_ttl(),
            connect_max_attempts: cfg.connect_max_attempts,
            connect_retry_delay: cfg.connect_retry_delay(),
            wipe_profile_on_final_retry: cfg.wipe_profile_on_final_retry,
            credential_save_attempts: cfg.credential_save_attempts,
            credential_save_delay: cfg.credential_save_delay(),
        }
    }
}

/// Supervisor of all channel sessions.
///
/// Constructed once at startup and shared as `Arc<SessionRegistry>`.
pub struct SessionRegistry {
    config: RegistryConfig,
    store: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    drivers: HashMap<ConnectionKind, Arc<dyn AutomationDriver>>,
    inbound: Arc<dyn InboundSink>,
    events: EventBus,
    runtimes: Mutex<HashMap<String, SessionRuntime>>,
    generations: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialStore>,
        inbound: Arc<dyn InboundSink>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            credentials,
            drivers: HashMap::new(),
            inbound,
            events,
            runtimes: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Register the driver for its connection kind, replacing any previous one.
    #[must_use]
    pub fn with_driver(mut self, driver: Arc<dyn AutomationDriver>) -> Self {
        self.drivers.insert(driver.kind(), driver);
        self
    }

    /// Release stale locks for every configured session, then connect the
    /// ones flagged `auto_connect` in the background.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let configs = self.store.list().await?;
        for cfg in &configs {
            if let Ok(driver) = self.driver(cfg.kind) {
                self.cleanup(driver.as_ref(), &cfg.session, &self.work_dir(&cfg.session))
                    .await;
            }
        }

        let auto: Vec<String> = configs
            .into_iter()
            .filter(|c| c.auto_connect)
            .map(|c| c.session)
            .collect();
        info!(
            auto_connect = auto.len(),
            drivers = self.drivers.len(),
            "session registry started"
        );

        for session in auto {
            let registry = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = registry.connect(&session).await {
                    warn!(session = %session, error = %e, "auto-connect failed");
                }
            });
        }
        Ok(())
    }

    /// Disconnect every session with runtime state.
    pub async fn shutdown(&self) {
        let sessions: Vec<String> = self.lock_runtimes().keys().cloned().collect();
        for session in sessions {
            if let Err(e) = self.disconnect(&session).await {
                warn!(session = %session, error = %e, "disconnect during shutdown failed");
            }
        }
        info!("session registry stopped");
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Connect a session. A no-op when it is already connected or a connect
    /// is in progress.
    pub async fn connect(self: &Arc<Self>, session: &str) -> Result<()> {
        let config = self.config_for(session).await?;
        let driver = self.driver(config.kind)?;

        let generation = {
            let mut runtimes = self.lock_runtimes();
            if let Some(rt) = runtimes.get(session)
                && (rt.connecting || rt.status.is_pending() || rt.is_connected())
            {
                debug!(session, status = %rt.status, "connect ignored, session already active");
                return Ok(());
            }

            let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
            let rt = runtimes
                .entry(session.to_string())
                .or_insert_with(|| SessionRuntime::new(generation));
            if let Some(pump) = rt.pump.take() {
                pump.abort();
            }
            rt.generation = generation;
            rt.connecting = true;
            rt.handle = None;
            rt.challenge = None;
            rt.ever_authenticated = false;
            rt.last_error = None;
            self.transition(session, rt, ConnectionStatus::Connecting);
            generation
        };
        info!(session, generation, "connecting session");

        match self
            .launch_with_retry(&config, driver.as_ref(), generation)
            .await
        {
            Ok(Some((handle, events))) => {
                let accepted = {
                    let mut runtimes = self.lock_runtimes();
                    match runtimes.get_mut(session) {
                        Some(rt) if rt.generation == generation => {
                            rt.handle = Some(handle.clone());
                            rt.connecting = false;
                            rt.pump = Some(tokio::spawn(worker::pump_events(
                                Arc::downgrade(self),
                                session.to_string(),
                                generation,
                                events,
                            )));
                            true
                        },
                        _ => false,
                    }
                };
                if !accepted {
                    debug!(session, "session torn down during launch, closing new client");
                    worker::close_quietly(session, &handle).await;
                }
                Ok(())
            },
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(session, error = %e, "session connect failed");
                #[cfg(feature = "metrics")]
                counter!(session_metrics::CONNECT_FAILURES_TOTAL).increment(1);

                let mut runtimes = self.lock_runtimes();
                if let Some(rt) = runtimes.get_mut(session)
                    && rt.generation == generation
                {
                    rt.connecting = false;
                    rt.last_error = Some(e.to_string());
                    self.transition(session, rt, ConnectionStatus::Error);
                    self.events.publish(DomainEvent::SessionFailed {
                        session: session.to_string(),
                        error: e.to_string(),
                    });
                }
                Err(e)
            },
        }
    }

    /// Close the client and drop all runtime state. Always ends `disconnected`.
    pub async fn disconnect(&self, session: &str) -> Result<()> {
        let taken = self.lock_runtimes().remove(session);
        let had_runtime = taken.is_some();

        if let Some(mut rt) = taken {
            if let Some(pump) = rt.pump.take() {
                pump.abort();
            }
            if let Some(handle) = rt.handle.take() {
                worker::close_quietly(session, &handle).await;
            }
            if rt.status != ConnectionStatus::Disconnected {
                self.events.publish(DomainEvent::SessionStatusChanged {
                    session: session.to_string(),
                    status: ConnectionStatus::Disconnected.to_string(),
                });
                self.events.publish(DomainEvent::SessionDisconnected {
                    session: session.to_string(),
                    reason: None,
                });
            }
            self.record_connected();
        }

        let config = self.store.get_by_session(session).await?;
        if config.is_none() && !had_runtime {
            return Err(Error::unknown_session(session));
        }
        if let Some(cfg) = config
            && let Ok(driver) = self.driver(cfg.kind)
            && let Err(e) = driver
                .release_locks(session, &self.work_dir(session))
                .await
        {
            warn!(session, error = %e, "failed to release locks after disconnect");
        }

        info!(session, "session disconnected");
        Ok(())
    }

    /// Current login challenge, if one was issued within the TTL.
    pub fn get_login_challenge(&self, session: &str) -> Option<LoginChallenge> {
        let runtimes = self.lock_runtimes();
        let (challenge, issued) = runtimes.get(session)?.challenge.as_ref()?;
        (issued.elapsed() < self.config.login_challenge_ttl).then(|| challenge.clone())
    }

    pub fn status(&self, session: &str) -> ConnectionStatus {
        self.lock_runtimes()
            .get(session)
            .map(|rt| rt.status)
            .unwrap_or_default()
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let configs = self.store.list().await?;
        let runtimes = self.lock_runtimes();
        Ok(configs
            .iter()
            .map(|cfg| {
                let rt = runtimes.get(&cfg.session);
                SessionInfo::project(cfg, rt, self.challenge_live(rt))
            })
            .collect())
    }

    pub async fn get_session_info(&self, session: &str) -> Result<SessionInfo> {
        let config = self.config_for(session).await?;
        let runtimes = self.lock_runtimes();
        let rt = runtimes.get(session);
        Ok(SessionInfo::project(&config, rt, self.challenge_live(rt)))
    }

    pub async fn send_text(&self, session: &str, to: &str, text: &str) -> Result<()> {
        let handle = self
            .lock_runtimes()
            .get(session)
            .filter(|rt| rt.is_connected())
            .and_then(|rt| rt.handle.clone())
            .ok_or_else(|| Error::not_connected(session))?;
        handle.send_text(to, text).await.map_err(Error::from)
    }

    /// Acknowledge an inbound message as read. A no-op when the session is not
    /// connected or its client cannot mark messages.
    pub async fn mark_read(&self, session: &str, contact_id: &str, message_id: &str) -> Result<()> {
        let mark_read = self
            .lock_runtimes()
            .get(session)
            .filter(|rt| rt.is_connected())
            .and_then(|rt| rt.handle.as_ref()?.capabilities().mark_read.clone());
        let Some(mark_read) = mark_read else {
            return Ok(());
        };
        mark_read(contact_id.to_string(), message_id.to_string())
            .await
            .map_err(Error::from)
    }

    // ── Administration ──────────────────────────────────────────────────

    /// Store a new session. The first session created becomes the default.
    pub async fn create_session(
        &self,
        mut config: ChannelSessionConfig,
    ) -> Result<ChannelSessionConfig> {
        config.validate()?;
        if self.store.get_by_session(&config.session).await?.is_some() {
            return Err(Error::AlreadyExists {
                session: config.session,
            });
        }
        if config.id.is_empty() {
            config.id = uuid::Uuid::new_v4().to_string();
        }
        let now = now_ms();
        config.created_at = now;
        config.updated_at = now;

        let make_default = config.is_default || self.store.list().await?.is_empty();
        config.is_default = false;
        self.store.upsert(config.clone()).await?;
        if make_default {
            self.store.set_default(&config.id).await?;
            config.is_default = true;
        }
        info!(session = %config.session, id = %config.id, kind = config.kind.as_str(), "session created");
        Ok(config)
    }

    /// Replace a session's configuration. The session key is immutable.
    pub async fn update_session(
        &self,
        mut config: ChannelSessionConfig,
    ) -> Result<ChannelSessionConfig> {
        config.validate()?;
        let existing = self
            .store
            .get(&config.id)
            .await?
            .ok_or_else(|| Error::unknown_session(&config.id))?;
        if existing.session != config.session {
            return Err(Error::invalid_input("the session key of a session cannot change"));
        }
        config.created_at = existing.created_at;
        config.updated_at = now_ms();
        config.is_default = existing.is_default;
        self.store.upsert(config.clone()).await?;
        debug!(session = %config.session, "session updated");
        Ok(config)
    }

    /// Log out, disconnect, forget stored credentials and delete the
    /// configuration.
    pub async fn delete_session(&self, session: &str) -> Result<()> {
        let config = self.config_for(session).await?;
        let handle = self
            .lock_runtimes()
            .get(session)
            .filter(|rt| rt.is_connected())
            .and_then(|rt| rt.handle.clone());
        if let Some(handle) = handle {
            worker::logout_quietly(session, &handle).await;
        }
        if let Err(e) = self.disconnect(session).await {
            warn!(session, error = %e, "disconnect before delete failed");
        }
        if let Err(e) = self.credentials.remove(session).await {
            warn!(session, error = %e, "failed to remove credentials");
        }
        self.store.delete(&config.id).await?;
        info!(session, "session deleted");
        Ok(())
    }

    pub async fn set_default(&self, session: &str) -> Result<()> {
        let config = self.config_for(session).await?;
        self.store.set_default(&config.id).await?;
        info!(session, "default session changed");
        Ok(())
    }

    pub async fn default_session(&self) -> Result<Option<ChannelSessionConfig>> {
        Ok(self.store.list().await?.into_iter().find(|c| c.is_default))
    }

    // ── Client events ───────────────────────────────────────────────────

    /// Apply one client event. Returns `false` when the pump should stop.
    pub(crate) async fn handle_client_event(
        self: &Arc<Self>,
        session: &str,
        generation: u64,
        event: ClientEvent,
    ) -> bool {
        match event {
            ClientEvent::LoginChallenge { code } => {
                let mut runtimes = self.lock_runtimes();
                let Some(rt) = current_mut(&mut runtimes, session, generation) else {
                    return false;
                };
                let issued_at_ms = now_ms();
                let expires_at_ms =
                    issued_at_ms + self.config.login_challenge_ttl.as_millis() as i64;
                rt.challenge = Some((
                    LoginChallenge {
                        code: code.clone(),
                        issued_at_ms,
                        expires_at_ms,
                    },
                    Instant::now(),
                ));
                self.transition(session, rt, ConnectionStatus::Qrcode);
                self.events.publish(DomainEvent::LoginChallengeIssued {
                    session: session.to_string(),
                    code,
                    expires_at_ms,
                });
                #[cfg(feature = "metrics")]
                counter!(session_metrics::LOGIN_CHALLENGES_TOTAL).increment(1);
                debug!(session, "login challenge issued");
                true
            },
            ClientEvent::StateChanged(ClientState::Opening) => {
                let mut runtimes = self.lock_runtimes();
                let Some(rt) = current_mut(&mut runtimes, session, generation) else {
                    return false;
                };
                self.transition(session, rt, ConnectionStatus::Connecting);
                true
            },
            ClientEvent::StateChanged(ClientState::Authenticated) => {
                let handle = {
                    let mut runtimes = self.lock_runtimes();
                    let Some(rt) = current_mut(&mut runtimes, session, generation) else {
                        return false;
                    };
                    rt.ever_authenticated = true;
                    rt.connecting = false;
                    rt.challenge = None;
                    rt.last_error = None;
                    if self.transition(session, rt, ConnectionStatus::Connected) {
                        self.events.publish(DomainEvent::SessionConnected {
                            session: session.to_string(),
                        });
                        info!(session, "session connected");
                    }
                    rt.handle.clone()
                };
                self.record_connected();
                if let Some(handle) = handle {
                    self.spawn_credential_persistence(session, generation, handle);
                }
                true
            },
            ClientEvent::StateChanged(ClientState::Disconnected { reason }) => {
                self.teardown(session, generation, ConnectionStatus::Disconnected, reason)
                    .await;
                false
            },
            ClientEvent::StateChanged(ClientState::LoggedOut) => {
                if self.is_current(session, generation) {
                    warn!(session, "session logged out from the device, removing credentials");
                    if let Err(e) = self.credentials.remove(session).await {
                        warn!(session, error = %e, "failed to remove credentials");
                    }
                }
                self.teardown(
                    session,
                    generation,
                    ConnectionStatus::Disconnected,
                    Some("logged out".into()),
                )
                .await;
                false
            },
            ClientEvent::Inbound(message) => {
                if !self.is_current(session, generation) {
                    return false;
                }
                self.inbound.push(InboundEnvelope {
                    session: session.to_string(),
                    message,
                });
                true
            },
            ClientEvent::Exited {
                code,
                reason,
                crashed,
            } => {
                let status = if crashed {
                    ConnectionStatus::Error
                } else {
                    ConnectionStatus::Disconnected
                };
                let reason = reason.or_else(|| code.map(|c| format!("client exited with code {c}")));
                self.teardown(session, generation, status, reason).await;
                false
            },
        }
    }

    pub(crate) async fn client_stream_closed(&self, session: &str, generation: u64) {
        self.teardown(
            session,
            generation,
            ConnectionStatus::Disconnected,
            Some("client event stream closed".into()),
        )
        .await;
    }

    // ── Internal ────────────────────────────────────────────────────────

    /// Launch the client, retrying resource-busy failures with cleanup in
    /// between. `Ok(None)` means the connect was superseded by a disconnect.
    async fn launch_with_retry(
        &self,
        config: &ChannelSessionConfig,
        driver: &dyn AutomationDriver,
        generation: u64,
    ) -> Result<Option<(ClientHandle, mpsc::Receiver<ClientEvent>)>> {
        let session = config.session.as_str();
        let work_dir = self.work_dir(session);
        let max_attempts = self.config.connect_max_attempts.max(1);
        let mut wiped = false;

        for attempt in 1..=max_attempts {
            if !self.is_current(session, generation) {
                debug!(session, attempt, "connect superseded");
                return Ok(None);
            }
            let final_attempt = attempt == max_attempts;

            self.cleanup(driver, session, &work_dir).await;
            if attempt > 1 && final_attempt && self.config.wipe_profile_on_final_retry {
                warn!(session, "wiping session profile before the final connect attempt");
                match driver.wipe_work_dir(&work_dir).await {
                    Ok(()) => wiped = true,
                    Err(e) => warn!(session, error = %e, "failed to wipe session profile"),
                }
            }

            tokio::fs::create_dir_all(&work_dir)
                .await
                .with_context(|| format!("cannot create {}", work_dir.display()))?;
            let token = if wiped {
                None
            } else {
                self.stored_token(session).await
            };

            let (tx, rx) = mpsc::channel(CLIENT_EVENT_BUFFER);
            let request = LaunchRequest {
                session: session.to_string(),
                work_dir: work_dir.clone(),
                token,
                events: tx,
            };

            #[cfg(feature = "metrics")]
            counter!(session_metrics::CONNECT_ATTEMPTS_TOTAL).increment(1);
            debug!(session, attempt, max_attempts, "launching client");

            match driver.launch(request).await {
                Ok(handle) => {
                    info!(session, attempt, pid = ?handle.pid(), "client launched");
                    return Ok(Some((handle, rx)));
                },
                Err(e) if e.is_resource_busy() && !final_attempt => {
                    warn!(
                        session,
                        attempt,
                        max_attempts,
                        error = %e,
                        "client resources busy, retrying after cleanup"
                    );
                    tokio::time::sleep(self.config.connect_retry_delay).await;
                },
                Err(e) if e.is_resource_busy() => {
                    return Err(Error::resource_busy(format!(
                        "{e} (after {max_attempts} attempts)"
                    )));
                },
                Err(e) => return Err(Error::launch(e.to_string())),
            }
        }

        Err(Error::resource_busy("connect attempts exhausted"))
    }

    /// Best-effort removal of stale locks and orphaned processes.
    async fn cleanup(&self, driver: &dyn AutomationDriver, session: &str, work_dir: &Path) {
        if let Err(e) = driver.release_locks(session, work_dir).await {
            warn!(session, error = %e, "failed to release stale locks");
        }
        match driver.kill_orphans(session, work_dir).await {
            Ok(0) => {},
            Ok(killed) => info!(session, killed, "killed orphaned client processes"),
            Err(e) => warn!(session, error = %e, "failed to kill orphaned client processes"),
        }
    }

    async fn teardown(
        &self,
        session: &str,
        generation: u64,
        status: ConnectionStatus,
        reason: Option<String>,
    ) {
        let handle = {
            let mut runtimes = self.lock_runtimes();
            let Some(rt) = current_mut(&mut runtimes, session, generation) else {
                return;
            };
            rt.connecting = false;
            rt.challenge = None;
            rt.ever_authenticated = false;
            rt.pump = None;
            if status == ConnectionStatus::Error {
                let error = reason.clone().unwrap_or_else(|| "client crashed".into());
                rt.last_error = Some(error.clone());
                self.transition(session, rt, ConnectionStatus::Error);
                self.events.publish(DomainEvent::SessionFailed {
                    session: session.to_string(),
                    error,
                });
            } else {
                self.transition(session, rt, ConnectionStatus::Disconnected);
                self.events.publish(DomainEvent::SessionDisconnected {
                    session: session.to_string(),
                    reason: reason.clone(),
                });
            }
            rt.handle.take()
        };
        warn!(session, status = %status, reason = ?reason, "client went away");

        if let Some(handle) = handle {
            worker::close_quietly(session, &handle).await;
        }
        if let Ok(Some(cfg)) = self.store.get_by_session(session).await
            && let Ok(driver) = self.driver(cfg.kind)
            && let Err(e) = driver
                .release_locks(session, &self.work_dir(session))
                .await
        {
            warn!(session, error = %e, "failed to release locks after client exit");
        }
        self.record_connected();
    }

    fn spawn_credential_persistence(
        self: &Arc<Self>,
        session: &str,
        generation: u64,
        handle: ClientHandle,
    ) {
        let registry = Arc::downgrade(self);
        let credentials = Arc::clone(&self.credentials);
        let attempts = self.config.credential_save_attempts;
        let delay = self.config.credential_save_delay;
        let session = session.to_string();
        tokio::spawn(async move {
            worker::persist_credentials(credentials, &session, &handle, attempts, delay, || {
                registry
                    .upgrade()
                    .is_some_and(|r| r.is_current(&session, generation))
            })
            .await;
        });
    }

    async fn stored_token(&self, session: &str) -> Option<SecretString> {
        match self.credentials.get(session).await {
            Ok(token) => token,
            Err(e) => {
                warn!(session, error = %e, "failed to read stored credentials, launching without");
                None
            },
        }
    }

    /// Apply a status change if it is an edge of the lifecycle graph.
    fn transition(&self, session: &str, rt: &mut SessionRuntime, next: ConnectionStatus) -> bool {
        if rt.status == next {
            return false;
        }
        if !rt.status.can_transition_to(next) {
            debug!(session, from = %rt.status, to = %next, "ignoring invalid status transition");
            return false;
        }
        debug!(session, from = %rt.status, to = %next, "session status changed");
        rt.status = next;
        self.events.publish(DomainEvent::SessionStatusChanged {
            session: session.to_string(),
            status: next.to_string(),
        });
        true
    }

    fn challenge_live(&self, rt: Option<&SessionRuntime>) -> bool {
        rt.and_then(|r| r.challenge.as_ref())
            .is_some_and(|(_, issued)| issued.elapsed() < self.config.login_challenge_ttl)
    }

    fn is_current(&self, session: &str, generation: u64) -> bool {
        self.lock_runtimes()
            .get(session)
            .is_some_and(|rt| rt.generation == generation)
    }

    fn record_connected(&self) {
        #[cfg(feature = "metrics")]
        {
            let connected = self
                .lock_runtimes()
                .values()
                .filter(|rt| rt.is_connected())
                .count();
            gauge!(session_metrics::CONNECTED).set(connected as f64);
        }
    }

    fn driver(&self, kind: ConnectionKind) -> Result<Arc<dyn AutomationDriver>> {
        self.drivers.get(&kind).cloned().ok_or_else(|| {
            Error::unavailable(format!("no driver registered for {}", kind.as_str()))
        })
    }

    async fn config_for(&self, session: &str) -> Result<ChannelSessionConfig> {
        self.store
            .get_by_session(session)
            .await?
            .ok_or_else(|| Error::unknown_session(session))
    }

    fn work_dir(&self, session: &str) -> PathBuf {
        self.config.data_dir.join(session)
    }

    fn lock_runtimes(&self) -> MutexGuard<'_, HashMap<String, SessionRuntime>> {
        self.runtimes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn current_mut<'a>(
    runtimes: &'a mut HashMap<String, SessionRuntime>,
    session: &str,
    generation: u64,
) -> Option<&'a mut SessionRuntime> {
    runtimes
        .get_mut(session)
        .filter(|rt| rt.generation == generation)
}

#[async_trait]
impl SessionDirectory for SessionRegistry {
    async fn by_session(&self, session: &str) -> Option<ChannelSessionConfig> {
        self.store.get_by_session(session).await.ok().flatten()
    }

    async fn by_id(&self, id: &str) -> Option<ChannelSessionConfig> {
        self.store.get(id).await.ok().flatten()
    }
}

#[async_trait]
impl OutboundSender for SessionRegistry {
    async fn send_text(&self, session: &str, to: &str, text: &str) -> switchboard_channels::Result<()> {
        SessionRegistry::send_text(self, session, to, text)
            .await
            .map_err(Into::into)
    }

    async fn mark_read(
        &self,
        session: &str,
        contact_id: &str,
        message_id: &str,
    ) -> switchboard_channels::Result<()> {
        SessionRegistry::mark_read(self, session, contact_id, message_id)
            .await
            .map_err(Into::into)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store_memory::{InMemoryCredentialStore, InMemorySessionStore},
        futures::future::BoxFuture,
        secrecy::ExposeSecret,
        std::sync::atomic::AtomicUsize,
        switchboard_channels::{ClientCapabilities, Error as ChannelError, InboundMessage},
    };

    type ChannelResult<T> = switchboard_channels::Result<T>;

    #[derive(Default)]
    struct RecordingSink {
        pushed: Mutex<Vec<InboundEnvelope>>,
    }

    impl InboundSink for RecordingSink {
        fn push(&self, envelope: InboundEnvelope) {
            self.pushed.lock().unwrap().push(envelope);
        }
    }

    /// Scriptable driver: counts calls and hands the test the event sender of
    /// every launched client.
    #[derive(Default)]
    struct FakeDriver {
        kind_managed: bool,
        qr_on_launch: bool,
        close_fails: bool,
        hard_failure: bool,
        launch_delay: Duration,
        busy_launches: AtomicUsize,
        launches: AtomicUsize,
        lock_releases: AtomicUsize,
        orphan_kills: AtomicUsize,
        wipes: AtomicUsize,
        tokens_seen: Mutex<Vec<Option<String>>>,
        senders: Mutex<Vec<mpsc::Sender<ClientEvent>>>,
        sent: Arc<Mutex<Vec<(String, String)>>>,
        logouts: Arc<AtomicUsize>,
        reads: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl FakeDriver {
        fn sender(&self, index: usize) -> mpsc::Sender<ClientEvent> {
            self.senders.lock().unwrap()[index].clone()
        }

        async fn emit(&self, event: ClientEvent) {
            let tx = self.senders.lock().unwrap().last().cloned().unwrap();
            tx.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl AutomationDriver for FakeDriver {
        fn kind(&self) -> ConnectionKind {
            if self.kind_managed {
                ConnectionKind::ManagedApi
            } else {
                ConnectionKind::NativeAutomation
            }
        }

        async fn launch(&self, request: LaunchRequest) -> ChannelResult<ClientHandle> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if !self.launch_delay.is_zero() {
                tokio::time::sleep(self.launch_delay).await;
            }
            self.tokens_seen
                .lock()
                .unwrap()
                .push(request.token.as_ref().map(|t| t.expose_secret().clone()));

            if self.busy_launches.load(Ordering::SeqCst) > 0 {
                self.busy_launches.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelError::resource_busy("profile is locked"));
            }
            if self.hard_failure {
                return Err(ChannelError::unavailable("runtime not installed"));
            }
            if self.qr_on_launch {
                request
                    .events
                    .send(ClientEvent::LoginChallenge {
                        code: "qr-1".into(),
                    })
                    .await
                    .unwrap();
            }
            self.senders.lock().unwrap().push(request.events.clone());

            let sent = Arc::clone(&self.sent);
            let logouts = Arc::clone(&self.logouts);
            let reads = Arc::clone(&self.reads);
            let close_fails = self.close_fails;
            let export: switchboard_channels::client::ExportTokenFn =
                Arc::new(|| -> BoxFuture<'static, ChannelResult<Option<SecretString>>> {
                    Box::pin(async { Ok(Some(SecretString::new("token-1".into()))) })
                });
            Ok(ClientHandle::new(
                Arc::new(move |to, text| -> BoxFuture<'static, ChannelResult<()>> {
                    sent.lock().unwrap().push((to, text));
                    Box::pin(async { Ok(()) })
                }),
                Arc::new(move || -> BoxFuture<'static, ChannelResult<()>> {
                    Box::pin(async move {
                        if close_fails {
                            Err(ChannelError::unavailable("client already gone"))
                        } else {
                            Ok(())
                        }
                    })
                }),
            )
            .with_capabilities(ClientCapabilities {
                export_token: Some(export),
                logout: Some(Arc::new(move || -> BoxFuture<'static, ChannelResult<()>> {
                    logouts.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(()) })
                })),
                mark_read: Some(Arc::new(
                    move |contact, id| -> BoxFuture<'static, ChannelResult<()>> {
                        reads.lock().unwrap().push((contact, id));
                        Box::pin(async { Ok(()) })
                    },
                )),
            }))
        }

        async fn release_locks(&self, _session: &str, _work_dir: &Path) -> ChannelResult<()> {
            self.lock_releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn kill_orphans(&self, _session: &str, _work_dir: &Path) -> ChannelResult<usize> {
            self.orphan_kills.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        async fn wipe_work_dir(&self, _work_dir: &Path) -> ChannelResult<()> {
            self.wipes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        registry: Arc<SessionRegistry>,
        driver: Arc<FakeDriver>,
        sink: Arc<RecordingSink>,
        store: Arc<InMemorySessionStore>,
        credentials: Arc<InMemoryCredentialStore>,
        events: EventBus,
        _dir: tempfile::TempDir,
    }

    async fn harness(driver: FakeDriver, tweak: impl FnOnce(&mut RegistryConfig)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RegistryConfig::from_config(&SessionsConfig::default(), dir.path());
        tweak(&mut config);

        let store = Arc::new(InMemorySessionStore::new());
        store
            .upsert(ChannelSessionConfig::new(
                "id-s1",
                "s1",
                ConnectionKind::NativeAutomation,
            ))
            .await
            .unwrap();
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let sink = Arc::new(RecordingSink::default());
        let events = EventBus::default();
        let driver = Arc::new(driver);
        let registry = Arc::new(
            SessionRegistry::new(
                config,
                store.clone(),
                credentials.clone(),
                sink.clone(),
                events.clone(),
            )
            .with_driver(driver.clone()),
        );
        Harness {
            registry,
            driver,
            sink,
            store,
            credentials,
            events,
            _dir: dir,
        }
    }

    async fn wait_for_status(registry: &SessionRegistry, session: &str, want: ConnectionStatus) {
        for _ in 0..200 {
            if registry.status(session) == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "session {session} never reached {want}, stuck at {}",
            registry.status(session)
        );
    }

    fn inbound(id: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.into(),
            contact_id: "5511999".into(),
            contact_name: None,
            channel_kind: ConnectionKind::NativeAutomation,
            body: "hello".into(),
            timestamp_ms: 1,
            from_me: false,
            is_group: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_walks_login_challenge_then_connected() {
        let h = harness(
            FakeDriver {
                qr_on_launch: true,
                ..Default::default()
            },
            |_| {},
        )
        .await;
        let mut rx = h.events.subscribe();

        h.registry.connect("s1").await.unwrap();
        wait_for_status(&h.registry, "s1", ConnectionStatus::Qrcode).await;

        let challenge = h.registry.get_login_challenge("s1").unwrap();
        assert_eq!(challenge.code, "qr-1");
        let info = h.registry.get_session_info("s1").await.unwrap();
        assert!(
            !info.connected,
            "a handle without authentication is not connected"
        );
        assert!(info.has_login_challenge);

        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;

        let info = h.registry.get_session_info("s1").await.unwrap();
        assert!(info.connected);
        assert!(h.registry.get_login_challenge("s1").is_none());

        for _ in 0..100 {
            if h.credentials.get("s1").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let token = h.credentials.get("s1").await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "token-1");

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&"login_challenge_issued"));
        assert!(names.contains(&"session_connected"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let h = harness(
            FakeDriver {
                launch_delay: Duration::from_millis(50),
                ..Default::default()
            },
            |_| {},
        )
        .await;

        let (a, b) = tokio::join!(h.registry.connect("s1"), h.registry.connect("s1"));
        a.unwrap();
        b.unwrap();
        assert_eq!(h.driver.launches.load(Ordering::SeqCst), 1);

        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;

        h.registry.connect("s1").await.unwrap();
        assert_eq!(h.driver.launches.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_resources_are_retried_with_cleanup() {
        let h = harness(
            FakeDriver {
                busy_launches: AtomicUsize::new(2),
                ..Default::default()
            },
            |_| {},
        )
        .await;

        h.registry.connect("s1").await.unwrap();

        assert_eq!(h.driver.launches.load(Ordering::SeqCst), 3);
        assert_eq!(h.driver.lock_releases.load(Ordering::SeqCst), 3);
        assert_eq!(h.driver.orphan_kills.load(Ordering::SeqCst), 3);
        assert_eq!(h.driver.wipes.load(Ordering::SeqCst), 0);
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_end_in_error_until_reconnect() {
        let h = harness(
            FakeDriver {
                busy_launches: AtomicUsize::new(3),
                ..Default::default()
            },
            |cfg| cfg.wipe_profile_on_final_retry = true,
        )
        .await;
        h.credentials
            .set("s1", SecretString::new("old".into()))
            .await
            .unwrap();

        let err = h.registry.connect("s1").await.unwrap_err();
        assert!(matches!(err, Error::ResourceBusy { .. }), "{err}");
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Error);
        assert_eq!(h.driver.wipes.load(Ordering::SeqCst), 1);
        assert_eq!(*h.driver.tokens_seen.lock().unwrap(), vec![
            Some("old".to_string()),
            Some("old".to_string()),
            None
        ]);
        let info = h.registry.get_session_info("s1").await.unwrap();
        assert!(info.last_error.is_some());

        // Stays in error until someone asks again.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Error);

        h.registry.connect("s1").await.unwrap();
        assert_eq!(h.driver.launches.load(Ordering::SeqCst), 4);
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn non_retryable_launch_failure_is_not_retried() {
        let h = harness(
            FakeDriver {
                hard_failure: true,
                ..Default::default()
            },
            |_| {},
        )
        .await;

        let err = h.registry.connect("s1").await.unwrap_err();
        assert!(matches!(err, Error::Launch { .. }), "{err}");
        assert_eq!(h.driver.launches.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn login_challenge_expires_after_ttl() {
        let h = harness(
            FakeDriver {
                qr_on_launch: true,
                ..Default::default()
            },
            |_| {},
        )
        .await;

        h.registry.connect("s1").await.unwrap();
        wait_for_status(&h.registry, "s1", ConnectionStatus::Qrcode).await;

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(h.registry.get_login_challenge("s1").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(h.registry.get_login_challenge("s1").is_none());
        // The client never said otherwise; only the TTL expired it.
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Qrcode);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_ends_disconnected_even_when_close_fails() {
        let h = harness(
            FakeDriver {
                close_fails: true,
                ..Default::default()
            },
            |_| {},
        )
        .await;

        h.registry.connect("s1").await.unwrap();
        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;

        h.registry.disconnect("s1").await.unwrap();
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Disconnected);
        assert!(!h.registry.get_session_info("s1").await.unwrap().connected);
        assert!(matches!(
            h.registry.send_text("s1", "123", "hi").await,
            Err(Error::NotConnected { .. })
        ));
        assert!(h.driver.lock_releases.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_a_previous_client_are_ignored() {
        let h = harness(FakeDriver::default(), |_| {}).await;

        h.registry.connect("s1").await.unwrap();
        let first_generation = h.registry.lock_runtimes().get("s1").unwrap().generation;
        h.registry.disconnect("s1").await.unwrap();
        h.registry.connect("s1").await.unwrap();

        let applied = h
            .registry
            .handle_client_event(
                "s1",
                first_generation,
                ClientEvent::StateChanged(ClientState::Authenticated),
            )
            .await;
        assert!(!applied);
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Connecting);

        // Whatever the old client still says must not leak into the new runtime.
        let _ = h
            .driver
            .sender(0)
            .send(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Connecting);

        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn client_crash_moves_to_error_and_clean_exit_to_disconnected() {
        let h = harness(FakeDriver::default(), |_| {}).await;

        h.registry.connect("s1").await.unwrap();
        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;

        h.driver
            .emit(ClientEvent::Exited {
                code: Some(139),
                reason: Some("segfault".into()),
                crashed: true,
            })
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Error).await;
        let info = h.registry.get_session_info("s1").await.unwrap();
        assert!(!info.connected);
        assert_eq!(info.last_error.as_deref(), Some("segfault"));

        h.registry.connect("s1").await.unwrap();
        h.driver
            .emit(ClientEvent::Exited {
                code: Some(0),
                reason: None,
                crashed: false,
            })
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Disconnected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_are_tagged_with_session() {
        let h = harness(FakeDriver::default(), |_| {}).await;

        h.registry.connect("s1").await.unwrap();
        h.driver.emit(ClientEvent::Inbound(inbound("m1"))).await;
        h.driver.emit(ClientEvent::Inbound(inbound("m2"))).await;

        for _ in 0..100 {
            if h.sink.pushed.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pushed = h.sink.pushed.lock().unwrap();
        let ids: Vec<_> = pushed.iter().map(|e| e.message.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(pushed.iter().all(|e| e.session == "s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_removes_stored_credentials() {
        let h = harness(FakeDriver::default(), |_| {}).await;
        h.credentials
            .set("s1", SecretString::new("tok".into()))
            .await
            .unwrap();

        h.registry.connect("s1").await.unwrap();
        h.driver
            .emit(ClientEvent::StateChanged(ClientState::LoggedOut))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Disconnected).await;
        assert!(h.credentials.get("s1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn send_text_goes_through_live_client() {
        let h = harness(FakeDriver::default(), |_| {}).await;

        assert!(matches!(
            h.registry.send_text("s1", "123", "early").await,
            Err(Error::NotConnected { .. })
        ));

        h.registry.connect("s1").await.unwrap();
        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;

        OutboundSender::send_text(h.registry.as_ref(), "s1", "123", "hi")
            .await
            .unwrap();
        assert_eq!(*h.driver.sent.lock().unwrap(), vec![(
            "123".to_string(),
            "hi".to_string()
        )]);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_read_needs_a_connected_client() {
        let h = harness(FakeDriver::default(), |_| {}).await;

        h.registry.mark_read("s1", "123", "m0").await.unwrap();
        h.registry.connect("s1").await.unwrap();
        OutboundSender::mark_read(h.registry.as_ref(), "s1", "123", "m1")
            .await
            .unwrap();
        assert!(h.driver.reads.lock().unwrap().is_empty());

        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;

        OutboundSender::mark_read(h.registry.as_ref(), "s1", "123", "m2")
            .await
            .unwrap();
        assert_eq!(*h.driver.reads.lock().unwrap(), vec![(
            "123".to_string(),
            "m2".to_string()
        )]);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_logs_out_a_connected_client() {
        let h = harness(FakeDriver::default(), |_| {}).await;
        h.registry.connect("s1").await.unwrap();
        h.driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&h.registry, "s1", ConnectionStatus::Connected).await;

        h.registry.delete_session("s1").await.unwrap();

        assert_eq!(h.driver.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Disconnected);
        assert!(h.store.get_by_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_skips_logout_when_never_connected() {
        let h = harness(FakeDriver::default(), |_| {}).await;
        h.registry.delete_session("s1").await.unwrap();
        assert_eq!(h.driver.logouts.load(Ordering::SeqCst), 0);
    }

    /// Session store whose lookups can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemorySessionStore,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn list(&self) -> ChannelResult<Vec<ChannelSessionConfig>> {
            self.inner.list().await
        }

        async fn get(&self, id: &str) -> ChannelResult<Option<ChannelSessionConfig>> {
            self.inner.get(id).await
        }

        async fn get_by_session(&self, session: &str) -> ChannelResult<Option<ChannelSessionConfig>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ChannelError::unavailable("database is locked"));
            }
            self.inner.get_by_session(session).await
        }

        async fn upsert(&self, config: ChannelSessionConfig) -> ChannelResult<()> {
            self.inner.upsert(config).await
        }

        async fn delete(&self, id: &str) -> ChannelResult<bool> {
            self.inner.delete(id).await
        }

        async fn set_default(&self, id: &str) -> ChannelResult<()> {
            self.inner.set_default(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_runtime_when_store_lookup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        store
            .upsert(ChannelSessionConfig::new(
                "id-s1",
                "s1",
                ConnectionKind::NativeAutomation,
            ))
            .await
            .unwrap();
        let driver = Arc::new(FakeDriver::default());
        let registry = Arc::new(
            SessionRegistry::new(
                RegistryConfig::from_config(&SessionsConfig::default(), dir.path()),
                store.clone(),
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(RecordingSink::default()),
                EventBus::default(),
            )
            .with_driver(driver.clone()),
        );

        registry.connect("s1").await.unwrap();
        driver
            .emit(ClientEvent::StateChanged(ClientState::Authenticated))
            .await;
        wait_for_status(&registry, "s1", ConnectionStatus::Connected).await;

        store.failing.store(true, Ordering::SeqCst);
        assert!(registry.disconnect("s1").await.is_err());
        assert_eq!(registry.status("s1"), ConnectionStatus::Disconnected);
        assert!(registry.lock_runtimes().get("s1").is_none());
    }

    #[tokio::test]
    async fn connect_without_driver_is_unavailable() {
        let h = harness(
            FakeDriver {
                kind_managed: true,
                ..Default::default()
            },
            |_| {},
        )
        .await;

        let err = h.registry.connect("s1").await.unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }), "{err}");
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Disconnected);

        let err = h.registry.connect("nope").await.unwrap_err();
        assert!(matches!(err, Error::UnknownSession { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn start_sweeps_locks_and_auto_connects() {
        let h = harness(FakeDriver::default(), |_| {}).await;
        let mut auto = ChannelSessionConfig::new("id-s2", "s2", ConnectionKind::NativeAutomation);
        auto.auto_connect = true;
        h.store.upsert(auto).await.unwrap();

        h.registry.start().await.unwrap();
        for _ in 0..100 {
            if h.driver.launches.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        wait_for_status(&h.registry, "s2", ConnectionStatus::Connecting).await;

        assert_eq!(h.driver.launches.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.status("s1"), ConnectionStatus::Disconnected);
        // One sweep per session plus the pre-flight cleanup of s2.
        assert_eq!(h.driver.lock_releases.load(Ordering::SeqCst), 3);

        h.registry.shutdown().await;
        assert_eq!(h.registry.status("s2"), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn session_administration() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(
            RegistryConfig::from_config(&SessionsConfig::default(), dir.path()),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(RecordingSink::default()),
            EventBus::default(),
        );

        let first = registry
            .create_session(ChannelSessionConfig::new(
                "",
                "sales",
                ConnectionKind::NativeAutomation,
            ))
            .await
            .unwrap();
        assert!(!first.id.is_empty());
        assert!(first.is_default, "first session becomes the default");

        let second = registry
            .create_session(ChannelSessionConfig::new(
                "",
                "support",
                ConnectionKind::ManagedApi,
            ))
            .await
            .unwrap();
        assert!(!second.is_default);

        let dup = registry
            .create_session(ChannelSessionConfig::new(
                "",
                "sales",
                ConnectionKind::NativeAutomation,
            ))
            .await;
        assert!(matches!(dup, Err(Error::AlreadyExists { .. })));

        registry.set_default("support").await.unwrap();
        let default = registry.default_session().await.unwrap().unwrap();
        assert_eq!(default.session, "support");

        let mut renamed = second.clone();
        renamed.session = "other".into();
        assert!(matches!(
            registry.update_session(renamed).await,
            Err(Error::InvalidInput { .. })
        ));

        registry.delete_session("sales").await.unwrap();
        let remaining: Vec<_> = registry
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session)
            .collect();
        assert_eq!(remaining, vec!["support".to_string()]);
    }
}
