//! Distribution scheduler: timer loop, tick, offer lifecycle.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use {
    async_trait::async_trait,
    switchboard_channels::SessionDirectory,
    switchboard_common::{DomainEvent, EventBus, time::now_ms},
    switchboard_conversations::{
        Conversation, ConversationStore, Department, DepartmentStore, Error as StoreError, Offer,
        OfferTrigger, Operator, OperatorStatus, OperatorStore,
    },
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, distribution as dist_metrics, histogram};

use crate::{Result, config::SchedulerConfig, rotation};

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Why a candidate received no offer in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The session it arrived on has fair distribution turned off.
    NotDistributed,
    NoDepartment,
    DepartmentInactive,
    NoOperatorAvailable,
    /// The conversation changed between selection and the offer write.
    Raced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedOffer {
    pub conversation_id: String,
    pub operator_id: String,
    pub expires_at_ms: i64,
}

/// Outcome of one pass.
#[derive(Debug, Default)]
pub struct TickReport {
    pub expired: usize,
    pub offers: Vec<IssuedOffer>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// The distribution scheduler.
pub struct DistributionService {
    config: SchedulerConfig,
    conversations: Arc<dyn ConversationStore>,
    operators: Arc<dyn OperatorStore>,
    departments: Arc<dyn DepartmentStore>,
    sessions: Arc<dyn SessionDirectory>,
    events: EventBus,
    clock: Clock,
    /// Rotation pointer per department id. Only touched while `tick_lock` is held.
    rotation: StdMutex<HashMap<String, usize>>,
    tick_lock: Mutex<()>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

/// State shared by all candidates of one pass.
struct PassContext {
    now: i64,
    operators: HashMap<String, Operator>,
    departments: HashMap<String, Option<Department>>,
    active: HashMap<String, u32>,
}

impl DistributionService {
    pub fn new(
        config: SchedulerConfig,
        conversations: Arc<dyn ConversationStore>,
        operators: Arc<dyn OperatorStore>,
        departments: Arc<dyn DepartmentStore>,
        sessions: Arc<dyn SessionDirectory>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            conversations,
            operators,
            departments,
            sessions,
            events,
            clock: Arc::new(now_ms),
            rotation: StdMutex::new(HashMap::new()),
            tick_lock: Mutex::new(()),
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    /// Replace the clock. Only valid before the service is shared.
    #[must_use]
    pub fn with_clock(self: Arc<Self>, clock: Clock) -> Arc<Self> {
        match Arc::try_unwrap(self) {
            Ok(mut svc) => {
                svc.clock = clock;
                Arc::new(svc)
            },
            Err(shared) => {
                warn!("distribution service already shared, keeping its clock");
                shared
            },
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    // ── Timer loop ──────────────────────────────────────────────────────

    /// Start the periodic tick. Does nothing when distribution is disabled.
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("distribution scheduler disabled");
            return;
        }
        *self.running.write().await = true;

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);
        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "distribution scheduler started"
        );
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();

        let mut handle = self.timer_handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
        }
        info!("distribution scheduler stopped");
    }

    /// Run a tick now instead of at the next interval.
    pub fn wake(&self) {
        self.wake_notify.notify_one();
    }

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let notify = Arc::clone(&self.wake_notify);
            tokio::select! {
                () = tokio::time::sleep(self.config.tick_interval) => {},
                () = notify.notified() => {
                    debug!("distribution loop woken by notify");
                },
            }

            if !*self.running.read().await {
                break;
            }

            if let Err(e) = self.tick().await {
                warn!(error = %e, "distribution tick failed");
            }
        }
    }

    // ── Passes ──────────────────────────────────────────────────────────

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(self.now()).await
    }

    /// One full reconciliation: reclaim expired offers, then offer up to
    /// `batch_size` waiting conversations, oldest first.
    pub async fn tick_at(&self, now: i64) -> Result<TickReport> {
        let _guard = self.tick_lock.lock().await;
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let mut report = TickReport {
            expired: self.expire_offers(now).await?,
            ..Default::default()
        };
        let candidates = self
            .conversations
            .candidates(now, self.config.batch_size)
            .await?;
        self.offer_candidates(now, candidates, &mut report).await?;

        #[cfg(feature = "metrics")]
        histogram!(dist_metrics::TICK_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if report.expired > 0 || !report.offers.is_empty() {
            info!(
                expired = report.expired,
                offered = report.offers.len(),
                skipped = report.skipped.len(),
                "distribution tick"
            );
        } else {
            debug!(skipped = report.skipped.len(), "distribution tick");
        }
        Ok(report)
    }

    /// Single pass for one freshly created conversation. Skipped while a tick
    /// is running; that tick or the next one picks the conversation up.
    pub async fn offer_now_at(&self, conversation_id: &str, now: i64) -> Result<TickReport> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!(conversation_id, "tick in flight, deferring offer");
            return Ok(TickReport::default());
        };
        let mut report = TickReport::default();
        let candidates: Vec<Conversation> = self
            .conversations
            .get(conversation_id)
            .await?
            .filter(|c| c.is_candidate(now))
            .into_iter()
            .collect();
        self.offer_candidates(now, candidates, &mut report).await?;
        Ok(report)
    }

    async fn expire_offers(&self, now: i64) -> Result<usize> {
        let mut expired = 0;
        for conversation in self.conversations.expired_offers(now).await? {
            let Some(offer) = conversation.offer else {
                continue;
            };
            if !self
                .conversations
                .clear_offer_if(&conversation.id, &offer.operator_id, now)
                .await?
            {
                continue;
            }
            expired += 1;
            #[cfg(feature = "metrics")]
            counter!(dist_metrics::OFFERS_EXPIRED_TOTAL).increment(1);
            info!(
                conversation_id = %conversation.id,
                operator_id = %offer.operator_id,
                "offer expired, operator set offline"
            );
            self.events.publish(DomainEvent::OfferExpired {
                conversation_id: conversation.id.clone(),
                operator_id: offer.operator_id.clone(),
            });

            // An operator who lets an offer lapse is treated as away.
            if self
                .operators
                .set_operator_status(&offer.operator_id, OperatorStatus::Offline)
                .await?
            {
                self.events.publish(DomainEvent::OperatorStatusChanged {
                    operator_id: offer.operator_id,
                    status: OperatorStatus::Offline.to_string(),
                });
            }
        }
        Ok(expired)
    }

    async fn offer_candidates(
        &self,
        now: i64,
        candidates: Vec<Conversation>,
        report: &mut TickReport,
    ) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        // Operators and active counts are read once per pass; offers made in
        // this pass are added to the counts locally.
        let mut ctx = PassContext {
            now,
            operators: self
                .operators
                .list_operators()
                .await?
                .into_iter()
                .map(|op| (op.id.clone(), op))
                .collect(),
            departments: HashMap::new(),
            active: self.conversations.active_chat_counts(now).await?,
        };

        for conversation in candidates {
            match self.offer_one(&mut ctx, &conversation).await? {
                Ok(issued) => report.offers.push(issued),
                Err(reason) => {
                    #[cfg(feature = "metrics")]
                    counter!(dist_metrics::CANDIDATES_SKIPPED_TOTAL).increment(1);
                    debug!(conversation_id = %conversation.id, ?reason, "candidate skipped");
                    report.skipped.push((conversation.id, reason));
                },
            }
        }
        Ok(())
    }

    async fn offer_one(
        &self,
        ctx: &mut PassContext,
        conversation: &Conversation,
    ) -> Result<std::result::Result<IssuedOffer, SkipReason>> {
        let session = self.sessions.by_session(&conversation.session).await;
        if session.as_ref().is_some_and(|s| !s.fair_distribution) {
            return Ok(Err(SkipReason::NotDistributed));
        }

        let department_id = match &conversation.department_id {
            Some(id) => id.clone(),
            None => {
                let Some(id) = session
                    .as_ref()
                    .and_then(|s| s.primary_department())
                    .map(str::to_string)
                else {
                    return Ok(Err(SkipReason::NoDepartment));
                };
                self.conversations
                    .set_department(&conversation.id, &id, ctx.now)
                    .await?;
                debug!(conversation_id = %conversation.id, department_id = %id, "department resolved from session");
                id
            },
        };

        if !ctx.departments.contains_key(&department_id) {
            let department = self.departments.get_department(&department_id).await?;
            ctx.departments.insert(department_id.clone(), department);
        }
        let Some(Some(department)) = ctx.departments.get(&department_id) else {
            return Ok(Err(SkipReason::DepartmentInactive));
        };
        if !department.active {
            return Ok(Err(SkipReason::DepartmentInactive));
        }

        let members: Vec<Option<&Operator>> = department
            .members
            .iter()
            .map(|id| ctx.operators.get(id))
            .collect();
        let cooling = conversation
            .last_operator_id
            .as_deref()
            .filter(|id| conversation.in_cooldown_for(id, ctx.now, self.config.cooldown_ms));
        let start = self.pointer(&department_id);
        let Some(idx) = rotation::pick(&members, start, &ctx.active, cooling) else {
            return Ok(Err(SkipReason::NoOperatorAvailable));
        };
        let Some(operator) = members[idx] else {
            return Ok(Err(SkipReason::NoOperatorAvailable));
        };

        let offer = Offer {
            operator_id: operator.id.clone(),
            operator_name: operator.name.clone(),
            expires_at_ms: ctx.now + self.config.offer_duration_ms,
        };
        if !self
            .conversations
            .write_offer(&conversation.id, &offer, ctx.now)
            .await?
        {
            return Ok(Err(SkipReason::Raced));
        }

        self.set_pointer(&department_id, idx + 1);
        *ctx.active.entry(offer.operator_id.clone()).or_insert(0) += 1;

        #[cfg(feature = "metrics")]
        counter!(dist_metrics::OFFERS_ISSUED_TOTAL).increment(1);
        info!(
            conversation_id = %conversation.id,
            operator_id = %offer.operator_id,
            department_id = %department_id,
            attempt = conversation.offer_attempts + 1,
            "offer issued"
        );
        self.events.publish(DomainEvent::OfferIssued {
            conversation_id: conversation.id.clone(),
            operator_id: offer.operator_id.clone(),
            operator_name: offer.operator_name.clone(),
            expires_at_ms: offer.expires_at_ms,
            attempt: conversation.offer_attempts + 1,
        });

        Ok(Ok(IssuedOffer {
            conversation_id: conversation.id.clone(),
            operator_id: offer.operator_id,
            expires_at_ms: offer.expires_at_ms,
        }))
    }

    fn pointer(&self, department_id: &str) -> usize {
        let rotation = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        rotation.get(department_id).copied().unwrap_or(0)
    }

    fn set_pointer(&self, department_id: &str, next: usize) {
        let mut rotation = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        rotation.insert(department_id.to_string(), next);
    }

    // ── Operator actions ────────────────────────────────────────────────

    /// Accept an offer. Succeeds only while `operator_id` holds an unexpired
    /// offer on an unassigned conversation.
    pub async fn accept(&self, conversation_id: &str, operator_id: &str) -> Result<Conversation> {
        let conversation = self
            .conversations
            .accept_offer(conversation_id, operator_id, self.now())
            .await?;
        #[cfg(feature = "metrics")]
        counter!(dist_metrics::OFFERS_ACCEPTED_TOTAL).increment(1);
        info!(conversation_id, operator_id, "offer accepted");
        self.events.publish(DomainEvent::ConversationAssigned {
            conversation_id: conversation.id.clone(),
            session_id: conversation.session.clone(),
            contact_id: conversation.contact_id.clone(),
            operator_id: operator_id.to_string(),
            operator_name: conversation
                .assigned_operator_name
                .clone()
                .unwrap_or_default(),
        });
        Ok(conversation)
    }

    /// Hand an offer back without penalty. The conversation is offered again
    /// on the next tick.
    pub async fn decline(&self, conversation_id: &str, operator_id: &str) -> Result<()> {
        if !self
            .conversations
            .clear_offer_if(conversation_id, operator_id, self.now())
            .await?
        {
            return Err(StoreError::offer_not_held(conversation_id, operator_id).into());
        }
        info!(conversation_id, operator_id, "offer declined");
        self.events.publish(DomainEvent::OfferDeclined {
            conversation_id: conversation_id.to_string(),
            operator_id: operator_id.to_string(),
        });
        self.wake();
        Ok(())
    }

    pub async fn resolve(&self, conversation_id: &str) -> Result<Conversation> {
        let conversation = self
            .conversations
            .resolve(conversation_id, self.now())
            .await?;
        info!(conversation_id, operator_id = ?conversation.last_operator_id, "conversation resolved");
        self.events.publish(DomainEvent::ConversationResolved {
            conversation_id: conversation.id.clone(),
            session_id: conversation.session.clone(),
            contact_id: conversation.contact_id.clone(),
            operator_id: conversation.last_operator_id.clone(),
        });
        Ok(conversation)
    }

    /// An operator (re)signals presence. Coming back online wakes the loop so
    /// waiting conversations are offered without waiting out the interval.
    pub async fn set_operator_status(&self, operator_id: &str, status: OperatorStatus) -> Result<()> {
        if !self
            .operators
            .set_operator_status(operator_id, status)
            .await?
        {
            return Err(StoreError::operator_not_found(operator_id).into());
        }
        info!(operator_id, status = %status, "operator status changed");
        self.events.publish(DomainEvent::OperatorStatusChanged {
            operator_id: operator_id.to_string(),
            status: status.to_string(),
        });
        if status.receives_offers() {
            self.wake();
        }
        Ok(())
    }
}

#[async_trait]
impl OfferTrigger for DistributionService {
    async fn offer_now(&self, conversation_id: &str) {
        if let Err(e) = self.offer_now_at(conversation_id, self.now()).await {
            warn!(conversation_id, error = %e, "on-demand offer failed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{
            sync::atomic::{AtomicI64, Ordering},
            time::Duration,
        },
        switchboard_channels::{ChannelSessionConfig, ConnectionKind},
        switchboard_conversations::InMemoryConversationStore,
    };

    const MIN: i64 = 60_000;

    #[derive(Default)]
    struct Sessions(HashMap<String, ChannelSessionConfig>);

    #[async_trait]
    impl SessionDirectory for Sessions {
        async fn by_session(&self, session: &str) -> Option<ChannelSessionConfig> {
            self.0.get(session).cloned()
        }

        async fn by_id(&self, id: &str) -> Option<ChannelSessionConfig> {
            self.0.values().find(|s| s.id == id).cloned()
        }
    }

    struct Harness {
        svc: Arc<DistributionService>,
        store: Arc<InMemoryConversationStore>,
        events: EventBus,
        clock: Arc<AtomicI64>,
    }

    impl Harness {
        async fn new(operators: &[(&str, u32)]) -> Self {
            let store = Arc::new(InMemoryConversationStore::new());
            for (id, max) in operators {
                let mut op = Operator::new(*id, id.to_uppercase(), *max);
                op.status = OperatorStatus::Online;
                op.departments = vec!["d1".into()];
                store.upsert_operator(&op).await.unwrap();
            }
            store
                .upsert_department(&Department {
                    id: "d1".into(),
                    name: "Sales".into(),
                    active: true,
                    members: operators.iter().map(|(id, _)| id.to_string()).collect(),
                })
                .await
                .unwrap();

            let mut sales = ChannelSessionConfig::new("s1", "sales", ConnectionKind::NativeAutomation);
            sales.departments = vec!["d1".into()];
            let mut quiet = ChannelSessionConfig::new("s2", "quiet", ConnectionKind::NativeAutomation);
            quiet.departments = vec!["d1".into()];
            quiet.fair_distribution = false;
            let sessions = Sessions(HashMap::from([
                ("sales".to_string(), sales),
                ("quiet".to_string(), quiet),
            ]));

            let clock = Arc::new(AtomicI64::new(1_000_000));
            let events = EventBus::default();
            let now = Arc::clone(&clock);
            let svc = DistributionService::new(
                SchedulerConfig::default(),
                store.clone(),
                store.clone(),
                store.clone(),
                Arc::new(sessions),
                events.clone(),
            )
            .with_clock(Arc::new(move || now.load(Ordering::SeqCst)));
            Self {
                svc,
                store,
                events,
                clock,
            }
        }

        fn now(&self) -> i64 {
            self.clock.load(Ordering::SeqCst)
        }

        fn advance(&self, ms: i64) {
            self.clock.fetch_add(ms, Ordering::SeqCst);
        }

        async fn conversation(&self, session: &str, contact: &str) -> Conversation {
            self.advance(1);
            let c = Conversation::new(session, contact, ConnectionKind::NativeAutomation, self.now());
            self.store.insert(&c).await.unwrap();
            c
        }

        async fn holder(&self, id: &str) -> Option<String> {
            let c = self.store.get(id).await.unwrap().unwrap();
            c.active_offer(self.now()).map(|o| o.operator_id.clone())
        }
    }

    #[tokio::test]
    async fn end_to_end_offer_expiry_and_reoffer() {
        let h = Harness::new(&[("a", 1), ("b", 1)]).await;
        let c = h.conversation("sales", "5511").await;

        let report = h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        assert_eq!(report.offers.len(), 1);
        assert_eq!(report.offers[0].operator_id, "a");
        assert_eq!(report.offers[0].expires_at_ms, h.now() + 3 * MIN);
        let stored = h.store.get(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.department_id.as_deref(), Some("d1"));

        h.advance(3 * MIN);
        let report = h.svc.tick().await.unwrap();
        assert_eq!(report.expired, 1);
        let a = h.store.get_operator("a").await.unwrap().unwrap();
        assert_eq!(a.status, OperatorStatus::Offline);
        assert_eq!(h.holder(&c.id).await.as_deref(), Some("b"));
        assert_eq!(h.store.get(&c.id).await.unwrap().unwrap().offer_attempts, 2);
    }

    #[tokio::test]
    async fn at_most_one_active_offer_across_ticks() {
        let h = Harness::new(&[("a", 5), ("b", 5)]).await;
        let c = h.conversation("sales", "1").await;

        let first = h.svc.tick().await.unwrap();
        assert_eq!(first.offers.len(), 1);
        h.advance(MIN);
        let second = h.svc.tick().await.unwrap();
        assert!(second.offers.is_empty());
        let again = h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        assert!(again.offers.is_empty());
        assert_eq!(h.holder(&c.id).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn assigned_conversations_are_never_offered() {
        let h = Harness::new(&[("a", 5), ("b", 5)]).await;
        let c = h.conversation("sales", "1").await;
        h.svc.tick().await.unwrap();
        h.svc.accept(&c.id, "a").await.unwrap();

        for _ in 0..3 {
            h.advance(4 * MIN);
            let report = h.svc.tick().await.unwrap();
            assert!(report.offers.is_empty());
            assert_eq!(report.expired, 0);
        }
        let stored = h.store.get(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.assigned_operator_id.as_deref(), Some("a"));
        assert!(stored.offer.is_none());
    }

    #[tokio::test]
    async fn rotation_is_fair_across_ticks() {
        let h = Harness::new(&[("a", 5), ("b", 5), ("c", 5)]).await;
        let mut picked = Vec::new();
        for contact in ["1", "2", "3", "4"] {
            let conv = h.conversation("sales", contact).await;
            let report = h.svc.offer_now_at(&conv.id, h.now()).await.unwrap();
            picked.push(report.offers[0].operator_id.clone());
        }
        assert_eq!(picked, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn rotation_pointer_tracks_member_positions() {
        let h = Harness::new(&[("a", 5), ("b", 5)]).await;
        h.store
            .upsert_department(&Department {
                id: "d1".into(),
                name: "Sales".into(),
                active: true,
                members: vec!["a".into(), "g".into(), "b".into()],
            })
            .await
            .unwrap();

        let mut picked = Vec::new();
        for contact in ["1", "2"] {
            let conv = h.conversation("sales", contact).await;
            let report = h.svc.offer_now_at(&conv.id, h.now()).await.unwrap();
            picked.push(report.offers[0].operator_id.clone());
        }

        // "g" starts resolving; the pointer already moved past its slot.
        let mut g = Operator::new("g", "G", 5);
        g.status = OperatorStatus::Online;
        g.departments = vec!["d1".into()];
        h.store.upsert_operator(&g).await.unwrap();

        let conv = h.conversation("sales", "3").await;
        let report = h.svc.offer_now_at(&conv.id, h.now()).await.unwrap();
        picked.push(report.offers[0].operator_id.clone());
        assert_eq!(picked, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn one_tick_spreads_a_batch_and_respects_capacity() {
        let h = Harness::new(&[("a", 1), ("b", 2)]).await;
        for contact in ["1", "2", "3", "4"] {
            h.conversation("sales", contact).await;
        }
        let report = h.svc.tick().await.unwrap();
        let picked: Vec<_> = report.offers.iter().map(|o| o.operator_id.as_str()).collect();
        assert_eq!(picked, vec!["a", "b", "b"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].1, SkipReason::NoOperatorAvailable);
    }

    #[tokio::test]
    async fn cooldown_skips_last_resolver_unless_alone() {
        let h = Harness::new(&[("a", 5), ("b", 5)]).await;
        let c = h.conversation("sales", "1").await;
        h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        h.svc.accept(&c.id, "a").await.unwrap();
        h.svc.resolve(&c.id).await.unwrap();
        h.store.reopen(&c.id, h.now()).await.unwrap();

        // Pointer is at b already; push it back to a to make the skip visible.
        h.svc.set_pointer("d1", 0);
        h.advance(MIN);
        let report = h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        assert_eq!(report.offers[0].operator_id, "b");

        // b declines and goes offline: a is the only one left and gets it.
        h.svc.decline(&c.id, "b").await.unwrap();
        h.svc
            .set_operator_status("b", OperatorStatus::Offline)
            .await
            .unwrap();
        let report = h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        assert_eq!(report.offers[0].operator_id, "a");
    }

    #[tokio::test]
    async fn sessions_without_fair_distribution_are_skipped() {
        let h = Harness::new(&[("a", 5)]).await;
        let c = h.conversation("quiet", "1").await;
        let report = h.svc.tick().await.unwrap();
        assert!(report.offers.is_empty());
        assert_eq!(report.skipped, vec![(c.id, SkipReason::NotDistributed)]);
    }

    #[tokio::test]
    async fn inactive_department_and_missing_department_are_skipped() {
        let h = Harness::new(&[("a", 5)]).await;
        let orphan = h.conversation("unknown-session", "1").await;
        let report = h.svc.tick().await.unwrap();
        assert_eq!(report.skipped, vec![(orphan.id.clone(), SkipReason::NoDepartment)]);

        h.store
            .upsert_department(&Department {
                id: "d1".into(),
                name: "Sales".into(),
                active: false,
                members: vec!["a".into()],
            })
            .await
            .unwrap();
        h.store.set_department(&orphan.id, "d1", h.now()).await.unwrap();
        let report = h.svc.tick().await.unwrap();
        assert_eq!(report.skipped, vec![(orphan.id, SkipReason::DepartmentInactive)]);
    }

    #[tokio::test]
    async fn on_demand_pass_defers_to_running_tick() {
        let h = Harness::new(&[("a", 5)]).await;
        let c = h.conversation("sales", "1").await;
        let guard = h.svc.tick_lock.lock().await;
        let report = h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        assert!(report.offers.is_empty());
        drop(guard);
        assert!(h.holder(&c.id).await.is_none());
    }

    #[tokio::test]
    async fn accept_after_expiry_loses() {
        let h = Harness::new(&[("a", 5), ("b", 5)]).await;
        let c = h.conversation("sales", "1").await;
        h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        h.advance(3 * MIN);
        let err = h.svc.accept(&c.id, "a").await.unwrap_err();
        assert!(err.is_offer_not_held());
    }

    #[tokio::test]
    async fn events_follow_the_offer_lifecycle() {
        let h = Harness::new(&[("a", 5)]).await;
        let mut rx = h.events.subscribe();
        let c = h.conversation("sales", "1").await;
        h.svc.offer_now_at(&c.id, h.now()).await.unwrap();
        h.svc.accept(&c.id, "a").await.unwrap();
        h.svc.resolve(&c.id).await.unwrap();

        let names: Vec<&str> = (0..3).map(|_| rx.try_recv().unwrap().name()).collect();
        assert_eq!(names, vec![
            "offer_issued",
            "conversation_assigned",
            "conversation_resolved"
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_loop_ticks_on_interval_and_stops() {
        let h = Harness::new(&[("a", 5)]).await;
        let c = h.conversation("sales", "1").await;
        h.svc.start().await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.holder(&c.id).await.as_deref(), Some("a"));

        h.svc.stop().await;
        assert!(h.svc.timer_handle.lock().await.is_none());
    }

    #[tokio::test]
    async fn unknown_operator_status_change_is_not_found() {
        let h = Harness::new(&[("a", 5)]).await;
        let err = h
            .svc
            .set_operator_status("ghost", OperatorStatus::Online)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
