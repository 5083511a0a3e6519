//! Per-message routing: conversation upsert, then the bot or human path.

use std::sync::Arc;

use {
    async_trait::async_trait,
    switchboard_channels::{
        ChannelSessionConfig, InboundEnvelope, InboundMessage, OutboundSender, SessionDirectory,
        TemplateEvent,
    },
    switchboard_common::{DomainEvent, EventBus, time::now_ms},
    switchboard_conversations::{Conversation, ConversationStore, Error as StoreError, OfferTrigger},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, routing as routing_metrics};

use crate::{
    Result,
    bot::{BotHandler, BotRegistry},
    error::Context,
    queue::InboundProcessor,
    template,
};

/// How the conversation for a message was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    /// A finalized conversation was opened again by a new message.
    Reopened,
    Existing,
}

impl Upsert {
    /// The conversation just (re)entered the system and needs a first route.
    pub fn is_fresh(self) -> bool {
        matches!(self, Self::Created | Self::Reopened)
    }
}

/// Where a message ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Sent from the linked device; the conversation was only touched.
    Echo,
    Ignored,
    Bot { handler_id: String },
    /// Entered the human queue: welcome sent and an offer requested.
    Queued,
    /// Already waiting for or assigned to an operator.
    Human,
}

pub struct Router {
    conversations: Arc<dyn ConversationStore>,
    sessions: Arc<dyn SessionDirectory>,
    outbound: Arc<dyn OutboundSender>,
    bots: BotRegistry,
    offers: Option<Arc<dyn OfferTrigger>>,
    events: EventBus,
}

impl Router {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        sessions: Arc<dyn SessionDirectory>,
        outbound: Arc<dyn OutboundSender>,
        events: EventBus,
    ) -> Self {
        Self {
            conversations,
            sessions,
            outbound,
            bots: BotRegistry::default(),
            offers: None,
            events,
        }
    }

    #[must_use]
    pub fn with_bots(mut self, bots: BotRegistry) -> Self {
        self.bots = bots;
        self
    }

    /// Request an immediate distribution pass for conversations entering the
    /// human queue.
    #[must_use]
    pub fn with_offer_trigger(mut self, offers: Arc<dyn OfferTrigger>) -> Self {
        self.offers = Some(offers);
        self
    }

    pub async fn route(&self, envelope: InboundEnvelope) -> Result<Route> {
        let InboundEnvelope { session, message } = envelope;
        let now = now_ms();

        if message.is_group {
            debug!(session = %session, message_id = %message.message_id, "group message ignored");
            return Ok(Route::Ignored);
        }

        if message.from_me {
            if let Some(conversation) = self
                .conversations
                .find_open(&message.contact_id, message.channel_kind)
                .await?
            {
                self.conversations
                    .touch(&conversation.id, None, message.timestamp_ms.max(now))
                    .await?;
            }
            return Ok(Route::Echo);
        }

        let (conversation, upsert) = self.upsert(&session, &message, now).await?;
        self.events.publish(DomainEvent::MessageReceived {
            conversation_id: conversation.id.clone(),
            session: session.clone(),
            contact_id: message.contact_id.clone(),
            message_id: message.message_id.clone(),
        });
        self.acknowledge(&session, &message).await;
        if upsert == Upsert::Created {
            self.events.publish(DomainEvent::ConversationCreated {
                conversation_id: conversation.id.clone(),
                session_id: conversation.session.clone(),
                contact_id: conversation.contact_id.clone(),
            });
        }

        if conversation.is_assigned() {
            return Ok(Route::Human);
        }

        let config = self.sessions.by_session(&conversation.session).await;
        if (conversation.bot_active || upsert.is_fresh())
            && let Some(handler) = self.bot_for(config.as_ref())
        {
            return self
                .route_bot(&conversation, &message, config.as_ref(), handler)
                .await;
        }

        if upsert.is_fresh() || conversation.bot_active {
            if conversation.bot_active {
                // Handler was removed or the affinity turned off mid-conversation.
                self.conversations
                    .set_bot_active(&conversation.id, false, now)
                    .await?;
            }
            self.enter_queue(&conversation, &message, config.as_ref()).await;
            return Ok(Route::Queued);
        }
        Ok(Route::Human)
    }

    /// Find or create the open conversation for the message's contact.
    ///
    /// A unique-key conflict means another writer created it first; the
    /// existing record is re-read and reused.
    pub async fn upsert(
        &self,
        session: &str,
        message: &InboundMessage,
        now: i64,
    ) -> Result<(Conversation, Upsert)> {
        let at = message.timestamp_ms.max(now);
        let contact_name = message.contact_name.as_deref();

        if let Some(existing) = self
            .conversations
            .find_open(&message.contact_id, message.channel_kind)
            .await?
        {
            let upsert = if existing.finalized {
                self.conversations.reopen(&existing.id, now).await?;
                info!(conversation_id = %existing.id, session = %session, "conversation reopened");
                Upsert::Reopened
            } else {
                Upsert::Existing
            };
            self.conversations.touch(&existing.id, contact_name, at).await?;
            let conversation = self.reload(&existing.id).await?;
            return Ok((conversation, upsert));
        }

        let mut conversation =
            Conversation::new(session, &message.contact_id, message.channel_kind, now);
        conversation.contact_name = message.contact_name.clone();
        conversation.last_message_at_ms = Some(at);
        match self.conversations.insert(&conversation).await {
            Ok(()) => {
                info!(
                    conversation_id = %conversation.id,
                    session = %session,
                    contact_id = %message.contact_id,
                    "conversation created"
                );
                Ok((conversation, Upsert::Created))
            },
            Err(StoreError::Duplicate { .. }) => {
                #[cfg(feature = "metrics")]
                counter!(routing_metrics::UPSERT_RACES_TOTAL).increment(1);
                let existing = self
                    .conversations
                    .find_open(&message.contact_id, message.channel_kind)
                    .await?
                    .with_context(|| {
                        format!(
                            "conversation for {} reported duplicate but not found",
                            message.contact_id
                        )
                    })?;
                warn!(conversation_id = %existing.id, "conversation upsert raced, reusing existing");
                self.conversations.touch(&existing.id, contact_name, at).await?;
                let conversation = self.reload(&existing.id).await?;
                Ok((conversation, Upsert::Existing))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn reload(&self, id: &str) -> Result<Conversation> {
        self.conversations
            .get(id)
            .await?
            .ok_or_else(|| StoreError::conversation_not_found(id).into())
    }

    fn bot_for(&self, config: Option<&ChannelSessionConfig>) -> Option<Arc<dyn BotHandler>> {
        let handler_id = config?.bot.active_handler()?;
        let handler = self.bots.get(handler_id);
        if handler.is_none() {
            warn!(handler_id, "unknown bot handler, using the human path");
        }
        handler
    }

    async fn route_bot(
        &self,
        conversation: &Conversation,
        message: &InboundMessage,
        config: Option<&ChannelSessionConfig>,
        handler: Arc<dyn BotHandler>,
    ) -> Result<Route> {
        let handler_id = handler.id().to_string();
        if !conversation.bot_active {
            self.conversations
                .set_bot_active(&conversation.id, true, now_ms())
                .await?;
        }

        let reply = match handler.handle(conversation, message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(conversation_id = %conversation.id, handler_id = %handler_id, error = %e, "bot handler failed, handing off");
                crate::BotReply::hand_off()
            },
        };
        for text in &reply.messages {
            self.send(conversation, text).await;
        }

        if reply.hand_off {
            info!(conversation_id = %conversation.id, handler_id = %handler_id, "bot handed off to operators");
            self.conversations
                .set_bot_active(&conversation.id, false, now_ms())
                .await?;
            self.enter_queue(conversation, message, config).await;
            return Ok(Route::Queued);
        }
        Ok(Route::Bot { handler_id })
    }

    /// Welcome the contact and ask for an immediate offer.
    async fn enter_queue(
        &self,
        conversation: &Conversation,
        message: &InboundMessage,
        config: Option<&ChannelSessionConfig>,
    ) {
        if let Some(welcome) = config.and_then(|c| c.template(TemplateEvent::Welcome)) {
            let contact = message
                .contact_name
                .as_deref()
                .unwrap_or(&message.contact_id);
            let text = template::render(welcome, &[("contact", contact)]);
            self.send(conversation, &text).await;
        }
        if let Some(offers) = &self.offers {
            offers.offer_now(&conversation.id).await;
        }
    }

    async fn acknowledge(&self, session: &str, message: &InboundMessage) {
        if let Err(e) = self
            .outbound
            .mark_read(session, &message.contact_id, &message.message_id)
            .await
        {
            debug!(session, message_id = %message.message_id, error = %e, "mark read failed");
        }
    }

    async fn send(&self, conversation: &Conversation, text: &str) {
        if let Err(e) = self
            .outbound
            .send_text(&conversation.session, &conversation.contact_id, text)
            .await
        {
            warn!(
                conversation_id = %conversation.id,
                session = %conversation.session,
                error = %e,
                "automated reply failed"
            );
        }
    }
}

#[async_trait]
impl InboundProcessor for Router {
    async fn process(&self, envelope: InboundEnvelope) -> Result<()> {
        let route = self.route(envelope).await?;
        debug!(?route, "inbound routed");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::BotReply,
        std::{
            collections::HashMap,
            sync::{
                Mutex,
                atomic::{AtomicBool, Ordering},
            },
        },
        switchboard_channels::{BotAffinity, ConnectionKind, InboundSink},
        switchboard_conversations::InMemoryConversationStore,
    };

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

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(String, String, String)>>, Mutex<Vec<String>>);

    #[async_trait]
    impl OutboundSender for Outbox {
        async fn send_text(&self, session: &str, to: &str, text: &str) -> switchboard_channels::Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((session.into(), to.into(), text.into()));
            Ok(())
        }

        async fn mark_read(&self, _: &str, _: &str, message_id: &str) -> switchboard_channels::Result<()> {
            self.1.lock().unwrap().push(message_id.into());
            Ok(())
        }
    }

    impl Outbox {
        fn texts(&self) -> Vec<String> {
            self.0.lock().unwrap().iter().map(|(_, _, t)| t.clone()).collect()
        }
    }

    #[derive(Default)]
    struct Offers(Mutex<Vec<String>>);

    #[async_trait]
    impl OfferTrigger for Offers {
        async fn offer_now(&self, conversation_id: &str) {
            self.0.lock().unwrap().push(conversation_id.into());
        }
    }

    /// Answers twice, then hands off.
    struct Greeter;

    #[async_trait]
    impl BotHandler for Greeter {
        fn id(&self) -> &str {
            "greeter"
        }

        async fn handle(&self, _: &Conversation, message: &InboundMessage) -> Result<BotReply> {
            Ok(match message.body.as_str() {
                "human" => BotReply::text("Connecting you to an agent").then_hand_off(),
                body => BotReply::text(format!("echo: {body}")),
            })
        }
    }

    struct Harness {
        router: Router,
        store: Arc<InMemoryConversationStore>,
        outbox: Arc<Outbox>,
        offers: Arc<Offers>,
        events: EventBus,
    }

    fn harness(bot: bool) -> Harness {
        let mut support = ChannelSessionConfig::new("s1", "support", ConnectionKind::NativeAutomation);
        support.departments = vec!["d1".into()];
        support
            .templates
            .insert(TemplateEvent::Welcome, "Hello {contact}, an agent will be with you shortly".into());
        if bot {
            support.bot = BotAffinity {
                enabled: true,
                handler_id: Some("greeter".into()),
            };
        }
        let sessions = Sessions(HashMap::from([("support".to_string(), support)]));

        let store = Arc::new(InMemoryConversationStore::new());
        let outbox = Arc::new(Outbox::default());
        let offers = Arc::new(Offers::default());
        let events = EventBus::default();
        let mut bots = BotRegistry::new();
        bots.register(Arc::new(Greeter));
        let router = Router::new(store.clone(), Arc::new(sessions), outbox.clone(), events.clone())
            .with_bots(bots)
            .with_offer_trigger(offers.clone());
        Harness {
            router,
            store,
            outbox,
            offers,
            events,
        }
    }

    fn message(id: &str, body: &str) -> InboundEnvelope {
        InboundEnvelope {
            session: "support".into(),
            message: InboundMessage {
                message_id: id.into(),
                contact_id: "5511999".into(),
                contact_name: Some("Ana".into()),
                channel_kind: ConnectionKind::NativeAutomation,
                body: body.into(),
                timestamp_ms: 0,
                from_me: false,
                is_group: false,
            },
        }
    }

    #[tokio::test]
    async fn first_message_creates_conversation_and_queues_it() {
        let h = harness(false);
        let mut rx = h.events.subscribe();

        let route = h.router.route(message("m1", "hi")).await.unwrap();
        assert_eq!(route, Route::Queued);

        let conversation = h
            .store
            .find_open("5511999", ConnectionKind::NativeAutomation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.session, "support");
        assert_eq!(conversation.contact_name.as_deref(), Some("Ana"));
        assert_eq!(h.outbox.texts(), vec![
            "Hello Ana, an agent will be with you shortly"
        ]);
        assert_eq!(*h.offers.0.lock().unwrap(), vec![conversation.id.clone()]);

        assert_eq!(rx.try_recv().unwrap().name(), "message_received");
        assert_eq!(rx.try_recv().unwrap().name(), "conversation_created");
    }

    #[tokio::test]
    async fn follow_up_messages_reuse_the_conversation() {
        let h = harness(false);
        h.router.route(message("m1", "hi")).await.unwrap();
        let route = h.router.route(message("m2", "anyone?")).await.unwrap();
        assert_eq!(route, Route::Human);
        assert_eq!(h.outbox.texts().len(), 1);
        assert_eq!(h.offers.0.lock().unwrap().len(), 1);
    }

    /// Hides the open conversation from the first `find_open`, the way a
    /// concurrent writer inserting between lookup and insert would.
    struct Racy {
        inner: Arc<InMemoryConversationStore>,
        hide: AtomicBool,
    }

    #[async_trait]
    impl ConversationStore for Racy {
        async fn get(&self, id: &str) -> switchboard_conversations::Result<Option<Conversation>> {
            self.inner.get(id).await
        }

        async fn find_open(
            &self,
            contact_id: &str,
            channel_kind: ConnectionKind,
        ) -> switchboard_conversations::Result<Option<Conversation>> {
            if self.hide.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_open(contact_id, channel_kind).await
        }

        async fn insert(&self, c: &Conversation) -> switchboard_conversations::Result<()> {
            self.inner.insert(c).await
        }

        async fn touch(
            &self,
            id: &str,
            name: Option<&str>,
            at: i64,
        ) -> switchboard_conversations::Result<()> {
            self.inner.touch(id, name, at).await
        }

        async fn reopen(&self, id: &str, now: i64) -> switchboard_conversations::Result<()> {
            self.inner.reopen(id, now).await
        }

        async fn set_bot_active(
            &self,
            id: &str,
            active: bool,
            now: i64,
        ) -> switchboard_conversations::Result<()> {
            self.inner.set_bot_active(id, active, now).await
        }

        async fn set_department(
            &self,
            id: &str,
            department_id: &str,
            now: i64,
        ) -> switchboard_conversations::Result<()> {
            self.inner.set_department(id, department_id, now).await
        }

        async fn expired_offers(
            &self,
            now: i64,
        ) -> switchboard_conversations::Result<Vec<Conversation>> {
            self.inner.expired_offers(now).await
        }

        async fn clear_offer_if(
            &self,
            id: &str,
            operator_id: &str,
            now: i64,
        ) -> switchboard_conversations::Result<bool> {
            self.inner.clear_offer_if(id, operator_id, now).await
        }

        async fn candidates(
            &self,
            now: i64,
            limit: usize,
        ) -> switchboard_conversations::Result<Vec<Conversation>> {
            self.inner.candidates(now, limit).await
        }

        async fn write_offer(
            &self,
            id: &str,
            offer: &switchboard_conversations::Offer,
            now: i64,
        ) -> switchboard_conversations::Result<bool> {
            self.inner.write_offer(id, offer, now).await
        }

        async fn accept_offer(
            &self,
            id: &str,
            operator_id: &str,
            now: i64,
        ) -> switchboard_conversations::Result<Conversation> {
            self.inner.accept_offer(id, operator_id, now).await
        }

        async fn resolve(&self, id: &str, now: i64) -> switchboard_conversations::Result<Conversation> {
            self.inner.resolve(id, now).await
        }

        async fn active_chat_counts(
            &self,
            now: i64,
        ) -> switchboard_conversations::Result<HashMap<String, u32>> {
            self.inner.active_chat_counts(now).await
        }
    }

    #[tokio::test]
    async fn duplicate_insert_reuses_existing_record() {
        let inner = Arc::new(InMemoryConversationStore::new());
        let first = Conversation::new("support", "5511999", ConnectionKind::NativeAutomation, 1);
        inner.insert(&first).await.unwrap();

        let store = Arc::new(Racy {
            inner,
            hide: AtomicBool::new(true),
        });
        let router = Router::new(
            store,
            Arc::new(Sessions::default()),
            Arc::new(Outbox::default()),
            EventBus::default(),
        );

        let (conversation, upsert) = router
            .upsert("support", &message("m1", "hi").message, 10)
            .await
            .unwrap();
        assert_eq!(upsert, Upsert::Existing);
        assert_eq!(conversation.id, first.id);
        assert_eq!(conversation.contact_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn finalized_conversation_reopens_on_new_message() {
        let h = harness(false);
        h.router.route(message("m1", "hi")).await.unwrap();
        let conversation = h
            .store
            .find_open("5511999", ConnectionKind::NativeAutomation)
            .await
            .unwrap()
            .unwrap();
        h.store.resolve(&conversation.id, 100).await.unwrap();

        let route = h.router.route(message("m2", "me again")).await.unwrap();
        assert_eq!(route, Route::Queued);
        let reopened = h.store.get(&conversation.id).await.unwrap().unwrap();
        assert!(!reopened.finalized);
        assert_eq!(h.offers.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn echo_only_touches_the_conversation() {
        let h = harness(false);
        let mut echo = message("m0", "sent from phone");
        echo.message.from_me = true;
        assert_eq!(h.router.route(echo).await.unwrap(), Route::Echo);
        assert!(
            h.store
                .find_open("5511999", ConnectionKind::NativeAutomation)
                .await
                .unwrap()
                .is_none()
        );
        assert!(h.outbox.texts().is_empty());
        assert!(h.outbox.1.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_messages_are_ignored() {
        let h = harness(false);
        let mut group = message("g1", "hello all");
        group.message.is_group = true;
        assert_eq!(h.router.route(group).await.unwrap(), Route::Ignored);
        assert!(h.outbox.1.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn routed_messages_are_marked_read() {
        let h = harness(false);
        h.router.route(message("m1", "hi")).await.unwrap();
        h.router.route(message("m2", "anyone?")).await.unwrap();
        assert_eq!(*h.outbox.1.lock().unwrap(), vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn bot_handles_until_hand_off() {
        let h = harness(true);

        let route = h.router.route(message("m1", "hi")).await.unwrap();
        assert_eq!(route, Route::Bot {
            handler_id: "greeter".into()
        });
        let conversation = h
            .store
            .find_open("5511999", ConnectionKind::NativeAutomation)
            .await
            .unwrap()
            .unwrap();
        assert!(conversation.bot_active);
        assert!(!conversation.is_candidate(i64::MAX / 2));
        assert!(h.offers.0.lock().unwrap().is_empty());

        h.router.route(message("m2", "what?")).await.unwrap();
        let route = h.router.route(message("m3", "human")).await.unwrap();
        assert_eq!(route, Route::Queued);

        let conversation = h.store.get(&conversation.id).await.unwrap().unwrap();
        assert!(!conversation.bot_active);
        assert_eq!(h.outbox.texts(), vec![
            "echo: hi",
            "echo: what?",
            "Connecting you to an agent",
            "Hello Ana, an agent will be with you shortly",
        ]);
        assert_eq!(*h.offers.0.lock().unwrap(), vec![conversation.id]);
    }

    #[tokio::test]
    async fn unknown_bot_handler_falls_back_to_humans() {
        let mut h = harness(true);
        h.router = h.router.with_bots(BotRegistry::new());
        let route = h.router.route(message("m1", "hi")).await.unwrap();
        assert_eq!(route, Route::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_preserves_order_through_the_router() {
        let h = harness(false);
        let store = h.store.clone();
        let queue = crate::InboundQueue::new(Arc::new(h.router));

        for i in 0..5 {
            queue.push(message(&format!("m{i}"), "hi"));
        }
        queue.wait_idle().await;

        assert_eq!(h.outbox.texts().len(), 1);
        assert_eq!(h.offers.0.lock().unwrap().len(), 1);
        assert!(
            store
                .find_open("5511999", ConnectionKind::NativeAutomation)
                .await
                .unwrap()
                .is_some()
        );
    }
}
