//! In-memory stores, used by tests and single-process setups without a database.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use {async_trait::async_trait, switchboard_channels::ConnectionKind};

use crate::{
    Error, Result,
    store::{ConversationStore, DepartmentStore, OperatorStore},
    types::{Conversation, Department, Offer, Operator, OperatorStatus},
};

/// Conversations, operators and departments kept in `HashMap`s. No persistence.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    operators: Mutex<HashMap<String, Operator>>,
    departments: Mutex<HashMap<String, Department>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn conversations(&self) -> MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn operators(&self) -> MutexGuard<'_, HashMap<String, Operator>> {
        self.operators.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn departments(&self) -> MutexGuard<'_, HashMap<String, Department>> {
        self.departments.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<T>(&self, id: &str, f: impl FnOnce(&mut Conversation) -> T) -> Result<T> {
        let mut conversations = self.conversations();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| Error::conversation_not_found(id))?;
        Ok(f(conversation))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations().get(id).cloned())
    }

    async fn find_open(
        &self,
        contact_id: &str,
        channel_kind: ConnectionKind,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .conversations()
            .values()
            .find(|c| !c.archived && c.contact_id == contact_id && c.channel_kind == channel_kind)
            .cloned())
    }

    async fn insert(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.conversations();
        let clash = conversations.values().any(|c| {
            !c.archived
                && !conversation.archived
                && c.contact_id == conversation.contact_id
                && c.channel_kind == conversation.channel_kind
        });
        if clash || conversations.contains_key(&conversation.id) {
            return Err(Error::Duplicate {
                contact_id: conversation.contact_id.clone(),
                channel_kind: conversation.channel_kind.as_str().to_string(),
            });
        }
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn touch(&self, id: &str, contact_name: Option<&str>, at_ms: i64) -> Result<()> {
        self.update(id, |c| {
            if let Some(name) = contact_name {
                c.contact_name = Some(name.to_string());
            }
            c.last_message_at_ms = Some(at_ms);
            c.updated_at_ms = at_ms;
        })
    }

    async fn reopen(&self, id: &str, now_ms: i64) -> Result<()> {
        self.update(id, |c| {
            c.finalized = false;
            c.assigned_operator_id = None;
            c.assigned_operator_name = None;
            c.offer = None;
            c.offer_attempts = 0;
            c.bot_active = false;
            c.updated_at_ms = now_ms;
        })
    }

    async fn set_bot_active(&self, id: &str, active: bool, now_ms: i64) -> Result<()> {
        self.update(id, |c| {
            c.bot_active = active;
            c.updated_at_ms = now_ms;
        })
    }

    async fn set_department(&self, id: &str, department_id: &str, now_ms: i64) -> Result<()> {
        self.update(id, |c| {
            c.department_id = Some(department_id.to_string());
            c.updated_at_ms = now_ms;
        })
    }

    async fn expired_offers(&self, now_ms: i64) -> Result<Vec<Conversation>> {
        Ok(self
            .conversations()
            .values()
            .filter(|c| c.offer.as_ref().is_some_and(|o| !o.is_active(now_ms)))
            .cloned()
            .collect())
    }

    async fn clear_offer_if(&self, id: &str, operator_id: &str, now_ms: i64) -> Result<bool> {
        self.update(id, |c| {
            let held = c
                .offer
                .as_ref()
                .is_some_and(|o| o.operator_id == operator_id);
            if held {
                c.offer = None;
                c.updated_at_ms = now_ms;
            }
            held
        })
    }

    async fn candidates(&self, now_ms: i64, limit: usize) -> Result<Vec<Conversation>> {
        let mut candidates: Vec<Conversation> = self
            .conversations()
            .values()
            .filter(|c| c.is_candidate(now_ms))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn write_offer(&self, id: &str, offer: &Offer, now_ms: i64) -> Result<bool> {
        self.update(id, |c| {
            if !c.is_candidate(now_ms) {
                return false;
            }
            c.offer = Some(offer.clone());
            c.offer_attempts += 1;
            c.updated_at_ms = now_ms;
            true
        })
    }

    async fn accept_offer(
        &self,
        id: &str,
        operator_id: &str,
        now_ms: i64,
    ) -> Result<Conversation> {
        self.update(id, |c| {
            let holds = !c.is_assigned()
                && !c.archived
                && !c.finalized
                && c.active_offer(now_ms)
                    .is_some_and(|o| o.operator_id == operator_id);
            if !holds {
                return Err(Error::offer_not_held(id, operator_id));
            }
            if let Some(offer) = c.offer.take() {
                c.assigned_operator_id = Some(offer.operator_id);
                c.assigned_operator_name = Some(offer.operator_name);
            }
            c.updated_at_ms = now_ms;
            Ok(c.clone())
        })?
    }

    async fn resolve(&self, id: &str, now_ms: i64) -> Result<Conversation> {
        self.update(id, |c| {
            if let Some(operator) = c.assigned_operator_id.take() {
                c.last_operator_id = Some(operator);
            }
            c.assigned_operator_name = None;
            c.offer = None;
            c.finalized = true;
            c.last_resolved_at_ms = Some(now_ms);
            c.updated_at_ms = now_ms;
            c.clone()
        })
    }

    async fn active_chat_counts(&self, now_ms: i64) -> Result<HashMap<String, u32>> {
        let mut counts = HashMap::new();
        for c in self.conversations().values() {
            if c.archived || c.finalized {
                continue;
            }
            let holder = c
                .assigned_operator_id
                .as_deref()
                .or_else(|| c.active_offer(now_ms).map(|o| o.operator_id.as_str()));
            if let Some(operator) = holder {
                *counts.entry(operator.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl OperatorStore for InMemoryConversationStore {
    async fn get_operator(&self, id: &str) -> Result<Option<Operator>> {
        Ok(self.operators().get(id).cloned())
    }

    async fn list_operators(&self) -> Result<Vec<Operator>> {
        let mut operators: Vec<Operator> = self.operators().values().cloned().collect();
        operators.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(operators)
    }

    async fn upsert_operator(&self, operator: &Operator) -> Result<()> {
        self.operators()
            .insert(operator.id.clone(), operator.clone());
        Ok(())
    }

    async fn set_operator_status(&self, id: &str, status: OperatorStatus) -> Result<bool> {
        Ok(match self.operators().get_mut(id) {
            Some(operator) => {
                operator.status = status;
                true
            },
            None => false,
        })
    }
}

#[async_trait]
impl DepartmentStore for InMemoryConversationStore {
    async fn get_department(&self, id: &str) -> Result<Option<Department>> {
        Ok(self.departments().get(id).cloned())
    }

    async fn list_departments(&self) -> Result<Vec<Department>> {
        let mut departments: Vec<Department> = self.departments().values().cloned().collect();
        departments.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(departments)
    }

    async fn upsert_department(&self, department: &Department) -> Result<()> {
        self.departments()
            .insert(department.id.clone(), department.clone());
        Ok(())
    }
}
