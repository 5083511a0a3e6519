//! Conversation, operator and department records.

use std::fmt;

use {
    serde::{Deserialize, Serialize},
    switchboard_channels::ConnectionKind,
};

/// A time-boxed, tentative assignment held by one operator.
///
/// Operator id, name and expiry only ever exist together, so the offer is a
/// single optional value on [`Conversation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub operator_id: String,
    pub operator_name: String,
    pub expires_at_ms: i64,
}

impl Offer {
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Session key of the channel session the conversation arrived on.
    pub session: String,
    pub contact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub channel_kind: ConnectionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_operator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_operator_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<Offer>,
    pub offer_attempts: u32,
    /// Operator who resolved the conversation last, for the re-offer cooldown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resolved_at_ms: Option<i64>,
    /// Handled by a bot; not offered to operators until handed off.
    pub bot_active: bool,
    pub archived: bool,
    pub finalized: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at_ms: Option<i64>,
}

impl Conversation {
    pub fn new(
        session: impl Into<String>,
        contact_id: impl Into<String>,
        channel_kind: ConnectionKind,
        now_ms: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session: session.into(),
            contact_id: contact_id.into(),
            contact_name: None,
            channel_kind,
            assigned_operator_id: None,
            assigned_operator_name: None,
            department_id: None,
            offer: None,
            offer_attempts: 0,
            last_operator_id: None,
            last_resolved_at_ms: None,
            bot_active: false,
            archived: false,
            finalized: false,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            last_message_at_ms: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_operator_id.is_some()
    }

    pub fn active_offer(&self, now_ms: i64) -> Option<&Offer> {
        self.offer.as_ref().filter(|o| o.is_active(now_ms))
    }

    /// Waiting for an operator: unassigned, open, not with a bot, and either
    /// never offered or holding only an expired offer.
    pub fn is_candidate(&self, now_ms: i64) -> bool {
        !self.is_assigned()
            && !self.archived
            && !self.finalized
            && !self.bot_active
            && self.active_offer(now_ms).is_none()
    }

    /// Whether `operator_id` resolved this conversation less than
    /// `cooldown_ms` ago.
    pub fn in_cooldown_for(&self, operator_id: &str, now_ms: i64, cooldown_ms: i64) -> bool {
        self.last_operator_id.as_deref() == Some(operator_id)
            && self
                .last_resolved_at_ms
                .is_some_and(|at| now_ms.saturating_sub(at) < cooldown_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    Online,
    Busy,
    #[default]
    Offline,
}

impl OperatorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(Self::Online),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    /// Busy operators still receive offers; capacity decides the rest.
    pub fn receives_offers(self) -> bool {
        matches!(self, Self::Online | Self::Busy)
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub status: OperatorStatus,
    pub max_concurrent: u32,
}

impl Operator {
    pub fn new(id: impl Into<String>, name: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            departments: Vec::new(),
            status: OperatorStatus::Offline,
            max_concurrent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: String,
    pub name: String,
    pub active: bool,
    /// Member operator ids in rotation order.
    #[serde(default)]
    pub members: Vec<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn conversation() -> Conversation {
        Conversation::new("sales", "5511", ConnectionKind::NativeAutomation, 1_000)
    }

    #[test]
    fn fresh_conversation_is_a_candidate() {
        assert!(conversation().is_candidate(1_000));
    }

    #[test]
    fn active_offer_blocks_candidacy_until_expiry() {
        let mut c = conversation();
        c.offer = Some(Offer {
            operator_id: "op1".into(),
            operator_name: "Ana".into(),
            expires_at_ms: 5_000,
        });
        assert!(!c.is_candidate(4_999));
        assert!(c.is_candidate(5_000));
    }

    #[rstest]
    #[case::assigned(|c: &mut Conversation| c.assigned_operator_id = Some("op1".into()))]
    #[case::archived(|c: &mut Conversation| c.archived = true)]
    #[case::finalized(|c: &mut Conversation| c.finalized = true)]
    #[case::bot(|c: &mut Conversation| c.bot_active = true)]
    fn excluded_from_candidates(#[case] mutate: fn(&mut Conversation)) {
        let mut c = conversation();
        mutate(&mut c);
        assert!(!c.is_candidate(1_000));
    }

    #[test]
    fn cooldown_window() {
        let mut c = conversation();
        c.last_operator_id = Some("op1".into());
        c.last_resolved_at_ms = Some(10_000);
        assert!(c.in_cooldown_for("op1", 10_000 + 60_000, 300_000));
        assert!(!c.in_cooldown_for("op1", 10_000 + 300_000, 300_000));
        assert!(!c.in_cooldown_for("op2", 10_001, 300_000));
    }

    #[rstest]
    #[case("online", Some(OperatorStatus::Online), true)]
    #[case("busy", Some(OperatorStatus::Busy), true)]
    #[case("offline", Some(OperatorStatus::Offline), false)]
    #[case("away", None, false)]
    fn operator_status(
        #[case] raw: &str,
        #[case] parsed: Option<OperatorStatus>,
        #[case] receives: bool,
    ) {
        assert_eq!(OperatorStatus::parse(raw), parsed);
        assert_eq!(parsed.is_some_and(OperatorStatus::receives_offers), receives);
    }
}
