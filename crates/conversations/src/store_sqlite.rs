//! SQLite-backed stores using sqlx.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqliteRow},
    switchboard_channels::ConnectionKind,
};

use crate::{
    Error, Result,
    error::Context,
    store::{ConversationStore, DepartmentStore, OperatorStore},
    types::{Conversation, Department, Offer, Operator, OperatorStatus},
};

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

const CONVERSATION_COLUMNS: &str = "id, session, contact_id, contact_name, channel_kind, \
     assigned_operator_id, assigned_operator_name, department_id, offer_operator_id, \
     offer_operator_name, offer_expires_at, offer_attempts, last_operator_id, last_resolved_at, \
     bot_active, archived, finalized, created_at, updated_at, last_message_at";

/// Conversations, operators and departments in one SQLite database.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Create a store using an existing pool. Call [`crate::run_migrations`] first.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn require(&self, id: &str) -> Result<Conversation> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::conversation_not_found(id))
    }

    /// Run an unconditional single-row update, mapping "no row" to not found.
    async fn update_one<'q>(&self, id: &str, query: SqliteQuery<'q>) -> Result<()> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(Error::conversation_not_found(id));
        }
        Ok(())
    }
}

fn decode_conversation(row: &SqliteRow) -> Result<Conversation> {
    let kind: String = row.get("channel_kind");
    let channel_kind = ConnectionKind::parse(&kind)
        .with_context(|| format!("unknown channel kind in database: {kind}"))?;

    let offer_operator_id: Option<String> = row.get("offer_operator_id");
    let offer_expires_at: Option<i64> = row.get("offer_expires_at");
    let offer = match (offer_operator_id, offer_expires_at) {
        (Some(operator_id), Some(expires_at_ms)) => Some(Offer {
            operator_id,
            operator_name: row
                .get::<Option<String>, _>("offer_operator_name")
                .unwrap_or_default(),
            expires_at_ms,
        }),
        _ => None,
    };

    Ok(Conversation {
        id: row.get("id"),
        session: row.get("session"),
        contact_id: row.get("contact_id"),
        contact_name: row.get("contact_name"),
        channel_kind,
        assigned_operator_id: row.get("assigned_operator_id"),
        assigned_operator_name: row.get("assigned_operator_name"),
        department_id: row.get("department_id"),
        offer,
        offer_attempts: row.get::<i64, _>("offer_attempts").max(0) as u32,
        last_operator_id: row.get("last_operator_id"),
        last_resolved_at_ms: row.get("last_resolved_at"),
        bot_active: row.get::<i64, _>("bot_active") != 0,
        archived: row.get::<i64, _>("archived") != 0,
        finalized: row.get::<i64, _>("finalized") != 0,
        created_at_ms: row.get("created_at"),
        updated_at_ms: row.get("updated_at"),
        last_message_at_ms: row.get("last_message_at"),
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_conversation).transpose()
    }

    async fn find_open(
        &self,
        contact_id: &str,
        channel_kind: ConnectionKind,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE contact_id = ? AND channel_kind = ? AND archived = 0"
        ))
        .bind(contact_id)
        .bind(channel_kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_conversation).transpose()
    }

    async fn insert(&self, c: &Conversation) -> Result<()> {
        let (offer_operator_id, offer_operator_name, offer_expires_at) = match &c.offer {
            Some(o) => (
                Some(o.operator_id.as_str()),
                Some(o.operator_name.as_str()),
                Some(o.expires_at_ms),
            ),
            None => (None, None, None),
        };
        let result = sqlx::query(&format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&c.id)
        .bind(&c.session)
        .bind(&c.contact_id)
        .bind(&c.contact_name)
        .bind(c.channel_kind.as_str())
        .bind(&c.assigned_operator_id)
        .bind(&c.assigned_operator_name)
        .bind(&c.department_id)
        .bind(offer_operator_id)
        .bind(offer_operator_name)
        .bind(offer_expires_at)
        .bind(c.offer_attempts as i64)
        .bind(&c.last_operator_id)
        .bind(c.last_resolved_at_ms)
        .bind(c.bot_active as i64)
        .bind(c.archived as i64)
        .bind(c.finalized as i64)
        .bind(c.created_at_ms)
        .bind(c.updated_at_ms)
        .bind(c.last_message_at_ms)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Duplicate {
                contact_id: c.contact_id.clone(),
                channel_kind: c.channel_kind.as_str().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn touch(&self, id: &str, contact_name: Option<&str>, at_ms: i64) -> Result<()> {
        self.update_one(
            id,
            sqlx::query(
                "UPDATE conversations SET contact_name = COALESCE(?, contact_name), \
                 last_message_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(contact_name)
            .bind(at_ms)
            .bind(at_ms)
            .bind(id),
        )
        .await
    }

    async fn reopen(&self, id: &str, now_ms: i64) -> Result<()> {
        self.update_one(
            id,
            sqlx::query(
                "UPDATE conversations SET finalized = 0, assigned_operator_id = NULL, \
                 assigned_operator_name = NULL, offer_operator_id = NULL, \
                 offer_operator_name = NULL, offer_expires_at = NULL, offer_attempts = 0, \
                 bot_active = 0, updated_at = ? WHERE id = ?",
            )
            .bind(now_ms)
            .bind(id),
        )
        .await
    }

    async fn set_bot_active(&self, id: &str, active: bool, now_ms: i64) -> Result<()> {
        self.update_one(
            id,
            sqlx::query("UPDATE conversations SET bot_active = ?, updated_at = ? WHERE id = ?")
                .bind(active as i64)
                .bind(now_ms)
                .bind(id),
        )
        .await
    }

    async fn set_department(&self, id: &str, department_id: &str, now_ms: i64) -> Result<()> {
        self.update_one(
            id,
            sqlx::query("UPDATE conversations SET department_id = ?, updated_at = ? WHERE id = ?")
                .bind(department_id)
                .bind(now_ms)
                .bind(id),
        )
        .await
    }

    async fn expired_offers(&self, now_ms: i64) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE offer_expires_at IS NOT NULL AND offer_expires_at <= ?"
        ))
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_conversation).collect()
    }

    async fn clear_offer_if(&self, id: &str, operator_id: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET offer_operator_id = NULL, offer_operator_name = NULL, \
             offer_expires_at = NULL, updated_at = ? WHERE id = ? AND offer_operator_id = ?",
        )
        .bind(now_ms)
        .bind(id)
        .bind(operator_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn candidates(&self, now_ms: i64, limit: usize) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE assigned_operator_id IS NULL AND archived = 0 AND finalized = 0 \
               AND bot_active = 0 \
               AND (offer_expires_at IS NULL OR offer_expires_at <= ?) \
             ORDER BY created_at ASC, id ASC LIMIT ?"
        ))
        .bind(now_ms)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_conversation).collect()
    }

    async fn write_offer(&self, id: &str, offer: &Offer, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET offer_operator_id = ?, offer_operator_name = ?, \
             offer_expires_at = ?, offer_attempts = offer_attempts + 1, updated_at = ? \
             WHERE id = ? AND assigned_operator_id IS NULL AND archived = 0 \
               AND finalized = 0 AND bot_active = 0 \
               AND (offer_expires_at IS NULL OR offer_expires_at <= ?)",
        )
        .bind(&offer.operator_id)
        .bind(&offer.operator_name)
        .bind(offer.expires_at_ms)
        .bind(now_ms)
        .bind(id)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn accept_offer(
        &self,
        id: &str,
        operator_id: &str,
        now_ms: i64,
    ) -> Result<Conversation> {
        let result = sqlx::query(
            "UPDATE conversations SET assigned_operator_id = offer_operator_id, \
             assigned_operator_name = offer_operator_name, offer_operator_id = NULL, \
             offer_operator_name = NULL, offer_expires_at = NULL, updated_at = ? \
             WHERE id = ? AND offer_operator_id = ? AND offer_expires_at > ? \
               AND assigned_operator_id IS NULL AND archived = 0 AND finalized = 0",
        )
        .bind(now_ms)
        .bind(id)
        .bind(operator_id)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(if self.exists(id).await? {
                Error::offer_not_held(id, operator_id)
            } else {
                Error::conversation_not_found(id)
            });
        }
        self.require(id).await
    }

    async fn resolve(&self, id: &str, now_ms: i64) -> Result<Conversation> {
        self.update_one(
            id,
            sqlx::query(
                "UPDATE conversations SET \
                 last_operator_id = COALESCE(assigned_operator_id, last_operator_id), \
                 assigned_operator_id = NULL, assigned_operator_name = NULL, \
                 offer_operator_id = NULL, offer_operator_name = NULL, \
                 offer_expires_at = NULL, finalized = 1, last_resolved_at = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(now_ms)
            .bind(now_ms)
            .bind(id),
        )
        .await?;
        self.require(id).await
    }

    async fn active_chat_counts(&self, now_ms: i64) -> Result<HashMap<String, u32>> {
        let rows = sqlx::query(
            "SELECT holder, COUNT(*) AS n FROM ( \
               SELECT COALESCE(assigned_operator_id, \
                 CASE WHEN offer_expires_at > ? THEN offer_operator_id END) AS holder \
               FROM conversations WHERE archived = 0 AND finalized = 0 \
             ) WHERE holder IS NOT NULL GROUP BY holder",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("holder"),
                    row.get::<i64, _>("n").max(0) as u32,
                )
            })
            .collect())
    }
}

fn decode_operator(row: &SqliteRow) -> Result<Operator> {
    let status: String = row.get("status");
    let departments: String = row.get("departments");
    Ok(Operator {
        id: row.get("id"),
        name: row.get("name"),
        departments: serde_json::from_str(&departments)?,
        status: OperatorStatus::parse(&status).unwrap_or_default(),
        max_concurrent: row.get::<i64, _>("max_concurrent").max(0) as u32,
    })
}

#[async_trait]
impl OperatorStore for SqliteConversationStore {
    async fn get_operator(&self, id: &str) -> Result<Option<Operator>> {
        let row = sqlx::query(
            "SELECT id, name, status, max_concurrent, departments FROM operators WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_operator).transpose()
    }

    async fn list_operators(&self) -> Result<Vec<Operator>> {
        let rows = sqlx::query(
            "SELECT id, name, status, max_concurrent, departments FROM operators ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_operator).collect()
    }

    async fn upsert_operator(&self, operator: &Operator) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO operators (id, name, status, max_concurrent, departments)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 status = excluded.status,
                 max_concurrent = excluded.max_concurrent,
                 departments = excluded.departments"#,
        )
        .bind(&operator.id)
        .bind(&operator.name)
        .bind(operator.status.as_str())
        .bind(operator.max_concurrent as i64)
        .bind(serde_json::to_string(&operator.departments)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_operator_status(&self, id: &str, status: OperatorStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE operators SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn decode_department(row: &SqliteRow) -> Result<Department> {
    let members: String = row.get("members");
    Ok(Department {
        id: row.get("id"),
        name: row.get("name"),
        active: row.get::<i64, _>("active") != 0,
        members: serde_json::from_str(&members)?,
    })
}

#[async_trait]
impl DepartmentStore for SqliteConversationStore {
    async fn get_department(&self, id: &str) -> Result<Option<Department>> {
        let row = sqlx::query("SELECT id, name, active, members FROM departments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_department).transpose()
    }

    async fn list_departments(&self) -> Result<Vec<Department>> {
        let rows = sqlx::query("SELECT id, name, active, members FROM departments ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_department).collect()
    }

    async fn upsert_department(&self, department: &Department) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO departments (id, name, active, members)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 active = excluded.active,
                 members = excluded.members"#,
        )
        .bind(&department.id)
        .bind(&department.name)
        .bind(department.active as i64)
        .bind(serde_json::to_string(&department.members)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
