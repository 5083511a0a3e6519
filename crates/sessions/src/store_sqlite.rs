//! SQLite-backed session and credential stores using sqlx.

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, SecretString},
    sqlx::{Row, SqlitePool},
    switchboard_channels::{
        ChannelSessionConfig, CredentialStore, Error as ChannelError, Result, SessionStore,
    },
    switchboard_common::time::now_ms,
};

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> ChannelError {
    move |e| ChannelError::external(context, e)
}

/// Session configs are stored as JSON in `data`; `session` and `is_default`
/// are mirrored into columns for lookups and the single-default update.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Create a store using an existing pool. Call [`crate::run_migrations`] first.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<ChannelSessionConfig> {
    let data: String = row.get("data");
    let mut cfg: ChannelSessionConfig = serde_json::from_str(&data)?;
    cfg.is_default = row.get::<i64, _>("is_default") != 0;
    Ok(cfg)
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn list(&self) -> Result<Vec<ChannelSessionConfig>> {
        let rows = sqlx::query(
            "SELECT data, is_default FROM channel_sessions ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list sessions"))?;
        rows.iter().map(decode).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<ChannelSessionConfig>> {
        let row = sqlx::query("SELECT data, is_default FROM channel_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get session"))?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_by_session(&self, session: &str) -> Result<Option<ChannelSessionConfig>> {
        let row = sqlx::query("SELECT data, is_default FROM channel_sessions WHERE session = ?")
            .bind(session)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get session by key"))?;
        row.as_ref().map(decode).transpose()
    }

    async fn upsert(&self, config: ChannelSessionConfig) -> Result<()> {
        let data = serde_json::to_string(&config)?;
        sqlx::query(
            r#"INSERT INTO channel_sessions (id, session, is_default, data, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 session = excluded.session,
                 is_default = excluded.is_default,
                 data = excluded.data,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&config.id)
        .bind(&config.session)
        .bind(config.is_default as i64)
        .bind(&data)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("upsert session"))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channel_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete session"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_default(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;
        let updated =
            sqlx::query("UPDATE channel_sessions SET is_default = 1, updated_at = ? WHERE id = ?")
                .bind(now_ms())
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err("set default"))?;
        if updated.rows_affected() == 0 {
            return Err(ChannelError::unknown_session(id));
        }
        sqlx::query("UPDATE channel_sessions SET is_default = 0 WHERE id != ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("clear default"))?;
        tx.commit().await.map_err(db_err("commit"))?;
        Ok(())
    }
}

pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, session: &str) -> Result<Option<SecretString>> {
        let token = sqlx::query_scalar::<_, String>(
            "SELECT token FROM session_credentials WHERE session = ?",
        )
        .bind(session)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get credential"))?;
        Ok(token.map(SecretString::new))
    }

    async fn set(&self, session: &str, token: SecretString) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO session_credentials (session, token, updated_at) VALUES (?, ?, ?)
               ON CONFLICT(session) DO UPDATE SET
                 token = excluded.token,
                 updated_at = excluded.updated_at"#,
        )
        .bind(session)
        .bind(token.expose_secret())
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(db_err("set credential"))?;
        Ok(())
    }

    async fn remove(&self, session: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_credentials WHERE session = ?")
            .bind(session)
            .execute(&self.pool)
            .await
            .map_err(db_err("remove credential"))?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        switchboard_channels::ConnectionKind,
    };

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn config(id: &str, session: &str, created_at: i64) -> ChannelSessionConfig {
        let mut cfg = ChannelSessionConfig::new(id, session, ConnectionKind::NativeAutomation);
        cfg.departments = vec!["sales".into()];
        cfg.created_at = created_at;
        cfg.updated_at = created_at;
        cfg
    }

    #[tokio::test]
    async fn upsert_and_lookup() {
        let store = SqliteSessionStore::new(test_pool().await);
        store.upsert(config("a", "sales-1", 1)).await.unwrap();
        store.upsert(config("b", "support", 2)).await.unwrap();

        let by_key = store.get_by_session("support").await.unwrap().unwrap();
        assert_eq!(by_key.id, "b");
        assert_eq!(store.get("a").await.unwrap().unwrap().departments, vec![
            "sales".to_string()
        ]);

        let all = store.list().await.unwrap();
        assert_eq!(all.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec![
            "a", "b"
        ]);
    }

    #[tokio::test]
    async fn set_default_is_exclusive() {
        let store = SqliteSessionStore::new(test_pool().await);
        store.upsert(config("a", "one", 1)).await.unwrap();
        store.upsert(config("b", "two", 2)).await.unwrap();

        store.set_default("a").await.unwrap();
        store.set_default("b").await.unwrap();

        let defaults: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.is_default)
            .map(|c| c.id)
            .collect();
        assert_eq!(defaults, vec!["b".to_string()]);
        assert!(store.set_default("missing").await.is_err());
    }

    #[tokio::test]
    async fn delete_reports_removal() {
        let store = SqliteSessionStore::new(test_pool().await);
        store.upsert(config("a", "one", 1)).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn credentials_roundtrip_and_remove() {
        let store = SqliteCredentialStore::new(test_pool().await);
        assert!(store.get("s1").await.unwrap().is_none());

        store.set("s1", SecretString::new("tok-1".into())).await.unwrap();
        store.set("s1", SecretString::new("tok-2".into())).await.unwrap();
        let got = store.get("s1").await.unwrap().unwrap();
        assert_eq!(got.expose_secret(), "tok-2");

        store.remove("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
    }
}
