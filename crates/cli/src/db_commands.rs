use {clap::Subcommand, sqlx::sqlite::SqlitePoolOptions};

use crate::Resolved;

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
}

pub async fn handle_db(action: DbAction, resolved: &Resolved) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => run_migrations(resolved).await,
    }
}

async fn run_migrations(resolved: &Resolved) -> anyhow::Result<()> {
    let db_url = resolved.database_url();
    if resolved.config.database.url.is_none() {
        std::fs::create_dir_all(&resolved.data_dir)?;
    }
    let pool = SqlitePoolOptions::new().connect(&db_url).await?;

    switchboard_sessions::run_migrations(&pool).await?;
    println!("Sessions migrations applied.");
    switchboard_conversations::run_migrations(&pool).await?;
    println!("Conversations migrations applied.");

    pool.close().await;
    println!("Database ready: {db_url}");
    Ok(())
}
