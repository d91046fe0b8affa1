//! Database module for SQLite persistence using SeaORM

pub mod entities;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Initialize database connection and create tables
pub async fn init_database(db_path: &Path) -> Result<DatabaseConnection, DbErr> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    tracing::info!("Connecting to database: {}", db_url);

    let db = Database::connect(&db_url).await?;
    create_tables(&db).await?;

    Ok(db)
}

/// In-memory database for tests
pub async fn init_memory_database() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    create_tables(&db).await?;
    Ok(db)
}

/// Current Unix timestamp in seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Create all tables if they don't exist
async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Channels table (cached remote destinations)
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT NOT NULL UNIQUE,
            name TEXT,
            last_used_at INTEGER NOT NULL
        )
        "#
        .to_string(),
    ))
    .await?;

    // Stored files table (one row per logical file)
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS stored_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            share_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            original_name TEXT NOT NULL,
            size INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            kind INTEGER NOT NULL DEFAULT 0,
            upload_complete INTEGER NOT NULL DEFAULT 0,
            remote_message_id TEXT,
            public INTEGER NOT NULL DEFAULT 0,
            channel_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
        )
        "#
        .to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_files_channel ON stored_files(channel_id)"#.to_string(),
    ))
    .await?;
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_files_share ON stored_files(share_id)"#.to_string(),
    ))
    .await?;

    // File parts table (ordered chunks for reconstruction)
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS file_parts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            size INTEGER NOT NULL,
            remote_message_id TEXT,
            attachment_url TEXT,
            upload_complete INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (file_id) REFERENCES stored_files(id) ON DELETE CASCADE,
            UNIQUE(file_id, seq)
        )
        "#
        .to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_parts_file ON file_parts(file_id)"#.to_string(),
    ))
    .await?;

    // Batch jobs table
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS batch_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#
        .to_string(),
    ))
    .await?;

    // Batch items table (one per file within a job)
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS batch_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            file_id INTEGER,
            status INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            FOREIGN KEY (job_id) REFERENCES batch_jobs(id) ON DELETE CASCADE
        )
        "#
        .to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_items_job ON batch_items(job_id)"#.to_string(),
    ))
    .await?;

    // Transfer history table
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS transfer_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER,
            op TEXT NOT NULL,
            details TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#
        .to_string(),
    ))
    .await?;

    tracing::info!("Database tables initialized");
    Ok(())
}
