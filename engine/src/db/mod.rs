/// Persistence layer
///
/// The pipeline talks to storage only through the three repository traits
/// defined here. Two adapters ship with the engine:
///
/// - [`Database`] + `Sql*Repository`: SQLite via sqlx with WAL mode, shared by
///   every worker process pointed at the same file
/// - [`memory::InMemoryStore`]: single-process store for tests and local
///   development
///
/// SQL adapters use `anyhow::Context` internally and convert to
/// `PipelineError::Persistence` at the trait boundary.
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use tracing::{debug, info};

use crate::risk::Risk;
use crate::trace::CognitiveTrace;
use sdk::errors::PipelineError;
use sdk::types::SessionStatus;

pub mod memory;
pub mod risks;
pub mod sessions;
pub mod traces;

pub use risks::SqlRiskRepository;
pub use sessions::{Session, SqlSessionRepository};
pub use traces::SqlTraceRepository;

/// Session lookup and lifecycle
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>, PipelineError>;

    /// Move a session to `status`; only transitions out of `Active` are allowed
    async fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), PipelineError>;

    async fn create(&self, session: &Session) -> Result<(), PipelineError>;
}

/// Append-only trace storage
#[async_trait]
pub trait TraceRepository: Send + Sync {
    async fn create(&self, trace: &CognitiveTrace) -> Result<(), PipelineError>;

    /// Every trace of a session, in no particular order
    async fn list_by_session(&self, session_id: &str) -> Result<Vec<CognitiveTrace>, PipelineError>;
}

#[async_trait]
pub trait RiskRepository: Send + Sync {
    async fn create(&self, risk: &Risk) -> Result<(), PipelineError>;

    /// Store `risk` unless the session already has a risk of the same type at
    /// the same or a higher level. Check and insert are atomic; returns
    /// whether the risk was stored.
    async fn create_unless_covered(&self, risk: &Risk) -> Result<bool, PipelineError>;

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Risk>, PipelineError>;
}

/// Check a requested status change against the session lifecycle
pub(crate) fn check_transition(
    id: &str,
    current: SessionStatus,
    next: SessionStatus,
) -> Result<(), PipelineError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "session {} cannot move from {} to {}",
            id, current, next
        )))
    }
}

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and run migrations
    ///
    /// WAL mode lets several worker processes read while one writes; SQLite
    /// replays a leftover WAL file on open after an unclean shutdown.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL into the main database file
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close every connection
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");
        self.flush_wal().await?;
        self.pool.close().await;
        info!("Database connection closed");
        Ok(())
    }

    pub fn sessions(&self) -> Arc<SqlSessionRepository> {
        Arc::new(SqlSessionRepository::new(self.pool.clone()))
    }

    pub fn traces(&self) -> Arc<SqlTraceRepository> {
        Arc::new(SqlTraceRepository::new(self.pool.clone()))
    }

    pub fn risks(&self) -> Arc<SqlRiskRepository> {
        Arc::new(SqlRiskRepository::new(self.pool.clone()))
    }
}

/// Encode a timestamp so that lexical order is chronological order
pub(crate) fn encode_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    Ok(chrono::DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp '{}'", raw))?
        .with_timezone(&chrono::Utc))
}
