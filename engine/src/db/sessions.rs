/// Session records and their SQLite repository
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use super::{check_transition, decode_timestamp, encode_timestamp, SessionRepository};
use sdk::errors::PipelineError;
use sdk::types::{SessionMode, SessionStatus, SimulatorRole};

/// A tutoring session, as stored by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub student_id: String,
    pub activity_id: String,
    pub mode: SessionMode,
    pub simulator_role: Option<SimulatorRole>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// New active session with a fresh id
    pub fn new(
        student_id: impl Into<String>,
        activity_id: impl Into<String>,
        mode: SessionMode,
        simulator_role: Option<SimulatorRole>,
    ) -> Result<Self, PipelineError> {
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.into(),
            activity_id: activity_id.into(),
            mode,
            simulator_role,
            status: SessionStatus::Active,
            created_at: Utc::now(),
        };
        session.validate()?;
        Ok(session)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.id.trim().is_empty() || self.student_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "session id and student id must not be empty".to_string(),
            ));
        }
        if self.mode == SessionMode::Simulator && self.simulator_role.is_none() {
            return Err(PipelineError::Validation(format!(
                "simulator session {} has no simulator role",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

pub struct SqlSessionRepository {
    pool: SqlitePool,
}

impl SqlSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, student_id, activity_id, mode, simulator_role, status, created_at
             FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mode: String = row.try_get("mode")?;
        let role: Option<String> = row.try_get("simulator_role")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Some(Session {
            id: row.try_get("id")?,
            student_id: row.try_get("student_id")?,
            activity_id: row.try_get("activity_id")?,
            mode: mode.parse()?,
            simulator_role: role.map(|r| r.parse()).transpose()?,
            status: status.parse()?,
            created_at: decode_timestamp(&created_at)?,
        }))
    }

    async fn insert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (id, student_id, activity_id, mode, simulator_role, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.student_id)
        .bind(&session.activity_id)
        .bind(session.mode.as_str())
        .bind(session.simulator_role.map(|r| r.as_str()))
        .bind(session.status.as_str())
        .bind(encode_timestamp(&session.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: SessionStatus) -> Result<u64> {
        // Guarded by the current status so concurrent workers cannot both
        // transition the same session.
        let result = sqlx::query("UPDATE sessions SET status = ? WHERE id = ? AND status = ?")
            .bind(status.as_str())
            .bind(id)
            .bind(SessionStatus::Active.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to update session status")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn get(&self, id: &str) -> Result<Option<Session>, PipelineError> {
        self.fetch(id).await.map_err(PipelineError::persistence)
    }

    async fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), PipelineError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("session {} not found", id)))?;
        check_transition(id, current.status, status)?;

        let updated = self
            .set_status(id, status)
            .await
            .map_err(PipelineError::persistence)?;
        if updated == 0 {
            return Err(PipelineError::Validation(format!(
                "session {} is no longer active",
                id
            )));
        }
        tracing::info!("Session {} moved to {}", id, status);
        Ok(())
    }

    async fn create(&self, session: &Session) -> Result<(), PipelineError> {
        session.validate()?;
        self.insert(session).await.map_err(PipelineError::persistence)
    }
}
