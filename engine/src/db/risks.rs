/// Risk persistence
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_timestamp, encode_timestamp, RiskRepository};
use crate::risk::{Risk, RiskDraft};
use sdk::errors::PipelineError;
use sdk::types::RiskLevel;

pub struct SqlRiskRepository {
    pool: SqlitePool,
}

impl SqlRiskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, risk: &Risk) -> Result<()> {
        sqlx::query(
            "INSERT INTO risks (
                id, session_id, student_id, activity_id, dimension, risk_type, risk_level,
                description, evidence_trace_ids, recommendations, timestamp
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(risk.id())
        .bind(risk.session_id())
        .bind(risk.student_id())
        .bind(risk.activity_id())
        .bind(risk.dimension().as_str())
        .bind(risk.risk_type())
        .bind(risk.risk_level().as_str())
        .bind(risk.description())
        .bind(serde_json::to_string(risk.evidence_trace_ids())?)
        .bind(serde_json::to_string(risk.recommendations())?)
        .bind(encode_timestamp(&risk.timestamp()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert risk {}", risk.id()))?;
        Ok(())
    }

    async fn insert_unless_covered(&self, risk: &Risk) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO risks (
                id, session_id, student_id, activity_id, dimension, risk_type, risk_level,
                description, evidence_trace_ids, recommendations, timestamp
             )
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
             WHERE NOT EXISTS (
                SELECT 1 FROM risks
                WHERE session_id = ? AND risk_type = ?
                  AND CASE risk_level
                        WHEN 'low' THEN 0
                        WHEN 'medium' THEN 1
                        WHEN 'high' THEN 2
                        ELSE 3
                      END >= ?
             )",
        )
        .bind(risk.id())
        .bind(risk.session_id())
        .bind(risk.student_id())
        .bind(risk.activity_id())
        .bind(risk.dimension().as_str())
        .bind(risk.risk_type())
        .bind(risk.risk_level().as_str())
        .bind(risk.description())
        .bind(serde_json::to_string(risk.evidence_trace_ids())?)
        .bind(serde_json::to_string(risk.recommendations())?)
        .bind(encode_timestamp(&risk.timestamp()))
        .bind(risk.session_id())
        .bind(risk.risk_type())
        .bind(level_rank(risk.risk_level()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert risk {}", risk.id()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn select_by_session(&self, session_id: &str) -> Result<Vec<Risk>> {
        let rows = sqlx::query(
            "SELECT id, session_id, student_id, activity_id, dimension, risk_type, risk_level,
                    description, evidence_trace_ids, recommendations, timestamp
             FROM risks WHERE session_id = ?
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list risks")?;

        rows.iter().map(row_to_risk).collect()
    }
}

/// Ordinal used by the coverage check; must match the CASE in `insert_unless_covered`
fn level_rank(level: RiskLevel) -> i64 {
    match level {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 1,
        RiskLevel::High => 2,
        RiskLevel::Critical => 3,
    }
}

fn row_to_risk(row: &SqliteRow) -> Result<Risk> {
    let dimension: String = row.try_get("dimension")?;
    let level: String = row.try_get("risk_level")?;
    let evidence: String = row.try_get("evidence_trace_ids")?;
    let recommendations: String = row.try_get("recommendations")?;
    let timestamp: String = row.try_get("timestamp")?;

    let draft = RiskDraft {
        session_id: row.try_get("session_id")?,
        student_id: row.try_get("student_id")?,
        activity_id: row.try_get("activity_id")?,
        dimension: dimension.parse()?,
        risk_type: row.try_get("risk_type")?,
        risk_level: level.parse()?,
        description: row.try_get("description")?,
        evidence_trace_ids: serde_json::from_str(&evidence)
            .context("Invalid evidence_trace_ids JSON")?,
        recommendations: serde_json::from_str(&recommendations)
            .context("Invalid recommendations JSON")?,
    };

    Ok(Risk::restore(
        row.try_get("id")?,
        decode_timestamp(&timestamp)?,
        draft,
    )?)
}

#[async_trait]
impl RiskRepository for SqlRiskRepository {
    async fn create(&self, risk: &Risk) -> Result<(), PipelineError> {
        self.insert(risk).await.map_err(PipelineError::persistence)
    }

    async fn create_unless_covered(&self, risk: &Risk) -> Result<bool, PipelineError> {
        self.insert_unless_covered(risk)
            .await
            .map_err(PipelineError::persistence)
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Risk>, PipelineError> {
        self.select_by_session(session_id)
            .await
            .map_err(PipelineError::persistence)
    }
}
