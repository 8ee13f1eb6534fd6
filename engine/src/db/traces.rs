/// Cognitive trace persistence
///
/// Insert-only: there is deliberately no UPDATE or DELETE statement here.
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_timestamp, encode_timestamp, TraceRepository};
use crate::trace::CognitiveTrace;
use sdk::errors::PipelineError;

pub struct SqlTraceRepository {
    pool: SqlitePool,
}

impl SqlTraceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, trace: &CognitiveTrace) -> Result<()> {
        let alternatives = serde_json::to_string(trace.alternatives_considered())?;
        let metadata = serde_json::to_string(trace.metadata())?;

        sqlx::query(
            "INSERT INTO cognitive_traces (
                id, session_id, student_id, activity_id, trace_level, interaction_type,
                cognitive_state, cognitive_intent, content, ai_involvement,
                decision_justification, alternatives_considered, parent_trace_id,
                metadata, timestamp
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trace.id())
        .bind(trace.session_id())
        .bind(trace.student_id())
        .bind(trace.activity_id())
        .bind(trace.trace_level().as_str())
        .bind(trace.interaction_type().as_str())
        .bind(trace.cognitive_state().as_str())
        .bind(trace.cognitive_intent())
        .bind(trace.content())
        .bind(trace.ai_involvement())
        .bind(trace.decision_justification())
        .bind(alternatives)
        .bind(trace.parent_trace_id())
        .bind(metadata)
        .bind(encode_timestamp(&trace.timestamp()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert trace {}", trace.id()))?;
        Ok(())
    }

    async fn select_by_session(&self, session_id: &str) -> Result<Vec<CognitiveTrace>> {
        let rows = sqlx::query(
            "SELECT id, session_id, student_id, activity_id, trace_level, interaction_type,
                    cognitive_state, cognitive_intent, content, ai_involvement,
                    decision_justification, alternatives_considered, parent_trace_id,
                    metadata, timestamp
             FROM cognitive_traces WHERE session_id = ?
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list traces")?;

        rows.iter().map(row_to_trace).collect()
    }
}

fn row_to_trace(row: &SqliteRow) -> Result<CognitiveTrace> {
    let trace_level: String = row.try_get("trace_level")?;
    let interaction_type: String = row.try_get("interaction_type")?;
    let cognitive_state: String = row.try_get("cognitive_state")?;
    let alternatives: String = row.try_get("alternatives_considered")?;
    let metadata: String = row.try_get("metadata")?;
    let timestamp: String = row.try_get("timestamp")?;
    let session_id: String = row.try_get("session_id")?;

    let alternatives: Vec<String> =
        serde_json::from_str(&alternatives).context("Invalid alternatives_considered JSON")?;
    let metadata: Map<String, Value> =
        serde_json::from_str(&metadata).context("Invalid trace metadata JSON")?;

    let trace = CognitiveTrace::builder(session_id)
        .id(row.try_get::<String, _>("id")?)
        .student_id(row.try_get::<String, _>("student_id")?)
        .activity_id(row.try_get::<String, _>("activity_id")?)
        .trace_level(trace_level.parse()?)
        .interaction_type(interaction_type.parse()?)
        .cognitive_state(cognitive_state.parse()?)
        .cognitive_intent(row.try_get::<String, _>("cognitive_intent")?)
        .content(row.try_get::<String, _>("content")?)
        .ai_involvement(row.try_get("ai_involvement")?)
        .decision_justification(row.try_get("decision_justification")?)
        .alternatives_considered(alternatives)
        .parent_trace_id(row.try_get("parent_trace_id")?)
        .metadata(metadata)
        .timestamp(decode_timestamp(&timestamp)?)
        .build()?;
    Ok(trace)
}

#[async_trait]
impl TraceRepository for SqlTraceRepository {
    async fn create(&self, trace: &CognitiveTrace) -> Result<(), PipelineError> {
        self.insert(trace).await.map_err(PipelineError::persistence)
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<CognitiveTrace>, PipelineError> {
        self.select_by_session(session_id)
            .await
            .map_err(PipelineError::persistence)
    }
}
