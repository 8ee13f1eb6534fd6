//! Cognitive traces
//!
//! A [`CognitiveTrace`] is one immutable audit record of a step in the
//! student's reasoning: the prompt they sent, the answer they got, or the
//! governance block they hit. Traces are built once through
//! [`CognitiveTraceBuilder`], which enforces a non-empty session id and clamps
//! `ai_involvement` into `[0, 1]`. There is no update or delete path.
//!
//! [`TraceRecorder`] appends traces to a [`TraceRepository`] and rebuilds the
//! ordered [`TraceSequence`] for a session on every read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::TraceRepository;
use sdk::errors::PipelineError;
use sdk::types::{CognitiveState, InteractionType, TraceLevel};

/// Immutable cognitive trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveTrace {
    id: String,
    session_id: String,
    student_id: String,
    activity_id: String,
    trace_level: TraceLevel,
    interaction_type: InteractionType,
    cognitive_state: CognitiveState,
    cognitive_intent: String,
    content: String,
    ai_involvement: f64,
    decision_justification: Option<String>,
    alternatives_considered: Vec<String>,
    parent_trace_id: Option<String>,
    metadata: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl CognitiveTrace {
    pub fn builder(session_id: impl Into<String>) -> CognitiveTraceBuilder {
        CognitiveTraceBuilder::new(session_id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    pub fn trace_level(&self) -> TraceLevel {
        self.trace_level
    }

    pub fn interaction_type(&self) -> InteractionType {
        self.interaction_type
    }

    pub fn cognitive_state(&self) -> CognitiveState {
        self.cognitive_state
    }

    pub fn cognitive_intent(&self) -> &str {
        &self.cognitive_intent
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn ai_involvement(&self) -> f64 {
        self.ai_involvement
    }

    pub fn decision_justification(&self) -> Option<&str> {
        self.decision_justification.as_deref()
    }

    pub fn alternatives_considered(&self) -> &[String] {
        &self.alternatives_considered
    }

    pub fn parent_trace_id(&self) -> Option<&str> {
        self.parent_trace_id.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Boolean metadata flag, `false` when absent
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// String metadata value
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// A blocked interaction (governance short-circuit)
    pub fn is_blocked(&self) -> bool {
        self.interaction_type == InteractionType::GovernanceBlock || self.flag("blocked")
    }

    /// The student explained a decision, either explicitly or by listing alternatives
    pub fn is_justified(&self) -> bool {
        self.decision_justification
            .as_deref()
            .is_some_and(|j| !j.trim().is_empty())
            || !self.alternatives_considered.is_empty()
    }
}

/// Builder for [`CognitiveTrace`]
#[derive(Debug, Clone)]
pub struct CognitiveTraceBuilder {
    id: Option<String>,
    session_id: String,
    student_id: String,
    activity_id: String,
    trace_level: TraceLevel,
    interaction_type: InteractionType,
    cognitive_state: CognitiveState,
    cognitive_intent: String,
    content: String,
    ai_involvement: f64,
    decision_justification: Option<String>,
    alternatives_considered: Vec<String>,
    parent_trace_id: Option<String>,
    metadata: Map<String, Value>,
    timestamp: Option<DateTime<Utc>>,
}

impl CognitiveTraceBuilder {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: None,
            session_id: session_id.into(),
            student_id: String::new(),
            activity_id: String::new(),
            trace_level: TraceLevel::N4,
            interaction_type: InteractionType::StudentPrompt,
            cognitive_state: CognitiveState::Exploration,
            cognitive_intent: String::new(),
            content: String::new(),
            ai_involvement: 0.0,
            decision_justification: None,
            alternatives_considered: Vec::new(),
            parent_trace_id: None,
            metadata: Map::new(),
            timestamp: None,
        }
    }

    /// Use a fixed id instead of a fresh UUID (rehydrating stored rows)
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn student_id(mut self, student_id: impl Into<String>) -> Self {
        self.student_id = student_id.into();
        self
    }

    pub fn activity_id(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = activity_id.into();
        self
    }

    pub fn trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    pub fn interaction_type(mut self, interaction_type: InteractionType) -> Self {
        self.interaction_type = interaction_type;
        self
    }

    pub fn cognitive_state(mut self, state: CognitiveState) -> Self {
        self.cognitive_state = state;
        self
    }

    pub fn cognitive_intent(mut self, intent: impl Into<String>) -> Self {
        self.cognitive_intent = intent.into();
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn ai_involvement(mut self, value: f64) -> Self {
        self.ai_involvement = value;
        self
    }

    pub fn decision_justification(mut self, justification: Option<String>) -> Self {
        self.decision_justification = justification;
        self
    }

    pub fn alternatives_considered(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives_considered = alternatives;
        self
    }

    pub fn parent_trace_id(mut self, parent: Option<String>) -> Self {
        self.parent_trace_id = parent;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validate and freeze the trace
    ///
    /// # Errors
    ///
    /// `PipelineError::Validation` when `session_id` is empty.
    pub fn build(self) -> Result<CognitiveTrace, PipelineError> {
        if self.session_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "trace session_id must not be empty".to_string(),
            ));
        }

        let ai_involvement = if self.ai_involvement.is_nan() {
            0.0
        } else {
            self.ai_involvement.clamp(0.0, 1.0)
        };

        Ok(CognitiveTrace {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            session_id: self.session_id,
            student_id: self.student_id,
            activity_id: self.activity_id,
            trace_level: self.trace_level,
            interaction_type: self.interaction_type,
            cognitive_state: self.cognitive_state,
            cognitive_intent: self.cognitive_intent,
            content: self.content,
            ai_involvement,
            decision_justification: self.decision_justification,
            alternatives_considered: self.alternatives_considered,
            parent_trace_id: self.parent_trace_id,
            metadata: self.metadata,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// Ordered view over a session's traces (timestamp, then id)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceSequence {
    session_id: String,
    traces: Vec<CognitiveTrace>,
}

impl TraceSequence {
    pub fn new(session_id: impl Into<String>, mut traces: Vec<CognitiveTrace>) -> Self {
        traces.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            session_id: session_id.into(),
            traces,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn traces(&self) -> &[CognitiveTrace] {
        &self.traces
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// The last `n` traces, oldest first
    pub fn recent(&self, n: usize) -> &[CognitiveTrace] {
        let start = self.traces.len().saturating_sub(n);
        &self.traces[start..]
    }

    /// Mean ai_involvement over the last `n` traces, `None` if there are none
    pub fn mean_ai_involvement(&self, n: usize) -> Option<f64> {
        let recent = self.recent(n);
        if recent.is_empty() {
            None
        } else {
            Some(recent.iter().map(|t| t.ai_involvement).sum::<f64>() / recent.len() as f64)
        }
    }

    pub fn into_traces(self) -> Vec<CognitiveTrace> {
        self.traces
    }
}

/// Append-only trace writer and sequence reader
#[derive(Clone)]
pub struct TraceRecorder {
    repository: Arc<dyn TraceRepository>,
}

impl TraceRecorder {
    pub fn new(repository: Arc<dyn TraceRepository>) -> Self {
        Self { repository }
    }

    /// Append a trace, returning its id
    pub async fn record(&self, trace: CognitiveTrace) -> Result<String, PipelineError> {
        let id = trace.id().to_string();
        tracing::debug!(
            "Recording {} trace {} for session {}",
            trace.interaction_type(),
            id,
            trace.session_id()
        );
        self.repository.create(&trace).await.map_err(|e| {
            tracing::error!("Failed to record trace {}: {}", id, e);
            e
        })?;
        Ok(id)
    }

    /// Ordered trace history of a session
    pub async fn sequence(&self, session_id: &str) -> Result<TraceSequence, PipelineError> {
        let traces = self.repository.list_by_session(session_id).await?;
        Ok(TraceSequence::new(session_id, traces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use chrono::Duration;

    #[test]
    fn test_empty_session_rejected() {
        let err = CognitiveTrace::builder("  ").build().unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_ai_involvement_clamped() {
        let high = CognitiveTrace::builder("s1").ai_involvement(1.7).build().unwrap();
        assert_eq!(high.ai_involvement(), 1.0);

        let low = CognitiveTrace::builder("s1").ai_involvement(-0.3).build().unwrap();
        assert_eq!(low.ai_involvement(), 0.0);

        let nan = CognitiveTrace::builder("s1").ai_involvement(f64::NAN).build().unwrap();
        assert_eq!(nan.ai_involvement(), 0.0);
    }

    #[test]
    fn test_justification_detection() {
        let plain = CognitiveTrace::builder("s1").build().unwrap();
        assert!(!plain.is_justified());

        let justified = CognitiveTrace::builder("s1")
            .decision_justification(Some("I chose a stack because...".into()))
            .build()
            .unwrap();
        assert!(justified.is_justified());

        let alternatives = CognitiveTrace::builder("s1")
            .alternatives_considered(vec!["queue".into()])
            .build()
            .unwrap();
        assert!(alternatives.is_justified());
    }

    #[test]
    fn test_sequence_orders_by_timestamp_then_id() {
        let now = Utc::now();
        let later = CognitiveTrace::builder("s1")
            .id("a")
            .timestamp(now + Duration::seconds(1))
            .build()
            .unwrap();
        let tie_b = CognitiveTrace::builder("s1").id("b").timestamp(now).build().unwrap();
        let tie_a = CognitiveTrace::builder("s1").id("a0").timestamp(now).build().unwrap();

        let sequence = TraceSequence::new("s1", vec![later, tie_b, tie_a]);
        let ids: Vec<_> = sequence.traces().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["a0", "b", "a"]);
    }

    #[test]
    fn test_mean_ai_involvement_window() {
        let traces = [0.2, 0.9, 0.9]
            .iter()
            .map(|v| CognitiveTrace::builder("s1").ai_involvement(*v).build().unwrap())
            .collect();
        let sequence = TraceSequence::new("s1", traces);

        assert!((sequence.mean_ai_involvement(2).unwrap() - 0.9).abs() < 1e-9);
        assert!(TraceSequence::default().mean_ai_involvement(5).is_none());
    }

    #[tokio::test]
    async fn test_recorder_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let recorder = TraceRecorder::new(store);

        let trace = CognitiveTrace::builder("s1")
            .student_id("st1")
            .content("¿cómo empiezo?")
            .build()
            .unwrap();
        let id = recorder.record(trace).await.unwrap();

        let sequence = recorder.sequence("s1").await.unwrap();
        assert_eq!(sequence.len(), 1);
        assert_eq!(sequence.traces()[0].id(), id);
        assert!(recorder.sequence("other").await.unwrap().is_empty());
    }
}
