//! In-memory repositories
//!
//! [`InMemoryStore`] implements all three repository traits over
//! `tokio::sync::RwLock`-guarded maps. It exists for tests and single-process
//! development; state is lost when the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_transition, RiskRepository, Session, SessionRepository, TraceRepository};
use crate::risk::Risk;
use crate::trace::CognitiveTrace;
use sdk::errors::PipelineError;
use sdk::types::SessionStatus;

#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    traces: RwLock<Vec<CognitiveTrace>>,
    risks: RwLock<Vec<Risk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total traces across all sessions
    pub async fn trace_count(&self) -> usize {
        self.traces.read().await.len()
    }

    pub async fn risk_count(&self) -> usize {
        self.risks.read().await.len()
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, PipelineError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), PipelineError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| PipelineError::Validation(format!("session {} not found", id)))?;
        check_transition(id, session.status, status)?;
        session.status = status;
        Ok(())
    }

    async fn create(&self, session: &Session) -> Result<(), PipelineError> {
        session.validate()?;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(PipelineError::Persistence(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }
}

#[async_trait]
impl TraceRepository for InMemoryStore {
    async fn create(&self, trace: &CognitiveTrace) -> Result<(), PipelineError> {
        let mut traces = self.traces.write().await;
        if traces.iter().any(|t| t.id() == trace.id()) {
            return Err(PipelineError::Persistence(format!(
                "trace {} already exists",
                trace.id()
            )));
        }
        traces.push(trace.clone());
        Ok(())
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<CognitiveTrace>, PipelineError> {
        Ok(self
            .traces
            .read()
            .await
            .iter()
            .filter(|t| t.session_id() == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RiskRepository for InMemoryStore {
    async fn create(&self, risk: &Risk) -> Result<(), PipelineError> {
        self.risks.write().await.push(risk.clone());
        Ok(())
    }

    async fn create_unless_covered(&self, risk: &Risk) -> Result<bool, PipelineError> {
        let mut risks = self.risks.write().await;
        let covered = risks.iter().any(|r| {
            r.session_id() == risk.session_id()
                && r.risk_type() == risk.risk_type()
                && r.risk_level() >= risk.risk_level()
        });
        if covered {
            return Ok(false);
        }
        risks.push(risk.clone());
        Ok(true)
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Risk>, PipelineError> {
        Ok(self
            .risks
            .read()
            .await
            .iter()
            .filter(|r| r.session_id() == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::SessionMode;

    #[tokio::test]
    async fn test_status_transitions() {
        let store = InMemoryStore::new();
        let session = Session::new("st1", "tp1", SessionMode::Tutor, None).unwrap();
        SessionRepository::create(&store, &session).await.unwrap();

        store
            .update_status(&session.id, SessionStatus::Completed)
            .await
            .unwrap();
        let err = store
            .update_status(&session.id, SessionStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_trace_rejected() {
        let store = InMemoryStore::new();
        let trace = CognitiveTrace::builder("s1").build().unwrap();
        TraceRepository::create(&store, &trace).await.unwrap();
        assert!(TraceRepository::create(&store, &trace).await.is_err());
        assert_eq!(store.trace_count().await, 1);
    }

    #[tokio::test]
    async fn test_covered_risk_not_stored() {
        use crate::risk::{delegation_block_risk, SessionRef};
        use sdk::types::RiskLevel;

        let store = InMemoryStore::new();
        let session = SessionRef {
            session_id: "s1".into(),
            student_id: "st1".into(),
            activity_id: "tp1".into(),
        };
        let high = delegation_block_risk(&session, "t1", RiskLevel::High).unwrap();
        let medium = delegation_block_risk(&session, "t2", RiskLevel::Medium).unwrap();

        assert!(store.create_unless_covered(&high).await.unwrap());
        assert!(!store.create_unless_covered(&medium).await.unwrap());
        assert!(!store.create_unless_covered(&high).await.unwrap());
        assert_eq!(store.risk_count().await, 1);
    }
}
