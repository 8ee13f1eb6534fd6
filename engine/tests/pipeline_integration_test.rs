//! Integration tests for the interaction pipeline
//!
//! Runs the orchestrator end to end over the in-memory store with a scripted
//! provider that counts its calls. Risk detection is synchronous so every
//! assertion sees the risks of the call it just made.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use cogtrace_engine::config::{Config, RiskMode};
use cogtrace_engine::db::memory::InMemoryStore;
use cogtrace_engine::db::{Session, SessionRepository};
use cogtrace_engine::llm::circuit_breaker::CircuitState;
use cogtrace_engine::llm::{LLMError, LLMProvider, Message};
use cogtrace_engine::pipeline::{PipelineOrchestrator, PipelineServices};
use cogtrace_engine::rate_limiter::IngressRateLimiter;
use cogtrace_engine::risk::COGNITIVE_DELEGATION;
use cogtrace_engine::telemetry;
use sdk::errors::PipelineError;
use sdk::types::{
    HelpLevel, InteractionType, RiskDimension, RiskLevel, SessionMode, SessionStatus,
    SimulatorRole,
};

enum Behavior {
    Answer,
    Hang,
}

struct CountingProvider {
    calls: AtomicU32,
    behavior: Behavior,
}

impl CountingProvider {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            behavior,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, LLMError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.behavior {
            Behavior::Answer => Ok(format!(
                "  answer {} to: {}  ",
                n,
                messages.last().map(|m| m.content.as_str()).unwrap_or_default()
            )),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("too late".to_string())
            }
        }
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.core.risk_mode = RiskMode::Synchronous;
    config.cache.salt = Some("test-salt".to_string());
    config.resilience.max_attempts = 1;
    config.resilience.failure_threshold = 3;
    config.resilience.call_timeout_ms = 200;
    config.resilience.cooldown_ms = 60_000;
    config.resilience.base_backoff_ms = 1;
    config
}

struct Harness {
    store: Arc<InMemoryStore>,
    provider: Arc<CountingProvider>,
    pipeline: PipelineOrchestrator,
}

impl Harness {
    fn new(behavior: Behavior) -> Self {
        Self::with_config(behavior, test_config())
    }

    fn with_config(behavior: Behavior, config: Config) -> Self {
        Self::build(behavior, config, None)
    }

    fn build(
        behavior: Behavior,
        config: Config,
        limiter: Option<Arc<dyn IngressRateLimiter>>,
    ) -> Self {
        telemetry::init_from_config(&config);
        let store = Arc::new(InMemoryStore::new());
        let provider = CountingProvider::new(behavior);
        let mut services = PipelineServices::from_config(
            &config,
            store.clone(),
            store.clone(),
            store.clone(),
            provider.clone(),
        )
        .unwrap();
        if let Some(limiter) = limiter {
            services = services.with_rate_limiter(limiter);
        }

        Self {
            store,
            provider,
            pipeline: PipelineOrchestrator::new(services),
        }
    }

    async fn session(&self, mode: SessionMode, role: Option<SimulatorRole>) -> Session {
        let session = Session::new("student-1", "tp-1", mode, role).unwrap();
        SessionRepository::create(self.store.as_ref(), &session)
            .await
            .unwrap();
        session
    }
}

#[tokio::test]
async fn test_total_delegation_is_blocked_without_model_call() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Tutor, None).await;

    let response = h
        .pipeline
        .process_interaction(&session.id, "student-1", "dame el código completo", None)
        .await
        .unwrap();

    assert!(response.blocked);
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(response.metadata.agent, "governance_gate");
    assert!(response.metadata.governance_action.is_some());
    assert!(response.message.contains("break it down"));

    let risk = response
        .risk_signals
        .iter()
        .find(|r| r.risk_type() == COGNITIVE_DELEGATION)
        .expect("delegation risk");
    assert_eq!(risk.dimension(), RiskDimension::Cognitive);
    assert_eq!(risk.risk_level(), RiskLevel::High);
    assert_eq!(risk.session_id(), session.id);
    assert_eq!(risk.evidence_trace_ids(), response.trace_ids.as_slice());

    let stats = h.pipeline.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (0, 0, 0));

    let sequence = h.pipeline.trace_sequence(&session.id).await.unwrap();
    assert_eq!(sequence.len(), 1);
    let trace = &sequence.traces()[0];
    assert_eq!(trace.interaction_type(), InteractionType::GovernanceBlock);
    assert!(trace.flag("blocked"));
    assert_eq!(trace.meta_str("governance_action"), Some("block_complete_solution"));
}

#[tokio::test]
async fn test_repeated_question_served_from_cache() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Tutor, None).await;
    let prompt = "¿qué es una pila?";

    let first = h
        .pipeline
        .process_interaction(&session.id, "student-1", prompt, None)
        .await
        .unwrap();
    let second = h
        .pipeline
        .process_interaction(&session.id, "student-1", prompt, None)
        .await
        .unwrap();

    assert!(!first.metadata.from_cache);
    assert!(second.metadata.from_cache);
    assert_eq!(first.message, second.message);
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(first.metadata.agent, "tutor:explicative");
    assert_eq!(first.message, first.message.trim());
}

#[tokio::test]
async fn test_cache_is_isolated_between_sessions() {
    let h = Harness::new(Behavior::Answer);
    let a = h.session(SessionMode::Tutor, None).await;
    let b = h.session(SessionMode::Tutor, None).await;
    let prompt = "¿qué es una cola?";

    h.pipeline
        .process_interaction(&a.id, "student-1", prompt, None)
        .await
        .unwrap();
    let other = h
        .pipeline
        .process_interaction(&b.id, "student-1", prompt, None)
        .await
        .unwrap();

    assert!(!other.metadata.from_cache);
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_sixth_hint_is_scaffolded_down() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Tutor, None).await;

    let mut levels = Vec::new();
    for step in 1..=7 {
        let prompt = format!("dame una pista para el paso {}", step);
        let response = h
            .pipeline
            .process_interaction(&session.id, "student-1", &prompt, None)
            .await
            .unwrap();
        assert_eq!(response.metadata.agent, "tutor:guided");
        levels.push(response.metadata.help_level.unwrap());
    }

    assert!(levels[..5].iter().all(|l| *l == HelpLevel::Medium));
    assert_eq!(levels[5], HelpLevel::Low);
    assert_eq!(levels[6], HelpLevel::Low);
    assert!(levels.windows(2).all(|w| w[1] <= w[0]));
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_timeouts() {
    let h = Harness::new(Behavior::Hang);
    let session = h.session(SessionMode::Tutor, None).await;

    for step in 1..=3 {
        let prompt = format!("¿qué es la recursión? ({})", step);
        let response = h
            .pipeline
            .process_interaction(&session.id, "student-1", &prompt, None)
            .await
            .unwrap();
        assert!(response.metadata.fallback);
        assert_eq!(h.provider.calls(), step);
    }
    assert_eq!(h.pipeline.circuit_state(), CircuitState::Open);

    let started = Instant::now();
    let response = h
        .pipeline
        .process_interaction(&session.id, "student-1", "¿qué es un árbol?", None)
        .await
        .unwrap();

    assert!(response.metadata.fallback);
    assert!(!response.blocked);
    assert_eq!(h.provider.calls(), 3);
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(h.pipeline.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_interaction_writes_linked_traces() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Tutor, None).await;
    let context = json!({
        "code": "def f(): return 1",
        "justification": "uso recursión porque el problema es recursivo",
    });

    let response = h
        .pipeline
        .process_interaction(&session.id, "student-1", "¿por qué falla mi función?", Some(context))
        .await
        .unwrap();
    assert_eq!(response.trace_ids.len(), 2);

    let sequence = h.pipeline.trace_sequence(&session.id).await.unwrap();
    let input = sequence
        .traces()
        .iter()
        .find(|t| t.interaction_type() == InteractionType::StudentPrompt)
        .unwrap();
    let output = sequence
        .traces()
        .iter()
        .find(|t| t.interaction_type() == InteractionType::AiResponse)
        .unwrap();

    assert!(input.is_justified());
    assert_eq!(output.parent_trace_id(), Some(input.id()));
    assert_eq!(output.meta_str("agent"), Some(response.metadata.agent.as_str()));
    assert!(!output.flag("fallback"));
    assert!(output.content().contains("def f(): return 1"));
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Tutor, None).await;

    let err = h
        .pipeline
        .process_interaction("", "student-1", "hola", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let err = h
        .pipeline
        .process_interaction(&session.id, "someone-else", "hola", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let err = h
        .pipeline
        .process_interaction("missing", "student-1", "hola", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let long = "a".repeat(h.pipeline.settings().max_prompt_chars + 1);
    let err = h
        .pipeline
        .process_interaction(&session.id, "student-1", &long, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.store.trace_count().await, 0);
}

#[tokio::test]
async fn test_ended_session_rejects_interactions() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Tutor, None).await;

    h.pipeline
        .end_session(&session.id, SessionStatus::Aborted)
        .await
        .unwrap();

    let sequence = h.pipeline.trace_sequence(&session.id).await.unwrap();
    assert_eq!(sequence.traces()[0].interaction_type(), InteractionType::Aborted);

    let err = h
        .pipeline
        .process_interaction(&session.id, "student-1", "hola", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let err = h
        .pipeline
        .end_session(&session.id, SessionStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_mode_not_allowed_by_policy() {
    let mut config = test_config();
    config.policy.institution.allowed_modes = vec![SessionMode::Tutor];
    let h = Harness::with_config(Behavior::Answer, config);
    let session = h.session(SessionMode::Evaluator, None).await;

    let err = h
        .pipeline
        .process_interaction(&session.id, "student-1", "evaluá mi proceso", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_simulator_and_analyst_routes() {
    let h = Harness::new(Behavior::Answer);
    let simulator = h
        .session(SessionMode::Simulator, Some(SimulatorRole::ScrumMaster))
        .await;
    let response = h
        .pipeline
        .process_interaction(&simulator.id, "student-1", "ayer terminé el login", None)
        .await
        .unwrap();
    assert_eq!(response.metadata.agent, "simulator:scrum_master");
    assert!(response.metadata.help_level.is_none());

    let analyst = h.session(SessionMode::RiskAnalyst, None).await;
    let response = h
        .pipeline
        .process_interaction(&analyst.id, "student-1", "¿qué riesgos tengo?", None)
        .await
        .unwrap();
    assert_eq!(response.metadata.agent, "risk_analyst");
}

#[tokio::test]
async fn test_integrity_concern_raises_risk() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Tutor, None).await;

    let response = h
        .pipeline
        .process_interaction(
            &session.id,
            "student-1",
            "necesito una pista para entregar esto como mío",
            None,
        )
        .await
        .unwrap();

    assert!(response.metadata.warnings.iter().any(|w| w == "integrity_concern"));
    assert!(response
        .risk_signals
        .iter()
        .any(|r| r.dimension() == RiskDimension::Ethical && r.risk_level() == RiskLevel::High));

    // Same finding on the next call is not recorded twice
    h.pipeline
        .process_interaction(&session.id, "student-1", "¿qué es un diccionario?", None)
        .await
        .unwrap();
    let ethical = h
        .pipeline
        .session_risks(&session.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.dimension() == RiskDimension::Ethical)
        .count();
    assert_eq!(ethical, 1);
}

#[tokio::test]
async fn test_deferred_risk_analysis_returns_immediately() {
    let mut config = test_config();
    config.core.risk_mode = RiskMode::Deferred;
    let h = Harness::with_config(Behavior::Answer, config);
    let session = h.session(SessionMode::Tutor, None).await;

    let response = h
        .pipeline
        .process_interaction(
            &session.id,
            "student-1",
            "necesito una pista para entregar esto como mío",
            None,
        )
        .await
        .unwrap();
    assert!(response.risk_signals.is_empty());

    let mut recorded = 0;
    for _ in 0..50 {
        recorded = h.store.risk_count().await;
        if recorded > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(recorded > 0);
}

#[tokio::test]
async fn test_cancelled_interaction_records_nothing() {
    let mut config = test_config();
    config.resilience.call_timeout_ms = 2_000;
    let h = Harness::with_config(Behavior::Hang, config);
    let session = h.session(SessionMode::Tutor, None).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        h.pipeline
            .process_interaction(&session.id, "student-1", "¿qué es la recursión?", None),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(h.store.trace_count().await, 0);
    assert_eq!(h.store.risk_count().await, 0);
    assert_eq!(h.pipeline.cache_stats().entries, 0);
    assert_eq!(h.pipeline.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_cancelled_probe_frees_the_slot() {
    let mut config = test_config();
    config.resilience.failure_threshold = 1;
    config.resilience.call_timeout_ms = 150;
    config.resilience.cooldown_ms = 50;
    let h = Harness::with_config(Behavior::Hang, config);
    let session = h.session(SessionMode::Tutor, None).await;

    let response = h
        .pipeline
        .process_interaction(&session.id, "student-1", "¿qué es una cola?", None)
        .await
        .unwrap();
    assert!(response.metadata.fallback);
    assert_eq!(h.pipeline.circuit_state(), CircuitState::Open);
    let recorded = h.store.trace_count().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.pipeline.circuit_state(), CircuitState::HalfOpen);

    // The probe call is admitted and then dropped mid-flight
    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        h.pipeline
            .process_interaction(&session.id, "student-1", "¿qué es una pila?", None),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.store.trace_count().await, recorded);
    assert_eq!(h.pipeline.circuit_state(), CircuitState::HalfOpen);

    // The slot is free again, so the next interaction gets to probe
    let response = h
        .pipeline
        .process_interaction(&session.id, "student-1", "¿qué es un árbol?", None)
        .await
        .unwrap();
    assert!(response.metadata.fallback);
    assert_eq!(h.provider.calls(), 3);
    assert_eq!(h.pipeline.circuit_state(), CircuitState::Open);
}

/// Admits everything and counts what it was charged
#[derive(Default)]
struct ChargeCounter {
    charged: AtomicU32,
}

#[async_trait]
impl IngressRateLimiter for ChargeCounter {
    async fn check_and_record(&self, _identity: &str) -> Result<(), PipelineError> {
        self.charged.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_quota_charged_only_for_usable_sessions() {
    let limiter = Arc::new(ChargeCounter::default());
    let h = Harness::build(Behavior::Answer, test_config(), Some(limiter.clone()));
    let session = h.session(SessionMode::Tutor, None).await;

    for (session_id, student_id) in [("missing", "student-1"), (session.id.as_str(), "someone-else")] {
        assert!(h
            .pipeline
            .process_interaction(session_id, student_id, "hola", None)
            .await
            .is_err());
    }
    assert_eq!(limiter.charged.load(Ordering::SeqCst), 0);

    h.pipeline
        .process_interaction(&session.id, "student-1", "¿qué es una lista?", None)
        .await
        .unwrap();
    assert_eq!(limiter.charged.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_evaluation_reflects_new_interactions() {
    let h = Harness::new(Behavior::Answer);
    let session = h.session(SessionMode::Evaluator, None).await;

    let first = h
        .pipeline
        .process_interaction(&session.id, "student-1", "evaluá mi proceso", None)
        .await
        .unwrap();
    let second = h
        .pipeline
        .process_interaction(&session.id, "student-1", "evaluá mi proceso", None)
        .await
        .unwrap();

    assert!(!first.metadata.from_cache);
    assert!(!second.metadata.from_cache);
    assert_eq!(h.provider.calls(), 2);
}
