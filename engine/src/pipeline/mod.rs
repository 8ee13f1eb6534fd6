//! Pipeline orchestrator
//!
//! [`PipelineOrchestrator::process_interaction`] is the single entry point for
//! a student interaction. Each call runs the same sequence:
//!
//! 1. Validate the request and the session (ids, prompt size, status, owner,
//!    mode allowed by policy)
//! 2. Classify the prompt
//! 3. Evaluate governance; a block short-circuits with a redirect message,
//!    a block trace and a delegation risk, without touching the model
//! 4. Route to an agent behavior and compose the model request
//! 5. Resolve the answer from the response cache or the model invoker
//! 6. Append the input and output traces
//! 7. Detect risks, deferred to a background task or awaited
//!
//! The orchestrator holds only shared services. It keeps no per-session
//! state: the session, its policy and its trace history are read fresh on
//! every call, so concurrent calls and multiple workers see the same data.
//!
//! Traces are written only after the model answers. A caller that drops the
//! future during the model call leaves nothing recorded for that interaction.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agents::{AgentRequest, AgentRouter, RouteKey};
use crate::cache::{CacheKeyParts, CacheStats, ResponseCache};
use crate::classifier::{Classification, PromptClassifier};
use crate::config::{Config, RiskMode, ScaffoldConfig};
use crate::db::{RiskRepository, Session, SessionRepository, TraceRepository};
use crate::governance::{GovernanceAction, GovernanceDecision, GovernanceGate, GovernanceInput};
use crate::llm::circuit_breaker::CircuitState;
use crate::llm::invoker::{GenerationParams, InvocationOutcome, ModelInvoker};
use crate::llm::LLMProvider;
use crate::policy::{EffectivePolicy, PolicyStore, StaticPolicyStore};
use crate::rate_limiter::IngressRateLimiter;
use crate::risk::{delegation_block_risk, Risk, RiskDetector, SessionRef};
use crate::trace::{CognitiveTrace, CognitiveTraceBuilder, TraceRecorder, TraceSequence};
use sdk::errors::PipelineError;
use sdk::types::{
    CognitiveState, HelpLevel, InteractionType, RiskLevel, SessionMode, SessionStatus, TraceLevel,
};

/// Agent label recorded when governance answers instead of an agent
const GOVERNANCE_AGENT: &str = "governance_gate";

/// Per-deployment knobs the orchestrator needs at request time
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_prompt_chars: usize,
    pub risk_mode: RiskMode,
    pub scaffold: ScaffoldConfig,
    /// Sampling defaults handed to every agent
    pub defaults: GenerationParams,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_prompt_chars: config.core.max_prompt_chars,
            risk_mode: config.core.risk_mode,
            scaffold: config.scaffold.clone(),
            defaults: GenerationParams {
                temperature: config.provider.temperature,
                max_tokens: config.provider.max_tokens,
            },
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Services injected into the orchestrator
///
/// Everything is constructed once at startup and shared through `Arc`.
pub struct PipelineServices {
    pub sessions: Arc<dyn SessionRepository>,
    pub traces: Arc<dyn TraceRepository>,
    pub risks: Arc<dyn RiskRepository>,
    pub policies: Arc<dyn PolicyStore>,
    pub classifier: Arc<PromptClassifier>,
    pub gate: GovernanceGate,
    pub router: Arc<AgentRouter>,
    pub cache: Arc<ResponseCache>,
    pub invoker: Arc<ModelInvoker>,
    pub risk_detector: Arc<RiskDetector>,
    /// Optional ingress quota, keyed by student id
    pub rate_limiter: Option<Arc<dyn IngressRateLimiter>>,
    pub settings: PipelineSettings,
}

impl PipelineServices {
    /// Build every service from configuration around the given stores and provider
    ///
    /// # Errors
    ///
    /// `PipelineError::Config` when the cache salt is missing in production or
    /// a pattern set fails to compile.
    pub fn from_config(
        config: &Config,
        sessions: Arc<dyn SessionRepository>,
        traces: Arc<dyn TraceRepository>,
        risks: Arc<dyn RiskRepository>,
        provider: Arc<dyn LLMProvider>,
    ) -> Result<Self, PipelineError> {
        let classifier = PromptClassifier::new()
            .map_err(|e| PipelineError::Config(format!("classifier patterns: {:#}", e)))?;
        let risk_detector = RiskDetector::new(config.risk.clone())
            .map_err(|e| PipelineError::Config(format!("risk patterns: {:#}", e)))?;
        let cache = ResponseCache::new(&config.cache, config.core.environment)?;

        info!(
            "Pipeline services ready (provider: {}, environment: {}, risk mode: {:?})",
            provider.name(),
            config.core.environment,
            config.core.risk_mode
        );

        Ok(Self {
            sessions,
            traces,
            risks,
            policies: StaticPolicyStore::new(&config.policy).into_shared(),
            classifier: Arc::new(classifier),
            gate: GovernanceGate::new(),
            router: Arc::new(AgentRouter::new()),
            cache: Arc::new(cache),
            invoker: Arc::new(ModelInvoker::new(provider, config.resilience.clone())),
            risk_detector: Arc::new(risk_detector),
            rate_limiter: None,
            settings: PipelineSettings::from_config(config),
        })
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn IngressRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

/// Pedagogical and diagnostic details of one response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMetadata {
    pub from_cache: bool,
    pub governance_action: Option<GovernanceAction>,
    /// Behavior that produced the answer (`governance_gate` for blocks)
    pub agent: String,
    pub help_level: Option<HelpLevel>,
    /// The model was unavailable and the agent's fallback text was returned
    pub fallback: bool,
    pub warnings: Vec<String>,
}

/// Result of [`PipelineOrchestrator::process_interaction`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionResponse {
    pub message: String,
    pub blocked: bool,
    /// Risks recorded during this call (deferred detection adds more later)
    pub risk_signals: Vec<Risk>,
    /// Traces appended by this call, in order
    pub trace_ids: Vec<String>,
    pub cognitive_state: CognitiveState,
    pub metadata: ResponseMetadata,
}

/// Validated request state shared by the block and answer paths
struct Turn<'a> {
    session: Session,
    session_ref: SessionRef,
    policy: EffectivePolicy,
    prompt: &'a str,
    context: Option<&'a Value>,
    classification: Classification,
}

pub struct PipelineOrchestrator {
    services: PipelineServices,
    recorder: TraceRecorder,
}

impl PipelineOrchestrator {
    pub fn new(services: PipelineServices) -> Self {
        let recorder = TraceRecorder::new(services.traces.clone());
        Self { services, recorder }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.services.settings
    }

    /// Process one student interaction end to end
    ///
    /// # Errors
    ///
    /// - `PipelineError::Validation` for malformed input or an unusable session
    /// - `PipelineError::RateLimited` when the ingress quota is exhausted
    /// - `PipelineError::Persistence` when storage fails
    ///
    /// Provider failures never surface here; they turn into fallback content.
    pub async fn process_interaction(
        &self,
        session_id: &str,
        student_id: &str,
        prompt: &str,
        context: Option<Value>,
    ) -> Result<InteractionResponse, PipelineError> {
        self.validate_input(session_id, student_id, prompt)?;

        // Only requests against a usable session are charged to the quota
        let session = self.load_active_session(session_id, student_id).await?;
        if let Some(limiter) = &self.services.rate_limiter {
            limiter.check_and_record(student_id).await?;
        }
        let policy = self
            .services
            .policies
            .effective_policy(&session.activity_id)
            .await?;
        if !policy.allows_mode(session.mode) {
            return Err(PipelineError::Validation(format!(
                "mode {} is not allowed for activity {}",
                session.mode, session.activity_id
            )));
        }

        let history = self.recorder.sequence(session_id).await?;
        let classification = self.services.classifier.classify(prompt, context.as_ref());
        debug!(
            "Session {}: state={}, request={}, delegation={:.2}",
            session_id,
            classification.cognitive_state,
            classification.request_type,
            classification.delegation_level
        );

        let decision = self.services.gate.evaluate(&GovernanceInput {
            classification: &classification,
            policy: &policy,
            recent_ai_involvement: history.mean_ai_involvement(self.services.settings.scaffold.window),
        });

        let turn = Turn {
            session_ref: SessionRef {
                session_id: session.id.clone(),
                student_id: session.student_id.clone(),
                activity_id: session.activity_id.clone(),
            },
            session,
            policy,
            prompt,
            context: context.as_ref(),
            classification,
        };

        if !decision.compliant {
            return self.respond_blocked(turn, decision).await;
        }

        self.respond(turn, decision, &history).await
    }

    fn validate_input(
        &self,
        session_id: &str,
        student_id: &str,
        prompt: &str,
    ) -> Result<(), PipelineError> {
        if session_id.trim().is_empty() || student_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "session_id and student_id must not be empty".to_string(),
            ));
        }

        let chars = prompt.chars().count();
        if chars > self.services.settings.max_prompt_chars {
            return Err(PipelineError::Validation(format!(
                "prompt has {} characters, limit is {}",
                chars, self.services.settings.max_prompt_chars
            )));
        }
        Ok(())
    }

    async fn load_active_session(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Session, PipelineError> {
        let session = self
            .services
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("session {} not found", session_id)))?;

        if !session.is_active() {
            return Err(PipelineError::Validation(format!(
                "session {} is {}",
                session_id, session.status
            )));
        }
        if session.student_id != student_id {
            warn!(
                "Student {} tried to use session {} owned by another student",
                student_id, session_id
            );
            return Err(PipelineError::Validation(format!(
                "session {} does not belong to student {}",
                session_id, student_id
            )));
        }
        Ok(session)
    }

    /// Governance short-circuit: no routing, no cache, no model call
    async fn respond_blocked(
        &self,
        turn: Turn<'_>,
        decision: GovernanceDecision,
    ) -> Result<InteractionResponse, PipelineError> {
        let action = decision
            .action
            .unwrap_or(GovernanceAction::BlockCompleteSolution);
        let rules: Vec<Value> = decision
            .violations
            .iter()
            .map(|v| Value::from(v.rule.as_str()))
            .collect();

        let trace = self
            .input_trace(&turn, &decision.warnings)
            .interaction_type(InteractionType::GovernanceBlock)
            .ai_involvement(0.0)
            .meta("blocked", true)
            .meta("governance_action", action.as_str())
            .meta("violations", rules)
            .build()?;
        let trace_id = self.recorder.record(trace).await?;

        let level = match action {
            GovernanceAction::BlockCompleteSolution => RiskLevel::High,
            GovernanceAction::BlockRiskThreshold => RiskLevel::Medium,
        };
        let risk = delegation_block_risk(&turn.session_ref, &trace_id, level)?;
        self.services.risks.create(&risk).await?;

        info!(
            "Session {}: request blocked by governance ({})",
            turn.session_ref.session_id, action
        );

        let mut risk_signals = vec![risk];
        risk_signals.extend(self.schedule_risk_analysis(&turn).await?);

        Ok(InteractionResponse {
            message: self
                .services
                .gate
                .redirect_message(&decision, &turn.classification),
            blocked: true,
            risk_signals,
            trace_ids: vec![trace_id],
            cognitive_state: turn.classification.cognitive_state,
            metadata: ResponseMetadata {
                from_cache: false,
                governance_action: Some(action),
                agent: GOVERNANCE_AGENT.to_string(),
                help_level: None,
                fallback: false,
                warnings: decision.warnings,
            },
        })
    }

    async fn respond(
        &self,
        turn: Turn<'_>,
        decision: GovernanceDecision,
        history: &TraceSequence,
    ) -> Result<InteractionResponse, PipelineError> {
        let key = RouteKey::new(&turn.session, &turn.classification);
        let agent = self.services.router.route(&key)?;

        let session_risks = if turn.session.mode == SessionMode::RiskAnalyst {
            self.services.risks.list_by_session(&turn.session.id).await?
        } else {
            Vec::new()
        };

        let composition = agent.compose(&AgentRequest {
            prompt: turn.prompt,
            context: turn.context,
            classification: &turn.classification,
            policy: &turn.policy,
            session: &turn.session,
            history,
            risks: &session_risks,
            scaffold: &self.services.settings.scaffold,
            defaults: self.services.settings.defaults,
        });

        let parts = CacheKeyParts {
            session_id: &turn.session.id,
            mode: &composition.cache_mode,
            prompt: turn.prompt,
            context: turn.context,
        };

        let (text, from_cache, outcome, attempts) = match self.services.cache.get(&parts) {
            Some(cached) => (cached, true, InvocationOutcome::Generated, 0),
            None => {
                let invocation = self
                    .services
                    .invoker
                    .invoke(
                        &composition.messages(),
                        &composition.params(),
                        &composition.fallback_message,
                    )
                    .await;
                if !invocation.is_fallback() {
                    self.services.cache.set(&parts, invocation.text.as_str());
                }
                (
                    invocation.text,
                    false,
                    invocation.outcome,
                    invocation.attempts,
                )
            }
        };
        let fallback = matches!(outcome, InvocationOutcome::Fallback(_));
        if fallback {
            warn!(
                "Session {}: model unavailable ({:?}), returning fallback",
                turn.session.id, outcome
            );
        }

        let response = agent.finish(&composition, text);

        let input = self.input_trace(&turn, &decision.warnings).build()?;
        let input_id = self.recorder.record(input).await?;

        let mut metadata = response.metadata.clone();
        metadata.insert("from_cache".to_string(), Value::from(from_cache));
        metadata.insert("fallback".to_string(), Value::from(fallback));
        metadata.insert("attempts".to_string(), Value::from(attempts));
        metadata.insert(
            "integrity_concern".to_string(),
            Value::from(turn.classification.signals.integrity_concern),
        );
        if let InvocationOutcome::Fallback(reason) = outcome {
            metadata.insert(
                "fallback_reason".to_string(),
                serde_json::to_value(reason).unwrap_or(Value::Null),
            );
        }

        let output = CognitiveTrace::builder(&turn.session.id)
            .student_id(&turn.session.student_id)
            .activity_id(&turn.session.activity_id)
            .trace_level(TraceLevel::N4)
            .interaction_type(InteractionType::AiResponse)
            .cognitive_state(turn.classification.cognitive_state)
            .cognitive_intent(agent.name())
            .content(&response.message)
            .ai_involvement(if fallback {
                0.0
            } else {
                response.ai_involvement_estimate
            })
            .parent_trace_id(Some(input_id.clone()))
            .metadata(metadata)
            .build()?;
        let output_id = self.recorder.record(output).await?;

        let risk_signals = self.schedule_risk_analysis(&turn).await?;

        info!(
            "Session {}: answered by {} (cache: {}, fallback: {})",
            turn.session.id,
            agent.name(),
            from_cache,
            fallback
        );

        Ok(InteractionResponse {
            message: response.message,
            blocked: false,
            risk_signals,
            trace_ids: vec![input_id, output_id],
            cognitive_state: turn.classification.cognitive_state,
            metadata: ResponseMetadata {
                from_cache,
                governance_action: None,
                agent: agent.name().to_string(),
                help_level: composition.help_level,
                fallback,
                warnings: decision.warnings,
            },
        })
    }

    /// Student prompt trace, shared by both paths
    fn input_trace(&self, turn: &Turn<'_>, warnings: &[String]) -> CognitiveTraceBuilder {
        let classification = &turn.classification;
        let justification = turn
            .context
            .and_then(|c| c.get("justification"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let alternatives = turn
            .context
            .and_then(|c| c.get("alternatives"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        CognitiveTrace::builder(&turn.session.id)
            .student_id(&turn.session.student_id)
            .activity_id(&turn.session.activity_id)
            .trace_level(TraceLevel::N4)
            .interaction_type(InteractionType::StudentPrompt)
            .cognitive_state(classification.cognitive_state)
            .cognitive_intent(classification.request_type.as_str())
            .content(turn.prompt)
            .ai_involvement(classification.delegation_level)
            .decision_justification(justification)
            .alternatives_considered(alternatives)
            .meta("request_type", classification.request_type.as_str())
            .meta("response_type", classification.strategy.response_type.as_str())
            .meta("delegation_level", classification.delegation_level)
            .meta("integrity_concern", classification.signals.integrity_concern)
            .meta("signals", classification.signals.matched.clone())
            .meta("warnings", warnings.to_vec())
    }

    /// Run risk detection per the configured mode
    ///
    /// Deferred mode returns immediately with no risks; the background task
    /// logs its own failures.
    async fn schedule_risk_analysis(&self, turn: &Turn<'_>) -> Result<Vec<Risk>, PipelineError> {
        let task = RiskTask {
            recorder: self.recorder.clone(),
            risks: self.services.risks.clone(),
            detector: self.services.risk_detector.clone(),
            session: turn.session_ref.clone(),
            policy: turn.policy.clone(),
        };

        match self.services.settings.risk_mode {
            RiskMode::Synchronous => task.run().await,
            RiskMode::Deferred => {
                tokio::spawn(async move {
                    let session_id = task.session.session_id.clone();
                    if let Err(e) = task.run().await {
                        warn!("Deferred risk analysis failed for session {}: {}", session_id, e);
                    }
                });
                Ok(Vec::new())
            }
        }
    }

    /// Close, abort or pause a session
    ///
    /// Aborting also appends an `aborted` trace so the session history shows
    /// where it stopped.
    pub async fn end_session(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), PipelineError> {
        let session = self
            .services
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("session {} not found", session_id)))?;

        self.services.sessions.update_status(session_id, status).await?;

        if status == SessionStatus::Aborted {
            let trace = CognitiveTrace::builder(&session.id)
                .student_id(&session.student_id)
                .activity_id(&session.activity_id)
                .trace_level(TraceLevel::N1)
                .interaction_type(InteractionType::Aborted)
                .content("session aborted")
                .build()?;
            self.recorder.record(trace).await?;
        }

        info!("Session {} is now {}", session_id, status);
        Ok(())
    }

    pub async fn trace_sequence(
        &self,
        session_id: &str,
    ) -> Result<TraceSequence, PipelineError> {
        self.recorder.sequence(session_id).await
    }

    pub async fn session_risks(&self, session_id: &str) -> Result<Vec<Risk>, PipelineError> {
        self.services.risks.list_by_session(session_id).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.services.cache.stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.services.invoker.state()
    }
}

/// Owned inputs for one risk analysis, movable into a spawned task
struct RiskTask {
    recorder: TraceRecorder,
    risks: Arc<dyn RiskRepository>,
    detector: Arc<RiskDetector>,
    session: SessionRef,
    policy: EffectivePolicy,
}

impl RiskTask {
    /// Detect risks on the latest trace snapshot and store the new ones
    ///
    /// A detected risk is new unless the session already has a risk of the
    /// same type at the same or a higher level.
    async fn run(self) -> Result<Vec<Risk>, PipelineError> {
        let sequence = self.recorder.sequence(&self.session.session_id).await?;
        let detected = self
            .detector
            .analyze(&self.session, sequence.traces(), &self.policy);
        if detected.is_empty() {
            return Ok(detected);
        }

        let mut recorded = Vec::new();
        for risk in detected {
            if !self.risks.create_unless_covered(&risk).await? {
                continue;
            }
            info!(
                "Session {}: {} risk {} ({})",
                self.session.session_id,
                risk.risk_level(),
                risk.risk_type(),
                risk.dimension()
            );
            recorded.push(risk);
        }
        Ok(recorded)
    }
}
