//! Agent routing and composition
//!
//! Every session runs one of four agent modes. [`AgentRouter::route`] picks
//! the behavior for a `(mode, simulator_role, response_type)` key and the
//! behavior turns the request into a [`Composition`]: the prompts and
//! sampling parameters for the model plus the pedagogical metadata recorded
//! in the trace.
//!
//! Composition is pure. Behaviors never call the model themselves; the
//! pipeline resolves the composition through the cache or the invoker and
//! hands the text back to [`AgentBehavior::finish`].

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::classifier::Classification;
use crate::config::ScaffoldConfig;
use crate::db::Session;
use crate::llm::invoker::GenerationParams;
use crate::llm::Message;
use crate::policy::EffectivePolicy;
use crate::risk::Risk;
use crate::trace::TraceSequence;
use sdk::errors::PipelineError;
use sdk::types::{
    CognitiveState, HelpLevel, InteractionType, ResponseType, SessionMode, SimulatorRole,
};

pub mod evaluator;
pub mod risk_analyst;
pub mod simulator;
pub mod tutor;

pub use evaluator::EvaluatorAgent;
pub use risk_analyst::RiskAnalystAgent;
pub use simulator::SimulatorAgent;
pub use tutor::{adapt_help_level, TutorAgent};

/// Everything a behavior may look at while composing
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub prompt: &'a str,
    pub context: Option<&'a Value>,
    pub classification: &'a Classification,
    pub policy: &'a EffectivePolicy,
    pub session: &'a Session,
    /// Session history before this interaction
    pub history: &'a TraceSequence,
    /// Risks already recorded for the session (filled for risk analyst routes)
    pub risks: &'a [Risk],
    pub scaffold: &'a ScaffoldConfig,
    /// Provider defaults from configuration
    pub defaults: GenerationParams,
}

/// What to send to the model, and how to record it
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Route label, part of the cache key (e.g. `tutor:guided:medium`)
    pub cache_mode: String,
    /// Scaffold level for guided tutoring
    pub help_level: Option<HelpLevel>,
    /// Expected share of the work done by the AI in the answer
    pub ai_involvement_estimate: f64,
    /// Shown when the model cannot answer
    pub fallback_message: String,
    pub metadata: Map<String, Value>,
}

impl Composition {
    pub fn messages(&self) -> Vec<Message> {
        vec![
            Message::system(&self.system_prompt),
            Message::user(&self.user_prompt),
        ]
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Final agent answer
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub message: String,
    pub ai_involvement_estimate: f64,
    pub metadata: Map<String, Value>,
}

/// One agent behavior
pub trait AgentBehavior: Send + Sync {
    /// Stable label, recorded in response metadata
    fn name(&self) -> &str;

    fn compose(&self, request: &AgentRequest<'_>) -> Composition;

    fn finish(&self, composition: &Composition, text: String) -> AgentResponse {
        AgentResponse {
            message: text.trim().to_string(),
            ai_involvement_estimate: composition.ai_involvement_estimate,
            metadata: composition.metadata.clone(),
        }
    }
}

/// Routing key derived from the session and the classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteKey {
    pub mode: SessionMode,
    pub simulator_role: Option<SimulatorRole>,
    pub response_type: ResponseType,
}

impl RouteKey {
    pub fn new(session: &Session, classification: &Classification) -> Self {
        Self {
            mode: session.mode,
            simulator_role: session.simulator_role,
            response_type: classification.strategy.response_type,
        }
    }
}

/// Holds one instance of every behavior
pub struct AgentRouter {
    tutors: HashMap<ResponseType, TutorAgent>,
    evaluator: EvaluatorAgent,
    simulators: HashMap<SimulatorRole, SimulatorAgent>,
    risk_analyst: RiskAnalystAgent,
}

impl Default for AgentRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRouter {
    pub fn new() -> Self {
        Self {
            tutors: ResponseType::ALL
                .iter()
                .map(|t| (*t, TutorAgent::new(*t)))
                .collect(),
            evaluator: EvaluatorAgent::new(),
            simulators: SimulatorRole::ALL
                .iter()
                .map(|r| (*r, SimulatorAgent::new(*r)))
                .collect(),
            risk_analyst: RiskAnalystAgent::new(),
        }
    }

    /// Select the behavior for a route
    ///
    /// # Errors
    ///
    /// `PipelineError::Validation` for a simulator route without a role.
    pub fn route(&self, key: &RouteKey) -> Result<&dyn AgentBehavior, PipelineError> {
        let behavior: &dyn AgentBehavior = match key.mode {
            SessionMode::Tutor => self.tutors.get(&key.response_type).ok_or_else(|| {
                PipelineError::Validation(format!("no tutor for {}", key.response_type))
            })?,
            SessionMode::Evaluator => &self.evaluator,
            SessionMode::Simulator => {
                let role = key.simulator_role.ok_or_else(|| {
                    PipelineError::Validation("simulator session has no role".to_string())
                })?;
                self.simulators.get(&role).ok_or_else(|| {
                    PipelineError::Validation(format!("no simulator for role {}", role))
                })?
            }
            SessionMode::RiskAnalyst => &self.risk_analyst,
        };

        tracing::debug!("Routed {:?} to agent '{}'", key, behavior.name());
        Ok(behavior)
    }
}

/// Student prompt plus any code the front end attached
pub(crate) fn user_prompt(prompt: &str, context: Option<&Value>) -> String {
    match context
        .and_then(|c| c.get("code"))
        .and_then(Value::as_str)
        .filter(|code| !code.trim().is_empty())
    {
        Some(code) => format!("{}\n\nStudent code:\n```\n{}\n```", prompt, code),
        None => prompt.to_string(),
    }
}

/// Compact textual summary of a session's recent history
pub(crate) fn summarize_history(history: &TraceSequence, n: usize) -> String {
    let recent = history.recent(n);
    if recent.is_empty() {
        return "No previous interactions in this session.".to_string();
    }

    let prompts: Vec<_> = recent
        .iter()
        .filter(|t| t.interaction_type() == InteractionType::StudentPrompt)
        .collect();
    let blocked = recent.iter().filter(|t| t.is_blocked()).count();
    let justified = prompts.iter().filter(|t| t.is_justified()).count();

    let mut states: Vec<(CognitiveState, usize)> = CognitiveState::ALL
        .iter()
        .map(|s| (*s, prompts.iter().filter(|t| t.cognitive_state() == *s).count()))
        .filter(|(_, count)| *count > 0)
        .collect();
    states.sort_by(|a, b| b.1.cmp(&a.1));

    let states = states
        .iter()
        .map(|(s, c)| format!("{} ({})", s, c))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Last {} interactions: {} student prompts, {} blocked by policy, {} with a justification.\n\
         Mean AI involvement: {:.2}.\n\
         Cognitive states: {}.",
        recent.len(),
        prompts.len(),
        blocked,
        justified,
        history.mean_ai_involvement(n).unwrap_or(0.0),
        if states.is_empty() { "none" } else { states.as_str() }
    )
}

pub(crate) fn base_metadata(agent: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("agent".to_string(), Value::from(agent));
    metadata
}
