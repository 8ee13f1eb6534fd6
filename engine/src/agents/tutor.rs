//! Tutor agent
//!
//! Four sub-modes, selected by the classifier's response type:
//!
//! - **Socratic**: answers with questions that lead the student forward
//! - **Explicative**: explains a concept without solving the exercise
//! - **Guided**: graded hints following a fading scaffold
//! - **Metacognitive**: asks the student to reflect on their own process
//!
//! Guided hints fade: the help level starts at what the classifier asked
//! for (capped by policy), drops one step once the student has used up the
//! hint budget or leans too heavily on the AI, and never climbs back above the
//! last level used in the session.

use serde_json::Value;

use super::{base_metadata, user_prompt, AgentBehavior, AgentRequest, Composition};
use crate::config::ScaffoldConfig;
use crate::trace::{CognitiveTrace, TraceSequence};
use sdk::types::{HelpLevel, InteractionType, ResponseType};

pub struct TutorAgent {
    response_type: ResponseType,
    name: String,
}

impl TutorAgent {
    pub fn new(response_type: ResponseType) -> Self {
        Self {
            response_type,
            name: format!("tutor:{}", response_type),
        }
    }

    fn system_prompt(&self, help_level: Option<HelpLevel>) -> String {
        let base = "You are a programming tutor for university students. Never write the \
                    complete solution to an exercise and never hand over code the student \
                    could submit as-is. Answer in the student's language.";

        let mode = match self.response_type {
            ResponseType::Socratic => {
                "Respond only with one to three guiding questions that help the student find \
                 the next step by themselves. Do not state the answer."
                    .to_string()
            }
            ResponseType::Explicative => {
                "Explain the underlying concept clearly with a small example that is unrelated \
                 to the student's exercise. Finish with one question that checks understanding."
                    .to_string()
            }
            ResponseType::Guided => {
                let level = help_level.unwrap_or(HelpLevel::Medium);
                format!(
                    "Give a single hint at help level '{}'.\n\
                     - minimal: point at the area to look at, nothing more\n\
                     - low: name the concept or technique involved\n\
                     - medium: describe the next step in words, no code\n\
                     - high: show a short pseudocode fragment for the next step only\n\
                     Stay strictly within the requested level.",
                    level
                )
            }
            ResponseType::Metacognitive => {
                "Help the student reflect on their own process: ask how they reached their \
                 current approach, what alternatives they considered, and how they would \
                 verify it. Do not evaluate the code yourself."
                    .to_string()
            }
        };

        format!("{}\n\n{}", base, mode)
    }

    fn ai_involvement(&self, help_level: Option<HelpLevel>) -> f64 {
        match self.response_type {
            ResponseType::Socratic => 0.2,
            ResponseType::Explicative => 0.4,
            ResponseType::Metacognitive => 0.15,
            ResponseType::Guided => match help_level.unwrap_or(HelpLevel::Medium) {
                HelpLevel::Minimal => 0.2,
                HelpLevel::Low => 0.35,
                HelpLevel::Medium => 0.5,
                HelpLevel::High => 0.65,
            },
        }
    }
}

impl AgentBehavior for TutorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn compose(&self, request: &AgentRequest<'_>) -> Composition {
        let help_level = (self.response_type == ResponseType::Guided).then(|| {
            adapt_help_level(
                request.classification.strategy.help_level,
                request.policy.max_help_level(),
                request.history,
                request.scaffold,
            )
        });

        let cache_mode = match help_level {
            Some(level) => format!("{}:{}", self.name, level),
            None => self.name.clone(),
        };

        let mut metadata = base_metadata(&self.name);
        metadata.insert(
            "response_type".to_string(),
            Value::from(self.response_type.as_str()),
        );
        if let Some(level) = help_level {
            metadata.insert("help_level".to_string(), Value::from(level.as_str()));
        }

        let temperature = match self.response_type {
            ResponseType::Explicative => request.defaults.temperature.min(0.5),
            _ => request.defaults.temperature,
        };

        Composition {
            system_prompt: self.system_prompt(help_level),
            user_prompt: user_prompt(request.prompt, request.context),
            temperature,
            max_tokens: request.defaults.max_tokens,
            cache_mode,
            help_level,
            ai_involvement_estimate: self.ai_involvement(help_level),
            fallback_message: "The tutor is not available right now. While you wait, write \
                               down what you expect your code to do step by step and where \
                               the result first differs from that."
                .to_string(),
            metadata,
        }
    }
}

/// Guided hints already delivered in the session, with their levels
fn delivered_hints(history: &TraceSequence) -> Vec<HelpLevel> {
    history
        .traces()
        .iter()
        .filter(|t| t.interaction_type() == InteractionType::AiResponse && !t.flag("fallback"))
        .filter_map(hint_level)
        .collect()
}

fn hint_level(trace: &CognitiveTrace) -> Option<HelpLevel> {
    trace.meta_str("help_level").and_then(|l| l.parse().ok())
}

/// Fading-scaffold help level for the next guided hint
///
/// Starts from `requested` capped by `policy_max`, drops one level when the
/// session has already used `hint_limit` hints or the mean ai_involvement of
/// the last `window` traces exceeds `dependency_threshold`, and is finally
/// capped by the last level used in the session.
pub fn adapt_help_level(
    requested: HelpLevel,
    policy_max: HelpLevel,
    history: &TraceSequence,
    scaffold: &ScaffoldConfig,
) -> HelpLevel {
    let mut level = requested.min(policy_max);

    let hints = delivered_hints(history);
    let over_budget = hints.len() >= scaffold.hint_limit;
    let dependent = history
        .mean_ai_involvement(scaffold.window)
        .is_some_and(|mean| mean > scaffold.dependency_threshold);

    if over_budget || dependent {
        level = level.lower();
    }

    if let Some(last) = hints.last() {
        level = level.min(*last);
    }

    tracing::debug!(
        "Scaffold: requested={}, hints_given={}, dependent={}, level={}",
        requested,
        hints.len(),
        dependent,
        level
    );
    level
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::CognitiveState;

    fn hint(level: HelpLevel, ai: f64) -> CognitiveTrace {
        CognitiveTrace::builder("s1")
            .interaction_type(InteractionType::AiResponse)
            .cognitive_state(CognitiveState::Implementation)
            .ai_involvement(ai)
            .meta("help_level", level.as_str())
            .build()
            .unwrap()
    }

    fn prompt(ai: f64) -> CognitiveTrace {
        CognitiveTrace::builder("s1").ai_involvement(ai).build().unwrap()
    }

    fn history(hints: usize) -> TraceSequence {
        let mut traces = Vec::new();
        for _ in 0..hints {
            traces.push(prompt(0.3));
            traces.push(hint(HelpLevel::Medium, 0.5));
        }
        TraceSequence::new("s1", traces)
    }

    #[test]
    fn test_first_hint_uses_requested_level() {
        let level = adapt_help_level(
            HelpLevel::Medium,
            HelpLevel::High,
            &TraceSequence::default(),
            &ScaffoldConfig::default(),
        );
        assert_eq!(level, HelpLevel::Medium);
    }

    #[test]
    fn test_policy_caps_level() {
        let level = adapt_help_level(
            HelpLevel::High,
            HelpLevel::Low,
            &TraceSequence::default(),
            &ScaffoldConfig::default(),
        );
        assert_eq!(level, HelpLevel::Low);
    }

    #[test]
    fn test_sixth_hint_degrades() {
        let cfg = ScaffoldConfig::default();
        assert_eq!(
            adapt_help_level(HelpLevel::Medium, HelpLevel::High, &history(4), &cfg),
            HelpLevel::Medium
        );
        assert_eq!(
            adapt_help_level(HelpLevel::Medium, HelpLevel::High, &history(5), &cfg),
            HelpLevel::Low
        );
    }

    #[test]
    fn test_high_dependency_degrades() {
        let traces = (0..5).map(|_| prompt(0.9)).collect();
        let level = adapt_help_level(
            HelpLevel::Medium,
            HelpLevel::High,
            &TraceSequence::new("s1", traces),
            &ScaffoldConfig::default(),
        );
        assert_eq!(level, HelpLevel::Low);
    }

    #[test]
    fn test_never_upgrades_within_session() {
        let traces = vec![prompt(0.1), hint(HelpLevel::Low, 0.1)];
        let level = adapt_help_level(
            HelpLevel::High,
            HelpLevel::High,
            &TraceSequence::new("s1", traces),
            &ScaffoldConfig::default(),
        );
        assert_eq!(level, HelpLevel::Low);
    }

    #[test]
    fn test_fallback_responses_are_not_hints() {
        let fallback = CognitiveTrace::builder("s1")
            .interaction_type(InteractionType::AiResponse)
            .meta("help_level", "minimal")
            .meta("fallback", true)
            .build()
            .unwrap();
        let level = adapt_help_level(
            HelpLevel::Medium,
            HelpLevel::High,
            &TraceSequence::new("s1", vec![fallback]),
            &ScaffoldConfig::default(),
        );
        assert_eq!(level, HelpLevel::Medium);
    }
}
