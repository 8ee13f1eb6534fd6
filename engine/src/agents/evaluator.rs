//! Process evaluator
//!
//! Evaluates how the student reasoned during the session, not whether the
//! code is correct. The composed prompt carries a summary of recent traces so
//! the model can comment on planning, justification and reliance on the AI.

use serde_json::Value;

use super::{base_metadata, summarize_history, user_prompt, AgentBehavior, AgentRequest, Composition};

const HISTORY_WINDOW: usize = 20;

pub struct EvaluatorAgent;

impl Default for EvaluatorAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorAgent {
    pub fn new() -> Self {
        Self
    }
}

const SYSTEM_PROMPT: &str = "You are an evaluator of programming learning processes. \
Assess HOW the student worked, not only the final result.\n\
\n\
Comment on:\n\
- problem decomposition and planning before coding\n\
- whether design decisions were justified and alternatives considered\n\
- how the student validated their work\n\
- how much of the work was delegated to the AI\n\
\n\
Be specific, cite the session evidence you were given, and end with two \
concrete suggestions for the next activity. Never grade with a number and \
never rewrite the student's code.";

impl AgentBehavior for EvaluatorAgent {
    fn name(&self) -> &str {
        "evaluator"
    }

    fn compose(&self, request: &AgentRequest<'_>) -> Composition {
        let summary = summarize_history(request.history, HISTORY_WINDOW);
        let user = format!(
            "Session evidence:\n{}\n\nStudent request:\n{}",
            summary,
            user_prompt(request.prompt, request.context)
        );

        let mut metadata = base_metadata(self.name());
        metadata.insert(
            "evaluated_traces".to_string(),
            Value::from(request.history.recent(HISTORY_WINDOW).len()),
        );

        Composition {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: user,
            temperature: request.defaults.temperature.min(0.3),
            max_tokens: request.defaults.max_tokens,
            // Evidence grows with every interaction; a new trace means a new answer
            cache_mode: format!("{}:{}", self.name(), request.history.len()),
            help_level: None,
            ai_involvement_estimate: 0.3,
            fallback_message: "The process evaluation is not available right now. Your \
                               interactions are recorded and can be evaluated later."
                .to_string(),
            metadata,
        }
    }
}
