//! Risk analyst
//!
//! Explains the risks recorded for a session in plain language, ordered by
//! severity, together with what the student can do about each one.

use serde_json::Value;

use super::{base_metadata, summarize_history, user_prompt, AgentBehavior, AgentRequest, Composition};
use crate::risk::Risk;

const HISTORY_WINDOW: usize = 10;
const MAX_LISTED_RISKS: usize = 10;

pub struct RiskAnalystAgent;

impl Default for RiskAnalystAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskAnalystAgent {
    pub fn new() -> Self {
        Self
    }
}

fn describe_risks(risks: &[Risk]) -> String {
    if risks.is_empty() {
        return "No risks have been recorded for this session.".to_string();
    }

    let mut sorted: Vec<&Risk> = risks.iter().collect();
    sorted.sort_by(|a, b| b.risk_level().cmp(&a.risk_level()));

    sorted
        .iter()
        .take(MAX_LISTED_RISKS)
        .map(|r| {
            format!(
                "- [{}] {} / {}: {}",
                r.risk_level(),
                r.dimension(),
                r.risk_type(),
                r.description()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl AgentBehavior for RiskAnalystAgent {
    fn name(&self) -> &str {
        "risk_analyst"
    }

    fn compose(&self, request: &AgentRequest<'_>) -> Composition {
        let system_prompt = "You are a learning risk analyst. Explain the detected risks to \
                             the student in a supportive tone: what each risk means, why it \
                             matters for their learning and one concrete habit that reduces \
                             it. Do not accuse the student and do not solve any exercise.";

        let user = format!(
            "Recorded risks:\n{}\n\nRecent activity:\n{}\n\nStudent question:\n{}",
            describe_risks(request.risks),
            summarize_history(request.history, HISTORY_WINDOW),
            user_prompt(request.prompt, request.context)
        );

        let mut metadata = base_metadata(self.name());
        metadata.insert("risks_reviewed".to_string(), Value::from(request.risks.len()));

        Composition {
            system_prompt: system_prompt.to_string(),
            user_prompt: user,
            temperature: request.defaults.temperature.min(0.4),
            max_tokens: request.defaults.max_tokens,
            cache_mode: format!(
                "{}:{}:{}",
                self.name(),
                request.history.len(),
                request.risks.len()
            ),
            help_level: None,
            ai_involvement_estimate: 0.2,
            fallback_message: "The risk summary is not available right now. Your instructor \
                               can still review the recorded risks."
                .to_string(),
            metadata,
        }
    }
}
