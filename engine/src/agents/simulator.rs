//! Professional role simulator
//!
//! Plays one of six workplace roles so the student practices the soft side of
//! software work: clarifying requirements, reporting progress, handling an
//! incident, defending a design. The persona stays in character and never
//! writes the student's code.

use serde_json::Value;

use super::{base_metadata, user_prompt, AgentBehavior, AgentRequest, Composition};
use sdk::types::SimulatorRole;

pub struct SimulatorAgent {
    role: SimulatorRole,
    name: String,
}

impl SimulatorAgent {
    pub fn new(role: SimulatorRole) -> Self {
        Self {
            role,
            name: format!("simulator:{}", role),
        }
    }

    pub fn role(&self) -> SimulatorRole {
        self.role
    }

    fn persona(&self) -> &'static str {
        match self.role {
            SimulatorRole::ProductOwner => {
                "You are the Product Owner of the team. You care about business value and \
                 acceptance criteria. Ask the student to clarify user stories, question \
                 priorities and push back on scope creep."
            }
            SimulatorRole::ScrumMaster => {
                "You are the Scrum Master running a daily stand-up. Ask what the student did, \
                 what they will do next and what is blocking them. Help them turn blockers \
                 into concrete actions."
            }
            SimulatorRole::TechnicalInterviewer => {
                "You are a technical interviewer. Ask one question at a time, probe the \
                 reasoning behind every answer and ask about complexity and trade-offs. Do \
                 not reveal the expected answer."
            }
            SimulatorRole::IncidentResponder => {
                "You are the on-call lead during a production incident. Ask for symptoms, \
                 timeline and impact. Guide the student through triage, mitigation and a \
                 short post-mortem, one step at a time."
            }
            SimulatorRole::Client => {
                "You are a non-technical client. Describe needs in business terms, be vague \
                 at first and only give details when the student asks good questions. React \
                 to jargon by asking for plain explanations."
            }
            SimulatorRole::SecurityAuditor => {
                "You are a security auditor reviewing the student's work. Ask about input \
                 validation, secrets handling, injection and authorization. Point at risky \
                 areas without writing the fix."
            }
        }
    }
}

impl AgentBehavior for SimulatorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn compose(&self, request: &AgentRequest<'_>) -> Composition {
        let system_prompt = format!(
            "{}\n\n\
             Stay in character for the whole conversation. Keep answers short, like a real \
             workplace conversation. Never write code for the student.",
            self.persona()
        );

        let mut metadata = base_metadata(&self.name);
        metadata.insert("simulator_role".to_string(), Value::from(self.role.as_str()));

        Composition {
            system_prompt,
            user_prompt: user_prompt(request.prompt, request.context),
            temperature: request.defaults.temperature,
            max_tokens: request.defaults.max_tokens,
            cache_mode: self.name.clone(),
            help_level: None,
            ai_involvement_estimate: 0.4,
            fallback_message: "The simulated colleague stepped away for a moment. Write \
                               down what you wanted to tell them and try again shortly."
                .to_string(),
            metadata,
        }
    }
}
