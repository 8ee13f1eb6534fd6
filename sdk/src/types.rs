//! Closed domain enumerations shared across the pipeline
//!
//! Every value that crosses a component boundary (session mode, cognitive
//! state, risk dimension, ...) is one of these enums. Strings are parsed once,
//! case-insensitively, at the system boundary via `FromStr`; internal code
//! never compares raw strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::PipelineError;

/// Generates `as_str`, `ALL`, `Display` and case-insensitive `FromStr`
/// for a fieldless enum. The string forms match the serde `snake_case` names.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// All variants in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical lowercase name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
                match normalized.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(PipelineError::Validation(format!(
                        "invalid {} '{}'",
                        stringify!($name),
                        s
                    ))),
                }
            }
        }
    };
}

/// Agent mode a session runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Tutor,
    Evaluator,
    Simulator,
    RiskAnalyst,
}

string_enum!(SessionMode {
    Tutor => "tutor",
    Evaluator => "evaluator",
    Simulator => "simulator",
    RiskAnalyst => "risk_analyst",
});

/// Professional role played by the simulator agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatorRole {
    ProductOwner,
    ScrumMaster,
    TechnicalInterviewer,
    IncidentResponder,
    Client,
    SecurityAuditor,
}

string_enum!(SimulatorRole {
    ProductOwner => "product_owner",
    ScrumMaster => "scrum_master",
    TechnicalInterviewer => "technical_interviewer",
    IncidentResponder => "incident_responder",
    Client => "client",
    SecurityAuditor => "security_auditor",
});

/// Lifecycle status of a session
///
/// `Active` is the only state with outgoing edges; every terminal or paused
/// state is final from the pipeline's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Aborted,
    Paused,
}

string_enum!(SessionStatus {
    Active => "active",
    Completed => "completed",
    Aborted => "aborted",
    Paused => "paused",
});

impl SessionStatus {
    /// Check whether `self -> next` is an allowed transition
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (
                SessionStatus::Active,
                SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Paused
            )
        )
    }
}

/// Layer of the cognitive trace model (N1 superficial .. N4 cognitive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    N1,
    N2,
    N3,
    N4,
}

string_enum!(TraceLevel {
    N1 => "n1",
    N2 => "n2",
    N3 => "n3",
    N4 => "n4",
});

/// What kind of event a trace records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    StudentPrompt,
    AiResponse,
    GovernanceBlock,
    Aborted,
}

string_enum!(InteractionType {
    StudentPrompt => "student_prompt",
    AiResponse => "ai_response",
    GovernanceBlock => "governance_block",
    Aborted => "aborted",
});

/// Cognitive state inferred from a student's prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveState {
    Exploration,
    Planning,
    Implementation,
    Debugging,
    Validation,
    Reflection,
}

string_enum!(CognitiveState {
    Exploration => "exploration",
    Planning => "planning",
    Implementation => "implementation",
    Debugging => "debugging",
    Validation => "validation",
    Reflection => "reflection",
});

/// Kind of help the student is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Exploratory,
    Conceptual,
    Procedural,
    Debugging,
    HintRequest,
    Review,
    CompleteSolution,
}

string_enum!(RequestType {
    Exploratory => "exploratory",
    Conceptual => "conceptual",
    Procedural => "procedural",
    Debugging => "debugging",
    HintRequest => "hint_request",
    Review => "review",
    CompleteSolution => "complete_solution",
});

/// Pedagogical response style, doubles as the tutor sub-mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Socratic,
    Explicative,
    Guided,
    Metacognitive,
}

string_enum!(ResponseType {
    Socratic => "socratic",
    Explicative => "explicative",
    Guided => "guided",
    Metacognitive => "metacognitive",
});

/// Amount of scaffolding in a guided answer, ordered from least to most
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelpLevel {
    Minimal,
    Low,
    Medium,
    High,
}

string_enum!(HelpLevel {
    Minimal => "minimal",
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl HelpLevel {
    /// One step less help, saturating at `Minimal`
    pub fn lower(self) -> Self {
        match self {
            HelpLevel::High => HelpLevel::Medium,
            HelpLevel::Medium => HelpLevel::Low,
            HelpLevel::Low | HelpLevel::Minimal => HelpLevel::Minimal,
        }
    }
}

/// Risk dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDimension {
    Cognitive,
    Ethical,
    Epistemic,
    Technical,
    Governance,
}

string_enum!(RiskDimension {
    Cognitive => "cognitive",
    Ethical => "ethical",
    Epistemic => "epistemic",
    Technical => "technical",
    Governance => "governance",
});

/// Risk severity, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(RiskLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});
