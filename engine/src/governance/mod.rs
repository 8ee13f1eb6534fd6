//! Governance gate
//!
//! Checks a classified prompt against the effective policy before any agent,
//! cache or model is involved. A non-compliant decision short-circuits the
//! pipeline: the student receives a pedagogical redirect instead of an answer.
//!
//! Two rules can block:
//!
//! - **Complete solution**: `block_complete_solutions` is on and the prompt's
//!   delegation level exceeds `total_delegation_threshold`
//! - **AI dependency**: the session's recent mean `ai_involvement` exceeds
//!   `max_ai_dependency` and the prompt itself delegates work
//!
//! Everything else produces non-blocking warnings.
//!
//! # Examples
//!
//! ```
//! use cogtrace_engine::classifier::PromptClassifier;
//! use cogtrace_engine::governance::{GovernanceAction, GovernanceGate, GovernanceInput};
//! use cogtrace_engine::policy::EffectivePolicy;
//!
//! let classification = PromptClassifier::new().unwrap().classify("dame el código completo", None);
//! let policy = EffectivePolicy::default();
//! let decision = GovernanceGate::new().evaluate(&GovernanceInput {
//!     classification: &classification,
//!     policy: &policy,
//!     recent_ai_involvement: None,
//! });
//!
//! assert!(!decision.compliant);
//! assert_eq!(decision.action, Some(GovernanceAction::BlockCompleteSolution));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classifier::{Classification, JUSTIFICATION_DELEGATION};
use crate::policy::EffectivePolicy;

/// Action taken when a request is not compliant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceAction {
    BlockCompleteSolution,
    BlockRiskThreshold,
}

impl GovernanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceAction::BlockCompleteSolution => "block_complete_solution",
            GovernanceAction::BlockRiskThreshold => "block_risk_threshold",
        }
    }
}

impl fmt::Display for GovernanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One broken rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    /// Stable rule identifier, e.g. `complete_solution_request`
    pub rule: String,
    pub detail: String,
}

/// Everything the gate looks at
#[derive(Debug, Clone, Copy)]
pub struct GovernanceInput<'a> {
    pub classification: &'a Classification,
    pub policy: &'a EffectivePolicy,
    /// Mean ai_involvement of the session's recent traces, if any exist
    pub recent_ai_involvement: Option<f64>,
}

/// Outcome of [`GovernanceGate::evaluate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceDecision {
    pub compliant: bool,
    pub violations: Vec<PolicyViolation>,
    pub warnings: Vec<String>,
    pub action: Option<GovernanceAction>,
}

/// Stateless policy gate
#[derive(Debug, Default, Clone, Copy)]
pub struct GovernanceGate;

impl GovernanceGate {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a classified prompt against the effective policy
    pub fn evaluate(&self, input: &GovernanceInput<'_>) -> GovernanceDecision {
        let classification = input.classification;
        let policy = input.policy;
        let delegation = classification.delegation_level;

        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut action = None;

        if policy.block_complete_solutions() && delegation > policy.total_delegation_threshold() {
            violations.push(PolicyViolation {
                rule: "complete_solution_request".to_string(),
                detail: format!(
                    "delegation level {:.2} exceeds threshold {:.2}",
                    delegation,
                    policy.total_delegation_threshold()
                ),
            });
            action = Some(GovernanceAction::BlockCompleteSolution);
        }

        if let Some(recent) = input.recent_ai_involvement {
            if recent > policy.max_ai_dependency() && delegation >= JUSTIFICATION_DELEGATION {
                violations.push(PolicyViolation {
                    rule: "ai_dependency_threshold".to_string(),
                    detail: format!(
                        "recent AI involvement {:.2} exceeds maximum {:.2}",
                        recent,
                        policy.max_ai_dependency()
                    ),
                });
                action.get_or_insert(GovernanceAction::BlockRiskThreshold);
            }
        }

        if policy.require_justification() && classification.strategy.requires_justification {
            warnings.push("justification_required".to_string());
        }
        if classification.strategy.help_level > policy.max_help_level() {
            warnings.push(format!("help_level_capped:{}", policy.max_help_level()));
        }
        if classification.signals.integrity_concern {
            warnings.push("integrity_concern".to_string());
        }

        let compliant = violations.is_empty();
        if compliant {
            tracing::debug!("Governance: compliant, {} warnings", warnings.len());
        } else {
            tracing::info!(
                "Governance: blocked ({:?}), violations={:?}",
                action,
                violations.iter().map(|v| v.rule.as_str()).collect::<Vec<_>>()
            );
        }

        GovernanceDecision {
            compliant,
            violations,
            warnings,
            action,
        }
    }

    /// Pedagogical message shown instead of an answer when a request is blocked
    pub fn redirect_message(
        &self,
        decision: &GovernanceDecision,
        classification: &Classification,
    ) -> String {
        let reason = match decision.action {
            Some(GovernanceAction::BlockRiskThreshold) => {
                "Lately most of the work in this session has come from the AI. \
                 To make sure you are building your own understanding, I won't \
                 produce more code for now."
            }
            _ => {
                "I can't give you the complete solution: the goal of this activity \
                 is that you build it and understand every step."
            }
        };

        let guidance = "Let's break it down instead:\n\
             1. Describe in your own words what the problem asks for.\n\
             2. Identify the inputs, the expected outputs and one example.\n\
             3. Write the first small piece you feel sure about and tell me what you tried.";

        let focus = format!(
            "You seem to be in the {} stage; start from there and ask me about the specific step where you are stuck.",
            classification.cognitive_state
        );

        format!("{}\n\n{}\n\n{}", reason, guidance, focus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::PromptClassifier;
    use crate::policy::{ActivityPolicy, InstitutionalPolicy};
    use sdk::types::HelpLevel;

    fn classify(prompt: &str) -> Classification {
        PromptClassifier::new().unwrap().classify(prompt, None)
    }

    #[test]
    fn test_hint_is_compliant() {
        let c = classify("dame una pista");
        let policy = EffectivePolicy::default();
        let decision = GovernanceGate::new().evaluate(&GovernanceInput {
            classification: &c,
            policy: &policy,
            recent_ai_involvement: Some(0.3),
        });
        assert!(decision.compliant);
        assert!(decision.action.is_none());
    }

    #[test]
    fn test_total_delegation_allowed_when_not_blocking() {
        let institution = InstitutionalPolicy {
            block_complete_solutions: false,
            ..Default::default()
        };
        let policy = EffectivePolicy::merge(&institution, &ActivityPolicy::default());
        let c = classify("give me the full code");

        let decision = GovernanceGate::new().evaluate(&GovernanceInput {
            classification: &c,
            policy: &policy,
            recent_ai_involvement: None,
        });
        assert!(decision.compliant);
        assert!(decision.warnings.contains(&"justification_required".to_string()));
    }

    #[test]
    fn test_high_dependency_blocks_partial_delegation() {
        let c = classify("write a function that sorts the list");
        assert!(c.delegation_level >= JUSTIFICATION_DELEGATION);
        let policy = EffectivePolicy::default();

        let decision = GovernanceGate::new().evaluate(&GovernanceInput {
            classification: &c,
            policy: &policy,
            recent_ai_involvement: Some(0.9),
        });
        assert!(!decision.compliant);
        assert_eq!(decision.action, Some(GovernanceAction::BlockRiskThreshold));
        assert_eq!(decision.violations[0].rule, "ai_dependency_threshold");
    }

    #[test]
    fn test_high_dependency_does_not_block_conceptual() {
        let c = classify("what is recursion?");
        let policy = EffectivePolicy::default();
        let decision = GovernanceGate::new().evaluate(&GovernanceInput {
            classification: &c,
            policy: &policy,
            recent_ai_involvement: Some(0.95),
        });
        assert!(decision.compliant);
    }

    #[test]
    fn test_help_cap_warning() {
        let institution = InstitutionalPolicy {
            max_help_level: HelpLevel::Low,
            ..Default::default()
        };
        let policy = EffectivePolicy::merge(&institution, &ActivityPolicy::default());
        let c = classify("dame una pista");

        let decision = GovernanceGate::new().evaluate(&GovernanceInput {
            classification: &c,
            policy: &policy,
            recent_ai_involvement: None,
        });
        assert!(decision.compliant);
        assert!(decision.warnings.iter().any(|w| w.starts_with("help_level_capped")));
    }

    #[test]
    fn test_redirect_message_guides_decomposition() {
        let c = classify("dame el código completo");
        let policy = EffectivePolicy::default();
        let gate = GovernanceGate::new();
        let decision = gate.evaluate(&GovernanceInput {
            classification: &c,
            policy: &policy,
            recent_ai_involvement: None,
        });

        let message = gate.redirect_message(&decision, &c);
        assert!(message.contains("break it down"));
        assert!(message.contains("implementation"));
    }
}
