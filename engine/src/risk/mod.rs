//! Risk detection
//!
//! [`RiskDetector::analyze`] looks at the recent trace history of a session
//! and derives advisory [`Risk`]s across five dimensions:
//!
//! | Dimension | Type | Trigger |
//! |---|---|---|
//! | Cognitive | `ai_dependency` | mean ai_involvement above the medium/high thresholds |
//! | Epistemic | `lack_of_justification` | few justified design decisions |
//! | Epistemic | `uncritical_acceptance` | many prompts, none validating or reflecting |
//! | Ethical | `academic_integrity` | integrity concern flagged on a trace |
//! | Technical | `insecure_code` | insecure snippets in trace content |
//! | Governance | `repeated_policy_violations` | repeated governance blocks |
//!
//! The detector is stateless: the same traces and policy always yield the
//! same risk kinds and levels.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RiskThresholds;
use crate::policy::EffectivePolicy;
use crate::trace::CognitiveTrace;
use sdk::errors::PipelineError;
use sdk::types::{CognitiveState, InteractionType, RiskDimension, RiskLevel};

pub const AI_DEPENDENCY: &str = "ai_dependency";
pub const COGNITIVE_DELEGATION: &str = "cognitive_delegation";
pub const LACK_OF_JUSTIFICATION: &str = "lack_of_justification";
pub const UNCRITICAL_ACCEPTANCE: &str = "uncritical_acceptance";
pub const ACADEMIC_INTEGRITY: &str = "academic_integrity";
pub const INSECURE_CODE: &str = "insecure_code";
pub const REPEATED_POLICY_VIOLATIONS: &str = "repeated_policy_violations";

/// Identity of the session a risk belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: String,
    pub student_id: String,
    pub activity_id: String,
}

/// Unvalidated risk fields, turned into a [`Risk`] by [`Risk::new`]
#[derive(Debug, Clone)]
pub struct RiskDraft {
    pub session_id: String,
    pub student_id: String,
    pub activity_id: String,
    pub dimension: RiskDimension,
    pub risk_type: String,
    pub risk_level: RiskLevel,
    pub description: String,
    pub evidence_trace_ids: Vec<String>,
    pub recommendations: Vec<String>,
}

impl RiskDraft {
    pub fn for_session(
        session: &SessionRef,
        dimension: RiskDimension,
        risk_type: &str,
        risk_level: RiskLevel,
        description: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session.session_id.clone(),
            student_id: session.student_id.clone(),
            activity_id: session.activity_id.clone(),
            dimension,
            risk_type: risk_type.to_string(),
            risk_level,
            description: description.into(),
            evidence_trace_ids: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn evidence(mut self, ids: Vec<String>) -> Self {
        self.evidence_trace_ids = ids;
        self
    }

    pub fn recommend(mut self, recommendation: &str) -> Self {
        self.recommendations.push(recommendation.to_string());
        self
    }
}

/// Immutable risk record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    id: String,
    session_id: String,
    student_id: String,
    activity_id: String,
    dimension: RiskDimension,
    risk_type: String,
    risk_level: RiskLevel,
    description: String,
    evidence_trace_ids: Vec<String>,
    recommendations: Vec<String>,
    timestamp: DateTime<Utc>,
}

impl Risk {
    /// Validate a draft into a new risk with a fresh id
    pub fn new(draft: RiskDraft) -> Result<Self, PipelineError> {
        Self::restore(uuid::Uuid::new_v4().to_string(), Utc::now(), draft)
    }

    /// Rebuild a stored risk
    pub fn restore(
        id: String,
        timestamp: DateTime<Utc>,
        draft: RiskDraft,
    ) -> Result<Self, PipelineError> {
        if draft.session_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "risk session_id must not be empty".to_string(),
            ));
        }
        if draft.risk_type.trim().is_empty() {
            return Err(PipelineError::Validation(
                "risk_type must not be empty".to_string(),
            ));
        }

        Ok(Self {
            id,
            session_id: draft.session_id,
            student_id: draft.student_id,
            activity_id: draft.activity_id,
            dimension: draft.dimension,
            risk_type: draft.risk_type,
            risk_level: draft.risk_level,
            description: draft.description,
            evidence_trace_ids: draft.evidence_trace_ids,
            recommendations: draft.recommendations,
            timestamp,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    pub fn dimension(&self) -> RiskDimension {
        self.dimension
    }

    pub fn risk_type(&self) -> &str {
        &self.risk_type
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn evidence_trace_ids(&self) -> &[String] {
        &self.evidence_trace_ids
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Stateless risk analyzer
pub struct RiskDetector {
    thresholds: RiskThresholds,
    insecure_patterns: Vec<(&'static str, Regex)>,
}

impl RiskDetector {
    pub fn new(thresholds: RiskThresholds) -> anyhow::Result<Self> {
        let insecure_patterns = vec![
            ("eval", Regex::new(r"\b(eval|exec)\s*\(")?),
            (
                "sql_concatenation",
                Regex::new(r#"(?i)\b(select|insert|update|delete)\b[^;\n]*["']\s*(\+|\|\||%|\.format\()"#)?,
            ),
            (
                "sql_interpolation",
                Regex::new(r#"(?i)f["'][^"'\n]*\b(select|insert|update|delete)\b[^"'\n]*\{"#)?,
            ),
            (
                "hardcoded_secret",
                Regex::new(
                    r#"(?i)\b(password|passwd|secret|api_?key|token)\s*[:=]\s*["'][^"'\s]{4,}["']"#,
                )?,
            ),
        ];

        Ok(Self {
            thresholds,
            insecure_patterns,
        })
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Derive risks from the session's recent traces (oldest first)
    pub fn analyze(
        &self,
        session: &SessionRef,
        traces: &[CognitiveTrace],
        policy: &EffectivePolicy,
    ) -> Vec<Risk> {
        let start = traces.len().saturating_sub(self.thresholds.window_size);
        let window = &traces[start..];
        if window.is_empty() {
            return Vec::new();
        }

        let justification = justification_ratio(window);

        let drafts = [
            self.ai_dependency(session, window, justification, policy),
            self.lack_of_justification(session, window, justification, policy),
            self.uncritical_acceptance(session, window),
            self.academic_integrity(session, window),
            self.insecure_code(session, window),
            self.repeated_violations(session, window),
        ];

        let risks: Vec<Risk> = drafts
            .into_iter()
            .flatten()
            .filter_map(|draft| match Risk::new(draft) {
                Ok(risk) => Some(risk),
                Err(e) => {
                    tracing::warn!("Dropping invalid risk: {}", e);
                    None
                }
            })
            .collect();

        if !risks.is_empty() {
            tracing::info!(
                "Detected {} risks for session {}: {:?}",
                risks.len(),
                session.session_id,
                risks
                    .iter()
                    .map(|r| format!("{}:{}", r.risk_type(), r.risk_level()))
                    .collect::<Vec<_>>()
            );
        }
        risks
    }

    fn ai_dependency(
        &self,
        session: &SessionRef,
        window: &[CognitiveTrace],
        justification: Option<JustificationRatio>,
        policy: &EffectivePolicy,
    ) -> Option<RiskDraft> {
        let mean = window.iter().map(|t| t.ai_involvement()).sum::<f64>() / window.len() as f64;
        if mean <= self.thresholds.dependency_medium {
            return None;
        }

        let level = if mean > self.thresholds.dependency_high {
            let below_minimum = justification
                .is_some_and(|j| j.ratio() < policy.min_justification_ratio());
            if window.len() >= self.thresholds.critical_min_interactions && below_minimum {
                RiskLevel::Critical
            } else {
                RiskLevel::High
            }
        } else {
            RiskLevel::Medium
        };

        let evidence = window
            .iter()
            .filter(|t| t.ai_involvement() > self.thresholds.dependency_medium)
            .map(|t| t.id().to_string())
            .collect();

        Some(
            RiskDraft::for_session(
                session,
                RiskDimension::Cognitive,
                AI_DEPENDENCY,
                level,
                format!(
                    "Mean AI involvement of {:.2} over the last {} interactions",
                    mean,
                    window.len()
                ),
            )
            .evidence(evidence)
            .recommend("Ask the student to attempt the next step before requesting help")
            .recommend("Prefer Socratic questions over worked examples for this session"),
        )
    }

    fn lack_of_justification(
        &self,
        session: &SessionRef,
        window: &[CognitiveTrace],
        justification: Option<JustificationRatio>,
        policy: &EffectivePolicy,
    ) -> Option<RiskDraft> {
        let j = justification?;
        if j.decisions < self.thresholds.min_decisions {
            return None;
        }

        let ratio = j.ratio();
        let level = if ratio < 0.2 {
            RiskLevel::High
        } else if ratio < 0.4 {
            RiskLevel::Medium
        } else if ratio < policy.min_justification_ratio() {
            RiskLevel::Low
        } else {
            return None;
        };

        let evidence = window
            .iter()
            .filter(|t| is_design_decision(t) && !t.is_justified())
            .map(|t| t.id().to_string())
            .collect();

        Some(
            RiskDraft::for_session(
                session,
                RiskDimension::Epistemic,
                LACK_OF_JUSTIFICATION,
                level,
                format!(
                    "{} of {} design decisions were justified ({:.0}%)",
                    j.justified,
                    j.decisions,
                    ratio * 100.0
                ),
            )
            .evidence(evidence)
            .recommend("Ask the student to explain why they chose this approach")
            .recommend("Request at least one alternative that was considered"),
        )
    }

    fn uncritical_acceptance(
        &self,
        session: &SessionRef,
        window: &[CognitiveTrace],
    ) -> Option<RiskDraft> {
        let prompts: Vec<&CognitiveTrace> = window
            .iter()
            .filter(|t| t.interaction_type() == InteractionType::StudentPrompt)
            .collect();
        if prompts.len() < self.thresholds.uncritical_prompt_threshold {
            return None;
        }

        let critical = prompts.iter().any(|t| {
            matches!(
                t.cognitive_state(),
                CognitiveState::Validation | CognitiveState::Reflection
            )
        });
        if critical {
            return None;
        }

        Some(
            RiskDraft::for_session(
                session,
                RiskDimension::Epistemic,
                UNCRITICAL_ACCEPTANCE,
                RiskLevel::Medium,
                format!(
                    "{} prompts without any validation or reflection",
                    prompts.len()
                ),
            )
            .evidence(prompts.iter().map(|t| t.id().to_string()).collect())
            .recommend("Ask the student how they would test the suggested code"),
        )
    }

    fn academic_integrity(
        &self,
        session: &SessionRef,
        window: &[CognitiveTrace],
    ) -> Option<RiskDraft> {
        let evidence: Vec<String> = window
            .iter()
            .filter(|t| t.flag("integrity_concern"))
            .map(|t| t.id().to_string())
            .collect();
        if evidence.is_empty() {
            return None;
        }

        Some(
            RiskDraft::for_session(
                session,
                RiskDimension::Ethical,
                ACADEMIC_INTEGRITY,
                RiskLevel::High,
                "The student expressed intent to submit AI-produced work as their own",
            )
            .evidence(evidence)
            .recommend("Review the institution's AI use policy with the student"),
        )
    }

    fn insecure_code(&self, session: &SessionRef, window: &[CognitiveTrace]) -> Option<RiskDraft> {
        let mut kinds: Vec<&str> = Vec::new();
        let mut evidence = Vec::new();

        for trace in window {
            let mut hit = false;
            for (name, pattern) in &self.insecure_patterns {
                if pattern.is_match(trace.content()) {
                    hit = true;
                    if !kinds.contains(name) {
                        kinds.push(*name);
                    }
                }
            }
            if hit {
                evidence.push(trace.id().to_string());
            }
        }

        if evidence.is_empty() {
            return None;
        }

        Some(
            RiskDraft::for_session(
                session,
                RiskDimension::Technical,
                INSECURE_CODE,
                RiskLevel::Medium,
                format!("Insecure code patterns found: {}", kinds.join(", ")),
            )
            .evidence(evidence)
            .recommend("Discuss input validation and parameterized queries"),
        )
    }

    fn repeated_violations(
        &self,
        session: &SessionRef,
        window: &[CognitiveTrace],
    ) -> Option<RiskDraft> {
        let evidence: Vec<String> = window
            .iter()
            .filter(|t| t.is_blocked())
            .map(|t| t.id().to_string())
            .collect();
        if evidence.len() < self.thresholds.repeated_block_threshold {
            return None;
        }

        Some(
            RiskDraft::for_session(
                session,
                RiskDimension::Governance,
                REPEATED_POLICY_VIOLATIONS,
                RiskLevel::High,
                format!("{} requests blocked by governance policy", evidence.len()),
            )
            .evidence(evidence)
            .recommend("Notify the instructor to follow up with the student"),
        )
    }
}

/// Risk recorded when governance blocks a request
pub fn delegation_block_risk(
    session: &SessionRef,
    trace_id: &str,
    level: RiskLevel,
) -> Result<Risk, PipelineError> {
    Risk::new(
        RiskDraft::for_session(
            session,
            RiskDimension::Cognitive,
            COGNITIVE_DELEGATION,
            level,
            "The student asked the AI to do the work instead of building it",
        )
        .evidence(vec![trace_id.to_string()])
        .recommend("Guide the student to decompose the problem into smaller steps"),
    )
}

#[derive(Debug, Clone, Copy)]
struct JustificationRatio {
    justified: usize,
    decisions: usize,
}

impl JustificationRatio {
    fn ratio(&self) -> f64 {
        self.justified as f64 / self.decisions as f64
    }
}

fn is_design_decision(trace: &CognitiveTrace) -> bool {
    trace.interaction_type() == InteractionType::StudentPrompt
        && matches!(
            trace.cognitive_state(),
            CognitiveState::Planning | CognitiveState::Implementation
        )
}

fn justification_ratio(window: &[CognitiveTrace]) -> Option<JustificationRatio> {
    let decisions: Vec<&CognitiveTrace> =
        window.iter().filter(|t| is_design_decision(t)).collect();
    if decisions.is_empty() {
        return None;
    }
    Some(JustificationRatio {
        justified: decisions.iter().filter(|t| t.is_justified()).count(),
        decisions: decisions.len(),
    })
}
