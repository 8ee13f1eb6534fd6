//! Governance policy resolution
//!
//! An institution sets a baseline policy; each activity may add overrides.
//! Both are merged into one immutable [`EffectivePolicy`] by a single pure
//! function, [`EffectivePolicy::merge`], with one precedence rule:
//! **most restrictive wins**. An activity can tighten any institutional
//! constraint but can never loosen one.
//!
//! | Field | Merge |
//! |---|---|
//! | `block_complete_solutions` | OR |
//! | `require_justification` | OR |
//! | `total_delegation_threshold` | min |
//! | `max_ai_dependency` | min |
//! | `max_help_level` | min |
//! | `min_justification_ratio` | max |
//! | `allowed_modes` | intersection |

use async_trait::async_trait;
use sdk::errors::PipelineError;
use sdk::types::{HelpLevel, SessionMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::PolicyConfig;

/// Institution-wide baseline policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionalPolicy {
    /// Refuse to produce complete solutions for total-delegation prompts
    #[serde(default = "default_true")]
    pub block_complete_solutions: bool,

    /// Delegation level above which a prompt counts as total delegation
    #[serde(default = "default_total_delegation_threshold")]
    pub total_delegation_threshold: f64,

    /// Session mean ai_involvement above which delegating prompts are blocked
    #[serde(default = "default_max_ai_dependency")]
    pub max_ai_dependency: f64,

    /// Most help a guided tutor may give
    #[serde(default = "default_max_help_level")]
    pub max_help_level: HelpLevel,

    /// Ask students to justify delegating prompts
    #[serde(default = "default_true")]
    pub require_justification: bool,

    /// Justified/total design decisions below which a risk is raised
    #[serde(default = "default_min_justification_ratio")]
    pub min_justification_ratio: f64,

    /// Session modes allowed at all
    #[serde(default = "default_allowed_modes")]
    pub allowed_modes: Vec<SessionMode>,
}

fn default_true() -> bool {
    true
}

fn default_total_delegation_threshold() -> f64 {
    0.8
}

fn default_max_ai_dependency() -> f64 {
    0.85
}

fn default_max_help_level() -> HelpLevel {
    HelpLevel::High
}

fn default_min_justification_ratio() -> f64 {
    0.6
}

fn default_allowed_modes() -> Vec<SessionMode> {
    SessionMode::ALL.to_vec()
}

impl Default for InstitutionalPolicy {
    fn default() -> Self {
        Self {
            block_complete_solutions: true,
            total_delegation_threshold: default_total_delegation_threshold(),
            max_ai_dependency: default_max_ai_dependency(),
            max_help_level: default_max_help_level(),
            require_justification: true,
            min_justification_ratio: default_min_justification_ratio(),
            allowed_modes: default_allowed_modes(),
        }
    }
}

impl InstitutionalPolicy {
    /// Check ranges of the numeric thresholds
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_unit("total_delegation_threshold", self.total_delegation_threshold)?;
        check_unit("max_ai_dependency", self.max_ai_dependency)?;
        check_unit("min_justification_ratio", self.min_justification_ratio)?;
        if self.allowed_modes.is_empty() {
            return Err(PipelineError::Config(
                "allowed_modes must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Activity-level overrides; unset fields inherit the institutional value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActivityPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_complete_solutions: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_delegation_threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ai_dependency: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_help_level: Option<HelpLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_justification: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_justification_ratio: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_modes: Option<Vec<SessionMode>>,
}

impl ActivityPolicy {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Some(v) = self.total_delegation_threshold {
            check_unit("total_delegation_threshold", v)?;
        }
        if let Some(v) = self.max_ai_dependency {
            check_unit("max_ai_dependency", v)?;
        }
        if let Some(v) = self.min_justification_ratio {
            check_unit("min_justification_ratio", v)?;
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), PipelineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "{} must be between 0.0 and 1.0",
            name
        )))
    }
}

/// Immutable result of merging institutional and activity policy
///
/// Fields are private; the only way to obtain one is [`EffectivePolicy::merge`]
/// (or `Default`, which equals the default institutional policy).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivePolicy {
    block_complete_solutions: bool,
    total_delegation_threshold: f64,
    max_ai_dependency: f64,
    max_help_level: HelpLevel,
    require_justification: bool,
    min_justification_ratio: f64,
    allowed_modes: Vec<SessionMode>,
}

impl EffectivePolicy {
    /// Merge with most-restrictive-wins precedence
    pub fn merge(institution: &InstitutionalPolicy, activity: &ActivityPolicy) -> Self {
        let allowed_modes = match &activity.allowed_modes {
            Some(modes) => institution
                .allowed_modes
                .iter()
                .copied()
                .filter(|m| modes.contains(m))
                .collect(),
            None => institution.allowed_modes.clone(),
        };

        Self {
            block_complete_solutions: institution.block_complete_solutions
                || activity.block_complete_solutions.unwrap_or(false),
            total_delegation_threshold: activity
                .total_delegation_threshold
                .map_or(institution.total_delegation_threshold, |v| {
                    v.min(institution.total_delegation_threshold)
                }),
            max_ai_dependency: activity
                .max_ai_dependency
                .map_or(institution.max_ai_dependency, |v| {
                    v.min(institution.max_ai_dependency)
                }),
            max_help_level: activity
                .max_help_level
                .map_or(institution.max_help_level, |v| {
                    v.min(institution.max_help_level)
                }),
            require_justification: institution.require_justification
                || activity.require_justification.unwrap_or(false),
            min_justification_ratio: activity
                .min_justification_ratio
                .map_or(institution.min_justification_ratio, |v| {
                    v.max(institution.min_justification_ratio)
                }),
            allowed_modes,
        }
    }

    pub fn block_complete_solutions(&self) -> bool {
        self.block_complete_solutions
    }

    pub fn total_delegation_threshold(&self) -> f64 {
        self.total_delegation_threshold
    }

    pub fn max_ai_dependency(&self) -> f64 {
        self.max_ai_dependency
    }

    pub fn max_help_level(&self) -> HelpLevel {
        self.max_help_level
    }

    pub fn require_justification(&self) -> bool {
        self.require_justification
    }

    pub fn min_justification_ratio(&self) -> f64 {
        self.min_justification_ratio
    }

    pub fn allowed_modes(&self) -> &[SessionMode] {
        &self.allowed_modes
    }

    pub fn allows_mode(&self, mode: SessionMode) -> bool {
        self.allowed_modes.contains(&mode)
    }
}

impl Default for EffectivePolicy {
    fn default() -> Self {
        Self::merge(&InstitutionalPolicy::default(), &ActivityPolicy::default())
    }
}

/// Source of effective policies, consumed read-only by the pipeline
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn effective_policy(&self, activity_id: &str) -> Result<EffectivePolicy, PipelineError>;
}

/// Policy store backed by the `[policy]` configuration section
///
/// Policies are merged once at construction; unknown activities receive the
/// institutional baseline.
pub struct StaticPolicyStore {
    baseline: EffectivePolicy,
    activities: BTreeMap<String, EffectivePolicy>,
}

impl StaticPolicyStore {
    pub fn new(config: &PolicyConfig) -> Self {
        let activities = config
            .activities
            .iter()
            .map(|(id, overrides)| {
                (
                    id.clone(),
                    EffectivePolicy::merge(&config.institution, overrides),
                )
            })
            .collect();

        Self {
            baseline: EffectivePolicy::merge(&config.institution, &ActivityPolicy::default()),
            activities,
        }
    }

    pub fn into_shared(self) -> Arc<dyn PolicyStore> {
        Arc::new(self)
    }
}

#[async_trait]
impl PolicyStore for StaticPolicyStore {
    async fn effective_policy(&self, activity_id: &str) -> Result<EffectivePolicy, PipelineError> {
        Ok(self
            .activities
            .get(activity_id)
            .cloned()
            .unwrap_or_else(|| self.baseline.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_cannot_loosen_blocking() {
        let institution = InstitutionalPolicy::default();
        let activity = ActivityPolicy {
            block_complete_solutions: Some(false),
            total_delegation_threshold: Some(0.95),
            ..Default::default()
        };

        let effective = EffectivePolicy::merge(&institution, &activity);
        assert!(effective.block_complete_solutions());
        assert_eq!(effective.total_delegation_threshold(), 0.8);
    }

    #[test]
    fn test_activity_can_tighten() {
        let institution = InstitutionalPolicy {
            block_complete_solutions: false,
            require_justification: false,
            ..Default::default()
        };
        let activity = ActivityPolicy {
            block_complete_solutions: Some(true),
            require_justification: Some(true),
            max_help_level: Some(HelpLevel::Low),
            min_justification_ratio: Some(0.9),
            ..Default::default()
        };

        let effective = EffectivePolicy::merge(&institution, &activity);
        assert!(effective.block_complete_solutions());
        assert!(effective.require_justification());
        assert_eq!(effective.max_help_level(), HelpLevel::Low);
        assert_eq!(effective.min_justification_ratio(), 0.9);
    }

    #[test]
    fn test_allowed_modes_intersect() {
        let institution = InstitutionalPolicy {
            allowed_modes: vec![SessionMode::Tutor, SessionMode::Evaluator],
            ..Default::default()
        };
        let activity = ActivityPolicy {
            allowed_modes: Some(vec![SessionMode::Tutor, SessionMode::Simulator]),
            ..Default::default()
        };

        let effective = EffectivePolicy::merge(&institution, &activity);
        assert_eq!(effective.allowed_modes(), &[SessionMode::Tutor]);
        assert!(!effective.allows_mode(SessionMode::Simulator));
    }

    #[tokio::test]
    async fn test_static_store_falls_back_to_baseline() {
        let mut config = PolicyConfig::default();
        config.activities.insert(
            "tp1".to_string(),
            ActivityPolicy {
                max_help_level: Some(HelpLevel::Medium),
                ..Default::default()
            },
        );
        let store = StaticPolicyStore::new(&config);

        let tp1 = store.effective_policy("tp1").await.unwrap();
        assert_eq!(tp1.max_help_level(), HelpLevel::Medium);

        let other = store.effective_policy("unknown").await.unwrap();
        assert_eq!(other.max_help_level(), HelpLevel::High);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let policy = ActivityPolicy {
            max_ai_dependency: Some(1.5),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
