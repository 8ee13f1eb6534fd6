//! Prompt classification
//!
//! Deterministic, pattern-based classification of a student prompt into a
//! cognitive state, a request type, a delegation level and a response strategy.
//! Pattern sets cover Spanish and English vocabulary and are compiled once in
//! [`PromptClassifier::new`].
//!
//! Classification is a pure function of `(prompt, context)`: no I/O, no shared
//! state, and it never fails. Empty or unrecognisable prompts resolve to a
//! low-delegation exploratory classification.
//!
//! # Example
//!
//! ```
//! use cogtrace_engine::classifier::PromptClassifier;
//! use sdk::types::RequestType;
//!
//! let classifier = PromptClassifier::new().unwrap();
//! let result = classifier.classify("dame el código completo", None);
//!
//! assert_eq!(result.request_type, RequestType::CompleteSolution);
//! assert!(result.delegation_level > 0.8);
//! ```

use regex::Regex;
use sdk::types::{CognitiveState, HelpLevel, RequestType, ResponseType};
use serde::{Deserialize, Serialize};

/// Delegation estimate for prompts asking the AI to do the whole task
const TOTAL_DELEGATION: f64 = 0.92;

/// Delegation estimate for prompts asking for a concrete piece of work
const PARTIAL_DELEGATION: f64 = 0.55;

const HINT_DELEGATION: f64 = 0.3;
const DEBUGGING_DELEGATION: f64 = 0.35;
const REVIEW_DELEGATION: f64 = 0.2;
const CONCEPTUAL_DELEGATION: f64 = 0.15;
const BASELINE_DELEGATION: f64 = 0.1;

/// Delegation at or above which the student is asked to justify the request
pub const JUSTIFICATION_DELEGATION: f64 = 0.5;

/// Response strategy suggested to the agent layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub response_type: ResponseType,
    pub help_level: HelpLevel,
    pub requires_justification: bool,
}

/// Secondary signals extracted alongside the main classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    /// Prompt suggests submitting AI work as the student's own
    pub integrity_concern: bool,

    /// Names of the pattern groups that matched, for audit metadata
    pub matched: Vec<String>,
}

/// Output of [`PromptClassifier::classify`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub cognitive_state: CognitiveState,
    pub request_type: RequestType,
    /// 0.0 = student does the work, 1.0 = asks the AI to do it all
    pub delegation_level: f64,
    pub strategy: Strategy,
    pub signals: Signals,
}

impl Classification {
    /// Safe default for empty or unclassifiable prompts
    pub fn exploratory() -> Self {
        Self {
            cognitive_state: CognitiveState::Exploration,
            request_type: RequestType::Exploratory,
            delegation_level: BASELINE_DELEGATION,
            strategy: Strategy {
                response_type: ResponseType::Socratic,
                help_level: HelpLevel::Low,
                requires_justification: false,
            },
            signals: Signals::default(),
        }
    }
}

/// A named group of case-insensitive patterns
struct PatternGroup {
    name: &'static str,
    patterns: Vec<Regex>,
}

impl PatternGroup {
    fn new(name: &'static str, sources: &[&str]) -> anyhow::Result<Self> {
        let patterns = sources
            .iter()
            .map(|s| Regex::new(&format!("(?i){}", s)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, patterns })
    }

    fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// Deterministic prompt classifier
pub struct PromptClassifier {
    total_delegation: PatternGroup,
    partial_delegation: PatternGroup,
    hint: PatternGroup,
    conceptual: PatternGroup,
    review: PatternGroup,
    debugging: PatternGroup,
    frustration: PatternGroup,
    planning: PatternGroup,
    implementation: PatternGroup,
    validation: PatternGroup,
    reflection: PatternGroup,
    integrity: PatternGroup,
}

impl PromptClassifier {
    /// Create a classifier with the built-in vocabulary
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile (never happens with the
    /// hardcoded sets).
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            total_delegation: PatternGroup::new(
                "total_delegation",
                &[
                    r"dame (el|todo el) c[oó]digo",
                    r"c[oó]digo completo",
                    r"soluci[oó]n completa",
                    r"dame la (soluci[oó]n|respuesta)",
                    r"hazlo (t[uú]|por m[ií])",
                    r"resu[eé]lv[e]?lo",
                    r"haz (el|mi) (tp|trabajo|ejercicio|tarea)",
                    r"(write|give me|send me) (the|all the) (full|complete|entire) (code|solution|program)",
                    r"\b(full|complete|entire) (code|solution|implementation)\b",
                    r"\bdo it for me\b",
                    r"\bsolve (it|this) for me\b",
                    r"\bjust give me the (answer|code|solution)\b",
                    r"\bdo my (homework|assignment)\b",
                ],
            )?,
            partial_delegation: PatternGroup::new(
                "partial_delegation",
                &[
                    r"\b(escrib[ei]|implementa|gener[ae]|program[ae])\b.*\b(funci[oó]n|clase|m[eé]todo|c[oó]digo)\b",
                    r"ejemplo de c[oó]digo",
                    r"\b(write|implement|generate|code)\b.*\b(function|class|method|code|script)\b",
                    r"\bcode example\b",
                    r"\bshow me (the|some|an?) (code|implementation)\b",
                ],
            )?,
            hint: PatternGroup::new(
                "hint",
                &[
                    r"\bpista\b",
                    r"\bayuda\b",
                    r"\bgu[ií]a(me)?\b",
                    r"\bpor d[oó]nde (empiezo|sigo)\b",
                    r"\bhint\b",
                    r"\bhelp\b",
                    r"\bguide me\b",
                    r"\bnudge\b",
                    r"\bwhere (do i|should i) (start|begin)\b",
                ],
            )?,
            conceptual: PatternGroup::new(
                "conceptual",
                &[
                    r"\bqu[eé] es\b",
                    r"\bpor qu[eé]\b",
                    r"\bexpl[ií]ca(me)?\b",
                    r"\bdiferencia entre\b",
                    r"\bpara qu[eé] sirve\b",
                    r"\bwhat (is|are|does)\b",
                    r"\bwhy\b",
                    r"\bexplain\b",
                    r"\bdifference between\b",
                ],
            )?,
            review: PatternGroup::new(
                "review",
                &[
                    r"\brevis[ae]\b",
                    r"\best[aá] bien\b",
                    r"\bes correcto\b",
                    r"\bfeedback\b",
                    r"\breview\b",
                    r"\bis (this|it|my \w+) (right|correct|ok)\b",
                ],
            )?,
            debugging: PatternGroup::new(
                "debugging",
                &[
                    r"\berror\b",
                    r"\bbug\b",
                    r"\bfalla\b",
                    r"\bno funciona\b",
                    r"\bexcepci[oó]n\b",
                    r"\bexception\b",
                    r"\btraceback\b",
                    r"\bstack ?trace\b",
                    r"\bcrash(es|ed)?\b",
                    r"\b(doesn'?t|does not|won'?t) (work|compile|run)\b",
                    r"\bsegfault\b",
                    r"\bpanic(ked)?\b",
                ],
            )?,
            frustration: PatternGroup::new(
                "frustration",
                &[
                    r"\bno entiendo nada\b",
                    r"\bllevo (horas|d[ií]as)\b",
                    r"\bestoy trabad[oa]\b",
                    r"\bfor hours\b",
                    r"\bcompletely stuck\b",
                    r"\bi give up\b",
                ],
            )?,
            planning: PatternGroup::new(
                "planning",
                &[
                    r"\bc[oó]mo (empiezo|organizo|planteo)\b",
                    r"\bplan(ificar|ear)?\b",
                    r"\bdise[ñn]o\b",
                    r"\barquitectura\b",
                    r"\benfoque\b",
                    r"\bhow (should|do) i (approach|structure|design|start)\b",
                    r"\bdesign\b",
                    r"\barchitecture\b",
                    r"\bapproach\b",
                ],
            )?,
            implementation: PatternGroup::new(
                "implementation",
                &[
                    r"\bimplement(ar|o|ando)?\b",
                    r"\bc[oó]digo\b",
                    r"\bfunci[oó]n\b",
                    r"\bclase\b",
                    r"\bbucle\b",
                    r"\bimplement(ing|ation)?\b",
                    r"\bcode\b",
                    r"\bfunction\b",
                    r"\bloop\b",
                    r"\bclass\b",
                ],
            )?,
            validation: PatternGroup::new(
                "validation",
                &[
                    r"\btest(s|ear|ing)?\b",
                    r"\bprueba(s)?\b",
                    r"\bverific(ar|o)\b",
                    r"\bvalid(ar|ate|o)\b",
                    r"\bcomprobar\b",
                    r"\bcheck (if|whether|that)\b",
                    r"\bedge cases?\b",
                    r"\bcasos? borde\b",
                ],
            )?,
            reflection: PatternGroup::new(
                "reflection",
                &[
                    r"\bcreo que\b",
                    r"\bme parece que\b",
                    r"\baprend[ií]\b",
                    r"\breflexi[oó]n\b",
                    r"\bi think\b",
                    r"\bi learned\b",
                    r"\bi realized\b",
                    r"\bin hindsight\b",
                    r"\bmy reasoning\b",
                    r"\bmi razonamiento\b",
                ],
            )?,
            integrity: PatternGroup::new(
                "integrity",
                &[
                    r"\bpara entregar\b",
                    r"\bcomo (si fuera )?m[ií]o\b",
                    r"\bplagi(o|ar)\b",
                    r"\bsin que se note\b",
                    r"\bsubmit (it )?as my own\b",
                    r"\bso (it|nobody) (looks|can tell)\b",
                    r"\bplagiari[sz]e\b",
                    r"\bfor my (exam|graded assignment)\b",
                ],
            )?,
        })
    }

    /// Classify a prompt
    ///
    /// `context` may carry `"cognitive_state"` (a state name) to override the
    /// inferred state, e.g. when the front end knows the student is debugging.
    pub fn classify(&self, prompt: &str, context: Option<&serde_json::Value>) -> Classification {
        let text = prompt.trim();
        if text.is_empty() {
            tracing::debug!("Empty prompt, using exploratory classification");
            return Classification::exploratory();
        }

        let mut matched = Vec::new();
        let mut hit = |group: &PatternGroup| {
            let is_match = group.is_match(text);
            if is_match {
                matched.push(group.name.to_string());
            }
            is_match
        };

        let total = hit(&self.total_delegation);
        let partial = hit(&self.partial_delegation);
        let hint = hit(&self.hint);
        let conceptual = hit(&self.conceptual);
        let review = hit(&self.review);
        let debugging = hit(&self.debugging);
        let frustration = hit(&self.frustration);
        let planning = hit(&self.planning);
        let implementation = hit(&self.implementation);
        let validation = hit(&self.validation);
        let reflection = hit(&self.reflection);
        let integrity = hit(&self.integrity);

        let (request_type, delegation_level) = if total {
            (RequestType::CompleteSolution, TOTAL_DELEGATION)
        } else if partial {
            (RequestType::Procedural, PARTIAL_DELEGATION)
        } else if debugging {
            (RequestType::Debugging, DEBUGGING_DELEGATION)
        } else if hint {
            (RequestType::HintRequest, HINT_DELEGATION)
        } else if review {
            (RequestType::Review, REVIEW_DELEGATION)
        } else if conceptual {
            (RequestType::Conceptual, CONCEPTUAL_DELEGATION)
        } else {
            (RequestType::Exploratory, BASELINE_DELEGATION)
        };

        // Integrity concerns push delegation up: the intent is to hand work over.
        let delegation_level = if integrity {
            (delegation_level + 0.1).min(1.0)
        } else {
            delegation_level
        };

        let inferred_state = if debugging {
            CognitiveState::Debugging
        } else if reflection {
            CognitiveState::Reflection
        } else if validation || review {
            CognitiveState::Validation
        } else if planning {
            CognitiveState::Planning
        } else if implementation || partial || total {
            CognitiveState::Implementation
        } else {
            CognitiveState::Exploration
        };

        let cognitive_state = context
            .and_then(|c| c.get("cognitive_state"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<CognitiveState>().ok())
            .unwrap_or(inferred_state);

        let response_type = match request_type {
            RequestType::CompleteSolution | RequestType::Debugging => ResponseType::Socratic,
            RequestType::Conceptual => ResponseType::Explicative,
            RequestType::HintRequest | RequestType::Procedural => ResponseType::Guided,
            RequestType::Review => ResponseType::Metacognitive,
            RequestType::Exploratory if reflection => ResponseType::Metacognitive,
            RequestType::Exploratory => ResponseType::Socratic,
        };

        let help_level = match request_type {
            RequestType::CompleteSolution => HelpLevel::Minimal,
            RequestType::Debugging if frustration => HelpLevel::High,
            RequestType::HintRequest if frustration => HelpLevel::High,
            RequestType::HintRequest | RequestType::Debugging => HelpLevel::Medium,
            RequestType::Procedural => HelpLevel::Medium,
            RequestType::Conceptual | RequestType::Review | RequestType::Exploratory => {
                HelpLevel::Low
            }
        };

        tracing::debug!(
            "Classified prompt: request={}, state={}, delegation={:.2}, matched={:?}",
            request_type,
            cognitive_state,
            delegation_level,
            matched
        );

        Classification {
            cognitive_state,
            request_type,
            delegation_level,
            strategy: Strategy {
                response_type,
                help_level,
                requires_justification: delegation_level >= JUSTIFICATION_DELEGATION,
            },
            signals: Signals {
                integrity_concern: integrity,
                matched,
            },
        }
    }
}
