//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Cogtrace
//! pipeline. All errors implement the `StudentFacing` trait, which supplies a
//! message that is safe to show a student and says whether the caller may
//! retry.
//!
//! # Security
//!
//! Student hints never contain:
//! - Raw provider responses or provider error text
//! - Storage/driver error text or stack traces
//! - Internal identifiers beyond what the caller already sent
//!
//! A governance block is **not** an error. It is a regular pipeline outcome
//! with pedagogical content, so there is no variant for it here.

use thiserror::Error;

/// Trait for student-facing error extensions
///
/// The pipeline surfaces only a small set of failures to its caller. Whatever
/// the caller shows to a student must come from `student_hint`, never from the
/// `Display` text, which may carry internal detail for the logs.
pub trait StudentFacing {
    /// Returns a message that is safe to display to a student
    fn student_hint(&self) -> &str;

    /// Returns whether the caller can retry the same request later
    fn is_recoverable(&self) -> bool;
}

/// Main pipeline error type
///
/// # Error Categories
///
/// - **Validation**: malformed input, rejected before classification
/// - **Persistence**: session/trace/risk storage failures (surfaced to caller)
/// - **Provider**: transient failures are retried internally; an unavailable
///   provider is answered with fallback content and only appears here inside
///   the invoker
/// - **Config**: invalid or unsafe configuration (fail-fast at startup)
/// - **Rate limiting**: ingress quota exceeded for an identity
///
/// # Examples
///
/// ```
/// use sdk::errors::{PipelineError, StudentFacing};
///
/// let error = PipelineError::Persistence("database is locked".to_string());
/// assert!(!error.student_hint().contains("locked"));
/// assert!(error.is_recoverable());
///
/// let fatal = PipelineError::Config("cache salt missing".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transient provider error: {0}")]
    ProviderTransient(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limit exceeded for {identity}: {limit} interactions per {window_secs}s")]
    RateLimited {
        identity: String,
        limit: i64,
        window_secs: u64,
    },
}

impl PipelineError {
    /// Shorthand for wrapping any displayable storage failure
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl StudentFacing for PipelineError {
    fn student_hint(&self) -> &str {
        match self {
            Self::Validation(_) => "Your request could not be processed. Check it and try again",
            Self::Persistence(_) => {
                "We could not save your progress right now. Please try again in a moment"
            }
            Self::ProviderTransient(_) | Self::ProviderUnavailable(_) => {
                "The tutor is temporarily unavailable. Keep working on your reasoning and try again shortly"
            }
            Self::Config(_) => "The tutoring service is not configured correctly",
            Self::RateLimited { .. } => {
                "You are sending requests very quickly. Take a moment to think before asking again"
            }
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
