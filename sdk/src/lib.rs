//! Cogtrace SDK
//!
//! Shared library providing the closed domain enumerations and the error
//! taxonomy used by the pipeline engine and by any transport built on top of it.

/// Error types and handling
pub mod errors;

/// Shared domain enumerations
pub mod types;

// Re-export commonly used types
pub use errors::{PipelineError, StudentFacing};
pub use types::{
    CognitiveState, HelpLevel, InteractionType, RequestType, ResponseType, RiskDimension,
    RiskLevel, SessionMode, SessionStatus, SimulatorRole, TraceLevel,
};
