//! Cogtrace Engine Library
//!
//! Cognitive interaction pipeline for AI-assisted programming tutoring. A
//! student prompt is classified, checked against institutional governance,
//! answered by a pedagogical agent through a resilient model invoker, and
//! recorded as cognitive traces from which learning risks are derived.
//!
//! The entry point is [`pipeline::PipelineOrchestrator`].

/// Configuration management module
pub mod config;

/// Institutional and activity policies
pub mod policy;

/// Prompt classification
pub mod classifier;

/// Governance gate
pub mod governance;

/// Agent routing and pedagogical behaviors
pub mod agents;

/// Response cache
pub mod cache;

/// LLM provider abstraction and resilient invoker
pub mod llm;

/// Cognitive traces
pub mod trace;

/// Risk detection
pub mod risk;

/// Database persistence module
pub mod db;

/// Rate limiting module
pub mod rate_limiter;

/// Pipeline orchestration
pub mod pipeline;

/// Telemetry and observability module
pub mod telemetry;
