//! Common types and utilities shared across Recap crates.
//!
//! This crate defines the shared error type, result alias, and observability
//! helpers used throughout the Recap workspace. It is intentionally
//! lightweight and dependency-minimal so that all crates can depend on it
//! without introducing heavy transitive costs.
//!
//! # Overview
//!
//! - [`RecapError`] and [`Result`]: Shared error handling
//! - [`observability`]: Centralised tracing/logging initialisation

use serde::{Deserialize, Serialize};

pub mod observability;

/// Error types used across the Recap system.
#[derive(thiserror::Error, Debug)]
pub enum RecapError {
    /// A pipeline stage failed to produce its artifact.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// A transport (HTTP, LLM endpoint) reported an error.
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// Configuration was incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An LLM call failed or returned unusable output.
    #[error("LLM error: {0}")]
    Llm(String),
}

/// Convenient alias for results that use [`RecapError`].
pub type Result<T> = std::result::Result<T, RecapError>;

/// How a pipeline run decided on its analysis stage.
///
/// The heuristic path is preferred when confidence gates pass; otherwise the
/// LLM analyzer is consulted. Recorded for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisRoute {
    Heuristic,
    Llm,
}
