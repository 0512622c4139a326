//! Error taxonomy for the query pipeline.
//!
//! Every component returns a typed error. The web layer is the only place that
//! turns a [`PipelineError`] into a status code.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    RateLimited,
    GenerationError,
    UnsafeQuery,
    ExecutionError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::GenerationError => "GENERATION_ERROR",
            ErrorKind::UnsafeQuery => "UNSAFE_QUERY",
            ErrorKind::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Client supplied a prompt or paging parameters we refuse to process
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Client exceeded its request budget for the current window
    #[error("Rate limit exceeded for client {0}")]
    RateLimited(String),

    /// Upstream language model failed, timed out or returned nothing usable
    #[error("SQL generation failed: {0}")]
    GenerationError(String),

    /// Generated SQL was rejected by the safety validator
    #[error("Generated query rejected: {0}")]
    UnsafeQuery(String),

    /// Database failed while running a validated query
    #[error("Query execution failed: {0}")]
    ExecutionError(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::RateLimited(_) => ErrorKind::RateLimited,
            PipelineError::GenerationError(_) => ErrorKind::GenerationError,
            PipelineError::UnsafeQuery(_) => ErrorKind::UnsafeQuery,
            PipelineError::ExecutionError(_) => ErrorKind::ExecutionError,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
