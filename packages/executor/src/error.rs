// ABOUTME: Error types for task execution
// ABOUTME: Covers engine failures, readiness timeouts, wire protocol and admission errors

use thiserror::Error;

/// Main error type for executor operations
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Docker engine errors, propagated verbatim and never retried here
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Readiness marker not observed within the retry bound
    #[error("container failed to start in time")]
    StartTimeout,

    /// Readiness marker absent on one log check; retried by the poll loop
    #[error("container init entry not found")]
    ReadyMarkerNotFound,

    /// Task server request failed at the transport level
    #[error("task server transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Task server response body could not be read
    #[error("failed to decode task response")]
    DecodeResponse,

    /// Configuration invariant violation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation requires a task that finished init
    #[error("task is not initialized")]
    NotInitialized,

    /// Admission failure: not enough free capacity for the requested limits
    #[error("insufficient {resource} to admit task")]
    ResourcesExhausted { resource: &'static str },

    /// No live task is tracked under the given id
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Execute exceeded the executor-level deadline
    #[error("task execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

/// Type alias for Results that return ExecutorError
pub type Result<T> = std::result::Result<T, ExecutorError>;
