//! Orchestrator-specific error types

use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Backend operation failed: {operation}: {message}")]
    BackendError { operation: String, message: String },

    #[error("No adaptor registered for kind: {kind}")]
    UnknownAdaptor { kind: String },

    #[error("Unknown tune type: {name}")]
    UnknownTuneType { name: String },

    #[error("Log parse failed for {job}: {message}")]
    ParseError { job: String, message: String },

    #[error("Log archive operation failed: {key}: {message}")]
    ArchiveError { key: String, message: String },

    #[error("Tuning finalized, no further samples for {experiment}")]
    TuningExhausted { experiment: String },

    #[error("Tracker for kind {kind} is not running")]
    TrackerGone { kind: String },

    #[error("Shared component error")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
