//! Orchestrator library for benchmark experiment expansion and tracking
//!
//! Expands declarative experiments into Cartesian products of benchmark
//! jobs, tracks their completions per kind, scores pod logs, and optionally
//! auto-tunes node profiles against the reported metric.

pub mod adaptors;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod tracker;
pub mod traits;
pub mod tuning;

// Re-export commonly used types
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
pub use tracker::TrackManager;
pub use traits::{
    Collaborators, ExperimentStore, JobAdaptor, LogArchive, LogParser, MetricSink,
    NodeProfileApplier, ResourceBackend,
};
pub use tuning::{SearchSpace, TuningCoordinator};
