//! Shared types for the experiment orchestration system
//!
//! Contains the experiment data model and logging helpers used by the
//! orchestrator and by embedders that implement its collaborator traits.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
