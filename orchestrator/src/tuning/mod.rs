//! Node-profile auto-tuning: the parameter search space, the coordinator
//! that rendezvous samples with benchmark scores, and profile rendering

pub mod coordinator;
pub mod params;
pub mod profile;

pub use coordinator::TuningCoordinator;
pub use params::{Param, SearchSpace, TuneType, TunedProfile};
