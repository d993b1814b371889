//! Core experiment expansion logic: path expressions, job identity,
//! and result bookkeeping

pub mod identity;
pub mod iteration;
pub mod results;

/// Label carrying the owning experiment name on every generated job
pub const EXPERIMENT_LABEL: &str = "bench-experiment";

/// Label carrying the job identity hash
pub const JOBHASH_KEY: &str = "bench-jobhash";

/// Delimiter between experiment name and identity hash in job names
pub const HASH_DELIMIT: &str = "-jh-";

/// Pseudo-dimension name for node-profile selection
pub const NODESELECT_DIM_NAME: &str = "profile";

/// Node-profile value meaning "leave the node untouched"
pub const NODESELECT_DEFAULT: &str = "default";

/// Reserved node-profile value that engages the tuning coordinator
pub const AUTOTUNED_PROFILE_NAME: &str = "auto-tuned";

/// Build identifier used when no build was ever pushed
pub const INIT_BUILD_NAME: &str = "init";

/// Label keys for the non-dimension identity components
pub const BUILD_KEY: &str = "build";
pub const REPETITION_KEY: &str = "repno";

/// Kubernetes-style label values cap out at 63 chars; we keep a margin
pub const MAX_LABEL_LEN: usize = 60;
