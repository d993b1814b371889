//! Core types shared between the orchestrator and its collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Process identifier for any component in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// The registration pass and public entry points
    Orchestrator,
    /// A per-kind completion tracker task
    Tracker,
    /// A background auto-tuning task
    Tuner,
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Orchestrator => write!(f, "orchestrator"),
            ProcessId::Tracker => write!(f, "tracker"),
            ProcessId::Tuner => write!(f, "tuner"),
        }
    }
}

/// One set of dimension assignments, keyed by dimension name.
///
/// Sorted iteration order matters: hashes and identity strings are built by
/// walking the map in key order.
pub type Combination = BTreeMap<String, String>;

/// A single axis of variation for an experiment.
///
/// `location` is a path expression into the job document. Empty `values`
/// means the dimension is free: the document keeps whatever value it already
/// has and the dimension contributes nothing to the combination product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Node-selection pseudo-dimension: which node profile each trial runs under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSelectionSpec {
    /// Path expression for where the profile value lands in the job document
    pub location: String,
    /// Profile values to iterate, e.g. "default" or "auto-tuned"
    #[serde(default)]
    pub values: Vec<String>,
    /// Node selector labels, applied as literal dotted keys under `location`
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

/// Declarative description of a benchmark experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Which job adaptor interprets the generated documents
    pub kind_key: String,
    /// Which registered parser scores the pod logs
    pub parser_key: String,
    /// Metric key reported by the parser, used for best-result bookkeeping
    #[serde(default)]
    pub metric_key: String,
    /// Base job document; dimension values are written into its `spec` subtree
    pub base: serde_json::Value,
    #[serde(default)]
    pub iterations: Vec<Dimension>,
    #[serde(default)]
    pub configurations: Vec<Dimension>,
    #[serde(default)]
    pub node_selection: Option<NodeSelectionSpec>,
    /// One in-flight job at a time when true
    #[serde(default)]
    pub sequential: bool,
    /// Lower metric values win when true
    #[serde(default)]
    pub minimize: bool,
    /// Trials per combination, at least 1
    #[serde(default)]
    pub repetition: u32,
    /// Pause between a completion and the next dispatch, in seconds
    #[serde(default)]
    pub job_interval_secs: u64,
}

/// An experiment resource: spec plus accumulated status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub namespace: String,
    pub spec: ExperimentSpec,
    #[serde(default)]
    pub status: ExperimentStatus,
}

/// Accumulated observable state of an experiment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentStatus {
    /// Append-only record of every job identity ever expanded
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    #[serde(default)]
    pub results: Vec<ResultRecord>,
    #[serde(default)]
    pub best_results: Vec<BestResult>,
    /// Build identifiers seen so far, "init" when none were ever pushed
    #[serde(default)]
    pub tracked_builds: Vec<String>,
    /// Progress string, "{completed}/{total}"
    #[serde(default)]
    pub job_completed: String,
}

/// Identity record for one expanded job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub hash: u32,
    pub build: String,
    pub repetition: u32,
    pub labels: Combination,
}

/// Results for one (build, iteration, configuration) cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub build_id: String,
    pub iteration_id: String,
    pub iteration_labels: Combination,
    pub configuration_id: String,
    pub configuration_labels: Combination,
    pub items: Vec<TrialResult>,
    /// Running average over `items`
    pub average: f64,
}

/// One scored trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub repetition: u32,
    pub job_name: String,
    pub pod_name: String,
    pub metric_value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Best value seen for a (build, iteration, metric) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestResult {
    pub build_id: String,
    pub iteration_id: String,
    pub metric_key: String,
    pub configuration_labels: Combination,
    pub value: f64,
}

/// A finished pod as reported by a job adaptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRef {
    pub name: String,
    pub host_ip: String,
}

/// Output of a log parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLog {
    pub metric_key: String,
    pub metric_value: f64,
    /// Full key/value map extracted from the log, for metric push
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub message: String,
}
