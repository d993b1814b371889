//! Collaborator contracts with mockall annotations for testing
//!
//! The orchestrator never talks to a cluster, an object store, or a metric
//! gateway directly. Everything external comes in through these traits so
//! the whole pipeline can run against in-memory fakes.

use crate::error::OrchestratorResult;
use serde_json::Value;
use shared::types::{Experiment, ExperimentStatus, ParsedLog, PodRef};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// A snapshot pair from a job watch stream: the previous revision (None on
/// first sight) and the current one
pub type JobEvent = (Option<Value>, Value);

/// Cluster resource backend for job documents
///
/// Jobs are opaque JSON documents; the backend owns their lifecycle and
/// surfaces change notifications as a channel of before/after snapshots.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Create a job document of the given kind
    async fn create_job(&self, kind: &str, namespace: &str, job: &Value) -> OrchestratorResult<()>;

    /// Fetch a job document by name, None when absent
    async fn get_job(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> OrchestratorResult<Option<Value>>;

    /// List job documents of the given kind in a namespace
    async fn list_jobs(&self, kind: &str, namespace: &str) -> OrchestratorResult<Vec<Value>>;

    /// Delete a job document by name; deleting an absent job is not an error
    async fn delete_job(&self, kind: &str, namespace: &str, name: &str) -> OrchestratorResult<()>;

    /// Open a watch stream over all jobs of the given kind
    async fn watch_jobs(&self, kind: &str) -> OrchestratorResult<mpsc::Receiver<JobEvent>>;

    /// Fetch the log of a finished pod
    async fn pod_log(&self, namespace: &str, pod: &str) -> OrchestratorResult<Vec<u8>>;

    /// Delete a pod left behind by a finished job
    async fn delete_pod(&self, namespace: &str, pod: &str) -> OrchestratorResult<()>;
}

/// Kind-specific interpretation of job documents
///
/// Implementations are pure readers: completion and pod listing are derived
/// from the document's status subtree alone.
#[mockall::automock]
pub trait JobAdaptor: Send + Sync {
    /// Whether the job document reports successful completion
    fn check_complete(&self, job: &Value) -> bool;

    /// Finished pods of a completed job, first pod is the scored one
    fn list_finished_pods(&self, job: &Value) -> Vec<PodRef>;

    /// Copy of the document suitable for re-creation: metadata name,
    /// namespace, and labels survive, status and server bookkeeping do not
    fn copy_for_recreate(&self, job: &Value) -> Value;
}

/// Raw log archive, keyed by `{experiment}/{cluster}/{job}/{pod}.log`
#[mockall::automock]
#[async_trait::async_trait]
pub trait LogArchive: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> OrchestratorResult<()>;

    async fn get(&self, key: &str) -> OrchestratorResult<Vec<u8>>;
}

/// Named log parsers that turn raw pod output into a scored metric
#[mockall::automock]
pub trait LogParser: Send + Sync {
    /// Parse with the parser registered under `parser_key`
    fn parse(&self, parser_key: &str, bytes: &[u8]) -> OrchestratorResult<ParsedLog>;
}

/// Push gateway for parsed metric values
#[mockall::automock]
#[async_trait::async_trait]
pub trait MetricSink: Send + Sync {
    async fn push(
        &self,
        metric_key: &str,
        value: f64,
        labels: &BTreeMap<String, String>,
    ) -> OrchestratorResult<()>;
}

/// Node profile management for tuned trials
#[mockall::automock]
#[async_trait::async_trait]
pub trait NodeProfileApplier: Send + Sync {
    /// Label the selected nodes with the profile they should run
    async fn apply_label(
        &self,
        selector: &BTreeMap<String, String>,
        profile: &str,
    ) -> OrchestratorResult<()>;

    /// Remove the profile label from the selected nodes
    async fn remove_label(&self, selector: &BTreeMap<String, String>) -> OrchestratorResult<()>;

    /// Create or replace the auto-tuned profile definition from its
    /// rendered INI form
    async fn create_profile(&self, data: &str) -> OrchestratorResult<()>;

    /// Delete the auto-tuned profile definition
    async fn delete_profile(&self) -> OrchestratorResult<()>;
}

/// Durable store for experiment definitions and their status
#[mockall::automock]
#[async_trait::async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Fetch the current revision of an experiment
    async fn get(&self, name: &str) -> OrchestratorResult<Experiment>;

    /// Persist an experiment's status
    async fn update_status(
        &self,
        name: &str,
        status: &ExperimentStatus,
    ) -> OrchestratorResult<()>;
}

/// The full collaborator bundle handed to the orchestrator at startup
#[derive(Clone)]
pub struct Collaborators {
    pub store: std::sync::Arc<dyn ExperimentStore>,
    pub backend: std::sync::Arc<dyn ResourceBackend>,
    pub archive: std::sync::Arc<dyn LogArchive>,
    pub parser: std::sync::Arc<dyn LogParser>,
    pub metrics: std::sync::Arc<dyn MetricSink>,
    pub tuned: std::sync::Arc<dyn NodeProfileApplier>,
    /// Cluster identifier folded into archive keys
    pub cluster_id: String,
}
