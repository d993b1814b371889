//! In-memory collaborator fakes and test helpers
//!
//! The fakes implement the full collaborator contracts against plain maps
//! so the whole registration/tracking/tuning pipeline can run end to end
//! inside a test.

use async_trait::async_trait;
use orchestrator::error::{OrchestratorError, OrchestratorResult};
use orchestrator::traits::{
    Collaborators, ExperimentStore, JobEvent, LogArchive, LogParser, MetricSink,
    NodeProfileApplier, ResourceBackend,
};
use serde_json::{Value, json};
use shared::types::{Experiment, ExperimentStatus, ParsedLog};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn backend_error(operation: &str, message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::BackendError {
        operation: operation.to_string(),
        message: message.into(),
    }
}

#[derive(Default)]
struct BackendState {
    jobs: HashMap<String, Value>,
    logs: HashMap<String, Vec<u8>>,
    watchers: Vec<mpsc::Sender<JobEvent>>,
    create_count: usize,
    completion_count: usize,
    deleted_pods: Vec<String>,
}

/// In-memory resource backend with a controllable watch stream
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }

    pub fn create_count(&self) -> usize {
        self.lock().create_count
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.lock().deleted_pods.clone()
    }

    /// Names of jobs that have not been driven to completion yet
    pub fn incomplete_jobs(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state
            .jobs
            .iter()
            .filter(|(_, job)| job.pointer("/status/conditions").is_none())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Drive a job to completion with one succeeded pod whose log holds
    /// `score`, and emit the before/after snapshot pair on every watcher
    pub async fn complete_job(&self, name: &str, score: f64) {
        self.complete_job_with_pods(name, &[score]).await;
    }

    /// Completion with one succeeded pod per score, in order
    pub async fn complete_job_with_pods(&self, name: &str, scores: &[f64]) {
        let (watchers, previous, current) = {
            let mut state = self.lock();
            let Some(previous) = state.jobs.get(name).cloned() else {
                panic!("complete_job: no such job {name}");
            };
            state.completion_count += 1;
            let completion = state.completion_count;
            let mut pods = Vec::new();
            for (i, score) in scores.iter().enumerate() {
                let pod_name = format!("{name}-pod-{completion}-{i}");
                pods.push(json!({
                    "name": pod_name,
                    "phase": "Succeeded",
                    "hostIP": "10.0.0.9",
                }));
                state.logs.insert(pod_name, score.to_string().into_bytes());
            }
            let mut current = previous.clone();
            current["status"] = json!({
                "conditions": [{"type": "Complete", "status": "True"}],
                "pods": pods,
            });
            state.jobs.insert(name.to_string(), current.clone());
            (state.watchers.clone(), previous, current)
        };
        for watcher in watchers {
            watcher
                .send((Some(previous.clone()), current.clone()))
                .await
                .expect("watch channel closed");
        }
    }
}

#[async_trait]
impl ResourceBackend for FakeBackend {
    async fn create_job(&self, _kind: &str, _namespace: &str, job: &Value) -> OrchestratorResult<()> {
        let name = job
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| backend_error("create", "job without name"))?;
        let mut state = self.lock();
        if state.jobs.contains_key(name) {
            return Err(backend_error("create", format!("{name} already exists")));
        }
        state.jobs.insert(name.to_string(), job.clone());
        state.create_count += 1;
        Ok(())
    }

    async fn get_job(
        &self,
        _kind: &str,
        _namespace: &str,
        name: &str,
    ) -> OrchestratorResult<Option<Value>> {
        Ok(self.lock().jobs.get(name).cloned())
    }

    async fn list_jobs(&self, _kind: &str, _namespace: &str) -> OrchestratorResult<Vec<Value>> {
        Ok(self.lock().jobs.values().cloned().collect())
    }

    async fn delete_job(&self, _kind: &str, _namespace: &str, name: &str) -> OrchestratorResult<()> {
        self.lock().jobs.remove(name);
        Ok(())
    }

    async fn watch_jobs(&self, _kind: &str) -> OrchestratorResult<mpsc::Receiver<JobEvent>> {
        let (tx, rx) = mpsc::channel(100);
        self.lock().watchers.push(tx);
        Ok(rx)
    }

    async fn pod_log(&self, _namespace: &str, pod: &str) -> OrchestratorResult<Vec<u8>> {
        self.lock()
            .logs
            .get(pod)
            .cloned()
            .ok_or_else(|| backend_error("pod_log", format!("no log for {pod}")))
    }

    async fn delete_pod(&self, _namespace: &str, pod: &str) -> OrchestratorResult<()> {
        self.lock().deleted_pods.push(pod.to_string());
        Ok(())
    }
}

/// In-memory experiment store
#[derive(Default)]
pub struct FakeStore {
    experiments: Mutex<HashMap<String, Experiment>>,
}

impl FakeStore {
    pub fn with(experiment: &Experiment) -> Arc<Self> {
        let store = Self::default();
        store
            .experiments
            .lock()
            .unwrap()
            .insert(experiment.name.clone(), experiment.clone());
        Arc::new(store)
    }

    pub fn status(&self, name: &str) -> ExperimentStatus {
        self.experiments
            .lock()
            .unwrap()
            .get(name)
            .map(|e| e.status.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExperimentStore for FakeStore {
    async fn get(&self, name: &str) -> OrchestratorResult<Experiment> {
        self.experiments
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| backend_error("get", format!("no experiment {name}")))
    }

    async fn update_status(&self, name: &str, status: &ExperimentStatus) -> OrchestratorResult<()> {
        let mut experiments = self.experiments.lock().unwrap();
        let experiment = experiments
            .get_mut(name)
            .ok_or_else(|| backend_error("update_status", format!("no experiment {name}")))?;
        experiment.status = status.clone();
        Ok(())
    }
}

/// Archive fake recording every stored log
#[derive(Default)]
pub struct FakeArchive {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeArchive {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl LogArchive for FakeArchive {
    async fn put(&self, key: &str, bytes: &[u8]) -> OrchestratorResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> OrchestratorResult<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| backend_error("archive_get", format!("no entry {key}")))
    }
}

/// Parser that reads the log as one float under the "score" metric
pub struct FloatParser;

impl LogParser for FloatParser {
    fn parse(&self, parser_key: &str, bytes: &[u8]) -> OrchestratorResult<ParsedLog> {
        if parser_key != "float" {
            return Err(backend_error("parse", format!("unknown parser {parser_key}")));
        }
        let text = String::from_utf8_lossy(bytes);
        let metric_value: f64 = text
            .trim()
            .parse()
            .map_err(|_| backend_error("parse", format!("not a float: {text}")))?;
        let mut values = BTreeMap::new();
        values.insert("score".to_string(), metric_value);
        Ok(ParsedLog {
            metric_key: "score".to_string(),
            metric_value,
            values,
            message: String::new(),
        })
    }
}

/// Metric sink recording every push with its label set
#[derive(Default)]
pub struct RecordingSink {
    pushes: Mutex<Vec<(String, f64, BTreeMap<String, String>)>>,
}

impl RecordingSink {
    pub fn pushes(&self) -> Vec<(String, f64, BTreeMap<String, String>)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn push(
        &self,
        metric_key: &str,
        value: f64,
        labels: &BTreeMap<String, String>,
    ) -> OrchestratorResult<()> {
        self.pushes
            .lock()
            .unwrap()
            .push((metric_key.to_string(), value, labels.clone()));
        Ok(())
    }
}

/// Node profile applier recording every call
#[derive(Default)]
pub struct RecordingApplier {
    applied_labels: Mutex<Vec<String>>,
    created_profiles: Mutex<Vec<String>>,
    removed_labels: Mutex<usize>,
}

impl RecordingApplier {
    pub fn applied_labels(&self) -> Vec<String> {
        self.applied_labels.lock().unwrap().clone()
    }

    pub fn created_profiles(&self) -> Vec<String> {
        self.created_profiles.lock().unwrap().clone()
    }

    pub fn removed_labels(&self) -> usize {
        *self.removed_labels.lock().unwrap()
    }
}

#[async_trait]
impl NodeProfileApplier for RecordingApplier {
    async fn apply_label(
        &self,
        _selector: &BTreeMap<String, String>,
        profile: &str,
    ) -> OrchestratorResult<()> {
        self.applied_labels.lock().unwrap().push(profile.to_string());
        Ok(())
    }

    async fn remove_label(&self, _selector: &BTreeMap<String, String>) -> OrchestratorResult<()> {
        *self.removed_labels.lock().unwrap() += 1;
        Ok(())
    }

    async fn create_profile(&self, data: &str) -> OrchestratorResult<()> {
        self.created_profiles.lock().unwrap().push(data.to_string());
        Ok(())
    }

    async fn delete_profile(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

pub struct TestHelpers;

impl TestHelpers {
    pub fn collaborators(
        backend: Arc<FakeBackend>,
        store: Arc<FakeStore>,
        archive: Arc<FakeArchive>,
        sink: Arc<RecordingSink>,
        applier: Arc<RecordingApplier>,
    ) -> Collaborators {
        Collaborators {
            store,
            backend,
            archive,
            parser: Arc::new(FloatParser),
            metrics: sink,
            tuned: applier,
            cluster_id: "test-cluster".to_string(),
        }
    }

    /// Poll a condition until it holds or the timeout elapses
    pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }
}
