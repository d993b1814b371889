//! Per-kind completion trackers.
//!
//! One tracker task runs per job kind, owning all mutable tracking state
//! for that kind: subscriber experiments, waiting queues, coordinator
//! bindings, and the best-pod cache. Everything reaches the tracker through
//! its mailbox, so no lock guards the state. A pump task forwards watch
//! snapshots from the resource backend into the same mailbox.

use crate::adaptors::adaptor_for;
use crate::core::results::ResultKey;
use crate::core::{
    identity, results, AUTOTUNED_PROFILE_NAME, EXPERIMENT_LABEL, HASH_DELIMIT, NODESELECT_DIM_NAME,
};
use crate::dispatch;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{Collaborators, JobAdaptor};
use crate::tuning::profile::profile_annotation;
use crate::tuning::TuningCoordinator;
use serde_json::Value;
use shared::types::{BestResult, Experiment, ParsedLog, ProcessId};
use shared::{process_debug, process_info, process_warn};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Tracker mailbox bound
pub const TRACK_MAX_QSIZE: usize = 100;

enum TrackerMessage {
    JobEvent {
        previous: Option<Value>,
        current: Value,
    },
    Subscribe {
        experiment: String,
        waiting: Vec<Value>,
        bindings: HashMap<String, Arc<TuningCoordinator>>,
    },
    Unsubscribe {
        experiment: String,
        reply: oneshot::Sender<bool>,
    },
    IsSubscribed {
        experiment: String,
        reply: oneshot::Sender<bool>,
    },
    Quit,
}

struct TrackerHandle {
    tx: mpsc::Sender<TrackerMessage>,
    join: JoinHandle<()>,
}

/// Owns one tracker per kind and routes subscription requests to them
pub struct TrackManager {
    collab: Collaborators,
    trackers: HashMap<String, TrackerHandle>,
}

impl TrackManager {
    pub fn new(collab: Collaborators) -> Self {
        Self {
            collab,
            trackers: HashMap::new(),
        }
    }

    /// Subscribe an experiment to its kind's tracker, spawning the tracker
    /// and its watch pump on first use of the kind
    pub async fn subscribe(
        &mut self,
        kind_key: &str,
        experiment: &str,
        waiting: Vec<Value>,
        bindings: HashMap<String, Arc<TuningCoordinator>>,
    ) -> OrchestratorResult<()> {
        if !self.trackers.contains_key(kind_key) {
            let handle = self.spawn_tracker(kind_key).await?;
            self.trackers.insert(kind_key.to_string(), handle);
        }
        let handle = self
            .trackers
            .get(kind_key)
            .ok_or_else(|| OrchestratorError::TrackerGone {
                kind: kind_key.to_string(),
            })?;
        handle
            .tx
            .send(TrackerMessage::Subscribe {
                experiment: experiment.to_string(),
                waiting,
                bindings,
            })
            .await
            .map_err(|_| OrchestratorError::TrackerGone {
                kind: kind_key.to_string(),
            })
    }

    pub async fn is_subscribed(&self, kind_key: &str, experiment: &str) -> bool {
        let Some(handle) = self.trackers.get(kind_key) else {
            return false;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if handle
            .tx
            .send(TrackerMessage::IsSubscribed {
                experiment: experiment.to_string(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Remove an experiment from its tracker; the tracker shuts down when
    /// its last subscriber leaves
    pub async fn unsubscribe(&mut self, kind_key: &str, experiment: &str) -> OrchestratorResult<()> {
        let Some(handle) = self.trackers.get(kind_key) else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(TrackerMessage::Unsubscribe {
                experiment: experiment.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| OrchestratorError::TrackerGone {
                kind: kind_key.to_string(),
            })?;
        let empty = reply_rx.await.unwrap_or(true);
        if empty {
            if let Some(handle) = self.trackers.remove(kind_key) {
                let _ = handle.join.await;
            }
        }
        Ok(())
    }

    /// Stop every tracker
    pub async fn shutdown(&mut self) {
        for (kind, handle) in self.trackers.drain() {
            if handle.tx.send(TrackerMessage::Quit).await.is_ok() {
                let _ = handle.join.await;
            }
            process_info!(ProcessId::Tracker, "🛑 Tracker for kind {} stopped", kind);
        }
    }

    async fn spawn_tracker(&self, kind_key: &str) -> OrchestratorResult<TrackerHandle> {
        let adaptor = adaptor_for(kind_key).ok_or_else(|| OrchestratorError::UnknownAdaptor {
            kind: kind_key.to_string(),
        })?;
        let mut watch_rx = self.collab.backend.watch_jobs(kind_key).await?;
        let (tx, rx) = mpsc::channel(TRACK_MAX_QSIZE);

        let pump_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = watch_rx.recv() => match event {
                        Some((previous, current)) => {
                            if pump_tx
                                .send(TrackerMessage::JobEvent { previous, current })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = pump_tx.closed() => break,
                }
            }
        });

        let tracker = Tracker {
            kind_key: kind_key.to_string(),
            adaptor,
            collab: self.collab.clone(),
            subscribers: HashSet::new(),
            waiting: HashMap::new(),
            bindings: HashMap::new(),
            best_pods: HashMap::new(),
            handles: HashSet::new(),
        };
        let join = tokio::spawn(tracker.run(rx));
        process_info!(ProcessId::Tracker, "👀 Tracker started for kind {}", kind_key);
        Ok(TrackerHandle { tx, join })
    }
}

/// Constant labels for the metric push: the job's recorded values for
/// every declared dimension plus the node-profile pseudo-dimension
fn dimension_labels(experiment: &Experiment, job: &Value) -> BTreeMap<String, String> {
    let mut names: Vec<&str> = experiment
        .spec
        .iterations
        .iter()
        .chain(experiment.spec.configurations.iter())
        .map(|d| d.name.as_str())
        .collect();
    if experiment.spec.node_selection.is_some() {
        names.push(NODESELECT_DIM_NAME);
    }

    let mut labels = BTreeMap::new();
    for name in names {
        if let Some(value) = job
            .pointer(&format!("/metadata/labels/{name}"))
            .and_then(Value::as_str)
        {
            labels.insert(name.to_string(), value.to_string());
        }
    }
    labels
}

/// Mutable tracking state for one job kind, owned by its actor task
struct Tracker {
    kind_key: String,
    adaptor: Arc<dyn JobAdaptor>,
    collab: Collaborators,
    subscribers: HashSet<String>,
    /// Queued job documents per subscriber, dispatched one per completion
    waiting: HashMap<String, VecDeque<Value>>,
    /// Tuning coordinator per job name
    bindings: HashMap<String, Arc<TuningCoordinator>>,
    /// Best scoring pod per job name, kept under strict improvement
    best_pods: HashMap<String, (String, ParsedLog)>,
    /// Subscribers holding a live resource handle
    handles: HashSet<String>,
}

impl Tracker {
    async fn run(mut self, mut rx: mpsc::Receiver<TrackerMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                TrackerMessage::JobEvent { previous, current } => {
                    self.handle_event(previous, current).await;
                }
                TrackerMessage::Subscribe {
                    experiment,
                    waiting,
                    bindings,
                } => {
                    process_info!(
                        ProcessId::Tracker,
                        "➕ {} subscribed to kind {} ({} waiting)",
                        experiment,
                        self.kind_key,
                        waiting.len()
                    );
                    self.subscribers.insert(experiment.clone());
                    if !waiting.is_empty() {
                        self.waiting
                            .entry(experiment.clone())
                            .or_default()
                            .extend(waiting);
                    }
                    self.bindings.extend(bindings);
                    self.handles.insert(experiment);
                }
                TrackerMessage::IsSubscribed { experiment, reply } => {
                    let _ = reply.send(self.subscribers.contains(&experiment));
                }
                TrackerMessage::Unsubscribe { experiment, reply } => {
                    self.remove_subscriber(&experiment);
                    let empty = self.subscribers.is_empty();
                    let _ = reply.send(empty);
                    if empty {
                        break;
                    }
                }
                TrackerMessage::Quit => break,
            }
        }
        process_debug!(
            ProcessId::Tracker,
            "Tracker loop for kind {} exited",
            self.kind_key
        );
    }

    fn remove_subscriber(&mut self, experiment: &str) {
        self.subscribers.remove(experiment);
        if let Some(queue) = self.waiting.remove(experiment) {
            if !queue.is_empty() {
                process_warn!(
                    ProcessId::Tracker,
                    "⚠️ Dropping {} queued jobs for unsubscribed {}",
                    queue.len(),
                    experiment
                );
            }
        }
        let prefix = format!("{experiment}{HASH_DELIMIT}");
        self.bindings.retain(|name, coordinator| {
            if name.starts_with(&prefix) {
                coordinator.set_finalized_applied();
                false
            } else {
                true
            }
        });
        self.best_pods.retain(|name, _| !name.starts_with(&prefix));
        self.release_handle(experiment);
    }

    fn release_handle(&mut self, experiment: &str) {
        if self.handles.remove(experiment) {
            process_info!(
                ProcessId::Tracker,
                "♻️ Released {} resource handle for {}",
                self.kind_key,
                experiment
            );
        }
    }

    /// React to one watch snapshot; only transitions into completion count
    async fn handle_event(&mut self, previous: Option<Value>, current: Value) {
        let was_complete = previous
            .as_ref()
            .map(|p| self.adaptor.check_complete(p))
            .unwrap_or(false);
        if was_complete || !self.adaptor.check_complete(&current) {
            return;
        }

        let Some(experiment_name) = current
            .pointer(&format!("/metadata/labels/{EXPERIMENT_LABEL}"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };
        if !self.subscribers.contains(&experiment_name) {
            process_debug!(
                ProcessId::Tracker,
                "Ignoring completion for unsubscribed {}",
                experiment_name
            );
            return;
        }

        self.process_completion(&experiment_name, current).await;
    }

    async fn process_completion(&mut self, experiment_name: &str, job: Value) {
        let Ok((job_name, namespace)) = dispatch::job_meta(&job) else {
            return;
        };
        let mut experiment = match self.collab.store.get(experiment_name).await {
            Ok(experiment) => experiment,
            Err(err) => {
                process_warn!(
                    ProcessId::Tracker,
                    "⚠️ Could not load experiment {}: {}",
                    experiment_name,
                    err
                );
                return;
            }
        };

        let pods = self.adaptor.list_finished_pods(&job);
        let scored = self
            .score_finished_pods(&experiment, &job, &job_name, &namespace, &pods)
            .await;

        let binding = self.bindings.get(&job_name).cloned();
        if let (Some(coordinator), Some((pod_name, parsed))) = (&binding, &scored) {
            if !coordinator.is_finalized_ready() {
                coordinator.push_result(parsed.metric_value).await;
            }
            let retain = match self.best_pods.get(&job_name) {
                Some((_, prev)) => {
                    results::is_better(coordinator.minimize(), prev.metric_value, parsed.metric_value)
                }
                None => true,
            };
            if retain {
                self.best_pods
                    .insert(job_name.clone(), (pod_name.clone(), parsed.clone()));
            }
        }

        // Trials of a tuning lineage only reach the status once the
        // finalized profile is applied; everything else records directly.
        // A lineage records its cached best sample, which may be an earlier
        // trial that beat the one finishing now.
        let should_record = binding
            .as_ref()
            .map(|c| c.is_finalized_applied())
            .unwrap_or(true);
        if should_record {
            let recorded = self.best_pods.get(&job_name).cloned().or_else(|| scored.clone());
            if let Some((pod_name, parsed)) = &recorded {
                self.record_result(&mut experiment, &job_name, pod_name, parsed, binding.as_deref())
                    .await;
            }
        }

        if !pods.is_empty() {
            for pod in &pods {
                if let Err(err) = self.collab.backend.delete_pod(&namespace, &pod.name).await {
                    process_warn!(
                        ProcessId::Tracker,
                        "⚠️ Could not delete pod {}: {}",
                        pod.name,
                        err
                    );
                }
            }
            if let Some(ns) = &experiment.spec.node_selection {
                if let Err(err) = self.collab.tuned.remove_label(&ns.selector).await {
                    process_warn!(ProcessId::Tracker, "⚠️ Could not remove node label: {}", err);
                }
            }
            let next_doc = self.adaptor.copy_for_recreate(&job);
            self.dispatch_next(&mut experiment, &job_name, next_doc).await;
        }
    }

    /// Archive every finished pod's log; parse and score only the first.
    /// Archive failure downgrades to a warning; the in-memory bytes are
    /// parsed either way.
    async fn score_finished_pods(
        &self,
        experiment: &Experiment,
        job: &Value,
        job_name: &str,
        namespace: &str,
        pods: &[shared::types::PodRef],
    ) -> Option<(String, ParsedLog)> {
        let mut scored = None;
        for (index, pod) in pods.iter().enumerate() {
            let bytes = match self.collab.backend.pod_log(namespace, &pod.name).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    process_warn!(
                        ProcessId::Tracker,
                        "⚠️ Could not fetch log of {}: {}",
                        pod.name,
                        err
                    );
                    continue;
                }
            };

            let key = format!(
                "{}/{}/{}/{}.log",
                experiment.name, self.collab.cluster_id, job_name, pod.name
            );
            if let Err(err) = self.collab.archive.put(&key, &bytes).await {
                process_warn!(ProcessId::Tracker, "⚠️ Could not archive {}: {}", key, err);
            }

            if index > 0 {
                continue;
            }

            let parsed = match self.collab.parser.parse(&experiment.spec.parser_key, &bytes) {
                Ok(parsed) => parsed,
                Err(err) => {
                    process_warn!(
                        ProcessId::Tracker,
                        "⚠️ Could not parse log of {}: {}",
                        job_name,
                        err
                    );
                    continue;
                }
            };

            let mut labels = dimension_labels(experiment, job);
            labels.insert(EXPERIMENT_LABEL.to_string(), experiment.name.to_string());
            labels.insert("job".to_string(), job_name.to_string());
            labels.insert("pod".to_string(), pod.name.clone());
            labels.insert("instance".to_string(), pod.host_ip.clone());
            if let Err(err) = self
                .collab
                .metrics
                .push(&parsed.metric_key, parsed.metric_value, &labels)
                .await
            {
                process_warn!(ProcessId::Tracker, "⚠️ Metric push failed: {}", err);
            }

            scored = Some((pod.name.clone(), parsed));
        }
        scored
    }

    async fn record_result(
        &self,
        experiment: &mut Experiment,
        job_name: &str,
        pod_name: &str,
        parsed: &ParsedLog,
        coordinator: Option<&TuningCoordinator>,
    ) {
        if results::job_done(&experiment.status, job_name) {
            return;
        }
        let detail = identity::detail_from_name(experiment, job_name);

        let mut configuration_labels = detail.configuration_labels.clone();
        if let Some(coordinator) = coordinator {
            let annotation = profile_annotation(&coordinator.finalized_profile());
            if !annotation.is_empty() {
                configuration_labels.insert(AUTOTUNED_PROFILE_NAME.to_string(), annotation);
            }
        }

        let average = results::merge_result(
            &mut experiment.status,
            ResultKey {
                build_id: detail.build.clone(),
                iteration_id: detail.iteration_id.clone(),
                iteration_labels: detail.iteration_labels.clone(),
                configuration_id: detail.configuration_id.clone(),
                configuration_labels: configuration_labels.clone(),
            },
            detail.repetition,
            job_name,
            pod_name,
            parsed.metric_value,
        );

        let metric_key = if parsed.metric_key.is_empty() {
            experiment.spec.metric_key.clone()
        } else {
            parsed.metric_key.clone()
        };
        results::update_best(
            &mut experiment.status,
            BestResult {
                build_id: detail.build.clone(),
                iteration_id: detail.iteration_id,
                metric_key,
                configuration_labels,
                value: average,
            },
            experiment.spec.minimize,
        );
        results::track_build(&mut experiment.status, &detail.build);

        if let Err(err) = self
            .collab
            .store
            .update_status(&experiment.name, &experiment.status)
            .await
        {
            process_warn!(
                ProcessId::Tracker,
                "⚠️ Status update failed for {}: {}",
                experiment.name,
                err
            );
        } else {
            process_info!(
                ProcessId::Tracker,
                "✅ Recorded {} = {} ({})",
                job_name,
                parsed.metric_value,
                experiment.status.job_completed
            );
        }
    }

    /// A job finished: give its lineage a chance to continue, otherwise
    /// move the subscriber's next waiting job onto the cluster
    async fn dispatch_next(&mut self, experiment: &mut Experiment, finished: &str, next_doc: Value) {
        if let Some(coordinator) = self.bindings.get(finished).cloned() {
            if experiment.spec.job_interval_secs > 0 {
                tokio::time::sleep(Duration::from_secs(experiment.spec.job_interval_secs)).await;
            }
            if !coordinator.is_finalized_applied() {
                match dispatch::create_if_not_exists(
                    &self.collab,
                    self.adaptor.as_ref(),
                    experiment,
                    &next_doc,
                    Some(&coordinator),
                )
                .await
                {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(err) => {
                        process_warn!(
                            ProcessId::Tracker,
                            "⚠️ Could not continue lineage {}: {}",
                            finished,
                            err
                        );
                    }
                }
            }
            if coordinator.is_finalized_applied() {
                self.bindings.remove(finished);
                self.best_pods.remove(finished);
            }
        }
        self.deploy_waiting(experiment).await;
    }

    async fn deploy_waiting(&mut self, experiment: &mut Experiment) {
        let name = experiment.name.clone();
        let next = self.waiting.get_mut(&name).and_then(|q| q.pop_front());
        match next {
            Some(job) => {
                let coordinator = dispatch::job_meta(&job)
                    .ok()
                    .and_then(|(job_name, _)| self.bindings.get(&job_name).cloned());
                if let Err(err) = dispatch::create_if_not_exists(
                    &self.collab,
                    self.adaptor.as_ref(),
                    experiment,
                    &job,
                    coordinator.as_ref(),
                )
                .await
                {
                    process_warn!(
                        ProcessId::Tracker,
                        "⚠️ Could not deploy waiting job for {}: {}",
                        name,
                        err
                    );
                }
                if self.waiting.get(&name).map(|q| q.is_empty()).unwrap_or(false) {
                    self.waiting.remove(&name);
                }
            }
            None => self.release_handle(&name),
        }
    }
}
