//! Public facade tying the registration pass, trackers, and tuning
//! together behind one entry point

use crate::dispatch;
use crate::error::OrchestratorResult;
use crate::tracker::TrackManager;
use crate::traits::Collaborators;
use crate::tuning::SearchSpace;
use shared::process_info;
use shared::types::{Experiment, ProcessId};
use std::sync::Arc;

pub struct Orchestrator {
    collab: Collaborators,
    space: Arc<SearchSpace>,
    manager: TrackManager,
}

impl Orchestrator {
    /// Build an orchestrator from its collaborators and an immutable
    /// parameter search space
    pub fn new(collab: Collaborators, space: SearchSpace) -> Self {
        let manager = TrackManager::new(collab.clone());
        Self {
            collab,
            space: Arc::new(space),
            manager,
        }
    }

    /// Expand and register an experiment, creating or queueing its jobs
    /// and subscribing it to completion tracking. Idempotent.
    pub async fn register(&mut self, experiment: &mut Experiment) -> OrchestratorResult<()> {
        dispatch::register_experiment(&mut self.manager, &self.collab, &self.space, experiment)
            .await
    }

    /// Whether the experiment's current spec expands to jobs the ledger
    /// has not recorded yet
    pub fn job_list_changed(&self, experiment: &Experiment) -> bool {
        dispatch::job_list_changed(experiment)
    }

    pub async fn is_registered(&self, experiment: &Experiment) -> bool {
        self.manager
            .is_subscribed(&experiment.spec.kind_key, &experiment.name)
            .await
    }

    /// Unsubscribe an experiment and delete every job it owns
    pub async fn deregister(&mut self, experiment: &Experiment) -> OrchestratorResult<()> {
        self.manager
            .unsubscribe(&experiment.spec.kind_key, &experiment.name)
            .await?;
        dispatch::delete_experiment_jobs(&self.collab, experiment).await?;
        process_info!(
            ProcessId::Orchestrator,
            "🗑️ Deregistered experiment {}",
            experiment.name
        );
        Ok(())
    }

    /// Stop all trackers
    pub async fn shutdown(&mut self) {
        self.manager.shutdown().await;
    }
}
