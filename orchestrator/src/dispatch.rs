//! The registration pass: expanding an experiment into its job product,
//! recording identities in the ledger, and creating or queueing jobs.
//!
//! Registration is idempotent. Job names are content-addressed, the ledger
//! rejects duplicate hashes, and [`create_if_not_exists`] refuses to create
//! a job that already ran or is still running. Re-registering an unchanged
//! experiment is a no-op; registering after a spec change creates exactly
//! the new combinations.

use crate::adaptors::adaptor_for;
use crate::core::identity;
use crate::core::iteration;
use crate::core::results;
use crate::core::{
    AUTOTUNED_PROFILE_NAME, EXPERIMENT_LABEL, INIT_BUILD_NAME, NODESELECT_DEFAULT,
    NODESELECT_DIM_NAME,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::tracker::TrackManager;
use crate::traits::{Collaborators, JobAdaptor};
use crate::tuning::profile::render_profile_data;
use crate::tuning::{SearchSpace, TuningCoordinator};
use serde_json::Value;
use shared::types::{Combination, Dimension, Experiment, ExperimentSpec, LedgerEntry, ProcessId};
use shared::{process_info, process_warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Name and namespace from a job document's metadata
pub fn job_meta(job: &Value) -> OrchestratorResult<(String, String)> {
    let name = job
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::SharedError(shared::SharedError::MalformedDocument {
            message: "job document has no metadata.name".to_string(),
        }))?;
    let namespace = job
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or("default");
    Ok((name.to_string(), namespace.to_string()))
}

/// The declared dimensions plus the node-selection pseudo-dimension
pub fn combined_dimensions(spec: &ExperimentSpec) -> Vec<Dimension> {
    let mut dims = spec.iterations.clone();
    dims.extend(spec.configurations.iter().cloned());
    if let Some(ns) = &spec.node_selection {
        let values = if ns.values.is_empty() {
            vec![NODESELECT_DEFAULT.to_string()]
        } else {
            ns.values.clone()
        };
        dims.push(Dimension {
            name: NODESELECT_DIM_NAME.to_string(),
            location: format!("{}.{}", ns.location, NODESELECT_DIM_NAME),
            values,
        });
    }
    dims
}

/// The node-profile value a job document will run under
pub fn node_profile_value(spec: &ExperimentSpec, job: &Value) -> Option<String> {
    let ns = spec.node_selection.as_ref()?;
    let location = format!("{}.{}", ns.location, NODESELECT_DIM_NAME);
    let found = job
        .get("spec")
        .and_then(|spec_doc| iteration::get_value(spec_doc, &location))
        .and_then(|values| values.into_iter().next());
    Some(found.unwrap_or_else(|| NODESELECT_DEFAULT.to_string()))
}

/// Render one job document for a combination. Dimension values land inside
/// the base document's `spec` subtree; identity goes into metadata.
pub fn build_job(
    experiment: &Experiment,
    labels: &Combination,
    build: &str,
    repetition: u32,
) -> (Value, u32) {
    let hash = identity::job_hash(labels, build, repetition);
    let name = identity::job_name(&experiment.name, hash);

    let mut job = if experiment.spec.base.is_object() {
        experiment.spec.base.clone()
    } else {
        Value::Object(serde_json::Map::new())
    };
    job["kind"] = Value::String(experiment.spec.kind_key.clone());
    if job.get("spec").is_none() {
        job["spec"] = Value::Object(serde_json::Map::new());
    }

    {
        let spec_doc = &mut job["spec"];
        for dim in combined_dimensions(&experiment.spec) {
            if let Some(value) = labels.get(&dim.name) {
                // the default profile leaves the document untouched
                if dim.name == NODESELECT_DIM_NAME && value == NODESELECT_DEFAULT {
                    continue;
                }
                iteration::update_value(spec_doc, &dim.location, value);
            }
        }
        if let Some(ns) = &experiment.spec.node_selection {
            for (key, value) in &ns.selector {
                let location = format!("{}.({})", ns.location, key);
                iteration::update_value(spec_doc, &location, value);
            }
        }
    }

    let metadata_labels = identity::job_labels(&experiment.name, labels, build, repetition, hash);
    job["metadata"] = serde_json::json!({
        "name": name,
        "namespace": experiment.namespace,
        "labels": metadata_labels,
    });
    (job, hash)
}

fn profile_summary(job_name: &str) -> String {
    format!("{AUTOTUNED_PROFILE_NAME} profile for {job_name}")
}

/// Create a job unless its identity already ran or is in flight.
///
/// Returns true when this call consumed the "one new job" slot: either a
/// job was created, or an incomplete run of it is still occupying the
/// cluster. Auto-tuned lineages rendezvous with their coordinator here,
/// blocking until the optimizer proposes the next profile.
pub async fn create_if_not_exists(
    collab: &Collaborators,
    adaptor: &dyn JobAdaptor,
    experiment: &Experiment,
    job: &Value,
    coordinator: Option<&Arc<TuningCoordinator>>,
) -> OrchestratorResult<bool> {
    let kind = &experiment.spec.kind_key;
    let (name, namespace) = job_meta(job)?;

    if results::job_done(&experiment.status, &name) {
        return Ok(false);
    }

    let existing = collab.backend.get_job(kind, &namespace, &name).await?;
    let completed = existing
        .as_ref()
        .map(|j| adaptor.check_complete(j))
        .unwrap_or(true);

    let tuned_value = node_profile_value(&experiment.spec, job);
    let mut auto_tuned = false;
    if completed && tuned_value.as_deref() == Some(AUTOTUNED_PROFILE_NAME) {
        let coordinator = coordinator.ok_or_else(|| OrchestratorError::TuningExhausted {
            experiment: experiment.name.clone(),
        })?;
        match coordinator.next_sample().await {
            Some(profile) => {
                if let Err(err) = collab.tuned.delete_profile().await {
                    process_warn!(
                        ProcessId::Orchestrator,
                        "⚠️ Could not drop stale tuned profile: {}",
                        err
                    );
                }
                let data = render_profile_data(&profile, &profile_summary(&name));
                collab.tuned.create_profile(&data).await?;
            }
            None => {
                if coordinator.is_finalized_applied() {
                    return Err(OrchestratorError::TuningExhausted {
                        experiment: experiment.name.clone(),
                    });
                }
                let profile = coordinator.finalized_profile();
                if let Err(err) = collab.tuned.delete_profile().await {
                    process_warn!(
                        ProcessId::Orchestrator,
                        "⚠️ Could not drop stale tuned profile: {}",
                        err
                    );
                }
                let data = render_profile_data(&profile, &profile_summary(&name));
                collab.tuned.create_profile(&data).await?;
                coordinator.set_finalized_applied();
                process_info!(
                    ProcessId::Orchestrator,
                    "🏁 Finalized tuned profile applied for {}",
                    name
                );
            }
        }
        if existing.is_some() {
            collab.backend.delete_job(kind, &namespace, &name).await?;
        }
        auto_tuned = true;
    }

    if existing.is_none() || auto_tuned {
        if let Some(ns) = &experiment.spec.node_selection {
            if let Some(value) = &tuned_value {
                if value != NODESELECT_DEFAULT {
                    collab.tuned.apply_label(&ns.selector, value).await?;
                }
            }
        }
        collab.backend.create_job(kind, &namespace, job).await?;
        process_info!(ProcessId::Orchestrator, "🚀 Created job {}", name);
        Ok(true)
    } else if completed {
        Ok(false)
    } else {
        // an incomplete run is still occupying the slot
        Ok(true)
    }
}

/// Expand an experiment, record every identity, create or queue its jobs,
/// and subscribe the experiment to its kind's completion tracker.
pub async fn register_experiment(
    manager: &mut TrackManager,
    collab: &Collaborators,
    space: &Arc<SearchSpace>,
    experiment: &mut Experiment,
) -> OrchestratorResult<()> {
    let kind = experiment.spec.kind_key.clone();
    let adaptor = adaptor_for(&kind).ok_or_else(|| OrchestratorError::UnknownAdaptor {
        kind: kind.clone(),
    })?;

    if manager.is_subscribed(&kind, &experiment.name).await {
        process_info!(
            ProcessId::Orchestrator,
            "📋 Experiment {} already registered",
            experiment.name
        );
        return Ok(());
    }

    let builds = if experiment.status.tracked_builds.is_empty() {
        vec![INIT_BUILD_NAME.to_string()]
    } else {
        experiment.status.tracked_builds.clone()
    };
    let repetitions = experiment.spec.repetition.max(1);
    let combinations = {
        let combos = iteration::get_all_combinations(&combined_dimensions(&experiment.spec));
        if combos.is_empty() {
            vec![Combination::new()]
        } else {
            combos
        }
    };
    // node selection shares one set of nodes across trials, so it forces
    // sequential dispatch
    let sequential = experiment.spec.sequential || experiment.spec.node_selection.is_some();

    let mut waiting: Vec<Value> = Vec::new();
    let mut bindings: HashMap<String, Arc<TuningCoordinator>> = HashMap::new();
    let mut slot_taken = false;

    for repetition in 0..repetitions {
        for build in &builds {
            for labels in &combinations {
                let (job, hash) = build_job(experiment, labels, build, repetition);
                results::append_ledger(
                    &mut experiment.status,
                    LedgerEntry {
                        hash,
                        build: build.clone(),
                        repetition,
                        labels: labels.clone(),
                    },
                );
                let name = identity::job_name(&experiment.name, hash);

                let coordinator = TuningCoordinator::new(experiment.spec.minimize, space.clone());
                if node_profile_value(&experiment.spec, &job).as_deref()
                    == Some(AUTOTUNED_PROFILE_NAME)
                {
                    tokio::spawn(coordinator.clone().auto_tune());
                } else {
                    coordinator.set_finalized_applied();
                }
                bindings.insert(name.clone(), coordinator.clone());

                if sequential {
                    if !slot_taken {
                        slot_taken = create_if_not_exists(
                            collab,
                            adaptor.as_ref(),
                            experiment,
                            &job,
                            Some(&coordinator),
                        )
                        .await?;
                    } else if !results::job_done(&experiment.status, &name)
                        && collab
                            .backend
                            .get_job(&kind, &experiment.namespace, &name)
                            .await?
                            .is_none()
                    {
                        waiting.push(job);
                    }
                } else {
                    create_if_not_exists(collab, adaptor.as_ref(), experiment, &job, Some(&coordinator))
                        .await?;
                }
            }
        }
    }

    collab
        .store
        .update_status(&experiment.name, &experiment.status)
        .await?;
    process_info!(
        ProcessId::Orchestrator,
        "📋 Registered {}: {} jobs in ledger, {} waiting",
        experiment.name,
        experiment.status.ledger.len(),
        waiting.len()
    );

    manager
        .subscribe(&kind, &experiment.name, waiting, bindings)
        .await
}

/// Whether the current spec expands to identities the ledger has not seen
pub fn job_list_changed(experiment: &Experiment) -> bool {
    let builds = if experiment.status.tracked_builds.is_empty() {
        vec![INIT_BUILD_NAME.to_string()]
    } else {
        experiment.status.tracked_builds.clone()
    };
    let combinations = {
        let combos = iteration::get_all_combinations(&combined_dimensions(&experiment.spec));
        if combos.is_empty() {
            vec![Combination::new()]
        } else {
            combos
        }
    };
    for repetition in 0..experiment.spec.repetition.max(1) {
        for build in &builds {
            for labels in &combinations {
                let hash = identity::job_hash(labels, build, repetition);
                if !results::ledger_contains(&experiment.status, hash) {
                    return true;
                }
            }
        }
    }
    false
}

/// Delete every job labeled with this experiment's name
pub async fn delete_experiment_jobs(
    collab: &Collaborators,
    experiment: &Experiment,
) -> OrchestratorResult<()> {
    let kind = &experiment.spec.kind_key;
    let jobs = collab.backend.list_jobs(kind, &experiment.namespace).await?;
    for job in jobs {
        let owner = job
            .pointer(&format!("/metadata/labels/{EXPERIMENT_LABEL}"))
            .and_then(Value::as_str);
        if owner == Some(experiment.name.as_str()) {
            let (name, namespace) = job_meta(&job)?;
            collab.backend.delete_job(kind, &namespace, &name).await?;
            process_info!(ProcessId::Orchestrator, "🗑️ Deleted job {}", name);
        }
    }
    Ok(())
}
