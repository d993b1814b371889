//! Built-in job adaptors
//!
//! An adaptor knows how one family of job documents reports completion and
//! which of its pods carry the benchmark output. All adaptors read the
//! document's `status` subtree; none of them touch the cluster.

use crate::traits::JobAdaptor;
use serde_json::Value;
use shared::types::PodRef;
use std::sync::Arc;

/// Look up the adaptor registered for a kind key
pub fn adaptor_for(kind_key: &str) -> Option<Arc<dyn JobAdaptor>> {
    match kind_key {
        "default" | "job" => Some(Arc::new(DefaultAdaptor)),
        "mpi" => Some(Arc::new(MpiAdaptor)),
        "kubeflow" => Some(Arc::new(KubeflowAdaptor)),
        "ripsaw" => Some(Arc::new(RipsawAdaptor)),
        _ => None,
    }
}

fn condition_true(job: &Value, condition_type: &str) -> bool {
    job.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some(condition_type)
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}

fn pods_with_phase(job: &Value, phase: &str) -> Vec<PodRef> {
    job.pointer("/status/pods")
        .and_then(Value::as_array)
        .map(|pods| {
            pods.iter()
                .filter(|p| p.get("phase").and_then(Value::as_str) == Some(phase))
                .filter_map(|p| {
                    Some(PodRef {
                        name: p.get("name")?.as_str()?.to_string(),
                        host_ip: p
                            .get("hostIP")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Strip server bookkeeping so the document can be re-submitted as new
fn copy_for_recreate(job: &Value) -> Value {
    let mut copy = serde_json::Map::new();
    for key in ["kind", "spec"] {
        if let Some(v) = job.get(key) {
            copy.insert(key.to_string(), v.clone());
        }
    }
    if let Some(metadata) = job.get("metadata").and_then(Value::as_object) {
        let mut kept = serde_json::Map::new();
        for key in ["name", "namespace", "labels"] {
            if let Some(v) = metadata.get(key) {
                kept.insert(key.to_string(), v.clone());
            }
        }
        copy.insert("metadata".to_string(), Value::Object(kept));
    }
    Value::Object(copy)
}

/// Batch-job style documents: a `Complete` condition, succeeded pods
pub struct DefaultAdaptor;

impl JobAdaptor for DefaultAdaptor {
    fn check_complete(&self, job: &Value) -> bool {
        condition_true(job, "Complete")
    }

    fn list_finished_pods(&self, job: &Value) -> Vec<PodRef> {
        pods_with_phase(job, "Succeeded")
    }

    fn copy_for_recreate(&self, job: &Value) -> Value {
        copy_for_recreate(job)
    }
}

/// MPI jobs: a `Succeeded` condition, and only the launcher pod's log
/// holds the benchmark output
pub struct MpiAdaptor;

impl JobAdaptor for MpiAdaptor {
    fn check_complete(&self, job: &Value) -> bool {
        condition_true(job, "Succeeded")
    }

    fn list_finished_pods(&self, job: &Value) -> Vec<PodRef> {
        let launcher_suffix = "-launcher";
        pods_with_phase(job, "Succeeded")
            .into_iter()
            .filter(|p| p.name.contains(launcher_suffix))
            .collect()
    }

    fn copy_for_recreate(&self, job: &Value) -> Value {
        copy_for_recreate(job)
    }
}

/// Kubeflow training jobs: a `Succeeded` condition, every succeeded pod
/// counts
pub struct KubeflowAdaptor;

impl JobAdaptor for KubeflowAdaptor {
    fn check_complete(&self, job: &Value) -> bool {
        condition_true(job, "Succeeded")
    }

    fn list_finished_pods(&self, job: &Value) -> Vec<PodRef> {
        pods_with_phase(job, "Succeeded")
    }

    fn copy_for_recreate(&self, job: &Value) -> Value {
        copy_for_recreate(job)
    }
}

/// Ripsaw benchmarks report a flat state string instead of conditions
pub struct RipsawAdaptor;

impl JobAdaptor for RipsawAdaptor {
    fn check_complete(&self, job: &Value) -> bool {
        job.pointer("/status/state").and_then(Value::as_str) == Some("Complete")
    }

    fn list_finished_pods(&self, job: &Value) -> Vec<PodRef> {
        pods_with_phase(job, "Succeeded")
    }

    fn copy_for_recreate(&self, job: &Value) -> Value {
        copy_for_recreate(job)
    }
}
