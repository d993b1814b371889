//! Experiment status bookkeeping: the job ledger, per-cell result records,
//! best-result retention, and the progress string.

use chrono::Utc;
use shared::types::{
    BestResult, Combination, ExperimentStatus, LedgerEntry, ResultRecord, TrialResult,
};

/// Strict-improvement comparison. Ties keep the incumbent.
pub fn is_better(minimize: bool, old: f64, new: f64) -> bool {
    if minimize { new < old } else { new > old }
}

pub fn ledger_contains(status: &ExperimentStatus, hash: u32) -> bool {
    status.ledger.iter().any(|e| e.hash == hash)
}

/// Record a job identity. Duplicate hashes are ignored, the ledger is
/// append-only, and the progress string is refreshed.
pub fn append_ledger(status: &mut ExperimentStatus, entry: LedgerEntry) {
    if !ledger_contains(status, entry.hash) {
        status.ledger.push(entry);
    }
    refresh_progress(status);
}

/// `"{completed}/{total}"` where completed counts scored trials and total
/// counts ledger entries
pub fn refresh_progress(status: &mut ExperimentStatus) {
    let completed: usize = status.results.iter().map(|r| r.items.len()).sum();
    status.job_completed = format!("{completed}/{}", status.ledger.len());
}

/// Whether a trial for this job name was already scored
pub fn job_done(status: &ExperimentStatus, job_name: &str) -> bool {
    status
        .results
        .iter()
        .any(|r| r.items.iter().any(|t| t.job_name == job_name))
}

/// Identity of one result cell
pub struct ResultKey {
    pub build_id: String,
    pub iteration_id: String,
    pub iteration_labels: Combination,
    pub configuration_id: String,
    pub configuration_labels: Combination,
}

/// Append a trial to its (build, iteration, configuration) cell, creating
/// the cell on first use. Returns the cell's new running average.
pub fn merge_result(
    status: &mut ExperimentStatus,
    key: ResultKey,
    repetition: u32,
    job_name: &str,
    pod_name: &str,
    metric_value: f64,
) -> f64 {
    let trial = TrialResult {
        repetition,
        job_name: job_name.to_string(),
        pod_name: pod_name.to_string(),
        metric_value,
        recorded_at: Utc::now(),
    };

    let record = status.results.iter_mut().find(|r| {
        r.build_id == key.build_id
            && r.iteration_id == key.iteration_id
            && r.configuration_id == key.configuration_id
    });
    let average = match record {
        Some(record) => {
            record.items.push(trial);
            record.average =
                record.items.iter().map(|t| t.metric_value).sum::<f64>() / record.items.len() as f64;
            record.average
        }
        None => {
            status.results.push(ResultRecord {
                build_id: key.build_id,
                iteration_id: key.iteration_id,
                iteration_labels: key.iteration_labels,
                configuration_id: key.configuration_id,
                configuration_labels: key.configuration_labels,
                items: vec![trial],
                average: metric_value,
            });
            metric_value
        }
    };
    refresh_progress(status);
    average
}

/// Keep the best value per (build, iteration, metric) triple under the
/// strict-improvement rule. Returns true when the candidate was retained.
pub fn update_best(status: &mut ExperimentStatus, candidate: BestResult, minimize: bool) -> bool {
    let existing = status.best_results.iter_mut().find(|b| {
        b.build_id == candidate.build_id
            && b.iteration_id == candidate.iteration_id
            && b.metric_key == candidate.metric_key
    });
    match existing {
        Some(existing) => {
            if is_better(minimize, existing.value, candidate.value) {
                *existing = candidate;
                true
            } else {
                false
            }
        }
        None => {
            status.best_results.push(candidate);
            true
        }
    }
}

/// Record a build identifier the first time it is seen
pub fn track_build(status: &mut ExperimentStatus, build: &str) {
    if !status.tracked_builds.iter().any(|b| b == build) {
        status.tracked_builds.push(build.to_string());
    }
}
