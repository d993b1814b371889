//! Job identity: content-addressed hashes, job names, and label handling.
//!
//! A job's identity is the FNV-32a hash of its sorted dimension assignments
//! plus build and repetition. Identical identities map to identical hashes,
//! which is what makes registration idempotent across restarts.

use crate::core::{
    BUILD_KEY, EXPERIMENT_LABEL, HASH_DELIMIT, JOBHASH_KEY, MAX_LABEL_LEN, REPETITION_KEY,
};
use shared::types::{Combination, Experiment, LedgerEntry};

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 16777619;

/// 32-bit FNV-1a over a byte string
fn fnv32a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Canonical `;key=value` rendering of one assignment
fn label_pair(key: &str, value: &str) -> String {
    format!(";{key}={value}")
}

/// Join assignments in sorted key order, without the leading `;`
pub fn identity_string(labels: &Combination) -> String {
    let joined: String = labels.iter().map(|(k, v)| label_pair(k, v)).collect();
    joined.strip_prefix(';').unwrap_or(&joined).to_string()
}

/// Hash a job identity: sorted `;key=value` pairs, then build and repetition
pub fn job_hash(labels: &Combination, build: &str, repetition: u32) -> u32 {
    let mut key: String = labels.iter().map(|(k, v)| label_pair(k, v)).collect();
    key.push_str(&format!("-bc-{build}-rp-{repetition}"));
    fnv32a(key.as_bytes())
}

/// Deterministic job name: experiment name, delimiter, decimal hash
pub fn job_name(experiment_name: &str, hash: u32) -> String {
    format!("{experiment_name}{HASH_DELIMIT}{hash}")
}

/// Hash recovered from a job name, `None` when the name was not generated
/// by [`job_name`]
pub fn hash_from_name(name: &str) -> Option<u32> {
    let (_, tail) = name.rsplit_once(HASH_DELIMIT)?;
    tail.parse::<u32>().ok()
}

/// Sanitize a value for use as a label: the first character is dropped
/// unless alphanumeric, every other invalid character becomes `-`, and long
/// values keep their last [`MAX_LABEL_LEN`] characters.
pub fn valid_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, ch) in value.chars().enumerate() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if i > 0 {
            out.push('-');
        }
    }
    if out.len() > MAX_LABEL_LEN {
        let cut = out.len() - MAX_LABEL_LEN;
        out.split_off(cut)
    } else {
        out
    }
}

/// The full label set stamped onto a generated job
pub fn job_labels(
    experiment_name: &str,
    labels: &Combination,
    build: &str,
    repetition: u32,
    hash: u32,
) -> Combination {
    let mut all = Combination::new();
    all.insert(EXPERIMENT_LABEL.to_string(), experiment_name.to_string());
    for (k, v) in labels {
        all.insert(k.clone(), valid_label_value(v));
    }
    all.insert(BUILD_KEY.to_string(), valid_label_value(build));
    all.insert(REPETITION_KEY.to_string(), repetition.to_string());
    all.insert(JOBHASH_KEY.to_string(), hash.to_string());
    all
}

/// Identity components recovered from a job name via the experiment ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDetail {
    pub build: String,
    pub repetition: u32,
    pub iteration_labels: Combination,
    pub iteration_id: String,
    pub configuration_labels: Combination,
    pub configuration_id: String,
}

/// Recover a job's identity from its name.
///
/// Looks the hash up in the experiment ledger and partitions the recorded
/// labels into iteration and configuration buckets by the dimension names
/// the spec declares. Unknown names fall into the configuration bucket,
/// which is where the node-selection pseudo-dimension lives.
pub fn detail_from_name(experiment: &Experiment, name: &str) -> JobDetail {
    let Some(hash) = hash_from_name(name) else {
        return JobDetail::default();
    };
    let Some(entry) = find_ledger_entry(&experiment.status.ledger, hash) else {
        return JobDetail::default();
    };

    let iteration_names: Vec<&str> = experiment
        .spec
        .iterations
        .iter()
        .map(|d| d.name.as_str())
        .collect();

    let mut detail = JobDetail {
        build: entry.build.clone(),
        repetition: entry.repetition,
        ..JobDetail::default()
    };
    for (k, v) in &entry.labels {
        if iteration_names.contains(&k.as_str()) {
            detail.iteration_labels.insert(k.clone(), v.clone());
        } else {
            detail.configuration_labels.insert(k.clone(), v.clone());
        }
    }
    detail.iteration_id = identity_string(&detail.iteration_labels);
    detail.configuration_id = identity_string(&detail.configuration_labels);
    detail
}

pub fn find_ledger_entry(ledger: &[LedgerEntry], hash: u32) -> Option<&LedgerEntry> {
    ledger.iter().find(|e| e.hash == hash)
}
