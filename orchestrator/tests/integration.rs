//! End-to-end tests driving the orchestrator against in-memory fakes:
//! registration, sequential dispatch, completion tracking, result
//! bookkeeping, and the auto-tuning lineage.

mod common;

use common::helpers::{RecordingApplier, RecordingSink};
use common::{FakeArchive, FakeBackend, FakeStore, TestFixtures, TestHelpers};
use orchestrator::{Orchestrator, SearchSpace};
use shared::types::Experiment;
use std::collections::HashSet;
use std::sync::Arc;

struct Harness {
    backend: Arc<FakeBackend>,
    store: Arc<FakeStore>,
    archive: Arc<FakeArchive>,
    sink: Arc<RecordingSink>,
    applier: Arc<RecordingApplier>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(experiment: &Experiment, space: SearchSpace) -> Self {
        let backend = FakeBackend::new();
        let store = FakeStore::with(experiment);
        let archive = Arc::new(FakeArchive::default());
        let sink = Arc::new(RecordingSink::default());
        let applier = Arc::new(RecordingApplier::default());
        let collab = TestHelpers::collaborators(
            backend.clone(),
            store.clone(),
            archive.clone(),
            sink.clone(),
            applier.clone(),
        );
        let orchestrator = Orchestrator::new(collab, space);
        Self {
            backend,
            store,
            archive,
            sink,
            applier,
            orchestrator,
        }
    }

    /// Wait for an incomplete job to show up on the backend, unless the
    /// experiment already reached the given progress string
    async fn next_incomplete(&self, experiment: &str, done: &str) -> Option<String> {
        let backend = self.backend.clone();
        let store = self.store.clone();
        let done = done.to_string();
        let experiment = experiment.to_string();
        let arrived = TestHelpers::wait_until(
            || {
                !backend.incomplete_jobs().is_empty()
                    || store.status(&experiment).job_completed == done
            },
            5_000,
        )
        .await;
        assert!(arrived, "no job arrived and {experiment} never reached {done}");
        self.backend.incomplete_jobs().first().cloned()
    }

    async fn wait_for_progress(&self, experiment: &str, progress: &str) {
        let store = self.store.clone();
        let experiment = experiment.to_string();
        let progress_owned = progress.to_string();
        let reached = TestHelpers::wait_until(
            || store.status(&experiment).job_completed == progress_owned,
            5_000,
        )
        .await;
        assert!(
            reached,
            "{experiment} stuck at {} instead of {progress}",
            self.store.status(&experiment).job_completed
        );
    }
}

#[tokio::test]
async fn test_sequential_experiment_end_to_end() {
    let mut experiment = TestFixtures::two_by_two("seq-exp");
    let mut harness = Harness::new(&experiment, SearchSpace::empty());

    harness.orchestrator.register(&mut experiment).await.unwrap();

    // 2x2 expansion with distinct content hashes, one job on the cluster
    assert_eq!(experiment.status.ledger.len(), 4);
    let hashes: HashSet<u32> = experiment.status.ledger.iter().map(|e| e.hash).collect();
    assert_eq!(hashes.len(), 4);
    assert_eq!(harness.backend.create_count(), 1);
    assert!(harness.orchestrator.is_registered(&experiment).await);

    // each completion pulls the next waiting job onto the cluster
    for round in 0..4u32 {
        let name = harness
            .next_incomplete("seq-exp", "4/4")
            .await
            .unwrap_or_else(|| panic!("round {round}: nothing left to complete"));
        harness
            .backend
            .complete_job(&name, 10.0 + 10.0 * f64::from(round))
            .await;
        harness
            .wait_for_progress("seq-exp", &format!("{}/4", round + 1))
            .await;
    }

    let status = harness.store.status("seq-exp");
    assert_eq!(status.job_completed, "4/4");
    assert_eq!(harness.backend.create_count(), 4);
    assert_eq!(status.results.len(), 4);
    for record in &status.results {
        assert_eq!(record.items.len(), 1);
        assert_eq!(record.average, record.items[0].metric_value);
    }
    // one best entry per iteration value, and the overall best survived
    assert_eq!(status.best_results.len(), 2);
    assert!(status.best_results.iter().any(|b| b.value == 40.0));
    assert!(status.tracked_builds.contains(&"init".to_string()));

    // pods were cleaned up, logs archived, metrics pushed with the
    // dimension values of each job as constant labels
    assert_eq!(harness.backend.deleted_pods().len(), 4);
    assert_eq!(harness.archive.keys().len(), 4);
    let pushes = harness.sink.pushes();
    assert_eq!(pushes.len(), 4);
    for (_, _, labels) in &pushes {
        assert!(labels.contains_key("threads"));
        assert!(labels.contains_key("mode"));
        assert_eq!(labels.get("bench-experiment"), Some(&"seq-exp".to_string()));
    }

    // deregistration removes the jobs and the subscription
    harness.orchestrator.deregister(&experiment).await.unwrap();
    assert!(harness.backend.job_names().is_empty());
    assert!(!harness.orchestrator.is_registered(&experiment).await);
}

#[tokio::test]
async fn test_reregister_is_idempotent() {
    let mut experiment = TestFixtures::two_by_two("idem-exp");
    let mut harness = Harness::new(&experiment, SearchSpace::empty());

    harness.orchestrator.register(&mut experiment).await.unwrap();
    let created = harness.backend.create_count();
    let ledger_len = experiment.status.ledger.len();

    harness.orchestrator.register(&mut experiment).await.unwrap();
    assert_eq!(harness.backend.create_count(), created);
    assert_eq!(experiment.status.ledger.len(), ledger_len);
    assert!(!harness.orchestrator.job_list_changed(&experiment));

    // a widened dimension expands to identities the ledger has not seen
    experiment.spec.iterations[0].values.push("4".to_string());
    assert!(harness.orchestrator.job_list_changed(&experiment));

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_parallel_experiment_creates_all_jobs() {
    let mut experiment = TestFixtures::two_by_two("par-exp");
    experiment.spec.sequential = false;
    let mut harness = Harness::new(&experiment, SearchSpace::empty());

    harness.orchestrator.register(&mut experiment).await.unwrap();
    assert_eq!(harness.backend.create_count(), 4);
    assert_eq!(harness.backend.incomplete_jobs().len(), 4);

    for name in harness.backend.incomplete_jobs() {
        harness.backend.complete_job(&name, 7.0).await;
    }
    harness.wait_for_progress("par-exp", "4/4").await;
    assert_eq!(harness.store.status("par-exp").results.len(), 4);

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_autotune_lineage_runs_to_finalization() {
    let mut experiment = TestFixtures::autotune("tune-exp");
    let mut harness = Harness::new(&experiment, TestFixtures::search_space());

    harness.orchestrator.register(&mut experiment).await.unwrap();

    // the default profile runs first; the tuned lineage waits its turn
    assert_eq!(experiment.status.ledger.len(), 2);
    assert_eq!(harness.backend.create_count(), 1);

    // the tuned lineage recreates its job once per optimizer sample, so
    // this loop runs until the finalized trial lands in the status
    let mut round = 0u32;
    while harness.store.status("tune-exp").job_completed != "2/2" {
        assert!(round < 130, "tuning never finalized");
        if let Some(name) = harness.next_incomplete("tune-exp", "2/2").await {
            let score = 50.0 + f64::from((round * 7) % 40);
            harness.backend.complete_job(&name, score).await;
        }
        round += 1;
    }

    let status = harness.store.status("tune-exp");
    assert_eq!(status.job_completed, "2/2");
    assert_eq!(status.results.len(), 2);

    // the tuned cell carries the finalized profile annotation
    let tuned_cell = status
        .results
        .iter()
        .find(|r| r.configuration_id.contains("auto-tuned"))
        .unwrap();
    let annotation = tuned_cell.configuration_labels.get("auto-tuned").unwrap();
    assert!(annotation.starts_with("sysctl:vm.swappiness="));

    // the node profile machinery received rendered profiles under the
    // tuned label
    let created = harness.applier.created_profiles();
    assert!(!created.is_empty());
    assert!(created.iter().all(|d| d.starts_with("[main]\n")));
    assert!(created.iter().all(|d| d.contains("include=balanced")));
    assert!(created[0].contains("[sysctl]\nvm.swappiness="));
    assert!(harness
        .applier
        .applied_labels()
        .iter()
        .all(|p| p == "auto-tuned"));
    assert!(!harness.applier.applied_labels().is_empty());
    assert!(harness.applier.removed_labels() > 0);

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_tuned_lineage_records_cached_best_trial() {
    let mut experiment = TestFixtures::autotune("best-exp");
    let mut harness = Harness::new(&experiment, TestFixtures::search_space());

    harness.orchestrator.register(&mut experiment).await.unwrap();

    let first = harness.next_incomplete("best-exp", "2/2").await.unwrap();
    harness.backend.complete_job(&first, 5.0).await;
    harness.wait_for_progress("best-exp", "1/2").await;

    // the first tuned trial scores high, every retry after it scores low;
    // the lineage must still record its best sample, not the last one
    let mut tuned_round = 0u32;
    while harness.store.status("best-exp").job_completed != "2/2" {
        assert!(tuned_round < 130, "tuning never finalized");
        if let Some(name) = harness.next_incomplete("best-exp", "2/2").await {
            let score = if tuned_round == 0 { 100.0 } else { 1.0 };
            harness.backend.complete_job(&name, score).await;
            tuned_round += 1;
        }
    }

    let status = harness.store.status("best-exp");
    let tuned_cell = status
        .results
        .iter()
        .find(|r| r.configuration_id.contains("auto-tuned"))
        .unwrap();
    assert_eq!(tuned_cell.items.len(), 1);
    assert_eq!(tuned_cell.items[0].metric_value, 100.0);
    assert!(status.best_results.iter().any(|b| b.value == 100.0));

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_every_finished_pod_log_archived_first_scored() {
    let mut experiment = TestFixtures::two_by_two("pods-exp");
    let mut harness = Harness::new(&experiment, SearchSpace::empty());

    harness.orchestrator.register(&mut experiment).await.unwrap();

    let name = harness.next_incomplete("pods-exp", "4/4").await.unwrap();
    harness
        .backend
        .complete_job_with_pods(&name, &[42.0, 7.0])
        .await;
    harness.wait_for_progress("pods-exp", "1/4").await;

    // both pod logs land in the archive, only the first pod is scored
    assert_eq!(harness.archive.keys().len(), 2);
    let pushes = harness.sink.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].1, 42.0);
    let status = harness.store.status("pods-exp");
    assert_eq!(status.results[0].items[0].metric_value, 42.0);
    assert_eq!(harness.backend.deleted_pods().len(), 2);

    harness.orchestrator.shutdown().await;
}
