//! The tuning coordinator pairs one auto-tuned job lineage with one
//! background optimizer task.
//!
//! The optimizer proposes profile samples on a bounded channel and waits
//! for the benchmark score of each before proposing the next; the tracker
//! consumes samples when dispatching the next trial and pushes scores when
//! trials finish. Both sides block on their channel: a lineage that stops
//! producing completions parks its optimizer until the coordinator is
//! finalized.

use crate::tuning::params::{Param, SearchSpace, TunedProfile};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::process_debug;
use shared::types::ProcessId;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

/// Bound on both rendezvous channels
pub const TUNED_MAX_QSIZE: usize = 100;

/// Purely random rounds before exploit kicks in
pub const RANDOM_ROUNDS: usize = 5;

/// Guided rounds after the random phase
pub const MAX_ROUNDS: usize = 100;

/// Sender/receiver pair owned by the optimizer task
struct DriverEnds {
    sample_tx: mpsc::Sender<TunedProfile>,
    result_rx: mpsc::Receiver<f64>,
}

#[derive(Default)]
struct CoordinatorState {
    auto_tuned: bool,
    finalized_ready: bool,
    finalized_applied: bool,
    sampling_count: u64,
    finalized_profile: TunedProfile,
}

pub struct TuningCoordinator {
    minimize: bool,
    space: Arc<SearchSpace>,
    sample_rx: AsyncMutex<mpsc::Receiver<TunedProfile>>,
    result_tx: mpsc::Sender<f64>,
    driver: std::sync::Mutex<Option<DriverEnds>>,
    state: std::sync::Mutex<CoordinatorState>,
}

impl TuningCoordinator {
    pub fn new(minimize: bool, space: Arc<SearchSpace>) -> Arc<Self> {
        let (sample_tx, sample_rx) = mpsc::channel(TUNED_MAX_QSIZE);
        let (result_tx, result_rx) = mpsc::channel(TUNED_MAX_QSIZE);
        Arc::new(Self {
            minimize,
            space,
            sample_rx: AsyncMutex::new(sample_rx),
            result_tx,
            driver: std::sync::Mutex::new(Some(DriverEnds {
                sample_tx,
                result_rx,
            })),
            state: std::sync::Mutex::new(CoordinatorState::default()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_driver(&self) -> Option<DriverEnds> {
        self.driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn minimize(&self) -> bool {
        self.minimize
    }

    pub fn is_auto_tuned(&self) -> bool {
        self.state().auto_tuned
    }

    pub fn is_finalized_ready(&self) -> bool {
        self.state().finalized_ready
    }

    pub fn is_finalized_applied(&self) -> bool {
        self.state().finalized_applied
    }

    pub fn sampling_count(&self) -> u64 {
        self.state().sampling_count
    }

    /// The profile the optimizer settled on; empty until finalized
    pub fn finalized_profile(&self) -> TunedProfile {
        self.state().finalized_profile.clone()
    }

    /// Receive the next proposed profile. Blocks until the optimizer
    /// produces one; returns None once the coordinator is finalized.
    pub async fn next_sample(&self) -> Option<TunedProfile> {
        self.sample_rx.lock().await.recv().await
    }

    /// Report a trial score back to the optimizer. Scores arriving after
    /// finalization are dropped.
    pub async fn push_result(&self, score: f64) {
        if self.state().finalized_ready {
            return;
        }
        let _ = self.result_tx.send(score).await;
    }

    /// Mark the finalized profile as applied to a job document. Closes the
    /// rendezvous for lineages whose optimizer task never ran.
    pub fn set_finalized_applied(&self) {
        {
            let mut state = self.state();
            state.finalized_ready = true;
            state.finalized_applied = true;
        }
        drop(self.take_driver());
    }

    /// The optimizer task: random rounds, then perturbation around the best
    /// observation. Out-of-range candidates are recorded at the worst score
    /// without a channel round, so the total channel traffic stays within
    /// [`RANDOM_ROUNDS`] + [`MAX_ROUNDS`] samples.
    pub async fn auto_tune(self: Arc<Self>) {
        let Some(DriverEnds {
            sample_tx,
            mut result_rx,
        }) = self.take_driver()
        else {
            return;
        };
        self.state().auto_tuned = true;

        let params = self.space.param_vector();
        if params.is_empty() {
            let mut state = self.state();
            state.finalized_profile = TunedProfile::new();
            state.finalized_ready = true;
            return;
        }

        let worst = if self.minimize { f64::MAX } else { -1.0 };
        let mut rng = StdRng::from_entropy();
        let mut observations: Vec<(Vec<f64>, f64)> = Vec::new();

        for round in 0..(RANDOM_ROUNDS + MAX_ROUNDS) {
            let candidate: Vec<f64> = if round < RANDOM_ROUNDS || observations.is_empty() {
                params.iter().map(|(_, p)| p.sample(&mut rng)).collect()
            } else {
                perturb_best(&params, &observations, self.minimize, &mut rng)
            };

            if candidate
                .iter()
                .zip(&params)
                .any(|(v, (_, p))| !p.in_range(*v))
            {
                process_debug!(
                    ProcessId::Tuner,
                    "🔍 Round {} candidate out of range, recorded at worst score",
                    round
                );
                observations.push((candidate, worst));
                continue;
            }

            let profile = self.space.profile_from_values(&candidate);
            if sample_tx.send(profile).await.is_err() {
                break;
            }
            self.state().sampling_count += 1;

            match result_rx.recv().await {
                Some(score) => observations.push((candidate, score)),
                None => break,
            }
        }

        let best = if self.minimize {
            observations
                .iter()
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        } else {
            observations
                .iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        };
        let profile = best
            .map(|(candidate, _)| self.space.profile_from_values(candidate))
            .unwrap_or_default();

        let mut state = self.state();
        state.finalized_profile = profile;
        state.finalized_ready = true;
        // sample_tx and result_rx drop here, closing both channels
    }
}

/// Perturb the best observation: continuous params move by up to 10% of
/// their range, integer params by up to two steps, set params resample.
/// No clamping; escapes are caught by the caller's range check.
fn perturb_best<R: Rng>(
    params: &[(crate::tuning::params::TuneType, Param)],
    observations: &[(Vec<f64>, f64)],
    minimize: bool,
    rng: &mut R,
) -> Vec<f64> {
    let best = if minimize {
        observations
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    } else {
        observations
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    };
    let base = match best {
        Some((candidate, _)) => candidate,
        None => return params.iter().map(|(_, p)| p.sample(rng)).collect(),
    };

    params
        .iter()
        .zip(base)
        .map(|((_, param), v)| match param {
            Param::Uniform { min, max, .. } => v + rng.gen_range(-0.1..=0.1) * (max - min),
            Param::IntUniform { step, .. } => v + (rng.gen_range(-2i64..=2) * step) as f64,
            Param::Set { .. } => param.sample(rng),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::params::TuneType;

    fn int_space() -> Arc<SearchSpace> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sysctl.int"), "vm.swappiness=0,100,10\n").unwrap();
        Arc::new(SearchSpace::load(dir.path()).unwrap())
    }

    #[tokio::test]
    async fn test_empty_space_finalizes_immediately() {
        let coordinator = TuningCoordinator::new(false, Arc::new(SearchSpace::empty()));
        let task = tokio::spawn(coordinator.clone().auto_tune());
        task.await.unwrap();

        assert!(coordinator.is_auto_tuned());
        assert!(coordinator.is_finalized_ready());
        assert!(coordinator.finalized_profile().is_empty());
        assert_eq!(coordinator.sampling_count(), 0);
        assert!(coordinator.next_sample().await.is_none());
    }

    #[tokio::test]
    async fn test_drive_to_finalization() {
        let coordinator = TuningCoordinator::new(false, int_space());
        let task = tokio::spawn(coordinator.clone().auto_tune());

        // Score each sample by its swappiness value, so the optimizer must
        // settle on the highest value it ever proposed
        let mut best_seen = f64::MIN;
        let mut rounds = 0u64;
        while let Some(profile) = coordinator.next_sample().await {
            let value: f64 = profile[&TuneType::Sysctl]["vm.swappiness"].parse().unwrap();
            best_seen = best_seen.max(value);
            rounds += 1;
            coordinator.push_result(value).await;
        }
        task.await.unwrap();

        assert!(coordinator.is_finalized_ready());
        assert!(rounds <= (RANDOM_ROUNDS + MAX_ROUNDS) as u64);
        assert_eq!(coordinator.sampling_count(), rounds);
        let finalized: f64 = coordinator.finalized_profile()[&TuneType::Sysctl]["vm.swappiness"]
            .parse()
            .unwrap();
        assert_eq!(finalized, best_seen);
    }

    #[tokio::test]
    async fn test_minimize_settles_on_lowest() {
        let coordinator = TuningCoordinator::new(true, int_space());
        let task = tokio::spawn(coordinator.clone().auto_tune());

        let mut best_seen = f64::MAX;
        while let Some(profile) = coordinator.next_sample().await {
            let value: f64 = profile[&TuneType::Sysctl]["vm.swappiness"].parse().unwrap();
            best_seen = best_seen.min(value);
            coordinator.push_result(value).await;
        }
        task.await.unwrap();

        let finalized: f64 = coordinator.finalized_profile()[&TuneType::Sysctl]["vm.swappiness"]
            .parse()
            .unwrap();
        assert_eq!(finalized, best_seen);
    }

    #[tokio::test]
    async fn test_finalized_applied_without_optimizer() {
        let coordinator = TuningCoordinator::new(false, int_space());
        coordinator.set_finalized_applied();

        assert!(coordinator.is_finalized_applied());
        assert!(coordinator.is_finalized_ready());
        assert!(!coordinator.is_auto_tuned());
        assert!(coordinator.next_sample().await.is_none());
        // dropped, not delivered
        coordinator.push_result(1.0).await;
    }

    #[tokio::test]
    async fn test_auto_tune_after_applied_is_inert() {
        let coordinator = TuningCoordinator::new(false, int_space());
        coordinator.set_finalized_applied();
        // driver ends are gone, the task returns without touching state
        coordinator.clone().auto_tune().await;
        assert!(!coordinator.is_auto_tuned());
    }
}
