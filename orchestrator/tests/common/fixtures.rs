//! Test fixtures: canned experiments and search spaces

use shared::types::{Dimension, Experiment, ExperimentSpec, ExperimentStatus, NodeSelectionSpec};

pub struct TestFixtures;

impl TestFixtures {
    pub const NAMESPACE: &'static str = "bench";

    /// 2x2 sequential experiment: threads x mode, one build, one repetition
    pub fn two_by_two(name: &str) -> Experiment {
        Experiment {
            name: name.to_string(),
            namespace: Self::NAMESPACE.to_string(),
            spec: ExperimentSpec {
                kind_key: "default".to_string(),
                parser_key: "float".to_string(),
                metric_key: "score".to_string(),
                base: serde_json::json!({"spec": {"threads": 1, "mode": "slow"}}),
                iterations: vec![Dimension {
                    name: "threads".to_string(),
                    location: "threads".to_string(),
                    values: vec!["1".to_string(), "2".to_string()],
                }],
                configurations: vec![Dimension {
                    name: "mode".to_string(),
                    location: "mode".to_string(),
                    values: vec!["fast".to_string(), "slow".to_string()],
                }],
                node_selection: None,
                sequential: true,
                minimize: false,
                repetition: 1,
                job_interval_secs: 0,
            },
            status: ExperimentStatus::default(),
        }
    }

    /// Node-selection experiment iterating the default and auto-tuned
    /// profiles, no other dimensions
    pub fn autotune(name: &str) -> Experiment {
        Experiment {
            name: name.to_string(),
            namespace: Self::NAMESPACE.to_string(),
            spec: ExperimentSpec {
                kind_key: "default".to_string(),
                parser_key: "float".to_string(),
                metric_key: "score".to_string(),
                base: serde_json::json!({"spec": {"threads": 1}}),
                iterations: vec![],
                configurations: vec![],
                node_selection: Some(NodeSelectionSpec {
                    location: "tuned".to_string(),
                    values: vec!["default".to_string(), "auto-tuned".to_string()],
                    selector: [("role".to_string(), "bench".to_string())].into(),
                }),
                sequential: false,
                minimize: false,
                repetition: 1,
                job_interval_secs: 0,
            },
            status: ExperimentStatus::default(),
        }
    }

    /// One-parameter search space loaded from a temp directory
    pub fn search_space() -> orchestrator::SearchSpace {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sysctl.int"), "vm.swappiness=0,100,10\n").unwrap();
        orchestrator::SearchSpace::load(dir.path()).unwrap()
    }
}
