//! Tunable parameter definitions and the search-space configuration loader.
//!
//! The search space is loaded from a directory of plain-text files named
//! `<tunetype>.<paramtype>`, one `name=spec` line per parameter:
//!
//! - `sysctl.int` - `vm.swappiness=0,100,10` (min, max, optional step)
//! - `cpu.set` - `governor=performance,powersave`
//! - `disk.float` - `readahead_ratio=0.1,1.0`
//!
//! Parameters are sampled and validated in a uniform f64 coordinate space;
//! conversion back to concrete setting strings happens at profile render
//! time.

use crate::error::{OrchestratorError, OrchestratorResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Set parameters cap out to keep the search space bounded
pub const SET_MAX_LENGTH: usize = 20;

/// A concrete tuned profile: setting key/values grouped by tune type
pub type TunedProfile = BTreeMap<TuneType, BTreeMap<String, String>>;

/// The fixed vocabulary of tunable subsystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuneType {
    Audio,
    Cpu,
    Disk,
    EeepcShe,
    Modules,
    Mounts,
    Net,
    Scheduler,
    ScsiHost,
    Selinux,
    Sysctl,
    Sysfs,
    Usb,
    Video,
    Vm,
}

impl TuneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TuneType::Audio => "audio",
            TuneType::Cpu => "cpu",
            TuneType::Disk => "disk",
            TuneType::EeepcShe => "eeepc_she",
            TuneType::Modules => "modules",
            TuneType::Mounts => "mounts",
            TuneType::Net => "net",
            TuneType::Scheduler => "scheduler",
            TuneType::ScsiHost => "scsi_host",
            TuneType::Selinux => "selinux",
            TuneType::Sysctl => "sysctl",
            TuneType::Sysfs => "sysfs",
            TuneType::Usb => "usb",
            TuneType::Video => "video",
            TuneType::Vm => "vm",
        }
    }
}

impl fmt::Display for TuneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TuneType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(TuneType::Audio),
            "cpu" => Ok(TuneType::Cpu),
            "disk" => Ok(TuneType::Disk),
            "eeepc_she" => Ok(TuneType::EeepcShe),
            "modules" => Ok(TuneType::Modules),
            "mounts" => Ok(TuneType::Mounts),
            "net" => Ok(TuneType::Net),
            "scheduler" => Ok(TuneType::Scheduler),
            "scsi_host" => Ok(TuneType::ScsiHost),
            "selinux" => Ok(TuneType::Selinux),
            "sysctl" => Ok(TuneType::Sysctl),
            "sysfs" => Ok(TuneType::Sysfs),
            "usb" => Ok(TuneType::Usb),
            "video" => Ok(TuneType::Video),
            "vm" => Ok(TuneType::Vm),
            _ => Err(OrchestratorError::UnknownTuneType {
                name: s.to_string(),
            }),
        }
    }
}

/// One tunable parameter, sampled in f64 coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Integer grid `min..=max` with the given step
    IntUniform {
        name: String,
        min: i64,
        max: i64,
        step: i64,
    },
    /// Continuous uniform range
    Uniform { name: String, min: f64, max: f64 },
    /// Finite value set, sampled by index
    Set { name: String, values: Vec<String> },
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::IntUniform { name, .. } => name,
            Param::Uniform { name, .. } => name,
            Param::Set { name, .. } => name,
        }
    }

    /// Inclusive lower bound of the sampling coordinate
    pub fn min(&self) -> f64 {
        match self {
            Param::IntUniform { min, .. } => *min as f64,
            Param::Uniform { min, .. } => *min,
            Param::Set { .. } => 0.0,
        }
    }

    /// Inclusive upper bound of the sampling coordinate
    pub fn max(&self) -> f64 {
        match self {
            Param::IntUniform { max, .. } => *max as f64,
            Param::Uniform { max, .. } => *max,
            Param::Set { values, .. } => values.len().saturating_sub(1) as f64,
        }
    }

    pub fn in_range(&self, v: f64) -> bool {
        v >= self.min() && v <= self.max()
    }

    /// Draw a uniform sample
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match self {
            Param::IntUniform { min, max, step, .. } => {
                let steps = (max - min) / step;
                (min + rng.gen_range(0..=steps) * step) as f64
            }
            Param::Uniform { min, max, .. } => rng.gen_range(*min..=*max),
            Param::Set { values, .. } => rng.gen_range(0..values.len()) as f64,
        }
    }

    /// Snap an in-range coordinate onto the parameter's grid
    pub fn quantize(&self, v: f64) -> f64 {
        match self {
            Param::IntUniform { min, step, .. } => {
                let steps = ((v - *min as f64) / *step as f64).floor() as i64;
                (min + steps * step) as f64
            }
            Param::Uniform { .. } => v,
            Param::Set { .. } => v.floor(),
        }
    }

    /// Render a quantized coordinate as the concrete setting value
    pub fn value_string(&self, v: f64) -> String {
        match self {
            Param::IntUniform { .. } => format!("{}", v as i64),
            Param::Uniform { .. } => format!("{v:.2}"),
            Param::Set { values, .. } => {
                let idx = (v as usize).min(values.len().saturating_sub(1));
                values.get(idx).cloned().unwrap_or_default()
            }
        }
    }
}

fn config_error(file: &str, line: &str, reason: &str) -> OrchestratorError {
    OrchestratorError::ConfigurationError {
        message: format!("{file}: '{line}': {reason}"),
    }
}

fn parse_param(file: &str, param_type: &str, line: &str) -> OrchestratorResult<Param> {
    let (name, spec) = line
        .split_once('=')
        .ok_or_else(|| config_error(file, line, "expected name=spec"))?;
    let name = name.trim().to_string();
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();

    match param_type {
        "int" => {
            if parts.len() < 2 || parts.len() > 3 {
                return Err(config_error(file, line, "expected min,max[,step]"));
            }
            let min: i64 = parts[0]
                .parse()
                .map_err(|_| config_error(file, line, "invalid min"))?;
            let max: i64 = parts[1]
                .parse()
                .map_err(|_| config_error(file, line, "invalid max"))?;
            let step: i64 = match parts.get(2) {
                Some(s) => s
                    .parse()
                    .map_err(|_| config_error(file, line, "invalid step"))?,
                None => 1,
            };
            if max < min || step <= 0 {
                return Err(config_error(file, line, "empty integer range"));
            }
            Ok(Param::IntUniform {
                name,
                min,
                max,
                step,
            })
        }
        "float" => {
            if parts.len() != 2 {
                return Err(config_error(file, line, "expected min,max"));
            }
            let min: f64 = parts[0]
                .parse()
                .map_err(|_| config_error(file, line, "invalid min"))?;
            let max: f64 = parts[1]
                .parse()
                .map_err(|_| config_error(file, line, "invalid max"))?;
            if max < min {
                return Err(config_error(file, line, "empty float range"));
            }
            Ok(Param::Uniform { name, min, max })
        }
        "set" => {
            if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
                return Err(config_error(file, line, "empty value set"));
            }
            if parts.len() > SET_MAX_LENGTH {
                return Err(config_error(file, line, "value set too large"));
            }
            Ok(Param::Set {
                name,
                values: parts.iter().map(|p| p.to_string()).collect(),
            })
        }
        other => Err(config_error(file, line, &format!("unknown param type '{other}'"))),
    }
}

/// The immutable parameter search space, grouped by tune type
#[derive(Debug, Clone, Default)]
pub struct SearchSpace {
    params: BTreeMap<TuneType, Vec<Param>>,
}

impl SearchSpace {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `<tunetype>.<paramtype>` file in a directory.
    /// Files whose names do not match the pattern are skipped; malformed
    /// lines and unknown tune types fail the load.
    pub fn load(dir: &Path) -> OrchestratorResult<Self> {
        let mut params: BTreeMap<TuneType, Vec<Param>> = BTreeMap::new();
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        entries.sort();

        for path in entries {
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((tune_name, param_type)) = file_name.split_once('.') else {
                continue;
            };
            if !matches!(param_type, "int" | "float" | "set") {
                continue;
            }
            let tune_type: TuneType = tune_name.parse()?;

            let content = std::fs::read_to_string(&path)?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let param = parse_param(file_name, param_type, line)?;
                params.entry(tune_type).or_default().push(param);
            }
        }
        Ok(Self { params })
    }

    pub fn is_empty(&self) -> bool {
        self.params.values().all(|v| v.is_empty())
    }

    /// All parameters in a stable order, paired with their tune type
    pub fn param_vector(&self) -> Vec<(TuneType, Param)> {
        self.params
            .iter()
            .flat_map(|(t, ps)| ps.iter().map(|p| (*t, p.clone())))
            .collect()
    }

    /// Render validated coordinates into a concrete profile
    pub fn profile_from_values(&self, values: &[f64]) -> TunedProfile {
        let mut profile = TunedProfile::new();
        for ((tune_type, param), v) in self.param_vector().iter().zip(values) {
            let quantized = param.quantize(*v);
            profile
                .entry(*tune_type)
                .or_default()
                .insert(param.name().to_string(), param.value_string(quantized));
        }
        profile
    }
}
