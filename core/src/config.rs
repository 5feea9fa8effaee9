//! Runner settings, stored as YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SimulatorError;
use crate::simulator::{self, Custom, Simulator, SimulatorBinding};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Settings for a `SimRunner` and the simulator it drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSettings {
    /// Maximum number of simulations running at once.
    pub parallel_sims: usize,
    /// Per-run timeout in seconds. `None` waits forever.
    pub timeout_secs: Option<f64>,
    /// Where per-run netlists and results go. Unset means next to the
    /// circuit file.
    pub output_folder: Option<PathBuf>,
    /// `ngspice`, `ltspice`, `qspice`, `xyce` or `custom`.
    pub simulator: String,
    /// Executable argv prefix overriding discovery.
    pub executable: Option<Vec<String>>,
    /// Process name used when killing simulators on timeout.
    pub process_name: Option<String>,
    /// Command-line switches added to every run.
    pub switches: Vec<String>,
    /// Definition used when `simulator` is `custom`.
    pub custom: Option<Custom>,
    pub verbose: bool,
    /// Send simulator console output to `<netlist>.exe.log`.
    pub exe_log: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        default_settings()
    }
}

impl RunnerSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel_sims == 0 {
            return Err(ConfigError::Invalid("parallel_sims must be at least 1".into()));
        }
        if let Some(t) = self.timeout_secs {
            if !t.is_finite() || t < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "timeout_secs must be a non-negative number, got {}",
                    t
                )));
            }
        }
        Ok(())
    }

    /// Build the simulator binding these settings describe.
    pub fn binding(&self) -> Result<SimulatorBinding, SimulatorError> {
        let sim: Box<dyn Simulator> = match (&self.custom, self.simulator.eq_ignore_ascii_case("custom")) {
            (Some(custom), true) => Box::new(custom.clone()),
            _ => simulator::by_name(&self.simulator)?,
        };
        let binding = SimulatorBinding::new(sim);
        if let Some(exe) = &self.executable {
            binding.set_executable(exe.clone());
        }
        if let Some(name) = &self.process_name {
            binding.set_process_name(name);
        }
        Ok(binding)
    }
}


/// Defaults: four parallel runs, a ten minute timeout, ngspice.
pub fn default_settings() -> RunnerSettings {
    RunnerSettings {
        parallel_sims: 4,
        timeout_secs: Some(600.0),
        output_folder: None,
        simulator: "ngspice".into(),
        executable: None,
        process_name: None,
        switches: Vec::new(),
        custom: None,
        verbose: false,
        exe_log: false,
    }
}


/// Load and validate settings from a YAML file.
pub fn load(path: &Path) -> Result<RunnerSettings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}


/// Save settings to a YAML file.
pub fn save(path: &Path, settings: &RunnerSettings) -> Result<(), ConfigError> {
    let content = to_yaml(settings)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}


/// Parse settings from YAML text. Missing keys take their defaults; unknown
/// keys are rejected.
pub fn parse(content: &str) -> Result<RunnerSettings, ConfigError> {
    let settings: RunnerSettings = if content.trim().is_empty() {
        default_settings()
    } else {
        serde_yaml::from_str(content)?
    };
    settings.validate()?;
    Ok(settings)
}


pub fn to_yaml(settings: &RunnerSettings) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(settings)?)
}
