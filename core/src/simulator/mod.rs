//! Simulator bindings: executable discovery and command-line dialects behind the
//! `run(file, switches, timeout, exe_log) -> exit_code` contract.
//!
//! A `Simulator` describes one tool's dialect. A `SimulatorBinding` pairs a
//! dialect with a lazily resolved executable and is shared by reference
//! between the scheduler and every task it creates.

pub mod custom;
pub mod ltspice;
pub mod ngspice;
pub mod qspice;
pub mod xyce;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::SimulatorError;
use crate::process::{self, OutputTarget};

pub use custom::Custom;
pub use ltspice::LTspice;
pub use ngspice::NGspice;
pub use qspice::Qspice;
pub use xyce::Xyce;

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Command-line dialect of one simulator family.
pub trait Simulator: Send + Sync + fmt::Debug {
    /// Human-readable name, used in logs and errors.
    fn name(&self) -> &str;

    /// Extension of the waveform file written next to the netlist.
    fn raw_extension(&self) -> &str {
        ".raw"
    }

    /// Locations probed when no executable has been configured. Entries
    /// without a path separator are looked up on `PATH`.
    fn executable_candidates(&self) -> Vec<String>;

    /// Validate one switch and return its normalized arguments. Switches the
    /// binding always passes itself yield an empty list.
    fn valid_switch(&self, switch: &str, param: &str) -> Result<Vec<String>, SimulatorError>;

    /// Full argv for simulating `netlist` with executable prefix `exe`.
    fn command_line(&self, exe: &[String], netlist: &Path, switches: &[String]) -> Vec<String>;
}

/// Look up a built-in simulator by its configuration name.
pub fn by_name(name: &str) -> Result<Box<dyn Simulator>, SimulatorError> {
    match name.to_ascii_lowercase().as_str() {
        "ngspice" => Ok(Box::new(NGspice::default())),
        "ltspice" => Ok(Box::new(LTspice)),
        "qspice" => Ok(Box::new(Qspice)),
        "xyce" => Ok(Box::new(Xyce)),
        "custom" => Ok(Box::new(Custom::default())),
        _ => Err(SimulatorError::UnknownSimulator(name.to_string())),
    }
}

// ---------------------------------------------------------------------------
// SimulatorBinding
// ---------------------------------------------------------------------------

/// A simulator dialect plus the executable it runs.
///
/// The executable is resolved at most once: either set explicitly, or
/// discovered from the dialect's candidates on first use.
#[derive(Debug)]
pub struct SimulatorBinding {
    simulator: Box<dyn Simulator>,
    executable: Mutex<Option<Vec<String>>>,
    process_name: Mutex<Option<String>>,
}

impl SimulatorBinding {
    /// Bind a dialect whose executable is discovered on first use.
    pub fn new(simulator: Box<dyn Simulator>) -> Self {
        SimulatorBinding {
            simulator,
            executable: Mutex::new(None),
            process_name: Mutex::new(None),
        }
    }

    /// Bind a dialect to an explicit executable argv prefix (e.g.
    /// `["wine", "C:/LTspice/XVIIx64.exe"]`).
    pub fn with_executable(simulator: Box<dyn Simulator>, exe: Vec<String>) -> Self {
        let binding = SimulatorBinding::new(simulator);
        binding.set_executable(exe);
        binding
    }

    pub fn simulator(&self) -> &dyn Simulator {
        self.simulator.as_ref()
    }

    pub fn name(&self) -> &str {
        self.simulator.name()
    }

    pub fn raw_extension(&self) -> &str {
        self.simulator.raw_extension()
    }

    /// Override the executable. The process name follows unless it was set
    /// explicitly.
    pub fn set_executable(&self, exe: Vec<String>) {
        *lock(&self.executable) = Some(exe);
    }

    /// Override the process name used by forced termination.
    pub fn set_process_name(&self, name: &str) {
        *lock(&self.process_name) = Some(name.to_string());
    }

    /// The configured executable, if resolved.
    pub fn executable(&self) -> Option<Vec<String>> {
        lock(&self.executable).clone()
    }

    /// Return the executable, discovering it first if unset.
    pub fn resolve_executable(&self) -> Result<Vec<String>, SimulatorError> {
        let mut slot = lock(&self.executable);
        if let Some(exe) = slot.as_ref() {
            return Ok(exe.clone());
        }
        let found = self
            .simulator
            .executable_candidates()
            .iter()
            .find_map(|c| find_executable(c))
            .ok_or_else(|| SimulatorError::ExecutableNotFound {
                simulator: self.name().to_string(),
            })?;
        tracing::debug!(simulator = self.name(), exe = %found.display(), "Found simulator executable");
        let exe = vec![found.to_string_lossy().into_owned()];
        *slot = Some(exe.clone());
        Ok(exe)
    }

    pub fn is_available(&self) -> bool {
        self.resolve_executable().is_ok()
    }

    /// Name matched by forced termination: explicit, or the file name of the
    /// last executable argument.
    pub fn process_name(&self) -> Option<String> {
        if let Some(name) = lock(&self.process_name).clone() {
            return Some(name);
        }
        self.executable().as_deref().and_then(guess_process_name)
    }

    pub fn valid_switch(&self, switch: &str, param: &str) -> Result<Vec<String>, SimulatorError> {
        self.simulator.valid_switch(switch, param)
    }

    /// Simulate `netlist`, producing sibling raw and log files.
    ///
    /// With `exe_log` the console output goes to `<netlist>.exe.log`.
    pub fn run(
        &self,
        netlist: &Path,
        switches: &[String],
        timeout: Option<Duration>,
        exe_log: bool,
    ) -> Result<i32, SimulatorError> {
        let exe = match self.resolve_executable() {
            Ok(exe) => exe,
            Err(e) => {
                tracing::error!(
                    simulator = self.name(),
                    "Unable to find the simulator executable; configure one explicitly"
                );
                return Err(e);
            }
        };
        let argv = self.simulator.command_line(&exe, netlist, switches);
        let (stdout, stderr) = if exe_log {
            OutputTarget::exe_log(&netlist.with_extension("exe.log"))?
        } else {
            (OutputTarget::Inherit, OutputTarget::Inherit)
        };
        Ok(process::invoke(&argv, timeout, stdout, stderr)?)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn guess_process_name(exe: &[String]) -> Option<String> {
    let last = exe.last()?;
    Path::new(last)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Resolve a candidate to an existing file, searching `PATH` for bare names.
fn find_executable(candidate: &str) -> Option<PathBuf> {
    let expanded = match candidate.strip_prefix("~/") {
        Some(rest) => PathBuf::from(std::env::var_os("HOME")?).join(rest),
        None => PathBuf::from(candidate),
    };
    if expanded.components().count() > 1 {
        return expanded.is_file().then_some(expanded);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(&expanded))
        .find(|p| p.is_file())
}

// ---------------------------------------------------------------------------
// Switch tables
// ---------------------------------------------------------------------------

/// One entry of a switch table: the accepted switch and the argv it expands
/// to. Placeholders of the form `<...>` are replaced by the parameter.
pub(crate) type SwitchSpec = (&'static str, &'static [&'static str]);

/// Normalize `switch` against `table`. Blank switches and switches in
/// `defaults` produce no arguments; unknown switches are rejected.
pub(crate) fn expand_switch(
    simulator: &str,
    table: &[SwitchSpec],
    defaults: &[&str],
    switch: &str,
    param: &str,
) -> Result<Vec<String>, SimulatorError> {
    let switch = switch.trim();
    if switch.is_empty() {
        return Ok(Vec::new());
    }
    let switch = if switch.starts_with('-') {
        switch.to_string()
    } else {
        format!("-{}", switch)
    };

    if defaults.contains(&switch.as_str()) {
        tracing::info!(simulator, switch = %switch, "Switch is already in the default switches");
        return Ok(Vec::new());
    }

    let (_, expansion) = table
        .iter()
        .find(|(name, _)| *name == switch)
        .ok_or_else(|| SimulatorError::InvalidSwitch {
            simulator: simulator.to_string(),
            switch: switch.clone(),
        })?;

    let param = param.trim();
    Ok(expansion
        .iter()
        .map(|arg| replace_placeholder(arg, param))
        .collect())
}

fn replace_placeholder(arg: &str, param: &str) -> String {
    match (arg.find('<'), arg.rfind('>')) {
        (Some(start), Some(end)) if start < end => {
            format!("{}{}{}", &arg[..start], param, &arg[end + 1..])
        }
        _ => arg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[SwitchSpec] = &[
        ("-ascii", &["-ascii"]),
        ("-ini", &["-ini", "<path>"]),
        ("-I", &["-I<path>"]),
    ];

    #[test]
    fn expand_known_switch() {
        let args = expand_switch("t", TABLE, &[], "-ascii", "").unwrap();
        assert_eq!(args, vec!["-ascii"]);
    }

    #[test]
    fn expand_adds_missing_dash_and_parameter() {
        let args = expand_switch("t", TABLE, &[], "ini", " /tmp/x.ini ").unwrap();
        assert_eq!(args, vec!["-ini", "/tmp/x.ini"]);
    }

    #[test]
    fn expand_inline_placeholder() {
        let args = expand_switch("t", TABLE, &[], "-I", "/lib").unwrap();
        assert_eq!(args, vec!["-I/lib"]);
    }

    #[test]
    fn default_switch_yields_nothing() {
        let args = expand_switch("t", TABLE, &["-b"], "-b", "").unwrap();
        assert!(args.is_empty());
        assert!(expand_switch("t", TABLE, &[], "  ", "").unwrap().is_empty());
    }

    #[test]
    fn unknown_switch_is_rejected() {
        let err = expand_switch("t", TABLE, &[], "-bogus", "").unwrap_err();
        assert!(matches!(err, SimulatorError::InvalidSwitch { .. }));
    }

    #[test]
    fn by_name_is_case_insensitive() {
        assert_eq!(by_name("NGspice").unwrap().name(), "NGspice");
        assert_eq!(by_name("qspice").unwrap().raw_extension(), ".qraw");
        assert!(matches!(
            by_name("spectre").unwrap_err(),
            SimulatorError::UnknownSimulator(_)
        ));
    }

    #[test]
    fn explicit_executable_wins_over_discovery() {
        let binding = SimulatorBinding::with_executable(
            Box::new(NGspice::default()),
            vec!["/opt/ngspice/bin/ngspice".into()],
        );
        assert_eq!(binding.resolve_executable().unwrap(), vec!["/opt/ngspice/bin/ngspice"]);
        assert_eq!(binding.process_name().as_deref(), Some("ngspice"));
    }

    #[test]
    fn process_name_override() {
        let binding = SimulatorBinding::with_executable(
            Box::new(LTspice),
            vec!["wine".into(), "C:/LTspice/XVIIx64.exe".into()],
        );
        assert_eq!(binding.process_name().as_deref(), Some("XVIIx64.exe"));
        binding.set_process_name("wine-preloader");
        assert_eq!(binding.process_name().as_deref(), Some("wine-preloader"));
    }

    #[test]
    fn discovery_failure_is_reported() {
        let binding = SimulatorBinding::new(Box::new(Custom::new(
            "nothing",
            vec!["/no/such/dir/fake-spice".into()],
            vec!["{netlist}".into()],
        )));
        let err = binding.resolve_executable().unwrap_err();
        assert!(matches!(err, SimulatorError::ExecutableNotFound { .. }));
        assert!(!binding.is_available());
    }

    #[cfg(unix)]
    #[test]
    fn discovery_searches_path() {
        let binding = SimulatorBinding::new(Box::new(Custom::new(
            "shell",
            vec!["sh".into()],
            vec!["{netlist}".into()],
        )));
        let exe = binding.resolve_executable().unwrap();
        assert!(exe[0].ends_with("/sh"));
    }
}
