//! NGspice: batch mode with explicit log and raw outputs.

use std::path::Path;

use super::{expand_switch, Simulator, SwitchSpec};
use crate::error::SimulatorError;

const SWITCHES: &[SwitchSpec] = &[
    ("-c", &["-c", "<FILE>"]),
    ("--circuitfile", &["--circuitfile", "<FILE>"]),
    ("-D", &["-D", "<var_value>"]),
    ("--define", &["--define", "<var_value>"]),
    ("-i", &["-i"]),
    ("--interactive", &["--interactive"]),
    ("-n", &["-n"]),
    ("--no-spiceinit", &["--no-spiceinit"]),
    ("-q", &["-q"]),
    ("--completion", &["--completion"]),
    ("--soa-log", &["--soa-log", "<FILE>"]),
    ("-s", &["-s"]),
    ("--server", &["--server"]),
    ("-t", &["-t", "<TERM>"]),
    ("--term", &["--term", "<TERM>"]),
];

/// Filled in by the binding on every run.
const DEFAULT_SWITCHES: &[&str] = &["-b", "-o", "-r", "-a"];

/// NGspice dialect. Recent versions require an explicit compatibility mode;
/// `kiltpsa` covers KiCad, LTspice and PSPICE netlists.
#[derive(Debug, Clone)]
pub struct NGspice {
    pub compatibility_mode: Option<String>,
}

impl Default for NGspice {
    fn default() -> Self {
        NGspice {
            compatibility_mode: Some("kiltpsa".into()),
        }
    }
}

impl Simulator for NGspice {
    fn name(&self) -> &str {
        "NGspice"
    }

    fn executable_candidates(&self) -> Vec<String> {
        vec![
            "C:/Apps/NGSpice64/bin/ngspice.exe".into(),
            "C:/Spice64/ngspice.exe".into(),
            "/usr/local/bin/ngspice".into(),
            "ngspice".into(),
        ]
    }

    fn valid_switch(&self, switch: &str, param: &str) -> Result<Vec<String>, SimulatorError> {
        let trimmed = switch.trim();
        let is_define = matches!(trimmed, "-D" | "--define" | "D");
        if is_define {
            let param = param.trim();
            if self.compatibility_mode.is_some() && param.to_lowercase().starts_with("ngbehavior") {
                tracing::info!(
                    switch = trimmed,
                    param,
                    "Compatibility mode is already passed by default; change compatibility_mode instead"
                );
                return Ok(Vec::new());
            }
            if !param.contains('=') {
                tracing::warn!(switch = trimmed, param, "Invalid parameter for switch");
                return Ok(Vec::new());
            }
        }
        expand_switch(self.name(), SWITCHES, DEFAULT_SWITCHES, switch, param)
    }

    fn command_line(&self, exe: &[String], netlist: &Path, switches: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = exe.to_vec();
        argv.extend(switches.iter().cloned());
        if let Some(mode) = &self.compatibility_mode {
            argv.push("-D".into());
            argv.push(format!("ngbehavior={}", mode));
        }
        argv.push("-b".into());
        argv.push("-o".into());
        argv.push(netlist.with_extension("log").to_string_lossy().into_owned());
        argv.push("-r".into());
        argv.push(netlist.with_extension("raw").to_string_lossy().into_owned());
        argv.push(netlist.to_string_lossy().into_owned());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_layout() {
        let sim = NGspice::default();
        let argv = sim.command_line(
            &["ngspice".into()],
            Path::new("/out/amp_3.net"),
            &["-n".into()],
        );
        assert_eq!(
            argv,
            vec![
                "ngspice", "-n", "-D", "ngbehavior=kiltpsa", "-b", "-o", "/out/amp_3.log", "-r",
                "/out/amp_3.raw", "/out/amp_3.net",
            ]
        );
    }

    #[test]
    fn command_line_without_compatibility_mode() {
        let sim = NGspice { compatibility_mode: None };
        let argv = sim.command_line(&["ngspice".into()], Path::new("a.net"), &[]);
        assert!(!argv.iter().any(|a| a.starts_with("ngbehavior")));
    }

    #[test]
    fn define_requires_assignment() {
        let sim = NGspice::default();
        assert_eq!(sim.valid_switch("-D", "temp=27").unwrap(), vec!["-D", "temp=27"]);
        assert!(sim.valid_switch("-D", "temp").unwrap().is_empty());
    }

    #[test]
    fn ngbehavior_define_is_ignored() {
        let sim = NGspice::default();
        assert!(sim.valid_switch("--define", "ngbehavior=hs").unwrap().is_empty());
    }

    #[test]
    fn batch_switches_are_defaults() {
        let sim = NGspice::default();
        assert!(sim.valid_switch("-b", "").unwrap().is_empty());
        assert!(sim.valid_switch("-r", "").unwrap().is_empty());
    }

    #[test]
    fn file_switch_takes_parameter() {
        let sim = NGspice::default();
        assert_eq!(
            sim.valid_switch("--soa-log", "soa.txt").unwrap(),
            vec!["--soa-log", "soa.txt"]
        );
        assert!(sim.valid_switch("-x", "").is_err());
    }
}
