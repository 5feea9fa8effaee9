//! Xyce: log via `-l`, raw via `-r`.

use std::path::Path;

use super::{expand_switch, Simulator, SwitchSpec};
use crate::error::SimulatorError;

const SWITCHES: &[SwitchSpec] = &[
    ("-capabilities", &["-capabilities"]),
    ("-license", &["-license"]),
    ("-param", &["-param", "<param_options>"]),
    ("-doc", &["-doc", "<param_options>"]),
    ("-doc_cat", &["-doc_cat", "<param_options>"]),
    ("-count", &["-count"]),
    ("-syntax", &["-syntax"]),
    ("-norun", &["-norun"]),
    ("-namesfile", &["-namesfile", "<path>"]),
    ("-noise_names_file", &["-noise_names_file", "<path>"]),
    ("-quiet", &["-quiet"]),
    ("-jacobian_test", &["-jacobian_test"]),
    ("-hspice-ext", &["-hspice-ext", "<hsext_options>"]),
    ("-redefined_params", &["-redefined_params", "<redef_param_option>"]),
    ("-subckt_multiplier", &["-subckt_multiplier", "<truefalse_option>"]),
    ("-delim", &["-delim", "<delim_option>"]),
    ("-o", &["-o", "<basename>"]),
    ("-per-processor", &["-per-processor"]),
    ("-remeasure", &["-remeasure", "<path>"]),
    ("-nox", &["-nox", "<onoff_option>"]),
    ("-linsolv", &["-linsolv", "<solver>"]),
    ("-maxord", &["-maxord", "<int_option>"]),
    ("-max-warnings", &["-max-warnings", "<int_option>"]),
    ("-prf", &["-prf", "<path>"]),
    ("-rsf", &["-rsf", "<path>"]),
    ("-a", &["-a"]),
    ("-randseed", &["-randseed", "<int_option>"]),
    ("-plugin", &["-plugin", "<plugin_list>"]),
];

const DEFAULT_SWITCHES: &[&str] = &["-l", "-r"];

const REDEFINED_PARAM_OPTIONS: &[&str] = &["ignore", "uselast", "usefirst", "warn", "error"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Xyce;

impl Simulator for Xyce {
    fn name(&self) -> &str {
        "Xyce"
    }

    fn executable_candidates(&self) -> Vec<String> {
        vec![
            "C:/Program Files/Xyce 7.9 NORAD/bin/xyce.exe".into(),
            "Xyce".into(),
            "xyce".into(),
        ]
    }

    fn valid_switch(&self, switch: &str, param: &str) -> Result<Vec<String>, SimulatorError> {
        let name = switch.trim().trim_start_matches('-');
        match name {
            "redefined_params" if !REDEFINED_PARAM_OPTIONS.contains(&param.trim()) => {
                tracing::warn!(switch, param, "Invalid parameter for switch");
                return Ok(Vec::new());
            }
            "nox" if !matches!(param.trim(), "on" | "off") => {
                tracing::warn!(switch, param, "Invalid parameter for switch");
                return Ok(Vec::new());
            }
            "subckt_multiplier" if !matches!(param.trim(), "true" | "false") => {
                tracing::warn!(switch, param, "Invalid parameter for switch");
                return Ok(Vec::new());
            }
            "maxord" | "max-warnings" | "randseed" if param.trim().parse::<i64>().is_err() => {
                tracing::warn!(switch, param, "Invalid parameter for switch");
                return Ok(Vec::new());
            }
            _ => {}
        }
        expand_switch(self.name(), SWITCHES, DEFAULT_SWITCHES, switch, param)
    }

    fn command_line(&self, exe: &[String], netlist: &Path, switches: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = exe.to_vec();
        argv.extend(switches.iter().cloned());
        argv.push("-l".into());
        argv.push(netlist.with_extension("log").to_string_lossy().into_owned());
        argv.push("-r".into());
        argv.push(netlist.with_extension("raw").to_string_lossy().into_owned());
        argv.push(netlist.to_string_lossy().into_owned());
        argv
    }
}
