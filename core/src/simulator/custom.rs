//! A simulator described entirely by configuration.
//!
//! The argument template may reference `{netlist}`, `{log}` and `{raw}`;
//! configured switches are inserted verbatim after the executable.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::Simulator;
use crate::error::SimulatorError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Custom {
    pub name: String,
    pub candidates: Vec<String>,
    pub arguments: Vec<String>,
    #[serde(default = "default_raw_extension")]
    pub raw_extension: String,
}

fn default_raw_extension() -> String {
    ".raw".into()
}

impl Default for Custom {
    fn default() -> Self {
        Custom::new("custom", Vec::new(), vec!["{netlist}".into()])
    }
}

impl Custom {
    pub fn new(name: &str, candidates: Vec<String>, arguments: Vec<String>) -> Self {
        Custom {
            name: name.to_string(),
            candidates,
            arguments,
            raw_extension: default_raw_extension(),
        }
    }

    pub fn with_raw_extension(mut self, ext: &str) -> Self {
        self.raw_extension = ext.to_string();
        self
    }
}

impl Simulator for Custom {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_extension(&self) -> &str {
        &self.raw_extension
    }

    fn executable_candidates(&self) -> Vec<String> {
        self.candidates.clone()
    }

    fn valid_switch(&self, switch: &str, param: &str) -> Result<Vec<String>, SimulatorError> {
        let mut args = Vec::new();
        if !switch.trim().is_empty() {
            args.push(switch.trim().to_string());
        }
        if !param.trim().is_empty() {
            args.push(param.trim().to_string());
        }
        Ok(args)
    }

    fn command_line(&self, exe: &[String], netlist: &Path, switches: &[String]) -> Vec<String> {
        let raw_ext = self.raw_extension.trim_start_matches('.');
        let netlist_s = netlist.to_string_lossy();
        let log_s = netlist.with_extension("log").to_string_lossy().into_owned();
        let raw_s = netlist.with_extension(raw_ext).to_string_lossy().into_owned();

        let mut argv: Vec<String> = exe.to_vec();
        argv.extend(switches.iter().cloned());
        argv.extend(self.arguments.iter().map(|a| {
            a.replace("{netlist}", &netlist_s)
                .replace("{log}", &log_s)
                .replace("{raw}", &raw_s)
        }));
        argv
    }
}
