//! QSPICE: writes `.qraw` waveform files.

use std::path::Path;

use super::{expand_switch, Simulator, SwitchSpec};
use crate::error::SimulatorError;

const SWITCHES: &[SwitchSpec] = &[
    ("-ASCII", &["-ASCII"]),
    ("-ascii", &["-ASCII"]),
    ("-binary", &["-binary"]),
    ("-BSIM1", &["-BSIM1"]),
    ("-Meyer", &["-Meyer"]),
    ("-ProtectSelections", &["-ProtectSelections", "<path>"]),
    ("-ProtectSubcircuits", &["-ProtectSubcircuits", "<path>"]),
    ("-r", &["-r", "<path>"]),
];

const DEFAULT_SWITCHES: &[&str] = &["-o"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Qspice;

impl Simulator for Qspice {
    fn name(&self) -> &str {
        "QSPICE"
    }

    fn raw_extension(&self) -> &str {
        ".qraw"
    }

    fn executable_candidates(&self) -> Vec<String> {
        vec![
            "C:/Program Files/QSPICE/QSPICE64.exe".into(),
            "~/AppData/Local/Programs/QSPICE/QSPICE64.exe".into(),
            "QSPICE64.exe".into(),
        ]
    }

    fn valid_switch(&self, switch: &str, param: &str) -> Result<Vec<String>, SimulatorError> {
        expand_switch(self.name(), SWITCHES, DEFAULT_SWITCHES, switch, param)
    }

    fn command_line(&self, exe: &[String], netlist: &Path, switches: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = exe.to_vec();
        argv.extend(switches.iter().cloned());
        argv.push("-Run".into());
        argv.push("-o".into());
        argv.push(netlist.with_extension("log").to_string_lossy().into_owned());
        argv.push("-r".into());
        argv.push(netlist.with_extension("qraw").to_string_lossy().into_owned());
        argv.push(netlist.to_string_lossy().into_owned());
        argv
    }
}
