//! LTspice: always run with `-Run -b`.

use std::path::Path;

use super::{expand_switch, Simulator, SwitchSpec};
use crate::error::SimulatorError;

const SWITCHES: &[SwitchSpec] = &[
    ("-alt", &["-alt"]),
    ("-ascii", &["-ascii"]),
    ("-big", &["-big"]),
    ("-encrypt", &["-encrypt"]),
    ("-fastaccess", &["-FastAccess"]),
    ("-FastAccess", &["-FastAccess"]),
    ("-FixUpSchematicFonts", &["-FixUpSchematicFonts"]),
    ("-FixUpSymbolFonts", &["-FixUpSymbolFonts"]),
    ("-ini", &["-ini", "<path>"]),
    ("-I", &["-I<path>"]),
    ("-max", &["-max"]),
    ("-netlist", &["-netlist"]),
    ("-norm", &["-norm"]),
    ("-PCBnetlist", &["-PCBnetlist"]),
    ("-SOI", &["-SOI"]),
    ("-sync", &["-sync"]),
];

const DEFAULT_SWITCHES: &[&str] = &["-Run", "-b"];

/// LTspice dialect. On Linux it normally runs under wine; bind it with an
/// explicit `["wine", ".../XVIIx64.exe"]` executable in that case.
#[derive(Debug, Clone, Copy, Default)]
pub struct LTspice;

impl Simulator for LTspice {
    fn name(&self) -> &str {
        "LTspice"
    }

    fn executable_candidates(&self) -> Vec<String> {
        vec![
            "C:/Program Files/ADI/LTspice/LTspice.exe".into(),
            "C:/Program Files/LTC/LTspiceXVII/XVIIx64.exe".into(),
            "/Applications/LTspice.app/Contents/MacOS/LTspice".into(),
            "ltspice".into(),
        ]
    }

    fn valid_switch(&self, switch: &str, param: &str) -> Result<Vec<String>, SimulatorError> {
        expand_switch(self.name(), SWITCHES, DEFAULT_SWITCHES, switch, param)
    }

    fn command_line(&self, exe: &[String], netlist: &Path, switches: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = exe.to_vec();
        argv.push("-Run".into());
        argv.push("-b".into());
        argv.push(netlist.to_string_lossy().into_owned());
        argv.extend(switches.iter().cloned());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_puts_switches_last() {
        let argv = LTspice.command_line(
            &["wine".into(), "XVIIx64.exe".into()],
            Path::new("c_1.net"),
            &["-ascii".into()],
        );
        assert_eq!(argv, vec!["wine", "XVIIx64.exe", "-Run", "-b", "c_1.net", "-ascii"]);
    }

    #[test]
    fn switch_normalization() {
        assert_eq!(LTspice.valid_switch("fastaccess", "").unwrap(), vec!["-FastAccess"]);
        assert_eq!(LTspice.valid_switch("-I", "/models").unwrap(), vec!["-I/models"]);
        assert!(LTspice.valid_switch("-Run", "").unwrap().is_empty());
        assert!(LTspice.valid_switch("-nope", "").is_err());
    }
}
