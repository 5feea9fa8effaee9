//! Stub simulators for tests: `/bin/sh` scripts behind a `Custom` binding.
//!
//! Scripts see the netlist, log and raw paths as their last three
//! arguments; switches come before them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::simulator::{Custom, SimulatorBinding};

const PROLOGUE: &str = "while [ $# -gt 3 ]; do shift; done; net=$1; log=$2; raw=$3; ";

/// A binding whose simulator behaves according to `mode`:
/// `ok`, `fail` (log + exit 1), `silent` (exit 0, no files), `slow`
/// (sleeps 5 s) or `delay` (sleeps 0.3 s, then `ok`).
pub(crate) fn stub_binding(mode: &str) -> Arc<SimulatorBinding> {
    let body = match mode {
        "ok" => "echo \"vout: MAX(v(out))=1.5 FROM 0 TO 1\" > \"$log\"; echo \"RAW $net\" > \"$raw\"",
        "fail" => "echo 'Error: singular matrix' > \"$log\"; exit 1",
        "silent" => "exit 0",
        "slow" => "sleep 5; echo ok > \"$log\"; echo raw > \"$raw\"",
        "delay" => "sleep 0.3; echo ok > \"$log\"; echo raw > \"$raw\"",
        other => other,
    };
    script_binding(body)
}

/// A binding running an arbitrary script body.
pub(crate) fn script_binding(body: &str) -> Arc<SimulatorBinding> {
    let sim = Custom::new(
        "stub",
        Vec::new(),
        vec!["{netlist}".into(), "{log}".into(), "{raw}".into()],
    );
    let exe = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("{}{}", PROLOGUE, body),
        "simstub".to_string(),
    ];
    Arc::new(SimulatorBinding::with_executable(Box::new(sim), exe))
}

/// A binding that runs a private copy of `sleep` named `name`, so forced
/// termination by process name only hits processes started by the test.
pub(crate) fn sleeper_binding(dir: &Path, name: &str, secs: u32) -> Arc<SimulatorBinding> {
    let exe = dir.join(name);
    let sleep = ["/bin/sleep", "/usr/bin/sleep"]
        .iter()
        .find(|p| Path::new(p).exists())
        .expect("sleep binary");
    std::fs::copy(sleep, &exe).expect("copy sleep");
    let sim = Custom::new("sleeper", Vec::new(), vec![secs.to_string()]);
    Arc::new(SimulatorBinding::with_executable(
        Box::new(sim),
        vec![exe.to_string_lossy().into_owned()],
    ))
}

pub(crate) fn write_netlist(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "* test circuit\nV1 in 0 1\nR1 in out 1k\n.end\n").expect("write netlist");
    path
}
