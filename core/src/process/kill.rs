//! Forced termination of simulator processes by name.
//!
//! The scheduler cannot map a timed-out task to its PID once the invoker owns
//! the child, so termination targets every process whose name matches the
//! simulator's process name.

/// Send SIGKILL to every process named `process_name`. Returns how many
/// processes were signalled.
#[cfg(target_os = "linux")]
pub fn kill_all(process_name: &str) -> usize {
    if process_name.is_empty() {
        tracing::warn!("No process name known for the simulator, nothing to kill");
        return 0;
    }

    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "Cannot enumerate processes");
            return 0;
        }
    };

    let own_pid = std::process::id();
    let mut killed = 0;
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid || !matches_name(pid, process_name) {
            continue;
        }
        tracing::info!(pid, process = process_name, "Killing simulator process");
        if unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) } == 0 {
            killed += 1;
        }
    }
    killed
}

#[cfg(not(target_os = "linux"))]
pub fn kill_all(process_name: &str) -> usize {
    tracing::error!(process = process_name, "Killing processes by name is not supported on this platform");
    0
}

/// `comm` is truncated to 15 bytes by the kernel, so fall back to the
/// basename of argv[0] for long names.
#[cfg(target_os = "linux")]
fn matches_name(pid: u32, process_name: &str) -> bool {
    let base = format!("/proc/{}", pid);
    if let Ok(comm) = std::fs::read_to_string(format!("{}/comm", base)) {
        if comm.trim_end() == process_name {
            return true;
        }
    }
    if let Ok(cmdline) = std::fs::read(format!("{}/cmdline", base)) {
        let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
        let argv0 = String::from_utf8_lossy(argv0);
        let name = std::path::Path::new(argv0.as_ref())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return name == process_name;
    }
    false
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    #[test]
    fn empty_name_kills_nothing() {
        assert_eq!(kill_all(""), 0);
    }

    #[test]
    fn unknown_name_kills_nothing() {
        assert_eq!(kill_all("no-such-simulator-xyz"), 0);
    }

    #[test]
    fn kills_processes_matching_the_name() {
        // A uniquely named copy of `sleep` so unrelated processes are safe.
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("simstub_sleep");
        let sleep = ["/bin/sleep", "/usr/bin/sleep"]
            .iter()
            .find(|p| std::path::Path::new(p).exists())
            .expect("sleep binary");
        std::fs::copy(sleep, &exe).unwrap();

        let mut child = Command::new(&exe)
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        // Give the exec a moment to land so /proc reflects the new image.
        std::thread::sleep(Duration::from_millis(100));
        assert!(kill_all("simstub_sleep") >= 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if child.try_wait().unwrap().is_some() {
                break;
            }
            assert!(Instant::now() < deadline, "child survived kill_all");
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}
