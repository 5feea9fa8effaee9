//! Runs one external command to completion, with an optional hard timeout.

use std::fs::File;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::InvokeError;

/// How often a running child is polled when a timeout is in force.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where a child's stdout or stderr goes.
#[derive(Debug)]
pub enum OutputTarget {
    /// Share the parent's stream (the console).
    Inherit,
    /// Discard.
    Null,
    /// Write into an already-open file.
    File(File),
}

impl OutputTarget {
    /// Open `path` for the combined console output of a simulator run and
    /// return a (stdout, stderr) pair writing to the same file.
    pub fn exe_log(path: &Path) -> Result<(OutputTarget, OutputTarget), InvokeError> {
        let file = File::create(path).map_err(|source| InvokeError::ExeLog {
            path: path.to_path_buf(),
            source,
        })?;
        let err = file.try_clone().map_err(|source| InvokeError::ExeLog {
            path: path.to_path_buf(),
            source,
        })?;
        Ok((OutputTarget::File(file), OutputTarget::File(err)))
    }

    fn into_stdio(self) -> Stdio {
        match self {
            OutputTarget::Inherit => Stdio::inherit(),
            OutputTarget::Null => Stdio::null(),
            OutputTarget::File(f) => Stdio::from(f),
        }
    }
}

/// Spawn `argv`, wait for it to exit and return its exit code.
///
/// With a timeout the child is killed and reaped once the timeout elapses and
/// the call fails with `InvokeError::TimeoutExceeded`. A child terminated by a
/// signal reports the negated signal number.
pub fn invoke(
    argv: &[String],
    timeout: Option<Duration>,
    stdout: OutputTarget,
    stderr: OutputTarget,
) -> Result<i32, InvokeError> {
    let (program, args) = argv.split_first().ok_or(InvokeError::EmptyCommand)?;

    tracing::debug!(command = ?argv, ?timeout, "Spawning external process");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout.into_stdio())
        .stderr(stderr.into_stdio())
        .spawn()
        .map_err(|source| InvokeError::Spawn {
            program: program.clone(),
            source,
        })?;

    let wait_err = |source| InvokeError::Wait {
        program: program.clone(),
        source,
    };

    let Some(timeout) = timeout else {
        let status = child.wait().map_err(wait_err)?;
        return Ok(exit_code(status));
    };

    let started = Instant::now();
    loop {
        match child.try_wait().map_err(wait_err)? {
            Some(status) => return Ok(exit_code(status)),
            None if started.elapsed() >= timeout => {
                tracing::warn!(pid = child.id(), ?timeout, program = %program, "Process timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(InvokeError::TimeoutExceeded {
                    program: program.clone(),
                    timeout,
                });
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(1))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn reports_exit_code() {
        let code = invoke(&sh("exit 0"), None, OutputTarget::Null, OutputTarget::Null).unwrap();
        assert_eq!(code, 0);
        let code = invoke(&sh("exit 3"), None, OutputTarget::Null, OutputTarget::Null).unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn timeout_kills_the_child() {
        let started = Instant::now();
        let err = invoke(
            &sh("sleep 5"),
            Some(Duration::from_millis(200)),
            OutputTarget::Null,
            OutputTarget::Null,
        )
        .unwrap_err();
        assert!(matches!(err, InvokeError::TimeoutExceeded { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn finishes_before_timeout() {
        let code = invoke(
            &sh("exit 0"),
            Some(Duration::from_secs(5)),
            OutputTarget::Null,
            OutputTarget::Null,
        )
        .unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = invoke(&[], None, OutputTarget::Null, OutputTarget::Null).unwrap_err();
        assert!(matches!(err, InvokeError::EmptyCommand));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let argv = vec!["/definitely/not/a/simulator".to_string()];
        let err = invoke(&argv, None, OutputTarget::Null, OutputTarget::Null).unwrap_err();
        assert!(matches!(err, InvokeError::Spawn { .. }));
    }

    #[test]
    fn exe_log_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.exe.log");
        let (out, err) = OutputTarget::exe_log(&log).unwrap();
        invoke(&sh("echo to-stdout; echo to-stderr 1>&2"), None, out, err).unwrap();
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("to-stdout"));
        assert!(text.contains("to-stderr"));
    }

    #[test]
    fn signalled_child_reports_negative_code() {
        let code = invoke(&sh("kill -9 $$"), None, OutputTarget::Null, OutputTarget::Null).unwrap();
        assert_eq!(code, -9);
    }
}
