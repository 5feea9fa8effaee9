//! One scheduled simulation and its lifecycle.
//!
//! A task runs exactly once:
//! `Unstarted -> Running -> {Succeeded, Failed}`, and a successful run with
//! a callback continues `CallbackRunning -> CallbackDone`. Callback failures
//! are logged and never demote the task.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use super::callback::{panic_message, Callback, CallbackKwargs};
use crate::error::{InvokeError, SimulatorError};
use crate::simulator::SimulatorBinding;

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

/// Outcome of the simulator process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum ReturnCode {
    /// Not finished yet.
    Unset,
    /// The process exited (negative codes are signals).
    Exited(i32),
    /// Killed after exceeding the task timeout.
    TimedOut,
    /// The process could not be started.
    LaunchFailed,
}

impl ReturnCode {
    pub fn is_set(&self) -> bool {
        !matches!(self, ReturnCode::Unset)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReturnCode::Exited(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Unstarted,
    Running,
    Succeeded,
    Failed,
    CallbackRunning,
    CallbackDone,
}

impl TaskPhase {
    /// Whether results are final.
    pub fn is_resolved(&self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed | TaskPhase::CallbackDone)
    }
}

/// What a finished task hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskResult {
    /// No callback configured: the artifact paths.
    Files {
        raw: Option<PathBuf>,
        log: Option<PathBuf>,
    },
    /// The callback's return value.
    Value(Value),
}

#[derive(Debug)]
struct TaskState {
    phase: TaskPhase,
    return_code: ReturnCode,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    raw_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
    callback_return: Option<Value>,
}

// ---------------------------------------------------------------------------
// SimulationTask
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SimulationTask {
    run_number: u64,
    netlist_file: PathBuf,
    simulator: Arc<SimulatorBinding>,
    switches: Vec<String>,
    timeout: Option<Duration>,
    callback: Option<Callback>,
    callback_kwargs: CallbackKwargs,
    exe_log: bool,
    submitted_at: Instant,
    state: Mutex<TaskState>,
    resolved: Condvar,
}

impl SimulationTask {
    pub fn new(run_number: u64, netlist_file: PathBuf, simulator: Arc<SimulatorBinding>) -> Self {
        SimulationTask {
            run_number,
            netlist_file,
            simulator,
            switches: Vec::new(),
            timeout: None,
            callback: None,
            callback_kwargs: CallbackKwargs::new(),
            exe_log: false,
            submitted_at: Instant::now(),
            state: Mutex::new(TaskState {
                phase: TaskPhase::Unstarted,
                return_code: ReturnCode::Unset,
                started_at: None,
                stopped_at: None,
                raw_file: None,
                log_file: None,
                callback_return: None,
            }),
            resolved: Condvar::new(),
        }
    }

    pub fn with_switches(mut self, switches: Vec<String>) -> Self {
        self.switches = switches;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_callback(mut self, callback: Option<Callback>, kwargs: CallbackKwargs) -> Self {
        self.callback = callback;
        self.callback_kwargs = kwargs;
        self
    }

    pub fn with_exe_log(mut self, exe_log: bool) -> Self {
        self.exe_log = exe_log;
        self
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!("task", run = self.run_number, netlist = %self.netlist_file.display())
    }

    /// Run the simulation on the current thread, then the callback.
    ///
    /// Launch failures and timeouts are returned for the caller to record
    /// with `record_failure`. A second call does nothing.
    pub fn execute(&self) -> Result<(), SimulatorError> {
        let span = self.span();
        let _enter = span.enter();
        {
            let mut st = self.lock();
            if st.phase != TaskPhase::Unstarted {
                tracing::warn!(phase = ?st.phase, "Task already executed");
                return Ok(());
            }
            st.phase = TaskPhase::Running;
            st.started_at = Some(Instant::now());
        }
        tracing::info!(simulator = self.simulator.name(), "Starting simulation");

        let code = self
            .simulator
            .run(&self.netlist_file, &self.switches, self.timeout, self.exe_log)?;
        self.finish(code);
        Ok(())
    }

    /// Record a run that never produced an exit code.
    pub fn record_failure(&self, error: &SimulatorError) {
        let code = match error {
            SimulatorError::Invoke(InvokeError::TimeoutExceeded { .. }) => ReturnCode::TimedOut,
            _ => ReturnCode::LaunchFailed,
        };
        let span = self.span();
        let _enter = span.enter();
        self.fail(code, &error.to_string());
    }

    fn fail(&self, code: ReturnCode, reason: &str) {
        let log_file = self.fail_log();
        let mut st = self.lock();
        if st.phase.is_resolved() {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(st.started_at.unwrap_or(self.submitted_at));
        st.stopped_at = Some(now);
        st.return_code = code;
        st.phase = TaskPhase::Failed;
        if log_file.is_some() {
            st.log_file = log_file;
        }
        drop(st);
        tracing::error!(
            return_code = ?code,
            elapsed = %format_elapsed(elapsed),
            reason,
            "Simulation aborted"
        );
        self.resolved.notify_all();
    }

    /// Rename `<netlist>.log` to `<netlist>.fail` if the simulator wrote one.
    fn fail_log(&self) -> Option<PathBuf> {
        let log = self.netlist_file.with_extension("log");
        if !log.exists() {
            return None;
        }
        let fail = self.netlist_file.with_extension("fail");
        match std::fs::rename(&log, &fail) {
            Ok(()) => Some(fail),
            Err(e) => {
                tracing::warn!(error = %e, log = %log.display(), "Cannot rename failed log");
                Some(log)
            }
        }
    }

    fn finish(&self, code: i32) {
        if code != 0 {
            self.fail(ReturnCode::Exited(code), "simulator returned a non-zero exit code");
            return;
        }

        let log = self.netlist_file.with_extension("log");
        let raw = self
            .netlist_file
            .with_extension(self.simulator.raw_extension().trim_start_matches('.'));
        let found = raw.exists() && log.exists();

        let mut st = self.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(st.started_at.unwrap_or(self.submitted_at));
        st.stopped_at = Some(now);
        st.return_code = ReturnCode::Exited(0);

        if !found {
            st.phase = TaskPhase::Succeeded;
            drop(st);
            tracing::error!(raw = %raw.display(), log = %log.display(), "Simulation raw file or log file were not found");
            self.resolved.notify_all();
            return;
        }

        st.raw_file = Some(raw.clone());
        st.log_file = Some(log.clone());
        let Some(callback) = &self.callback else {
            st.phase = TaskPhase::Succeeded;
            drop(st);
            tracing::info!(elapsed = %format_elapsed(elapsed), "Simulation successful, no callback given");
            self.resolved.notify_all();
            return;
        };
        st.phase = TaskPhase::CallbackRunning;
        drop(st);

        tracing::info!(
            elapsed = %format_elapsed(elapsed),
            kwargs = ?self.callback_kwargs,
            "Simulation successful, calling callback"
        );
        let callback_started = Instant::now();
        let outcome = callback.invoke(&raw, &log, &self.callback_kwargs);

        let mut st = self.lock();
        match outcome {
            Ok(value) => st.callback_return = value,
            Err(e) => tracing::error!(error = %e, "Exception during callback execution"),
        }
        st.stopped_at = Some(Instant::now());
        st.phase = TaskPhase::CallbackDone;
        drop(st);
        tracing::info!(elapsed = %format_elapsed(callback_started.elapsed()), "Callback finished");
        self.resolved.notify_all();
    }

    /// Final results, or `None` while the task is unresolved.
    ///
    /// With a callback this is the callback's value (`None` if it failed or
    /// the run failed); without one, the artifact paths.
    pub fn get_results(&self) -> Option<TaskResult> {
        let st = self.lock();
        if !st.phase.is_resolved() {
            return None;
        }
        if self.callback.is_some() {
            if !st.return_code.is_success() {
                return None;
            }
            return st.callback_return.clone().map(TaskResult::Value);
        }
        Some(TaskResult::Files {
            raw: st.raw_file.clone(),
            log: st.log_file.clone(),
        })
    }

    /// Block until resolved, then return `get_results()`.
    pub fn wait_results(&self) -> Option<TaskResult> {
        let mut st = self.lock();
        while !st.phase.is_resolved() {
            st = self.resolved.wait(st).unwrap_or_else(|e| e.into_inner());
        }
        drop(st);
        self.get_results()
    }

    /// Like `wait_results` but gives up after `timeout`.
    pub fn wait_results_timeout(&self, timeout: Duration) -> Option<TaskResult> {
        let st = self.lock();
        let (st, _) = self
            .resolved
            .wait_timeout_while(st, timeout, |s| !s.phase.is_resolved())
            .unwrap_or_else(|e| e.into_inner());
        drop(st);
        self.get_results()
    }

    pub fn run_number(&self) -> u64 {
        self.run_number
    }

    pub fn netlist_file(&self) -> &Path {
        &self.netlist_file
    }

    pub fn simulator(&self) -> &SimulatorBinding {
        &self.simulator
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn phase(&self) -> TaskPhase {
        self.lock().phase
    }

    pub fn is_resolved(&self) -> bool {
        self.phase().is_resolved()
    }

    pub fn return_code(&self) -> ReturnCode {
        self.lock().return_code
    }

    pub fn raw_file(&self) -> Option<PathBuf> {
        self.lock().raw_file.clone()
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.lock().log_file.clone()
    }

    pub fn callback_return(&self) -> Option<Value> {
        self.lock().callback_return.clone()
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.lock().started_at
    }

    pub fn stopped_at(&self) -> Option<Instant> {
        self.lock().stopped_at
    }

    /// Start-to-stop time, including the callback.
    pub fn duration(&self) -> Option<Duration> {
        let st = self.lock();
        Some(st.stopped_at?.duration_since(st.started_at?))
    }

    /// Every file this run may have left behind.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        let net = &self.netlist_file;
        let raw_ext = self.simulator.raw_extension().trim_start_matches('.');
        let mut paths = vec![
            net.clone(),
            net.with_extension("log"),
            net.with_extension("fail"),
            net.with_extension("exe.log"),
            net.with_extension(raw_ext),
        ];
        {
            let st = self.lock();
            paths.extend(st.raw_file.iter().cloned());
            paths.extend(st.log_file.iter().cloned());
        }
        let ext = net.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if ext.eq_ignore_ascii_case("net") || ext.eq_ignore_ascii_case("asc") {
            paths.push(net.with_extension("log.raw"));
            paths.push(net.with_extension("op.raw"));
        }
        if ext.eq_ignore_ascii_case("asc") {
            paths.push(net.with_extension("net"));
        }
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Execute `task` on the current thread, recording launch failures,
/// timeouts and panics as a failed run.
pub(crate) fn run_task(task: &SimulationTask) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.execute()));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => task.record_failure(&e),
        Err(payload) => {
            let span = task.span();
            let _enter = span.enter();
            task.fail(ReturnCode::LaunchFailed, &panic_message(payload.as_ref()));
        }
    }
}

/// `SS.mmm secs`, `MM:SS.mmm` or `HH:MM:SS.mmm`.
pub fn format_elapsed(d: Duration) -> String {
    let total = d.as_secs();
    let millis = d.subsec_millis();
    let (hours, rem) = (total / 3600, total % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else if minutes > 0 {
        format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
    } else {
        format!("{:02}.{:03} secs", seconds, millis)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sim::testing::{stub_binding, write_netlist};
    use crate::sim::ProcessCallback;
    use serde_json::json;

    #[test]
    fn format_elapsed_drops_empty_units() {
        assert_eq!(format_elapsed(Duration::from_millis(5_250)), "05.250 secs");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "02:05.000");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "01:02:05.000");
    }

    #[test]
    fn unexecuted_task_has_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let task = SimulationTask::new(1, write_netlist(dir.path(), "rc_1.net"), stub_binding("ok"));
        assert_eq!(task.get_results(), None);
        assert_eq!(task.return_code(), ReturnCode::Unset);
        assert_eq!(task.phase(), TaskPhase::Unstarted);
    }

    #[test]
    fn success_records_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_1.net");
        let task = SimulationTask::new(1, net.clone(), stub_binding("ok"));
        run_task(&task);
        assert_eq!(task.return_code(), ReturnCode::Exited(0));
        assert_eq!(task.phase(), TaskPhase::Succeeded);
        assert_eq!(
            task.get_results(),
            Some(TaskResult::Files {
                raw: Some(net.with_extension("raw")),
                log: Some(net.with_extension("log")),
            })
        );
        assert!(task.duration().is_some());
    }

    #[test]
    fn executes_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let task = SimulationTask::new(1, write_netlist(dir.path(), "rc_1.net"), stub_binding("ok"));
        run_task(&task);
        let stopped = task.stopped_at();
        task.execute().unwrap();
        assert_eq!(task.stopped_at(), stopped);
    }

    #[test]
    fn nonzero_exit_renames_log() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_2.net");
        let task = SimulationTask::new(2, net.clone(), stub_binding("fail"));
        run_task(&task);
        assert_eq!(task.return_code(), ReturnCode::Exited(1));
        assert_eq!(task.phase(), TaskPhase::Failed);
        assert!(!net.with_extension("log").exists());
        assert!(net.with_extension("fail").exists());
        assert_eq!(task.log_file(), Some(net.with_extension("fail")));
        assert_eq!(
            task.get_results(),
            Some(TaskResult::Files { raw: None, log: Some(net.with_extension("fail")) })
        );
    }

    #[test]
    fn missing_artifacts_keep_success() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_3.net");
        let task = SimulationTask::new(3, net, stub_binding("silent"));
        run_task(&task);
        assert!(task.return_code().is_success());
        assert_eq!(task.get_results(), Some(TaskResult::Files { raw: None, log: None }));
    }

    #[test]
    fn timeout_marks_task_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_4.net");
        let task = SimulationTask::new(4, net, stub_binding("slow"))
            .with_timeout(Some(Duration::from_millis(200)));
        run_task(&task);
        assert_eq!(task.return_code(), ReturnCode::TimedOut);
        assert_eq!(task.phase(), TaskPhase::Failed);
    }

    #[test]
    fn missing_executable_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_5.net");
        let binding = Arc::new(SimulatorBinding::with_executable(
            Box::new(crate::simulator::Custom::default()),
            vec!["/no/such/simulator".into()],
        ));
        let task = SimulationTask::new(5, net, binding);
        run_task(&task);
        assert_eq!(task.return_code(), ReturnCode::LaunchFailed);
    }

    #[test]
    fn callback_value_is_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_6.net");
        let cb = Callback::function(&["raw", "log", "scale"], |raw, _, kw| {
            let len = std::fs::read(raw).map_err(|e| e.to_string())?.len();
            Ok(Some(json!(len as f64 * kw["scale"].as_f64().unwrap_or(0.0))))
        });
        let kwargs = CallbackKwargs::from([("scale".to_string(), json!(2.0))]);
        let task = SimulationTask::new(6, net, stub_binding("ok")).with_callback(Some(cb), kwargs);
        let result = task.wait_results_timeout(Duration::from_millis(10));
        assert_eq!(result, None);
        run_task(&task);
        assert_eq!(task.phase(), TaskPhase::CallbackDone);
        assert!(matches!(task.wait_results(), Some(TaskResult::Value(v)) if v.as_f64().unwrap() > 0.0));
    }

    #[test]
    fn callback_failure_does_not_demote_task() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_7.net");
        let cb = Callback::function(&["raw", "log"], |_, _, _| panic!("callback bug"));
        let task = SimulationTask::new(7, net, stub_binding("ok")).with_callback(Some(cb), CallbackKwargs::new());
        run_task(&task);
        assert!(task.return_code().is_success());
        assert_eq!(task.phase(), TaskPhase::CallbackDone);
        assert_eq!(task.callback_return(), None);
        assert_eq!(task.get_results(), None);
    }

    #[test]
    fn failed_run_with_callback_has_no_result() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_8.net");
        let cb = Callback::function(&["raw", "log"], |_, _, _| Ok(Some(json!(1))));
        let task = SimulationTask::new(8, net, stub_binding("fail")).with_callback(Some(cb), CallbackKwargs::new());
        run_task(&task);
        assert_eq!(task.wait_results(), None);
        assert_eq!(task.callback_return(), None);
    }

    fn sh_callback(params: &[&str], script: &str) -> Callback {
        Callback::process(ProcessCallback::new("/bin/sh", params).with_args(vec!["-c".into(), script.into()]))
    }

    #[test]
    fn process_callback_value_is_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc_9.net");
        // `sh -c script raw log` puts the raw path in $0 and the log in $1.
        let cb = sh_callback(
            &["raw", "log", "gain"],
            r#"printf '{"raw":"%s","lines":%s,"args":%s}' "$0" "$(wc -l < "$1")" "$SIMRUNNER_CALLBACK_ARGS""#,
        );
        let kwargs = CallbackKwargs::from([("gain".to_string(), json!(4))]);
        let task = SimulationTask::new(9, net.clone(), stub_binding("ok")).with_callback(Some(cb), kwargs);
        run_task(&task);

        assert_eq!(task.phase(), TaskPhase::CallbackDone);
        let Some(TaskResult::Value(value)) = task.wait_results() else {
            panic!("expected a callback value");
        };
        assert_eq!(value["raw"], json!(net.with_extension("raw").to_string_lossy()));
        assert_eq!(value["lines"], json!(1));
        assert_eq!(value["args"]["gain"], json!(4));
        assert_eq!(task.get_results(), Some(TaskResult::Value(value)));
    }

    #[test]
    fn failing_process_callback_does_not_demote_task() {
        for script in ["exit 3", "kill -9 $$"] {
            let dir = tempfile::tempdir().unwrap();
            let net = write_netlist(dir.path(), "rc_10.net");
            let cb = sh_callback(&["raw", "log"], script);
            let task = SimulationTask::new(10, net, stub_binding("ok")).with_callback(Some(cb), CallbackKwargs::new());
            run_task(&task);
            assert_eq!(task.return_code(), ReturnCode::Exited(0), "{}", script);
            assert_eq!(task.phase(), TaskPhase::CallbackDone, "{}", script);
            assert_eq!(task.callback_return(), None, "{}", script);
            assert_eq!(task.wait_results(), None, "{}", script);
        }
    }

    #[test]
    fn artifact_paths_cover_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let net = dir.path().join("amp_1.asc");
        let task = SimulationTask::new(1, net.clone(), stub_binding("ok"));
        let paths = task.artifact_paths();
        for ext in ["log", "fail", "exe.log", "raw", "log.raw", "op.raw", "net"] {
            assert!(paths.contains(&net.with_extension(ext)), "missing .{}", ext);
        }
    }
}
