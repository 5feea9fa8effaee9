//! The simulation scheduler.
//!
//! `SimRunner` materializes a netlist per run, dispatches it to a bounded
//! worker pool and tracks every dispatched task in exactly one of two
//! lists: active (handed to a worker) or completed (moved there by
//! reconciliation). Workers flag completion and signal a condition
//! variable; every blocking wait in the scheduler sleeps on it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::callback::{validate_callback_args, Callback, CallbackArgs};
use super::task::{run_task, SimulationTask};
use crate::config::RunnerSettings;
use crate::error::{Result, SimRunnerError};
use crate::netlist::{run_destination, run_file_name, Netlist};
use crate::process;
use crate::simulator::SimulatorBinding;

/// Added to a run's timeout when waiting for a free slot.
const SLOT_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on one condvar sleep while a deadline may move.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-run options for `SimRunner::run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wait for a free slot before dispatching. When false the run starts
    /// immediately even if all slots are busy.
    pub wait_resource: bool,
    pub callback: Option<Callback>,
    pub callback_args: Option<CallbackArgs>,
    /// Replaces the runner's command-line switches when non-empty.
    pub switches: Option<Vec<String>>,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
    /// File name for the run's netlist instead of `{stem}_{run}{ext}`.
    pub run_filename: Option<String>,
    pub exe_log: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            wait_resource: true,
            callback: None,
            callback_args: None,
            switches: None,
            timeout: None,
            run_filename: None,
            exe_log: false,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_wait(mut self) -> Self {
        self.wait_resource = false;
        self
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn callback_args(mut self, args: CallbackArgs) -> Self {
        self.callback_args = Some(args);
        self
    }

    pub fn switches(mut self, switches: Vec<String>) -> Self {
        self.switches = Some(switches);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn run_filename(mut self, name: &str) -> Self {
        self.run_filename = Some(name.to_string());
        self
    }

    pub fn exe_log(mut self, exe_log: bool) -> Self {
        self.exe_log = exe_log;
        self
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub(crate) struct ActiveTask {
    pub(crate) task: Arc<SimulationTask>,
    done: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct Ledger {
    pub(crate) active: Vec<ActiveTask>,
    pub(crate) completed: Vec<Arc<SimulationTask>>,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
}

impl Ledger {
    /// Move finished tasks to `completed`, in detection order.
    fn reconcile(&mut self) -> usize {
        let mut moved = 0;
        let mut i = 0;
        while i < self.active.len() {
            if !self.active[i].done.load(Ordering::Acquire) {
                i += 1;
                continue;
            }
            let entry = self.active.remove(i);
            self.file_completed(entry.task);
            moved += 1;
        }
        moved
    }

    fn file_completed(&mut self, task: Arc<SimulationTask>) {
        if task.return_code().is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        tracing::debug!(run = task.run_number(), return_code = ?task.return_code(), "Task completed");
        self.completed.push(task);
    }

    /// Latest `start + timeout` over active tasks; tasks not yet started
    /// count from submission. `None` when no active task has a timeout.
    fn maximum_stop_time(&self, default_timeout: Option<Duration>) -> Option<Instant> {
        self.active
            .iter()
            .filter_map(|a| {
                let timeout = a.task.timeout().or(default_timeout)?;
                let start = a.task.started_at().unwrap_or_else(|| a.task.submitted_at());
                Some(start + timeout)
            })
            .max()
    }
}

pub(crate) struct Shared {
    ledger: Mutex<Ledger>,
    changed: Condvar,
}

impl Shared {
    fn notify(&self) {
        // Taking the lock orders the notification after any waiter's check.
        let _guard = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        self.changed.notify_all();
    }
}

// ---------------------------------------------------------------------------
// SimRunner
// ---------------------------------------------------------------------------

pub struct SimRunner {
    simulator: Arc<SimulatorBinding>,
    parallel_sims: usize,
    timeout: Option<Duration>,
    output_folder: Option<PathBuf>,
    exe_log: bool,
    cmdline_switches: Mutex<Vec<String>>,
    run_count: AtomicU64,
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SimRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRunner")
            .field("simulator", &self.simulator.name())
            .field("parallel_sims", &self.parallel_sims)
            .field("timeout", &self.timeout)
            .field("output_folder", &self.output_folder)
            .field("run_count", &self.run_count())
            .finish_non_exhaustive()
    }
}

impl SimRunner {
    /// Create a runner for `simulator` configured by `settings`.
    ///
    /// Creates the output folder if missing and validates the configured
    /// switches against the simulator.
    pub fn new(simulator: impl Into<Arc<SimulatorBinding>>, settings: &RunnerSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| SimRunnerError::Config(e.to_string()))?;
        let simulator = simulator.into();

        if let Some(folder) = &settings.output_folder {
            std::fs::create_dir_all(folder).map_err(|source| SimRunnerError::Prepare {
                path: folder.clone(),
                source,
            })?;
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.parallel_sims)
            .thread_name(|i| format!("simrunner-{}", i))
            .panic_handler(|payload| {
                tracing::error!(panic = %super::callback::panic_message(payload.as_ref()), "Worker panicked");
            })
            .build()
            .map_err(|e| SimRunnerError::Config(format!("cannot build worker pool: {}", e)))?;

        let runner = SimRunner {
            simulator,
            parallel_sims: settings.parallel_sims,
            timeout: settings.timeout(),
            output_folder: settings.output_folder.clone(),
            exe_log: settings.exe_log,
            cmdline_switches: Mutex::new(Vec::new()),
            run_count: AtomicU64::new(0),
            pool,
            shared: Arc::new(Shared {
                ledger: Mutex::new(Ledger::default()),
                changed: Condvar::new(),
            }),
        };
        for entry in &settings.switches {
            let (switch, param) = entry.trim().split_once(char::is_whitespace).unwrap_or((entry.trim(), ""));
            runner.add_command_line_switch(switch, param.trim())?;
        }
        tracing::info!(
            simulator = runner.simulator.name(),
            parallel_sims = runner.parallel_sims,
            timeout = ?runner.timeout,
            "SimRunner initialized"
        );
        Ok(runner)
    }

    /// Build the simulator binding from `settings` as well.
    pub fn from_settings(settings: &RunnerSettings) -> Result<Self> {
        let binding = settings.binding()?;
        SimRunner::new(binding, settings)
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.shared.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock_reconciled(&self) -> MutexGuard<'_, Ledger> {
        let mut ledger = self.lock();
        ledger.reconcile();
        ledger
    }

    /// Sleep until a task finishes or `slice` passes, then reconcile.
    pub(crate) fn wait_change<'a>(
        &'a self,
        ledger: MutexGuard<'a, Ledger>,
        slice: Duration,
    ) -> MutexGuard<'a, Ledger> {
        let (mut ledger, _) = self
            .shared
            .changed
            .wait_timeout(ledger, slice)
            .unwrap_or_else(|e| e.into_inner());
        ledger.reconcile();
        ledger
    }

    pub(crate) fn maximum_stop_time(&self, ledger: &Ledger) -> Option<Instant> {
        ledger.maximum_stop_time(self.timeout)
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Materialize the netlist under the next run number.
    fn prepare_netlist<N: Netlist + ?Sized>(
        &self,
        netlist: &N,
        run_filename: Option<&str>,
    ) -> Result<(u64, PathBuf)> {
        let run = self.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        let circuit = netlist.circuit_file();
        let name = match run_filename {
            Some(name) => name.to_string(),
            None => run_file_name(circuit, run),
        };
        let dest = run_destination(self.output_folder.as_deref(), circuit, &name);
        netlist
            .save_netlist(&dest)
            .map_err(|source| SimRunnerError::Prepare {
                path: dest.clone(),
                source,
            })?;
        Ok((run, dest))
    }

    fn effective_switches(&self, switches: Option<Vec<String>>) -> Vec<String> {
        match switches {
            Some(s) if !s.is_empty() => s,
            _ => self.command_line_switches(),
        }
    }

    /// Schedule one simulation.
    ///
    /// Callback arguments are checked before anything else happens. The run
    /// number is consumed even when the slot wait gives up, in which case
    /// `Ok(None)` is returned.
    pub fn run<N: Netlist + ?Sized>(
        &self,
        netlist: &N,
        opts: RunOptions,
    ) -> Result<Option<Arc<SimulationTask>>> {
        tracing::debug!(
            netlist = %netlist.circuit_file().display(),
            wait_resource = opts.wait_resource,
            timeout = ?opts.timeout,
            run_filename = ?opts.run_filename,
            exe_log = opts.exe_log,
            "run() called"
        );
        let kwargs = validate_callback_args(opts.callback.as_ref(), opts.callback_args.as_ref())?;
        let (run, netlist_file) = self.prepare_netlist(netlist, opts.run_filename.as_deref())?;
        let timeout = opts.timeout.or(self.timeout);

        let mut ledger = self.lock();
        if opts.wait_resource {
            let deadline = timeout.map(|t| Instant::now() + t + SLOT_GRACE);
            loop {
                ledger.reconcile();
                if ledger.active.len() < self.parallel_sims {
                    break;
                }
                let slice = match deadline {
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            tracing::warn!(run, netlist = %netlist_file.display(), "Timeout waiting for a free slot");
                            return Ok(None);
                        }
                        d - now
                    }
                    None => Duration::from_secs(3600),
                };
                ledger = self
                    .shared
                    .changed
                    .wait_timeout(ledger, slice)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
        }

        let task = Arc::new(
            SimulationTask::new(run, netlist_file, Arc::clone(&self.simulator))
                .with_switches(self.effective_switches(opts.switches))
                .with_timeout(timeout)
                .with_callback(opts.callback, kwargs.unwrap_or_default())
                .with_exe_log(opts.exe_log || self.exe_log),
        );
        let forced = ledger.active.len() >= self.parallel_sims;
        self.dispatch(&mut ledger, Arc::clone(&task), forced);
        tracing::debug!(run, netlist = %task.netlist_file().display(), forced, "Task submitted");
        Ok(Some(task))
    }

    /// Hand `task` to a worker and record it as active. A forced dispatch
    /// gets its own thread so it does not queue behind the pool.
    fn dispatch(&self, ledger: &mut Ledger, task: Arc<SimulationTask>, forced: bool) {
        let done = Arc::new(AtomicBool::new(false));
        let job = {
            let task = Arc::clone(&task);
            let done = Arc::clone(&done);
            let shared = Arc::clone(&self.shared);
            move || {
                run_task(&task);
                done.store(true, Ordering::Release);
                shared.notify();
            }
        };
        ledger.active.push(ActiveTask { task, done });

        if !forced {
            self.pool.spawn(job);
            return;
        }
        let job = Arc::new(Mutex::new(Some(job)));
        let spawned = {
            let job = Arc::clone(&job);
            std::thread::Builder::new()
                .name("simrunner-forced".into())
                .spawn(move || {
                    let job = job.lock().unwrap_or_else(|e| e.into_inner()).take();
                    if let Some(job) = job {
                        job();
                    }
                })
        };
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Cannot spawn a dedicated thread, queueing on the pool");
            let job = job.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(job) = job {
                self.pool.spawn(job);
            }
        }
    }

    /// Run a simulation on the calling thread and return its raw and log
    /// files. Slot limits do not apply and `wait_resource` is ignored. A
    /// callback runs on the calling thread too; its value is on the
    /// completed task.
    pub fn run_now<N: Netlist + ?Sized>(
        &self,
        netlist: &N,
        opts: RunOptions,
    ) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
        let kwargs = validate_callback_args(opts.callback.as_ref(), opts.callback_args.as_ref())?;
        let (run, netlist_file) = self.prepare_netlist(netlist, opts.run_filename.as_deref())?;
        let task = Arc::new(
            SimulationTask::new(run, netlist_file, Arc::clone(&self.simulator))
                .with_switches(self.effective_switches(opts.switches))
                .with_timeout(opts.timeout.or(self.timeout))
                .with_callback(opts.callback, kwargs.unwrap_or_default())
                .with_exe_log(opts.exe_log || self.exe_log),
        );
        run_task(&task);
        let files = (task.raw_file(), task.log_file());
        self.lock().file_completed(task);
        self.shared.changed.notify_all();
        Ok(files)
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    /// Move finished tasks from active to completed. Returns how many moved.
    pub fn update_completed(&self) -> usize {
        self.lock().reconcile()
    }

    pub fn active_threads(&self) -> usize {
        self.lock_reconciled().active.len()
    }

    /// Wait for every active task.
    ///
    /// Without `timeout` the deadline is the latest start + timeout of the
    /// active tasks, recomputed as they change. Returns false when the
    /// deadline passes (killing simulator processes first if
    /// `abort_all_on_timeout`), otherwise whether no run has failed.
    pub fn wait_completion(&self, timeout: Option<Duration>, abort_all_on_timeout: bool) -> bool {
        tracing::debug!(?timeout, abort_all_on_timeout, "wait_completion called");
        let explicit = timeout.map(|t| Instant::now() + t);
        let mut ledger = self.lock_reconciled();
        while !ledger.active.is_empty() {
            let deadline = explicit.or_else(|| self.maximum_stop_time(&ledger));
            let now = Instant::now();
            let slice = match deadline {
                Some(d) if now > d => {
                    let pending = ledger.active.len();
                    drop(ledger);
                    tracing::warn!(pending, "Timed out waiting for simulations to complete");
                    if abort_all_on_timeout {
                        self.kill_all_spice();
                    }
                    return false;
                }
                Some(d) => (d - now).min(WAIT_SLICE * 5) + Duration::from_millis(1),
                None => WAIT_SLICE * 5,
            };
            ledger = self.wait_change(ledger, slice);
        }
        let ok = ledger.failed == 0;
        tracing::debug!(ok, "wait_completion returning");
        ok
    }

    /// Kill every process named like the simulator. Returns how many were
    /// signalled.
    pub fn kill_all_spice(&self) -> usize {
        match self.simulator.process_name() {
            Some(name) => process::kill_all(&name),
            None => {
                tracing::error!(simulator = self.simulator.name(), "No process name known, cannot kill simulators");
                0
            }
        }
    }

    /// Delete the files of every completed run. Returns how many were
    /// deleted.
    pub fn cleanup_files(&self) -> usize {
        let completed = self.lock_reconciled().completed.clone();
        let mut deleted = 0;
        for task in &completed {
            for path in task.artifact_paths() {
                if delete_if_exists(&path) {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    /// Remove and return all completed tasks. Counters are kept; iterators
    /// created earlier will not see the removed tasks.
    pub fn take_completed(&self) -> Vec<Arc<SimulationTask>> {
        std::mem::take(&mut self.lock_reconciled().completed)
    }

    // -----------------------------------------------------------------------
    // Switches
    // -----------------------------------------------------------------------

    /// Validate and add a switch used by every run without explicit
    /// switches.
    pub fn add_command_line_switch(&self, switch: &str, param: &str) -> Result<()> {
        let args = self.simulator.valid_switch(switch, param)?;
        self.cmdline_switches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(args);
        Ok(())
    }

    pub fn clear_command_line_switches(&self) {
        self.cmdline_switches.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn command_line_switches(&self) -> Vec<String> {
        self.cmdline_switches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn simulator(&self) -> &SimulatorBinding {
        &self.simulator
    }

    pub fn parallel_sims(&self) -> usize {
        self.parallel_sims
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn output_folder(&self) -> Option<&Path> {
        self.output_folder.as_deref()
    }

    /// Run numbers handed out so far, including abandoned submissions.
    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> usize {
        self.lock_reconciled().succeeded
    }

    pub fn failed(&self) -> usize {
        self.lock_reconciled().failed
    }

    pub fn completed_tasks(&self) -> Vec<Arc<SimulationTask>> {
        self.lock_reconciled().completed.clone()
    }

    pub fn active_tasks(&self) -> Vec<Arc<SimulationTask>> {
        self.lock_reconciled().active.iter().map(|a| Arc::clone(&a.task)).collect()
    }
}

impl Drop for SimRunner {
    fn drop(&mut self) {
        if !self.lock().active.is_empty() {
            tracing::debug!("Waiting for pending simulations before dropping the runner");
            self.wait_completion(None, false);
        }
    }
}

fn delete_if_exists(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(file = %path.display(), "Deleted");
            true
        }
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Cannot delete");
            false
        }
    }
}
