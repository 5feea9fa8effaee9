//! SimManager: a background loop that keeps a `SimRunner`'s finished runs
//! as plain records until a client collects or erases them.
//!
//! The loop is the single consumer of an mpsc channel. Between events it
//! reconciles the runner every `COLLECT_INTERVAL` and moves completed
//! tasks into `CompletedRun` records.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use super::runner::{RunOptions, SimRunner};
use super::task::{ReturnCode, SimulationTask};
use crate::netlist::Netlist;

const COLLECT_INTERVAL: Duration = Duration::from_millis(200);


/// Events handled by the manager loop.
#[derive(Debug)]
pub enum ManagerEvent {
    /// Collect finished runs now instead of at the next tick.
    Collect,
    /// Finish collecting and exit the loop.
    Stop,
}


/// Snapshot of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedRun {
    pub run_number: u64,
    pub return_code: ReturnCode,
    pub circuit: PathBuf,
    pub raw: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub callback_output: Option<Value>,
    /// Milliseconds since the manager started.
    pub start_ms: Option<u64>,
    pub stop_ms: Option<u64>,
}

impl CompletedRun {
    fn from_task(task: &SimulationTask, epoch: Instant) -> Self {
        let offset = |t: Instant| t.saturating_duration_since(epoch).as_millis() as u64;
        CompletedRun {
            run_number: task.run_number(),
            return_code: task.return_code(),
            circuit: task.netlist_file().to_path_buf(),
            raw: task.raw_file(),
            log: task.log_file(),
            callback_output: task.callback_return(),
            start_ms: task.started_at().map(offset),
            stop_ms: task.stopped_at().map(offset),
        }
    }

    fn files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.circuit.clone(), self.circuit.with_extension("exe.log")];
        files.extend(self.raw.iter().cloned());
        files.extend(self.log.iter().cloned());
        files
    }
}


struct Collector {
    runner: Arc<SimRunner>,
    completed: Arc<Mutex<Vec<CompletedRun>>>,
    epoch: Instant,
}

impl Collector {
    fn collect(&self) -> usize {
        let tasks = self.runner.take_completed();
        if tasks.is_empty() {
            return 0;
        }
        let mut completed = lock(&self.completed);
        for task in &tasks {
            let record = CompletedRun::from_task(task, self.epoch);
            tracing::debug!(run = record.run_number, return_code = ?record.return_code, "Run collected");
            completed.push(record);
        }
        tasks.len()
    }

    fn run(self, receiver: mpsc::Receiver<ManagerEvent>) {
        loop {
            match receiver.recv_timeout(COLLECT_INTERVAL) {
                Ok(ManagerEvent::Collect) | Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.collect();
                }
                Ok(ManagerEvent::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.runner.wait_completion(None, false);
        self.collect();
        tracing::info!("SimManager loop finished");
    }
}


/// Owns a runner and the thread collecting its results.
pub struct SimManager {
    runner: Arc<SimRunner>,
    completed: Arc<Mutex<Vec<CompletedRun>>>,
    sender: mpsc::Sender<ManagerEvent>,
    thread: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl SimManager {
    /// Start the collection loop for `runner`.
    pub fn start(runner: SimRunner) -> std::io::Result<Self> {
        let runner = Arc::new(runner);
        let completed = Arc::new(Mutex::new(Vec::new()));
        let (sender, receiver) = mpsc::channel();
        let collector = Collector {
            runner: Arc::clone(&runner),
            completed: Arc::clone(&completed),
            epoch: Instant::now(),
        };
        let thread = std::thread::Builder::new()
            .name("SimManager".into())
            .spawn(move || collector.run(receiver))?;
        tracing::info!("SimManager started");
        Ok(SimManager {
            runner,
            completed,
            sender,
            thread: Mutex::new(Some(thread)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn runner(&self) -> &SimRunner {
        &self.runner
    }

    /// Schedule a simulation. Returns its run number, or -1 if it could not
    /// be started.
    pub fn add_simulation<N: Netlist + ?Sized>(&self, netlist: &N, timeout: Option<Duration>) -> i64 {
        let mut opts = RunOptions::new();
        opts.timeout = timeout;
        self.add_simulation_with(netlist, opts)
    }

    pub fn add_simulation_with<N: Netlist + ?Sized>(&self, netlist: &N, opts: RunOptions) -> i64 {
        if !self.running() {
            tracing::error!(netlist = %netlist.circuit_file().display(), "SimManager is stopped");
            return -1;
        }
        match self.runner.run(netlist, opts) {
            Ok(Some(task)) => {
                tracing::info!(run = task.run_number(), netlist = %netlist.circuit_file().display(), "Started task");
                task.run_number() as i64
            }
            Ok(None) => {
                tracing::error!(netlist = %netlist.circuit_file().display(), "Failed to start task");
                -1
            }
            Err(e) => {
                tracing::error!(netlist = %netlist.circuit_file().display(), error = %e, "Failed to start task");
                -1
            }
        }
    }

    /// Ask the loop to collect now.
    pub fn collect(&self) {
        let _ = self.sender.send(ManagerEvent::Collect);
    }

    /// Runs collected so far.
    pub fn completed(&self) -> Vec<CompletedRun> {
        lock(&self.completed).clone()
    }

    pub fn completed_run(&self, run_number: u64) -> Option<CompletedRun> {
        lock(&self.completed)
            .iter()
            .find(|r| r.run_number == run_number)
            .cloned()
    }

    /// Delete the files of a collected run and forget it. Returns false if
    /// the run is unknown.
    pub fn erase_files_of_runno(&self, run_number: u64) -> bool {
        let mut completed = lock(&self.completed);
        let Some(pos) = completed.iter().position(|r| r.run_number == run_number) else {
            return false;
        };
        let record = completed.remove(pos);
        drop(completed);
        erase_files(&record);
        true
    }

    /// Delete the files of every collected run and forget them.
    pub fn cleanup_completed(&self) {
        let records = std::mem::take(&mut *lock(&self.completed));
        for record in &records {
            erase_files(record);
        }
    }

    /// Stop the loop after the runner's active tasks finish. Collected files
    /// stay until erased.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping SimManager");
        let _ = self.sender.send(ManagerEvent::Stop);
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("SimManager loop panicked");
            }
        }
    }

    pub fn running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for SimManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn erase_files(record: &CompletedRun) {
    for file in record.files() {
        if !Path::new(&file).exists() {
            continue;
        }
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::info!(run = record.run_number, file = %file.display(), "Deleted"),
            Err(e) => tracing::warn!(run = record.run_number, file = %file.display(), error = %e, "Cannot delete"),
        }
    }
}
