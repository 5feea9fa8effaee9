//! Pull-based iteration over finished runs.

use std::time::Instant;

use serde::Serialize;

use super::runner::{SimRunner, WAIT_SLICE};
use super::task::TaskResult;
use crate::error::{Result, SimRunnerError};

/// One successful run as yielded by `Results`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutput {
    pub run_number: u64,
    /// `None` when a configured callback produced nothing.
    pub result: Option<TaskResult>,
}

/// Yields successful runs in completion order, blocking while runs are
/// still active. Failed runs are logged and skipped.
///
/// When every active run is past its timeout the iterator yields one
/// `SimRunnerError::Timeout` and then ends.
pub struct Results<'a> {
    runner: &'a SimRunner,
    cursor: usize,
    started: Instant,
    finished: bool,
}

impl<'a> Results<'a> {
    pub(crate) fn new(runner: &'a SimRunner) -> Self {
        Results {
            runner,
            cursor: 0,
            started: Instant::now(),
            finished: false,
        }
    }
}

impl Iterator for Results<'_> {
    type Item = Result<TaskOutput>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut ledger = self.runner.lock_reconciled();
        loop {
            while self.cursor < ledger.completed.len() {
                let task = &ledger.completed[self.cursor];
                self.cursor += 1;
                if task.return_code().is_success() {
                    return Some(Ok(TaskOutput {
                        run_number: task.run_number(),
                        result: task.get_results(),
                    }));
                }
                tracing::error!(run = task.run_number(), "Skipping run because simulation failed");
            }

            if ledger.active.is_empty() {
                self.finished = true;
                return None;
            }
            if let Some(stop) = self.runner.maximum_stop_time(&ledger) {
                if Instant::now() > stop {
                    self.finished = true;
                    return Some(Err(SimRunnerError::Timeout {
                        waited: self.started.elapsed(),
                    }));
                }
            }
            ledger = self.runner.wait_change(ledger, WAIT_SLICE);
        }
    }
}

impl SimRunner {
    /// Iterate over results with a fresh cursor.
    pub fn results(&self) -> Results<'_> {
        Results::new(self)
    }
}

impl<'a> IntoIterator for &'a SimRunner {
    type Item = Result<TaskOutput>;
    type IntoIter = Results<'a>;

    fn into_iter(self) -> Results<'a> {
        self.results()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::default_settings;
    use crate::sim::testing::{stub_binding, write_netlist};
    use crate::sim::{Callback, RunOptions};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn yields_every_successful_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc.net");
        let mut s = default_settings();
        s.parallel_sims = 2;
        s.timeout_secs = Some(10.0);
        s.output_folder = Some(dir.path().join("out"));
        let runner = SimRunner::new(stub_binding("delay"), &s).unwrap();
        for _ in 0..3 {
            runner.run(&net, RunOptions::new()).unwrap();
        }
        let mut runs: Vec<u64> = (&runner).into_iter().map(|r| r.unwrap().run_number).collect();
        runs.sort();
        assert_eq!(runs, vec![1, 2, 3]);

        // A second iterator starts from the beginning.
        assert_eq!(runner.results().count(), 3);
    }

    #[test]
    fn callback_values_are_yielded() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc.net");
        let mut s = default_settings();
        s.parallel_sims = 1;
        s.output_folder = Some(dir.path().join("out"));
        let runner = SimRunner::new(stub_binding("ok"), &s).unwrap();
        let cb = Callback::function(&["raw", "log"], |raw, _, _| {
            Ok(Some(json!(raw.file_name().map(|n| n.to_string_lossy().into_owned()))))
        });
        runner.run(&net, RunOptions::new().callback(cb)).unwrap();
        let out: Vec<TaskOutput> = runner.results().map(|r| r.unwrap()).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].result, Some(TaskResult::Value(json!("rc_1.raw"))));
    }

    #[test]
    fn timeout_error_then_end() {
        let dir = tempfile::tempdir().unwrap();
        let net = write_netlist(dir.path(), "rc.net");
        let mut s = default_settings();
        s.parallel_sims = 1;
        s.timeout_secs = Some(0.3);
        s.output_folder = Some(dir.path().join("out"));
        let runner = SimRunner::new(stub_binding("ok"), &s).unwrap();
        // A slow callback keeps the run active past start + timeout.
        let cb = Callback::function(&["raw", "log"], |_, _, _| {
            std::thread::sleep(Duration::from_millis(1_500));
            Ok(None)
        });
        runner.run(&net, RunOptions::new().callback(cb)).unwrap();

        let mut it = runner.results();
        let first = it.next().expect("an item");
        assert!(matches!(first, Err(ref e) if e.is_timeout()));
        assert!(it.next().is_none());
        assert!(runner.wait_completion(Some(Duration::from_secs(10)), false));
    }

    #[test]
    fn empty_runner_yields_nothing() {
        let s = default_settings();
        let runner = SimRunner::new(stub_binding("ok"), &s).unwrap();
        assert_eq!(runner.results().count(), 0);
    }
}
