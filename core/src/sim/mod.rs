//! Scheduling of simulation runs.
//!
//! `SimRunner` admits netlists up to `parallel_sims` at a time and keeps the
//! resulting `SimulationTask`s in an active/completed ledger. `Results`
//! pulls finished runs in completion order, and `SimManager` wraps a runner
//! in a background collection loop.

pub mod callback;
pub mod manager;
pub mod results;
pub mod runner;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use callback::{
    validate_callback_args, Callback, CallbackArgs, CallbackKwargs, ProcessCallback,
    CALLBACK_ARGS_ENV, NO_RETURN_PLACEHOLDER,
};
pub use manager::{CompletedRun, ManagerEvent, SimManager};
pub use results::{Results, TaskOutput};
pub use runner::{RunOptions, SimRunner};
pub use task::{format_elapsed, ReturnCode, SimulationTask, TaskPhase, TaskResult};
