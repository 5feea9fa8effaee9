//! SimRunner core: batch scheduling of external SPICE simulations.
//!
//! # Modules
//!
//! - [`config`]: runner settings, YAML load and save
//! - [`error`]: error types shared across the crate
//! - [`log`]: simulator log parsing into step and measurement data
//! - [`netlist`]: the netlist seam and run file naming
//! - [`process`]: process invocation with timeout, forced termination
//! - [`sim`]: tasks, callbacks, the runner, result iteration, the manager
//! - [`simulator`]: simulator dialects and executable bindings

pub mod config;
pub mod error;
pub mod log;
pub mod netlist;
pub mod process;
pub mod sim;
pub mod simulator;

pub use config::RunnerSettings;
pub use error::{Result, SimRunnerError};
pub use netlist::{Netlist, TextNetlist};
pub use sim::{Callback, RunOptions, SimManager, SimRunner, SimulationTask, TaskResult};
pub use simulator::{Simulator, SimulatorBinding};
