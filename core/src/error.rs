//! Error types shared across the scheduler, simulator bindings and callbacks.
//!
//! Only configuration problems and the iterator timeout cross the public
//! `SimRunner` API as errors. Process and callback failures are recorded on
//! the task and logged instead.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SimRunnerError>;

// ---------------------------------------------------------------------------
// InvokeError
// ---------------------------------------------------------------------------

/// Failures of a single external-process invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting on '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' exceeded its timeout of {timeout:?}")]
    TimeoutExceeded { program: String, timeout: Duration },

    #[error("cannot open execution log {}: {source}", path.display())]
    ExeLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// SimulatorError
// ---------------------------------------------------------------------------

/// Errors raised by a simulator binding.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("{simulator} executable not found; set one explicitly")]
    ExecutableNotFound { simulator: String },

    #[error("invalid switch '{switch}' for {simulator}")]
    InvalidSwitch { simulator: String, switch: String },

    #[error("unknown simulator '{0}'")]
    UnknownSimulator(String),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

// ---------------------------------------------------------------------------
// CallbackError
// ---------------------------------------------------------------------------

/// Errors from validating or running a completion callback.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback must have at least two parameters (raw file, log file), found {0}")]
    TooFewParameters(usize),

    #[error("callback has {params} parameters but no callback_args were given")]
    MissingArgs { params: usize },

    #[error("callback argument '{0}' not found in callback_args")]
    MissingArgument(String),

    #[error("callback has {expected} extra parameters, but {given} callback_args were given")]
    ArgCountMismatch { expected: usize, given: usize },

    #[error("callback returned an error: {0}")]
    Failed(String),

    #[error("callback panicked: {0}")]
    Panicked(String),

    #[error("callback process failed: {0}")]
    Process(String),
}

// ---------------------------------------------------------------------------
// SimRunnerError
// ---------------------------------------------------------------------------

/// Errors surfaced by the `SimRunner` public API.
#[derive(Debug, Error)]
pub enum SimRunnerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error(transparent)]
    Simulator(#[from] SimulatorError),

    #[error("cannot prepare netlist {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("exceeded {waited:?} waiting for tasks to finish")]
    Timeout { waited: Duration },
}

impl SimRunnerError {
    /// Whether this is the scheduler-level wait timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SimRunnerError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_error_messages_name_the_problem() {
        let e = CallbackError::MissingArgument("gain".into());
        assert_eq!(e.to_string(), "callback argument 'gain' not found in callback_args");

        let e = CallbackError::ArgCountMismatch { expected: 2, given: 1 };
        assert!(e.to_string().contains("2 extra parameters"));
    }

    #[test]
    fn simulator_error_wraps_invoke_error() {
        let e: SimulatorError = InvokeError::EmptyCommand.into();
        assert_eq!(e.to_string(), "empty command line");
    }

    #[test]
    fn timeout_is_detected() {
        let e = SimRunnerError::Timeout { waited: Duration::from_secs(3) };
        assert!(e.is_timeout());
        assert!(!SimRunnerError::Config("x".into()).is_timeout());
    }
}
