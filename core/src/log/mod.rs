//! Measurement data read from simulator log files.
//!
//! `LogfileData` maps step variables and `.meas` results (case-insensitive
//! names) to per-step values. `read_log` fills one from a log file.

pub mod data;
pub mod reader;
pub mod value;

use std::path::PathBuf;

use thiserror::Error;

pub use data::LogfileData;
pub use reader::read_log;
pub use value::{split_line_into_values, try_convert_value, LogValue};

/// Errors from reading or querying log data.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("'{0}' is not a valid step variable or measurement name")]
    UnknownName(String),

    #[error("step {step} out of range for '{name}'")]
    StepOutOfRange { name: String, step: usize },

    #[error("{0}")]
    Ambiguous(String),

    #[error("no values found for measure '{0}'")]
    NoValues(String),

    #[error("cannot compare mixed numeric and text values of '{0}'")]
    Heterogeneous(String),

    #[error("parentheses are not balanced")]
    Unbalanced,

    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
