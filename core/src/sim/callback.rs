//! Completion callbacks run after a successful simulation.
//!
//! A callback sees the raw and log file paths plus the keyword arguments
//! bound at submission. It runs either in-process (`Callback::Function`) or
//! as a child process (`Callback::Process`) whose stdout carries exactly one
//! value back.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CallbackError;

/// Value relayed when a process callback prints nothing.
pub const NO_RETURN_PLACEHOLDER: &str = "Callback doesn't return anything";

/// Environment variable carrying the keyword arguments (JSON object) to a
/// process callback.
pub const CALLBACK_ARGS_ENV: &str = "SIMRUNNER_CALLBACK_ARGS";

/// Keyword arguments bound to a callback, keyed by parameter name.
pub type CallbackKwargs = BTreeMap<String, Value>;

/// In-process callback signature.
pub type CallbackFn =
    dyn Fn(&Path, &Path, &CallbackKwargs) -> Result<Option<Value>, String> + Send + Sync;

/// Extra arguments supplied at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallbackArgs {
    Named(BTreeMap<String, Value>),
    /// Matched in order to the parameters after the two file paths.
    Positional(Vec<Value>),
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Callback {
    Function {
        /// Declared parameter names. The first two receive the raw and log
        /// paths.
        params: Vec<String>,
        func: Arc<CallbackFn>,
    },
    Process(ProcessCallback),
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Function { params, .. } => {
                f.debug_struct("Function").field("params", params).finish_non_exhaustive()
            }
            Callback::Process(p) => f.debug_tuple("Process").field(p).finish(),
        }
    }
}

impl Callback {
    /// An in-process callback declaring `params`.
    pub fn function<F>(params: &[&str], f: F) -> Self
    where
        F: Fn(&Path, &Path, &CallbackKwargs) -> Result<Option<Value>, String> + Send + Sync + 'static,
    {
        Callback::Function {
            params: params.iter().map(|p| p.to_string()).collect(),
            func: Arc::new(f),
        }
    }

    pub fn process(callback: ProcessCallback) -> Self {
        Callback::Process(callback)
    }

    pub fn params(&self) -> &[String] {
        match self {
            Callback::Function { params, .. } => params,
            Callback::Process(p) => &p.params,
        }
    }

    /// Run the callback. Panics inside an in-process callback are caught and
    /// reported as `CallbackError::Panicked`.
    pub fn invoke(
        &self,
        raw: &Path,
        log: &Path,
        kwargs: &CallbackKwargs,
    ) -> Result<Option<Value>, CallbackError> {
        match self {
            Callback::Function { func, .. } => {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    func(raw, log, kwargs)
                }));
                match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(msg)) => Err(CallbackError::Failed(msg)),
                    Err(payload) => Err(CallbackError::Panicked(panic_message(payload.as_ref()))),
                }
            }
            Callback::Process(p) => p.run(raw, log, kwargs).map(Some),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// ProcessCallback
// ---------------------------------------------------------------------------

/// A callback run in its own OS process.
///
/// Invoked as `program args... <raw> <log>` with the keyword arguments in
/// `SIMRUNNER_CALLBACK_ARGS`. Stdout is read to the end as the single
/// result: JSON if it parses, otherwise the trimmed text (invalid UTF-8 is
/// replaced). The process is always reaped, even when reading fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessCallback {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Declared parameter names, including the two file paths.
    pub params: Vec<String>,
}

impl ProcessCallback {
    pub fn new(program: impl Into<PathBuf>, params: &[&str]) -> Self {
        ProcessCallback {
            program: program.into(),
            args: Vec::new(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn run(&self, raw: &Path, log: &Path, kwargs: &CallbackKwargs) -> Result<Value, CallbackError> {
        let encoded = serde_json::to_string(kwargs)
            .map_err(|e| CallbackError::Process(format!("cannot encode arguments: {}", e)))?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(raw)
            .arg(log)
            .env(CALLBACK_ARGS_ENV, encoded)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CallbackError::Process(format!("cannot start {}: {}", self.program.display(), e))
            })?;

        // The child is reaped before any read error is reported.
        let mut output = Vec::new();
        let read = match child.stdout.take() {
            Some(mut stdout) => stdout.read_to_end(&mut output).map(|_| ()),
            None => Ok(()),
        };
        let status = child
            .wait()
            .map_err(|e| CallbackError::Process(format!("cannot wait for callback: {}", e)))?;
        read.map_err(|e| CallbackError::Process(format!("cannot read result: {}", e)))?;
        if !status.success() {
            return Err(CallbackError::Process(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }
        Ok(decode_output(&String::from_utf8_lossy(&output)))
    }
}

fn decode_output(output: &str) -> Value {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Value::String(NO_RETURN_PLACEHOLDER.to_string());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Argument validation
// ---------------------------------------------------------------------------

/// Check `args` against the callback's declared parameters and bind them by
/// name. Without a callback there is nothing to bind.
pub fn validate_callback_args(
    callback: Option<&Callback>,
    args: Option<&CallbackArgs>,
) -> Result<Option<CallbackKwargs>, CallbackError> {
    let Some(callback) = callback else {
        return Ok(None);
    };
    let params = callback.params();
    if params.len() < 2 {
        return Err(CallbackError::TooFewParameters(params.len()));
    }
    let extra = &params[2..];
    if extra.is_empty() {
        return Ok(Some(CallbackKwargs::new()));
    }
    let Some(args) = args else {
        return Err(CallbackError::MissingArgs { params: params.len() });
    };
    match args {
        CallbackArgs::Named(map) => {
            let mut kwargs = CallbackKwargs::new();
            for name in extra {
                let value = map
                    .get(name)
                    .ok_or_else(|| CallbackError::MissingArgument(name.clone()))?;
                kwargs.insert(name.clone(), value.clone());
            }
            if map.len() != extra.len() {
                return Err(CallbackError::ArgCountMismatch {
                    expected: extra.len(),
                    given: map.len(),
                });
            }
            Ok(Some(kwargs))
        }
        CallbackArgs::Positional(values) => {
            if values.len() != extra.len() {
                return Err(CallbackError::ArgCountMismatch {
                    expected: extra.len(),
                    given: values.len(),
                });
            }
            Ok(Some(extra.iter().cloned().zip(values.iter().cloned()).collect()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_params() -> Callback {
        Callback::function(&["raw", "log", "gain"], |_, _, kw| Ok(kw.get("gain").cloned()))
    }

    #[test]
    fn no_callback_binds_nothing() {
        assert_eq!(validate_callback_args(None, None).unwrap(), None);
    }

    #[test]
    fn two_params_need_no_args() {
        let cb = Callback::function(&["raw", "log"], |_, _, _| Ok(None));
        assert_eq!(validate_callback_args(Some(&cb), None).unwrap(), Some(CallbackKwargs::new()));
    }

    #[test]
    fn too_few_params_rejected() {
        let cb = Callback::function(&["raw"], |_, _, _| Ok(None));
        assert!(matches!(
            validate_callback_args(Some(&cb), None),
            Err(CallbackError::TooFewParameters(1))
        ));
    }

    #[test]
    fn extra_params_need_args() {
        assert!(matches!(
            validate_callback_args(Some(&three_params()), None),
            Err(CallbackError::MissingArgs { params: 3 })
        ));
    }

    #[test]
    fn named_args_bound_by_name() {
        let args = CallbackArgs::Named(BTreeMap::from([("gain".to_string(), json!(2.5))]));
        let kw = validate_callback_args(Some(&three_params()), Some(&args)).unwrap().unwrap();
        assert_eq!(kw["gain"], json!(2.5));
    }

    #[test]
    fn named_args_must_cover_params() {
        let args = CallbackArgs::Named(BTreeMap::from([("offset".to_string(), json!(1))]));
        assert!(matches!(
            validate_callback_args(Some(&three_params()), Some(&args)),
            Err(CallbackError::MissingArgument(name)) if name == "gain"
        ));
    }

    #[test]
    fn named_args_count_must_match() {
        let args = CallbackArgs::Named(BTreeMap::from([
            ("gain".to_string(), json!(1)),
            ("offset".to_string(), json!(2)),
        ]));
        assert!(matches!(
            validate_callback_args(Some(&three_params()), Some(&args)),
            Err(CallbackError::ArgCountMismatch { expected: 1, given: 2 })
        ));
    }

    #[test]
    fn positional_args_follow_param_order() {
        let cb = Callback::function(&["raw", "log", "a", "b"], |_, _, _| Ok(None));
        let args = CallbackArgs::Positional(vec![json!(1), json!("x")]);
        let kw = validate_callback_args(Some(&cb), Some(&args)).unwrap().unwrap();
        assert_eq!(kw["a"], json!(1));
        assert_eq!(kw["b"], json!("x"));

        let short = CallbackArgs::Positional(vec![json!(1)]);
        assert!(validate_callback_args(Some(&cb), Some(&short)).is_err());
    }

    #[test]
    fn function_errors_and_panics_are_caught() {
        let failing = Callback::function(&["raw", "log"], |_, _, _| Err("bad data".into()));
        let err = failing.invoke(Path::new("a.raw"), Path::new("a.log"), &CallbackKwargs::new());
        assert!(matches!(err, Err(CallbackError::Failed(m)) if m == "bad data"));

        let panicking = Callback::function(&["raw", "log"], |_, _, _| panic!("boom"));
        let err = panicking.invoke(Path::new("a.raw"), Path::new("a.log"), &CallbackKwargs::new());
        assert!(matches!(err, Err(CallbackError::Panicked(m)) if m == "boom"));
    }

    #[test]
    fn decode_output_forms() {
        assert_eq!(decode_output("  "), json!(NO_RETURN_PLACEHOLDER));
        assert_eq!(decode_output("{\"v\": 3}\n"), json!({"v": 3}));
        assert_eq!(decode_output("plain words\n"), json!("plain words"));
    }

    #[test]
    fn callback_args_deserialize_untagged() {
        let named: CallbackArgs = serde_json::from_str(r#"{"gain": 2}"#).unwrap();
        assert!(matches!(named, CallbackArgs::Named(_)));
        let positional: CallbackArgs = serde_json::from_str("[1, 2]").unwrap();
        assert!(matches!(positional, CallbackArgs::Positional(v) if v.len() == 2));
    }

    #[cfg(unix)]
    #[test]
    fn process_callback_relays_one_value() {
        let cb = ProcessCallback::new("/bin/sh", &["raw", "log", "gain"]).with_args(vec![
            "-c".into(),
            r#"printf '{"raw":"%s","args":%s}' "$0" "$SIMRUNNER_CALLBACK_ARGS""#.into(),
        ]);
        let kwargs = CallbackKwargs::from([("gain".to_string(), json!(3))]);
        let value = cb.run(Path::new("/tmp/a.raw"), Path::new("/tmp/a.log"), &kwargs).unwrap();
        assert_eq!(value["raw"], json!("/tmp/a.raw"));
        assert_eq!(value["args"]["gain"], json!(3));
    }

    #[cfg(unix)]
    #[test]
    fn silent_process_callback_yields_placeholder() {
        let cb = ProcessCallback::new("/bin/sh", &["raw", "log"]).with_args(vec!["-c".into(), "true".into()]);
        let value = cb.run(Path::new("a.raw"), Path::new("a.log"), &CallbackKwargs::new()).unwrap();
        assert_eq!(value, json!(NO_RETURN_PLACEHOLDER));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_output_is_decoded_lossily() {
        let cb = ProcessCallback::new("/bin/sh", &["raw", "log"])
            .with_args(vec!["-c".into(), r"printf 'ok\377\376'".into()]);
        let value = cb.run(Path::new("a.raw"), Path::new("a.log"), &CallbackKwargs::new()).unwrap();
        let text = value.as_str().unwrap();
        assert!(text.starts_with("ok"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[cfg(unix)]
    #[test]
    fn failing_process_callback_is_an_error() {
        let cb = ProcessCallback::new("/bin/sh", &["raw", "log"]).with_args(vec!["-c".into(), "exit 2".into()]);
        assert!(matches!(
            cb.run(Path::new("a.raw"), Path::new("a.log"), &CallbackKwargs::new()),
            Err(CallbackError::Process(_))
        ));
    }
}
