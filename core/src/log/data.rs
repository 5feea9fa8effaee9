//! Step variables and measurements of one simulation log.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use super::value::{try_convert_value, LogValue};
use super::LogError;

/// Column store of a log file. Keys are lower-case and keep the order in
/// which they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogfileData {
    stepset: Vec<(String, Vec<LogValue>)>,
    dataset: Vec<(String, Vec<LogValue>)>,
}

fn column<'a>(cols: &'a [(String, Vec<LogValue>)], key: &str) -> Option<&'a Vec<LogValue>> {
    cols.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn column_mut<'a>(
    cols: &'a mut Vec<(String, Vec<LogValue>)>,
    key: &str,
) -> &'a mut Vec<LogValue> {
    let idx = match cols.iter().position(|(k, _)| k == key) {
        Some(idx) => idx,
        None => {
            cols.push((key.to_string(), Vec::new()));
            cols.len() - 1
        }
    };
    &mut cols[idx].1
}

impl LogfileData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing columns. Names are lower-cased.
    pub fn from_columns(
        stepset: Vec<(String, Vec<LogValue>)>,
        dataset: Vec<(String, Vec<LogValue>)>,
    ) -> Self {
        let lower = |cols: Vec<(String, Vec<LogValue>)>| {
            cols.into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect::<Vec<_>>()
        };
        Self {
            stepset: lower(stepset),
            dataset: lower(dataset),
        }
    }

    pub fn push_step_value(&mut self, name: &str, value: LogValue) {
        column_mut(&mut self.stepset, &name.to_lowercase()).push(value);
    }

    pub fn push_measure_value(&mut self, name: &str, value: LogValue) {
        column_mut(&mut self.dataset, &name.to_lowercase()).push(value);
    }

    /// Values of a step variable or measurement, step variables first.
    pub fn get(&self, name: &str) -> Result<&[LogValue], LogError> {
        let key = name.to_lowercase();
        column(&self.stepset, &key)
            .or_else(|| column(&self.dataset, &key))
            .map(Vec::as_slice)
            .ok_or(LogError::UnknownName(key))
    }

    fn measure(&self, name: &str) -> Result<&[LogValue], LogError> {
        let key = name.to_lowercase();
        column(&self.dataset, &key)
            .map(Vec::as_slice)
            .ok_or(LogError::UnknownName(key))
    }

    pub fn has_steps(&self) -> bool {
        !self.stepset.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.stepset.len()
    }

    pub fn measure_count(&self) -> usize {
        self.dataset.len()
    }

    pub fn get_step_vars(&self) -> Vec<&str> {
        self.stepset.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn get_measure_names(&self) -> Vec<&str> {
        self.dataset.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Indices where `param` equals `value`. The value text is converted the
    /// same way log fields are.
    pub fn steps_with_parameter_equal_to(
        &self,
        param: &str,
        value: &str,
    ) -> Result<Vec<usize>, LogError> {
        let target = try_convert_value(value);
        Ok(self
            .get(param)?
            .iter()
            .enumerate()
            .filter(|(_, v)| loosely_equal(v, &target))
            .map(|(i, _)| i)
            .collect())
    }

    /// Indices satisfying every `(param, value)` equality. No conditions
    /// yields an empty list.
    pub fn steps_with_conditions(&self, conditions: &[(&str, &str)]) -> Result<Vec<usize>, LogError> {
        let mut current: Option<Vec<usize>> = None;
        for (param, value) in conditions {
            let matching = self.steps_with_parameter_equal_to(param, value)?;
            current = Some(match current {
                None => matching,
                Some(prev) => prev.into_iter().filter(|i| matching.contains(i)).collect(),
            });
        }
        Ok(current.unwrap_or_default())
    }

    /// Value of `measure` at `step`. Without a step the measurement must
    /// hold exactly one value.
    pub fn get_measure_value(&self, measure: &str, step: Option<usize>) -> Result<&LogValue, LogError> {
        let values = self.measure(measure)?;
        match step {
            Some(step) => values.get(step).ok_or_else(|| LogError::StepOutOfRange {
                name: measure.to_lowercase(),
                step,
            }),
            None => match values {
                [single] => Ok(single),
                [] => {
                    tracing::error!(measure, "No measurements found");
                    Err(LogError::NoValues(measure.to_lowercase()))
                }
                _ => Err(LogError::Ambiguous(
                    "in stepped data, the step number needs to be provided".into(),
                )),
            },
        }
    }

    /// Value of `measure` at the single step matching all `conditions`.
    pub fn get_measure_value_where(
        &self,
        measure: &str,
        conditions: &[(&str, &str)],
    ) -> Result<&LogValue, LogError> {
        match self.steps_with_conditions(conditions)?.as_slice() {
            [step] => self.get_measure_value(measure, Some(*step)),
            _ => Err(LogError::Ambiguous(
                "not sufficient conditions to identify a single step".into(),
            )),
        }
    }

    /// Values of `measure` at `steps`, or all of them when `steps` is `None`.
    pub fn get_measure_values_at_steps(
        &self,
        measure: &str,
        steps: Option<&[usize]>,
    ) -> Result<Vec<LogValue>, LogError> {
        let values = self.measure(measure)?;
        let Some(steps) = steps else {
            return Ok(values.to_vec());
        };
        steps
            .iter()
            .map(|&step| {
                values.get(step).cloned().ok_or_else(|| LogError::StepOutOfRange {
                    name: measure.to_lowercase(),
                    step,
                })
            })
            .collect()
    }

    pub fn max_measure_value(&self, measure: &str, steps: Option<&[usize]>) -> Result<LogValue, LogError> {
        self.extreme(measure, steps, std::cmp::Ordering::Greater)
    }

    pub fn min_measure_value(&self, measure: &str, steps: Option<&[usize]>) -> Result<LogValue, LogError> {
        self.extreme(measure, steps, std::cmp::Ordering::Less)
    }

    fn extreme(
        &self,
        measure: &str,
        steps: Option<&[usize]>,
        want: std::cmp::Ordering,
    ) -> Result<LogValue, LogError> {
        let values = self.get_measure_values_at_steps(measure, steps)?;
        if values.is_empty() {
            return Err(LogError::NoValues(measure.to_lowercase()));
        }
        let numeric: Vec<&LogValue> = values.iter().filter(|v| v.is_numeric()).collect();
        let text: Vec<&String> = values
            .iter()
            .filter_map(|v| match v {
                LogValue::Text(s) => Some(s),
                _ => None,
            })
            .collect();

        if !numeric.is_empty() && text.is_empty() {
            let mut best = numeric[0];
            for &v in &numeric[1..] {
                let (a, b) = (v.magnitude().unwrap_or(f64::NAN), best.magnitude().unwrap_or(f64::NAN));
                if a.partial_cmp(&b) == Some(want) {
                    best = v;
                }
            }
            return Ok(best.clone());
        }
        if !text.is_empty() && numeric.is_empty() {
            let mut best = text[0];
            for &s in &text[1..] {
                if s.cmp(best) == want {
                    best = s;
                }
            }
            return Ok(LogValue::Text(best.clone()));
        }
        Err(LogError::Heterogeneous(measure.to_lowercase()))
    }

    /// Mean of the numeric values of `measure`. Complex values contribute
    /// their real part.
    pub fn avg_measure_value(&self, measure: &str, steps: Option<&[usize]>) -> Result<f64, LogError> {
        let values = self.get_measure_values_at_steps(measure, steps)?;
        let numeric: Vec<f64> = values
            .iter()
            .filter_map(|v| match v {
                LogValue::Complex(c) => Some(c.re),
                other => other.as_f64(),
            })
            .collect();
        if numeric.is_empty() {
            return Err(LogError::NoValues(measure.to_lowercase()));
        }
        Ok(numeric.iter().sum::<f64>() / numeric.len() as f64)
    }

    /// For every all-complex measurement add `<name>_mag` and `<name>_ph`
    /// (degrees) columns.
    pub fn obtain_amplitude_and_phase_from_complex_values(&mut self) {
        let mut extra = Vec::new();
        for (name, values) in &self.dataset {
            if values.is_empty() || !values.iter().all(|v| matches!(v, LogValue::Complex(_))) {
                continue;
            }
            let (mag, ph): (Vec<LogValue>, Vec<LogValue>) = values
                .iter()
                .filter_map(|v| match v {
                    LogValue::Complex(c) => Some((
                        LogValue::Real(c.norm()),
                        LogValue::Real(c.arg().to_degrees()),
                    )),
                    _ => None,
                })
                .unzip();
            extra.push((format!("{}_mag", name), mag));
            extra.push((format!("{}_ph", name), ph));
        }
        for (name, values) in extra {
            *column_mut(&mut self.dataset, &name) = values;
        }
    }

    /// Write the table to `path` with a leading `step` index column.
    ///
    /// With `append_prefix` the file is appended to and every line starts
    /// with the prefix (the header with `user info`). An empty dataset
    /// writes nothing.
    pub fn export_data(
        &self,
        path: &Path,
        separator: &str,
        append_prefix: Option<&str>,
    ) -> Result<(), LogError> {
        if self.dataset.is_empty() {
            tracing::warn!(path = %path.display(), "Empty data set, nothing exported");
            return Ok(());
        }
        let io_err = |source| LogError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append_prefix.is_some())
            .truncate(append_prefix.is_none())
            .open(path)
            .map_err(io_err)?;
        let mut out = BufWriter::new(file);

        let mut header = Vec::new();
        if append_prefix.is_some() {
            header.push("user info".to_string());
        }
        header.push("step".to_string());
        let mut rows: Option<usize> = None;
        for (title, values) in self.stepset.iter().chain(self.dataset.iter()) {
            match rows {
                None => rows = Some(values.len()),
                Some(n) if n != values.len() => tracing::error!(
                    expected = n,
                    column = %title,
                    found = values.len(),
                    "Data size mismatch, not all columns have the same length"
                ),
                _ => {}
            }
            match values.first() {
                Some(LogValue::List(items)) if items.len() > 1 => {
                    header.extend((0..items.len()).map(|i| format!("{}_{}", title, i)));
                }
                _ => header.push(title.clone()),
            }
        }
        writeln!(out, "{}", header.join(separator)).map_err(io_err)?;

        for index in 0..rows.unwrap_or(0) {
            let mut line = Vec::with_capacity(header.len());
            if let Some(prefix) = append_prefix {
                line.push(prefix.to_string());
            }
            line.push((index + 1).to_string());
            for (_, values) in self.stepset.iter().chain(self.dataset.iter()) {
                match values.get(index) {
                    Some(LogValue::List(items)) => line.extend(items.iter().map(|v| v.to_string())),
                    Some(v) => line.push(v.to_string()),
                    None => line.push(String::new()),
                }
            }
            if line.len() != header.len() {
                tracing::error!(
                    expected = header.len(),
                    found = line.len(),
                    row = index + 1,
                    "Line with wrong number of values"
                );
            }
            writeln!(out, "{}", line.join(separator)).map_err(io_err)?;
        }
        out.flush().map_err(io_err)
    }
}

/// Integers and reals compare by value so `2` matches `2.0`.
fn loosely_equal(a: &LogValue, b: &LogValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
