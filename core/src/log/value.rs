//! Scalar values found in log files and their text conversion.

use std::f64::consts::PI;
use std::fmt;

use num_complex::Complex64;
use serde::Serialize;

use super::LogError;

/// One value in a measurement or step column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogValue {
    Int(i64),
    Real(f64),
    Complex(Complex64),
    Text(String),
    /// An empty field between separators.
    Missing,
    List(Vec<LogValue>),
}

impl LogValue {
    /// Magnitude used for ordering: the value itself for reals, the modulus
    /// for complex numbers.
    pub fn magnitude(&self) -> Option<f64> {
        match self {
            LogValue::Int(i) => Some(*i as f64),
            LogValue::Real(r) => Some(*r),
            LogValue::Complex(c) => Some(c.norm()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LogValue::Int(i) => Some(*i as f64),
            LogValue::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, LogValue::Int(_) | LogValue::Real(_) | LogValue::Complex(_))
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Int(i) => write!(f, "{}", i),
            LogValue::Real(r) => write!(f, "{}", r),
            LogValue::Complex(c) => write!(f, "({},{})", c.re, c.im),
            LogValue::Text(s) => f.write_str(s),
            LogValue::Missing => Ok(()),
            LogValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(","))
            }
        }
    }
}

/// Convert a field to an integer, then a real, then a complex number in the
/// `(mag[dB],phase[°])` notation; anything else stays text.
pub fn try_convert_value(text: &str) -> LogValue {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return LogValue::Int(i);
    }
    if let Ok(r) = trimmed.parse::<f64>() {
        return LogValue::Real(r);
    }
    if let Some(c) = parse_complex(trimmed) {
        return LogValue::Complex(c);
    }
    LogValue::Text(trimmed.to_string())
}

/// `(re,im)`, or polar `(mag,ph°)` with an optional `dB` magnitude.
fn parse_complex(text: &str) -> Option<Complex64> {
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let (mag, ph) = inner.split_once(',')?;
    let (mag, db) = match mag.trim().strip_suffix("dB") {
        Some(m) => (m, true),
        None => (mag.trim(), false),
    };
    let (ph, degrees) = match ph.trim().strip_suffix('°') {
        Some(p) => (p, true),
        None => (ph.trim(), false),
    };
    let mag: f64 = mag.trim().parse().ok()?;
    let ph: f64 = ph.trim().parse().ok()?;
    if !degrees {
        return Some(Complex64::new(mag, ph));
    }
    let mag = if db { 10f64.powf(mag / 20.0) } else { mag };
    Some(Complex64::from_polar(mag, ph * PI / 180.0))
}

/// Split a line into values separated by whitespace, `,` or `;`.
/// Bracketed groups become nested lists; an empty field before a separator
/// is `Missing`.
pub fn split_line_into_values(line: &str) -> Result<Vec<LogValue>, LogError> {
    let mut closers: Vec<char> = Vec::new();
    let mut open_at = 0;
    let mut values = Vec::new();
    let mut value_start = 0;
    // A separator right after a closed group does not open an empty field.
    let mut after_group = false;

    for (i, c) in line.char_indices() {
        match c {
            '(' | '[' | '{' => {
                if closers.is_empty() {
                    open_at = i;
                }
                closers.push(match c {
                    '(' => ')',
                    '[' => ']',
                    _ => '}',
                });
            }
            _ if !closers.is_empty() => {
                if closers.last() == Some(&c) {
                    closers.pop();
                    if closers.is_empty() {
                        let inner = &line[open_at + 1..i];
                        values.push(LogValue::List(split_line_into_values(inner)?));
                        value_start = i + c.len_utf8();
                        after_group = true;
                    }
                }
            }
            ' ' | '\t' | '\r' | '\n' => {
                if value_start < i {
                    values.push(try_convert_value(&line[value_start..i]));
                    after_group = false;
                }
                value_start = i + 1;
            }
            ',' | ';' => {
                if value_start < i {
                    values.push(try_convert_value(&line[value_start..i]));
                } else if !after_group {
                    values.push(LogValue::Missing);
                }
                after_group = false;
                value_start = i + 1;
            }
            _ => after_group = false,
        }
    }
    if !closers.is_empty() {
        return Err(LogError::Unbalanced);
    }
    if value_start < line.len() {
        values.push(try_convert_value(&line[value_start..]));
    }
    Ok(values)
}
