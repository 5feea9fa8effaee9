//! Parser for simulator log files.
//!
//! Recognized lines:
//! - `.step a=1 b=2` adds one value per step variable,
//! - `Measurement: name` followed by a `step value ...` table,
//! - `name: expr=value ...` and `name = value` single results.
//!
//! LTspice writes UTF-16LE logs; the encoding is sniffed from the first bytes.

use std::path::Path;

use super::data::LogfileData;
use super::value::try_convert_value;
use super::LogError;

/// Read and parse the log at `path`.
pub fn read_log(path: &Path) -> Result<LogfileData, LogError> {
    let bytes = std::fs::read(path).map_err(|source| LogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = decode(&bytes);
    let data = parse_log(&text);
    tracing::debug!(
        path = %path.display(),
        steps = data.step_count(),
        measures = data.measure_count(),
        "Log file read"
    );
    Ok(data)
}

fn decode(bytes: &[u8]) -> String {
    let utf16 = match bytes {
        [0xFF, 0xFE, rest @ ..] => Some(rest),
        [_, 0, ..] => Some(bytes),
        _ => None,
    };
    match utf16 {
        Some(body) => {
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Parse log text into step and measurement columns.
pub fn parse_log(text: &str) -> LogfileData {
    let mut data = LogfileData::new();
    let mut table: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();

        if let Some(name) = &table {
            if line.is_empty() {
                table = None;
                continue;
            }
            let mut fields = line.split_whitespace();
            let first = fields.next().unwrap_or_default();
            // Header row of the table.
            if first.eq_ignore_ascii_case("step") {
                continue;
            }
            if first.parse::<u64>().is_ok() {
                if let Some(value) = fields.next() {
                    data.push_measure_value(name, try_convert_value(value));
                }
                continue;
            }
            table = None;
        }

        if line.is_empty() {
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_case(line, ".step") {
            for assignment in rest.split_whitespace() {
                if let Some((var, value)) = assignment.split_once('=') {
                    data.push_step_value(var, try_convert_value(value));
                }
            }
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_case(line, "Measurement:") {
            let name = rest.trim();
            if !name.is_empty() {
                table = Some(name.to_string());
            }
            continue;
        }
        if let Some((name, value)) = single_measurement(line) {
            data.push_measure_value(name, try_convert_value(value));
        }
    }
    data
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

/// `name: expr=value [FROM a TO b]` or `name = value`.
fn single_measurement(line: &str) -> Option<(&str, &str)> {
    let split = line.find(|c| c == ':' || c == '=')?;
    let name = line[..split].trim();
    if !is_identifier(name) {
        return None;
    }
    let rest = &line[split + 1..];
    let after_eq = if line.as_bytes()[split] == b':' {
        let eq = rest.find('=')?;
        &rest[eq + 1..]
    } else {
        rest
    };
    let value = after_eq.split_whitespace().next()?;
    Some((name, value))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogValue;

    const LTSPICE_STEPPED: &str = "\
Circuit: * rc.asc

.step r1=1k c1=1n
.step r1=2k c1=1n

Measurement: vmax
  step\tMAX(v(out))\tFROM\tTO
     1\t0.98\t0\t0.001
     2\t0.87\t0\t0.001

Measurement: tr
  step\tv(out)=0.5
     1\t1.1e-06
     2\t2.3e-06

Total elapsed time: 0.05 seconds.
";

    #[test]
    fn stepped_tables() {
        let data = parse_log(LTSPICE_STEPPED);
        assert_eq!(data.get_step_vars(), vec!["r1", "c1"]);
        assert_eq!(data.get("r1").unwrap()[1], LogValue::Text("2k".into()));
        assert_eq!(data.get_measure_names(), vec!["vmax", "tr"]);
        assert_eq!(data.get_measure_value("vmax", Some(1)).unwrap(), &LogValue::Real(0.87));
        assert_eq!(data.get("tr").unwrap().len(), 2);
    }

    #[test]
    fn single_line_results() {
        let data = parse_log(
            "vout: MAX(v(out))=1.25 FROM 0 TO 0.001\n\
             gain                =  2.000000e+01\n\
             Doing analysis at TEMP = 27.000000 and TNOM = 27.000000\n",
        );
        assert_eq!(data.get_measure_names(), vec!["vout", "gain"]);
        assert_eq!(data.get_measure_value("gain", None).unwrap(), &LogValue::Real(20.0));
        assert_eq!(data.get_measure_value("VOUT", None).unwrap(), &LogValue::Real(1.25));
    }

    #[test]
    fn reads_utf16_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ac.log");
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "h: v(out)=(-3dB,-45°)\r\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        std::fs::write(&path, bytes).unwrap();
        let data = read_log(&path).unwrap();
        assert!(matches!(data.get_measure_value("h", None).unwrap(), LogValue::Complex(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_log(Path::new("/no/such/file.log")).unwrap_err();
        assert!(matches!(err, LogError::Io { .. }));
    }
}
