//! Trajectory text format and its compressed on-disk form.
//!
//! ```text
//! Model of Muller's ratchet ...
//! {"B":0.1,"Binitial":0.1,...}
//! Statistics begin
//! time Eavg Estd ...
//! 1 98.5 1.2 ...
//! ```

use crate::error::{CacheError, Result};
use crate::params::ParamSet;
use crate::stats::StatTable;

pub const PROVENANCE_LINE: &str =
    "Model of Muller's ratchet https://github.com/dining-philosopher/muller.git";
pub const STATS_MARKER: &str = "Statistics begin";
pub const TRAJECTORY_EXTENSION: &str = "txt.zst";
const ZSTD_LEVEL: i32 = 3;

pub fn encode_text(params: &ParamSet, table: &StatTable) -> Result<String> {
    let mut out = String::new();
    out.push_str(PROVENANCE_LINE);
    out.push('\n');
    out.push_str(&serde_json::to_string(params)?);
    out.push('\n');
    out.push_str(STATS_MARKER);
    out.push('\n');
    out.push_str(&table.names().join(" "));
    out.push('\n');
    for idx in 0..table.len() {
        if let Some(row) = table.row(idx) {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
    }
    Ok(out)
}

pub fn encode(params: &ParamSet, table: &StatTable) -> Result<Vec<u8>> {
    let text = encode_text(params, table)?;
    Ok(zstd::encode_all(text.as_bytes(), ZSTD_LEVEL)?)
}

pub fn decode(bytes: &[u8]) -> Result<(ParamSet, StatTable)> {
    let raw = zstd::decode_all(bytes)
        .map_err(|e| CacheError::format(format!("cannot decompress trajectory: {}", e)))?;
    let text = String::from_utf8(raw)
        .map_err(|_| CacheError::format("trajectory text is not valid UTF-8"))?;
    decode_text(&text)
}

/// Parses uncompressed trajectory text. Also accepts the raw output of the
/// standalone simulation executable, which uses the same layout.
pub fn decode_text(text: &str) -> Result<(ParamSet, StatTable)> {
    let lines: Vec<&str> = text.lines().collect();

    let mut params = None;
    let mut marker = None;
    for (idx, line) in lines.iter().enumerate() {
        if params.is_none() && line.starts_with('{') {
            let parsed: ParamSet = serde_json::from_str(line).map_err(|e| {
                CacheError::format(format!("malformed parameter line {}: {}", idx + 1, e))
            })?;
            params = Some(parsed);
        }
        if line.trim_end() == STATS_MARKER {
            marker = Some(idx);
            break;
        }
    }
    let params = params.ok_or_else(|| CacheError::format("no parameter line found"))?;
    let marker = marker.ok_or_else(|| CacheError::format("missing 'Statistics begin' marker"))?;

    let header = lines
        .get(marker + 1)
        .ok_or_else(|| CacheError::format("missing statistics header"))?;
    let names: Vec<String> = header.split_whitespace().map(str::to_string).collect();
    if names.is_empty() {
        return Err(CacheError::format("empty statistics header"));
    }

    let mut table = StatTable::new(names);
    let mut row = Vec::with_capacity(table.names().len());
    for (offset, line) in lines[marker + 2..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = marker + 3 + offset;
        row.clear();
        for token in line.split_whitespace() {
            let value: f64 = token.parse().map_err(|_| {
                CacheError::format(format!("line {}: not a number: {}", line_no, token))
            })?;
            row.push(value);
        }
        if row.len() != table.names().len() {
            return Err(CacheError::format(format!(
                "line {}: expected {} values, found {}",
                line_no,
                table.names().len(),
                row.len()
            )));
        }
        table.push_row(&row)?;
    }
    Ok((params, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{default_set, ParamValue};

    fn sample_table() -> StatTable {
        let mut table = StatTable::new(vec!["time".into(), "Eavg".into(), "Tplus".into()]);
        table.push_row(&[1.0, 99.25, 0.0]).expect("row");
        table.push_row(&[2.0, 98.125, 1e-9]).expect("row");
        table.push_row(&[3.0, 0.1 + 0.2, f64::MAX]).expect("row");
        table
    }

    #[test]
    fn compressed_round_trip_is_exact() {
        let mut params = default_set();
        params.insert("seed".into(), ParamValue::Int(1234));
        params.insert("Binitial".into(), ParamValue::Float(0.1));
        let table = sample_table();

        let bytes = encode(&params, &table).expect("encode");
        let (decoded_params, decoded_table) = decode(&bytes).expect("decode");
        assert_eq!(decoded_params, params);
        assert_eq!(decoded_table, table);
    }

    #[test]
    fn text_layout_matches_format() {
        let text = encode_text(&default_set(), &sample_table()).expect("encode");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], PROVENANCE_LINE);
        assert!(lines[1].starts_with('{'));
        assert_eq!(lines[2], STATS_MARKER);
        assert_eq!(lines[3], "time Eavg Tplus");
        assert_eq!(lines[4], "1 99.25 0");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn trailing_blank_lines_are_tolerated() {
        let mut text = encode_text(&default_set(), &sample_table()).expect("encode");
        text.push_str("\n\n   \n");
        let (_, table) = decode_text(&text).expect("decode");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn missing_params_is_a_format_error() {
        let text = "header\nStatistics begin\ntime\n1\n";
        let err = decode_text(text).expect_err("no params");
        assert!(matches!(err, CacheError::Format(_)));
    }

    #[test]
    fn malformed_params_is_a_format_error() {
        let text = "{'N': 10}\nStatistics begin\ntime\n1\n";
        let err = decode_text(text).expect_err("python literal");
        assert!(err.to_string().contains("malformed parameter line"), "{}", err);
    }

    #[test]
    fn missing_marker_is_a_format_error() {
        let text = "{\"N\": 10}\ntime\n1\n";
        let err = decode_text(text).expect_err("no marker");
        assert!(err.to_string().contains("Statistics begin"), "{}", err);
    }

    #[test]
    fn truncated_row_is_rejected() {
        let text = "{\"N\": 10}\nStatistics begin\ntime Eavg\n1 2\n2\n";
        let err = decode_text(text).expect_err("short row");
        assert!(err.to_string().contains("expected 2 values"), "{}", err);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode(b"definitely not zstd").expect_err("garbage");
        assert!(matches!(err, CacheError::Format(_)));
    }
}
