//! Parser for one GipsyX solution file (`.tdp`).
//!
//! Each line holds `seconds nominal value sigma name`. The trailing name tells
//! which field the row belongs to; the six field groups of a well-formed file
//! have the same number of rows and share the time axis of the `WetZ` group.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};

use crate::error::{PipelineError, Result};
use crate::fields::{Field, FieldKey, FieldMeta};
use crate::run_id::RunId;
use crate::series::{TimeSeries, Timestamp};

/// Solution time origin, 2000-01-01T12:00:00.
pub fn solution_epoch() -> Timestamp {
    Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// `None` when `seconds` is not finite or falls outside the representable
/// time range.
pub fn seconds_to_timestamp(seconds: f64) -> Option<Timestamp> {
    if !seconds.is_finite() {
        return None;
    }
    let offset = Duration::try_milliseconds((seconds * 1000.0).round() as i64)?;
    solution_epoch().checked_add_signed(offset)
}

/// All fields of one processing run.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    pub run: RunId,
    pub fields: BTreeMap<FieldKey, TimeSeries>,
}

impl DailySeries {
    pub fn first_time(&self) -> Option<Timestamp> {
        self.fields.values().filter_map(|s| s.first_time()).min()
    }

    /// Samples per field (all fields have the same count).
    pub fn sample_count(&self) -> usize {
        self.fields
            .get(&FieldKey::value(Field::WetZ))
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn metadata(&self) -> BTreeMap<FieldKey, FieldMeta> {
        self.fields.keys().map(|k| (*k, k.meta())).collect()
    }
}

struct Row {
    seconds: f64,
    value: f64,
    sigma: f64,
}

pub fn parse_run_file(path: &Path) -> Result<DailySeries> {
    let run = RunId::from_path(path)?;
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    parse_run_text(run, path, &text)
}

pub fn parse_run_text(run: RunId, path: &Path, text: &str) -> Result<DailySeries> {
    let mut groups: BTreeMap<Field, Vec<Row>> = Field::ALL.iter().map(|f| (*f, Vec::new())).collect();

    for (line_no, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(tag) = tokens.last() else {
            continue;
        };
        let Some(field) = Field::ALL.iter().find(|f| tag.contains(f.file_tag())) else {
            continue;
        };
        if tokens.len() < 5 {
            return Err(PipelineError::malformed(
                path,
                format!("line {}: expected 5 columns, found {}", line_no + 1, tokens.len()),
            ));
        }
        let number = |idx: usize| -> Result<f64> {
            tokens[idx]
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    PipelineError::malformed(
                        path,
                        format!("line {}: bad number '{}'", line_no + 1, tokens[idx]),
                    )
                })
        };
        let row = Row {
            seconds: number(0)?,
            value: number(2)?,
            sigma: number(3)?,
        };
        if let Some(rows) = groups.get_mut(field) {
            rows.push(row);
        }
    }

    let lengths: Vec<(Field, usize)> = groups.iter().map(|(f, rows)| (*f, rows.len())).collect();
    if let Some((missing, _)) = lengths.iter().find(|(_, len)| *len == 0) {
        return Err(PipelineError::malformed(
            path,
            format!("no rows tagged {}", missing.file_tag()),
        ));
    }
    if lengths.iter().any(|(_, len)| *len != lengths[0].1) {
        let summary: Vec<String> = lengths
            .iter()
            .map(|(f, len)| format!("{}={}", f.name(), len))
            .collect();
        return Err(PipelineError::malformed(
            path,
            format!("unequal field groups ({})", summary.join(", ")),
        ));
    }

    let times: Vec<Timestamp> = groups[&Field::WetZ]
        .iter()
        .map(|r| {
            seconds_to_timestamp(r.seconds).ok_or_else(|| {
                PipelineError::malformed(path, format!("time offset {} out of range", r.seconds))
            })
        })
        .collect::<Result<_>>()?;

    let mut fields = BTreeMap::new();
    for key in FieldKey::all() {
        let scale = key.field.scale();
        let series = times.iter().zip(&groups[&key.field]).map(|(t, r)| {
            let raw = if key.is_error() { r.sigma } else { r.value };
            (*t, raw * scale)
        });
        fields.insert(key, series.collect());
    }

    Ok(DailySeries { run, fields })
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Renders a solution file with `count` samples every 5 minutes starting
    /// `start_seconds` after the solution epoch. `wetz(i)` gives WetZ in meters.
    pub fn synthetic_tdp<F: Fn(usize) -> f64>(start_seconds: f64, count: usize, wetz: F) -> String {
        let mut out = String::new();
        for i in 0..count {
            let secs = start_seconds + 300.0 * i as f64;
            let rows = [
                (wetz(i), 0.001, "Station.TELA.Trop.WetZ"),
                (0.0002, 0.00005, "Station.TELA.Trop.GradNorth"),
                (-0.0001, 0.00005, "Station.TELA.Trop.GradEast"),
                (4_443_000.25, 0.004, "Station.TELA.State.Pos.X"),
                (3_100_000.5, 0.003, "Station.TELA.State.Pos.Y"),
                (3_400_000.75, 0.005, "Station.TELA.State.Pos.Z"),
            ];
            for (value, sigma, tag) in rows {
                out.push_str(&format!(
                    "{:>24.16e} {:>24.16e} {:>24.16e} {:>24.16e} {}\n",
                    secs, 0.0, value, sigma, tag
                ));
            }
            out.push_str(&format!("{:>24.16e} 0 0 0 Station.TELA.Clk.Bias\n", secs));
        }
        out
    }
}
