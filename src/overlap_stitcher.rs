//! Stitching of overlapping run instances into one series per field.
//!
//! Consecutive runs of a station-year overlap by a few hours. For each pair
//! of neighbouring instances the shared span (widened by a margin) is replaced
//! in both instances by a merged segment, after which all instances are
//! concatenated keep-first.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Duration;

use crate::config::{StitchConfig, StitchMethod};
use crate::error::{PipelineError, Result, SkipReason};
use crate::fields::{FieldKey, FieldMeta};
use crate::report::{Component, Event, EventSink};
use crate::run_assembler::RawYearlyContainer;
use crate::run_id::StationCode;
use crate::savgol::savitzky_golay_smooth;
use crate::series::{union_times, TimeSeries, Timestamp};
use crate::table::{Table, TableHeader};

/// One station-year with a single continuous series per field.
#[derive(Debug, Clone, PartialEq)]
pub struct YearlyContainer {
    pub station: StationCode,
    pub year: i32,
    pub fields: BTreeMap<FieldKey, TimeSeries>,
    pub metadata: BTreeMap<FieldKey, FieldMeta>,
}

impl YearlyContainer {
    pub fn first_time(&self) -> Option<Timestamp> {
        self.fields.values().filter_map(|s| s.first_time()).min()
    }

    pub fn last_time(&self) -> Option<Timestamp> {
        self.fields.values().filter_map(|s| s.last_time()).max()
    }

    pub fn to_table(&self) -> Table {
        let series: BTreeMap<String, TimeSeries> = self
            .fields
            .iter()
            .map(|(k, s)| (k.to_string(), s.clone()))
            .collect();
        let columns = self
            .metadata
            .iter()
            .map(|(k, m)| (k.to_string(), m.clone()))
            .collect();
        let header = TableHeader {
            station: self.station.as_str().to_string(),
            title: format!("post {}", self.year),
            columns,
        };
        Table::from_series(header, &series)
    }

    pub fn from_table(table: &Table, year: i32, path: &Path) -> Result<Self> {
        let station = StationCode::parse(&table.header.station)?;
        let mut fields = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for name in table.columns.keys() {
            let key: FieldKey = name.parse().map_err(|reason| PipelineError::TableFormat {
                path: path.to_path_buf(),
                reason,
            })?;
            fields.insert(key, table.series(name).unwrap_or_default());
            let meta = table
                .header
                .columns
                .get(name)
                .cloned()
                .unwrap_or_else(|| key.meta());
            metadata.insert(key, meta);
        }
        Ok(YearlyContainer {
            station,
            year,
            fields,
            metadata,
        })
    }
}

/// Merges `a` and `b` sample-wise over `times` with `method`.
pub fn merge_values(
    a: &TimeSeries,
    b: &TimeSeries,
    times: &[Timestamp],
    method: StitchMethod,
) -> TimeSeries {
    let pairs = times.iter().map(|t| (a.get(t), b.get(t)));
    let merged: Vec<f64> = match method {
        StitchMethod::SimpleMean | StitchMethod::SmoothedMean { .. } => {
            pairs.map(|(x, y)| nan_mean(x, y)).collect()
        }
        StitchMethod::ErrorMean => pairs
            .map(|(x, y)| {
                let x = x.filter(|v| !v.is_nan()).unwrap_or(0.0);
                let y = y.filter(|v| !v.is_nan()).unwrap_or(0.0);
                (x * x + y * y).sqrt()
            })
            .collect(),
    };
    let merged = match method {
        StitchMethod::SmoothedMean { window, order } => {
            savitzky_golay_smooth(&merged, window, order)
        }
        _ => merged,
    };
    times.iter().copied().zip(merged).collect()
}

fn nan_mean(a: Option<f64>, b: Option<f64>) -> f64 {
    let present: Vec<f64> = [a, b].into_iter().flatten().filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        return f64::NAN;
    }
    present.iter().sum::<f64>() / present.len() as f64
}

/// Stitched segment for two overlapping instances, covering their shared
/// span widened by `margin` on each side.
pub fn stitch_pair(
    a: &TimeSeries,
    b: &TimeSeries,
    method: StitchMethod,
    margin: Duration,
) -> std::result::Result<TimeSeries, SkipReason> {
    let common = a.common_times(b);
    let (Some(&first), Some(&last)) = (common.first(), common.last()) else {
        return Err(SkipReason::NoOverlap);
    };
    if let StitchMethod::SmoothedMean { window, .. } = method {
        if common.len() < window {
            return Err(SkipReason::InsufficientOverlapLength {
                samples: common.len(),
                window,
            });
        }
    }

    let (start, end) = (first - margin, last + margin);
    let a_win = a.slice(start, end);
    let b_win = b.slice(start, end);
    let times = union_times([&a_win, &b_win]);
    Ok(merge_values(&a_win, &b_win, &times, method))
}

/// Stitches every field of a station-year and consumes the raw container.
pub fn stitch_year(
    raw: RawYearlyContainer,
    config: &StitchConfig,
    sink: &mut dyn EventSink,
) -> YearlyContainer {
    let mut fields = BTreeMap::new();
    let mut metadata = raw.metadata.clone();
    let (mut stitched_pairs, mut skipped_pairs) = (0usize, 0usize);

    for key in raw.fields() {
        let method = config.method_for(key.category());
        let mut parts: Vec<(usize, TimeSeries)> = raw
            .instances_of(key)
            .into_iter()
            .map(|(run, s)| (run, s.clone()))
            .collect();

        let mut stitched_any = false;
        for i in 1..parts.len() {
            let (left, right) = parts.split_at_mut(i);
            let (run_a, a) = &mut left[i - 1];
            let (run_b, b) = &mut right[0];
            match stitch_pair(a, b, method, config.overlap_margin()) {
                Ok(segment) => {
                    a.overwrite_with(&segment);
                    b.overwrite_with(&segment);
                    stitched_any = true;
                    stitched_pairs += 1;
                }
                Err(reason) => {
                    skipped_pairs += 1;
                    sink.emit(
                        Event::warning(
                            Component::OverlapStitcher,
                            format!("skipping pair: {}", reason),
                        )
                        .station(&raw.station)
                        .year(raw.year)
                        .field(key)
                        .runs(&[*run_a, *run_b]),
                    );
                }
            }
        }

        if stitched_any {
            let meta = metadata.entry(key).or_insert_with(|| key.meta());
            meta.action = Some(method.action());
        }
        fields.insert(
            key,
            TimeSeries::concat_keep_first(parts.iter().map(|(_, s)| s)),
        );
    }

    sink.emit(
        Event::info(
            Component::OverlapStitcher,
            format!(
                "stitched {} run pairs, skipped {}",
                stitched_pairs, skipped_pairs
            ),
        )
        .station(&raw.station)
        .year(raw.year),
    );

    YearlyContainer {
        station: raw.station,
        year: raw.year,
        fields,
        metadata,
    }
}
