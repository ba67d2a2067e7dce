//! Stitching across New Year between consecutive yearly containers.
//!
//! The last run of a year extends into the next one, so the end of year Y
//! and the start of year Y+1 carry the same overlap as two neighbouring runs.
//! The tail of Y and the head of Y+1 are merged with the per-field rule and
//! written back into both containers.

use chrono::{TimeZone, Utc};

use crate::config::{StitchConfig, StitchMethod};
use crate::error::SkipReason;
use crate::overlap_stitcher::{merge_values, YearlyContainer};
use crate::report::{Component, Event, EventSink};
use crate::series::{union_times, TimeSeries, Timestamp};

fn new_year(year: i32) -> Option<Timestamp> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()
}

fn from(series: &TimeSeries, start: Timestamp) -> TimeSeries {
    match series.last_time() {
        Some(last) => series.slice(start, last),
        None => TimeSeries::new(),
    }
}

fn until(series: &TimeSeries, end: Timestamp) -> TimeSeries {
    match series.first_time() {
        Some(first) => series.slice(first, end),
        None => TimeSeries::new(),
    }
}

/// Merged segment over the whole union of `tail` and `head`. Unlike a run
/// pair there is no margin; the boundary windows already bound the span.
fn stitch_windows(
    tail: &TimeSeries,
    head: &TimeSeries,
    method: StitchMethod,
) -> std::result::Result<TimeSeries, SkipReason> {
    if tail.common_times(head).is_empty() {
        return Err(SkipReason::NoOverlap);
    }
    let times = union_times([tail, head]);
    if let StitchMethod::SmoothedMean { window, .. } = method {
        if times.len() < window {
            return Err(SkipReason::InsufficientOverlapLength {
                samples: times.len(),
                window,
            });
        }
    }
    Ok(merge_values(tail, head, &times, method))
}

/// Stitches every New Year boundary. Containers are returned sorted by year.
pub fn stitch_years(
    mut containers: Vec<YearlyContainer>,
    config: &StitchConfig,
    sink: &mut dyn EventSink,
) -> Vec<YearlyContainer> {
    containers.sort_by_key(|c| c.year);
    for i in 1..containers.len() {
        let (left, right) = containers.split_at_mut(i);
        stitch_boundary(&mut left[i - 1], &mut right[0], config, sink);
    }
    containers
}

fn stitch_boundary(
    first: &mut YearlyContainer,
    second: &mut YearlyContainer,
    config: &StitchConfig,
    sink: &mut dyn EventSink,
) {
    let (Some(tail_start), Some(head_end)) = (
        new_year(first.year + 1).map(|t| t - config.year_tail()),
        new_year(second.year).map(|t| t + config.year_head()),
    ) else {
        return;
    };

    let tails: Vec<_> = first
        .fields
        .iter()
        .map(|(k, s)| (*k, from(s, tail_start)))
        .collect();
    let heads: Vec<_> = second
        .fields
        .iter()
        .map(|(k, s)| (*k, until(s, head_end)))
        .collect();

    let shared = tails.iter().any(|(k, tail)| {
        heads
            .iter()
            .any(|(hk, head)| hk == k && !tail.common_times(head).is_empty())
    });
    if !shared {
        sink.emit(
            Event::warning(
                Component::CrossYearStitcher,
                format!("skipping stitching years {} and {}", first.year, second.year),
            )
            .station(&first.station)
            .year(first.year),
        );
        return;
    }
    sink.emit(
        Event::info(
            Component::CrossYearStitcher,
            format!("stitching years {} and {}", first.year, second.year),
        )
        .station(&first.station)
        .year(first.year),
    );

    for (key, tail) in tails {
        let Some(head) = heads.iter().find(|(k, _)| *k == key).map(|(_, s)| s) else {
            continue;
        };
        let method = config.method_for(key.category());
        let segment = match stitch_windows(&tail, head, method) {
            Ok(segment) => segment,
            Err(reason) => {
                sink.emit(
                    Event::warning(
                        Component::CrossYearStitcher,
                        format!(
                            "skipping years {} and {}: {}",
                            first.year, second.year, reason
                        ),
                    )
                    .station(&first.station)
                    .year(first.year)
                    .field(key),
                );
                continue;
            }
        };
        for container in [&mut *first, &mut *second] {
            if let Some(series) = container.fields.get_mut(&key) {
                overwrite_in_range(series, &segment);
            }
        }
    }
}

/// Overwrites `series` with `segment`, limited to the series' own time span.
fn overwrite_in_range(series: &mut TimeSeries, segment: &TimeSeries) {
    if let (Some(start), Some(end)) = (series.first_time(), series.last_time()) {
        series.overwrite_within(segment, start, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Field, FieldKey};
    use crate::report::{EventLog, Severity};
    use crate::run_id::StationCode;
    use crate::series::test_util::{regular, ts};
    use std::collections::BTreeMap;

    fn container(year: i32, fields: Vec<(FieldKey, TimeSeries)>) -> YearlyContainer {
        let metadata = fields.iter().map(|(k, _)| (*k, k.meta())).collect();
        YearlyContainer {
            station: StationCode::parse("tela").unwrap(),
            year,
            fields: fields.into_iter().collect::<BTreeMap<_, _>>(),
            metadata,
        }
    }

    #[test]
    fn test_disjoint_years_are_left_alone() {
        let x = FieldKey::value(Field::X);
        // Ends before the tail window opens.
        let y2018 = container(2018, vec![(x, regular(ts(2018, 12, 31, 0, 0), 100, |_| 1.0))]);
        let y2019 = container(2019, vec![(x, regular(ts(2019, 1, 1, 0, 0), 100, |_| 3.0))]);

        let mut log = EventLog::new();
        let out = stitch_years(vec![y2018.clone(), y2019.clone()], &StitchConfig::default(), &mut log);

        assert_eq!(out, vec![y2018, y2019]);
        assert_eq!(log.count(Severity::Warning), 1);
        assert!(log.warnings().next().unwrap().message.contains("skipping stitching years 2018 and 2019"));
    }

    #[test]
    fn test_boundary_is_stitched_in_both_years() {
        let x = FieldKey::value(Field::X);
        let x_err = FieldKey::error(Field::X);
        // 2018's last run runs through Jan 1 06:00, 2019's first run starts Dec 31 21:00.
        let start_2018 = ts(2018, 12, 30, 0, 0);
        let start_2019 = ts(2018, 12, 31, 21, 0);
        let y2018 = container(
            2018,
            vec![
                (x, regular(start_2018, 649, |_| 1.0)),
                (x_err, regular(start_2018, 649, |_| 3.0)),
            ],
        );
        let y2019 = container(
            2019,
            vec![
                (x, regular(start_2019, 300, |_| 3.0)),
                (x_err, regular(start_2019, 300, |_| 4.0)),
            ],
        );

        let mut log = EventLog::new();
        // Out of order on purpose.
        let out = stitch_years(vec![y2019, y2018], &StitchConfig::default(), &mut log);
        assert_eq!(out[0].year, 2018);
        assert_eq!(log.count(Severity::Warning), 0);

        let shared = ts(2019, 1, 1, 0, 0);
        for year in &out {
            assert_eq!(year.fields[&x].get(&shared), Some(2.0));
            assert!((year.fields[&x_err].get(&shared).unwrap() - 5.0).abs() < 1e-12);
        }
        // Inside the tail window but before the overlap only 2018 has data.
        assert_eq!(out[0].fields[&x].get(&ts(2018, 12, 31, 19, 0)), Some(1.0));
        // Each container keeps its own span.
        assert_eq!(out[0].fields[&x].last_time(), Some(ts(2019, 1, 1, 6, 0)));
        assert_eq!(out[1].fields[&x].first_time(), Some(start_2019));
        assert_eq!(out[1].fields[&x].len(), 300);
    }

    #[test]
    fn test_short_overlap_of_smoothed_field_is_stitched() {
        let wetz = FieldKey::value(Field::WetZ);
        // Five shared samples, Jan 1 00:00 to 00:20; the windows hold 145.
        let y2018 = container(2018, vec![(wetz, regular(ts(2018, 12, 31, 0, 0), 293, |_| 8.0))]);
        let y2019 = container(2019, vec![(wetz, regular(ts(2019, 1, 1, 0, 0), 73, |_| 10.0))]);

        let mut log = EventLog::new();
        let out = stitch_years(vec![y2018, y2019], &StitchConfig::default(), &mut log);
        assert_eq!(log.count(Severity::Warning), 0);

        // The merged step 8 | 9 | 10 is symmetric around 00:10.
        let center = ts(2019, 1, 1, 0, 10);
        for year in &out {
            assert!((year.fields[&wetz].get(&center).unwrap() - 9.0).abs() < 1e-9);
        }
        let edge = out[0].fields[&wetz].get(&ts(2019, 1, 1, 0, 20)).unwrap();
        assert!(edge > 9.0 && edge < 10.0);
        assert_eq!(out[0].fields[&wetz].len(), 293);
        assert_eq!(out[1].fields[&wetz].len(), 73);
    }

    #[test]
    fn test_windows_shorter_than_smoothing_window_are_skipped() {
        let wetz = FieldKey::value(Field::WetZ);
        let tail = regular(ts(2019, 1, 1, 0, 0), 10, |_| 1.0);
        let head = regular(ts(2019, 1, 1, 0, 20), 10, |_| 2.0);
        let method = StitchConfig::default().method_for(wetz.category());
        assert_eq!(
            stitch_windows(&tail, &head, method),
            Err(SkipReason::InsufficientOverlapLength { samples: 14, window: 25 })
        );
        let later = regular(ts(2019, 1, 2, 0, 0), 10, |_| 2.0);
        assert_eq!(stitch_windows(&tail, &later, method), Err(SkipReason::NoOverlap));
    }
}
