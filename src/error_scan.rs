//! Run failure analysis.
//!
//! A run failed when its error log exists but no solution file does. The log
//! lines are matched against known failure markers; logs without any marker
//! are reported separately so the marker list can be extended.
//!
//! Successful runs are counted by run identifier, so several solution files
//! for one run count once.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::{ensure_input_dir, find_files};
use crate::report::{Component, Event, EventSink};
use crate::run_id::{RunId, RUN_KEY_LEN};

/// Substrings that identify a known failure cause, in matching order.
pub const FAILURE_MARKERS: [&str; 8] = [
    "KeyError",
    "ValueError",
    "Exception",
    "Error",
    "Trouble",
    "Problem",
    "FATAL",
    "Timed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Recognized,
    /// None of the known markers appear in the log.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub run: RunId,
    /// Every trimmed line of the error log.
    pub log: Vec<String>,
    /// `(marker, line)` for each marker found in a line. A line containing
    /// several markers appears once per marker.
    pub matches: Vec<(&'static str, String)>,
    pub class: FailureClass,
}

impl RunFailure {
    pub fn date(&self) -> NaiveDate {
        self.run.date
    }
}

/// Outcome of one scan.
#[derive(Debug, Default)]
pub struct ErrorReport {
    pub successful: usize,
    /// Ordered by run date.
    pub failures: Vec<RunFailure>,
    /// Files that could not be read or named, with the reason.
    pub unreadable: Vec<(PathBuf, String)>,
}

impl ErrorReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.successful + self.failed()
    }

    pub fn success_percent(&self) -> f64 {
        percent(self.successful, self.total())
    }

    pub fn error_percent(&self) -> f64 {
        percent(self.failed(), self.total())
    }

    /// Records a file that failed during assembly.
    pub fn record_unreadable(&mut self, path: &Path, err: &PipelineError) {
        self.unreadable.push((path.to_path_buf(), err.to_string()));
    }

    pub fn unrecognized(&self) -> impl Iterator<Item = &RunFailure> {
        self.failures
            .iter()
            .filter(|f| f.class == FailureClass::Unrecognized)
    }

    /// Marker occurrences across all failures, most frequent first.
    pub fn marker_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for (marker, _) in self.failures.iter().flat_map(|f| &f.matches) {
            *counts.entry(*marker).or_default() += 1;
        }
        ranked(counts)
    }

    /// Matched diagnostic lines across all failures, most frequent first.
    pub fn line_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (_, line) in self.failures.iter().flat_map(|f| &f.matches) {
            *counts.entry(line.clone()).or_default() += 1;
        }
        ranked(counts)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * part as f64 / total as f64
}

fn ranked<K: Ord>(counts: BTreeMap<K, usize>) -> Vec<(K, usize)> {
    let mut out: Vec<(K, usize)> = counts.into_iter().collect();
    // Stable: equal counts stay in key order.
    out.sort_by(|a, b| b.1.cmp(&a.1));
    out
}

/// Markers found in `lines`, grouped by marker in `FAILURE_MARKERS` order.
pub fn match_markers(lines: &[String]) -> Vec<(&'static str, String)> {
    FAILURE_MARKERS
        .iter()
        .flat_map(|marker| {
            lines
                .iter()
                .filter(move |line| line.contains(marker))
                .map(move |line| (*marker, line.clone()))
        })
        .collect()
}

fn run_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(name.chars().take(RUN_KEY_LEN).collect())
}

pub fn scan_errors(
    dir: &Path,
    config: &PipelineConfig,
    sink: &mut dyn EventSink,
) -> Result<ErrorReport> {
    ensure_input_dir(dir)?;
    let succeeded: BTreeSet<String> = find_files(dir, &config.success_extension)?
        .iter()
        .filter_map(|p| run_key(p))
        .collect();

    let mut report = ErrorReport {
        successful: succeeded.len(),
        ..ErrorReport::default()
    };

    for path in find_files(dir, &config.error_extension)? {
        let Some(key) = run_key(&path) else {
            continue;
        };
        if succeeded.contains(&key) {
            continue;
        }
        let run = match RunId::parse(&key) {
            Ok(run) => run,
            Err(e) => {
                report.record_unreadable(&path, &e);
                continue;
            }
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                report.record_unreadable(&path, &PipelineError::io(&path, e));
                continue;
            }
        };

        let log: Vec<String> = text.lines().map(|l| l.trim().to_string()).collect();
        let matches = match_markers(&log);
        let class = if matches.is_empty() {
            sink.emit(
                Event::warning(
                    Component::ErrorScan,
                    format!("found new error on {} ({})", run, run.date.format("%Y-%m-%d")),
                )
                .station(&run.station)
                .year(run.year()),
            );
            FailureClass::Unrecognized
        } else {
            FailureClass::Recognized
        };
        report.failures.push(RunFailure {
            run,
            log,
            matches,
            class,
        });
    }

    report
        .failures
        .sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.run.cmp(&b.run)));

    for (path, reason) in &report.unreadable {
        sink.emit(Event::warning(
            Component::ErrorScan,
            format!("could not use {}: {}", path.display(), reason),
        ));
    }
    sink.emit(Event::info(
        Component::ErrorScan,
        format!(
            "total files: {}, successful runs: {}, erroneous runs: {}",
            report.total(),
            report.successful,
            report.failed()
        ),
    ));
    sink.emit(Event::info(
        Component::ErrorScan,
        format!("success percent: {:.1}%", report.success_percent()),
    ));
    sink.emit(Event::info(
        Component::ErrorScan,
        format!("error percent: {:.1}%", report.error_percent()),
    ));

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{EventLog, Severity};

    fn touch(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_seven_good_three_bad() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=7 {
            touch(dir.path(), &format!("tela{:03}0.19d.tdp", day), "");
        }
        // An error log next to a solution file is not a failure.
        touch(dir.path(), "tela0010.19d.err", "Warning only");
        touch(dir.path(), "tela0100.19d.err", "KeyError: 'WetZ'\nFATAL: giving up\n");
        touch(dir.path(), "tela0090.19d.err", "  Trouble reading orbit  \n");
        touch(dir.path(), "tela0080.19d.err", "something odd happened\n");

        let mut log = EventLog::new();
        let report = scan_errors(dir.path(), &PipelineConfig::default(), &mut log).unwrap();

        assert_eq!(report.successful, 7);
        assert_eq!(report.failed(), 3);
        assert_eq!(format!("{:.1}", report.success_percent()), "70.0");
        assert_eq!(format!("{:.1}", report.error_percent()), "30.0");

        let days: Vec<u32> = report
            .failures
            .iter()
            .map(|f| chrono::Datelike::ordinal(&f.date()))
            .collect();
        assert_eq!(days, vec![8, 9, 10]);

        let unrecognized: Vec<_> = report.unrecognized().collect();
        assert_eq!(unrecognized.len(), 1);
        assert_eq!(unrecognized[0].run.key(), "tela0080.19d");
        assert_eq!(log.count(Severity::Warning), 1);
        assert!(log.warnings().next().unwrap().message.contains("2019-01-08"));

        assert_eq!(report.failures[1].log, vec!["Trouble reading orbit".to_string()]);
        assert!(log
            .events()
            .iter()
            .any(|e| e.message == "success percent: 70.0%"));
    }

    #[test]
    fn test_marker_ranking() {
        let lines: Vec<String> = vec![
            "KeyError: 'WetZ'".to_string(),
            "FATAL: stop".to_string(),
        ];
        let matches = match_markers(&lines);
        // "KeyError" also contains "Error".
        assert_eq!(
            matches.iter().map(|(m, _)| *m).collect::<Vec<_>>(),
            vec!["KeyError", "Error", "FATAL"]
        );

        let run = |key: &str| RunId::parse(key).unwrap();
        let report = ErrorReport {
            successful: 0,
            failures: vec![
                RunFailure {
                    run: run("tela0010.19d"),
                    log: lines.clone(),
                    matches: matches.clone(),
                    class: FailureClass::Recognized,
                },
                RunFailure {
                    run: run("tela0020.19d"),
                    log: vec!["Timed out".to_string()],
                    matches: match_markers(&["Timed out".to_string()]),
                    class: FailureClass::Recognized,
                },
            ],
            unreadable: Vec::new(),
        };
        let markers = report.marker_counts();
        assert_eq!(markers.len(), 4);
        assert!(markers.iter().all(|(_, n)| *n == 1));
        assert_eq!(report.line_counts()[0], ("KeyError: 'WetZ'".to_string(), 2));
    }

    #[test]
    fn test_successful_runs_are_counted_once_per_run() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["first", "rerun"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
            touch(&dir.path().join(sub), "tela0010.19d.tdp", "");
        }
        touch(dir.path(), "tela0020.19d.err", "Problem with clocks\n");

        let report = scan_errors(dir.path(), &PipelineConfig::default(), &mut EventLog::new()).unwrap();
        assert_eq!(report.successful, 1);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let report = scan_errors(dir.path(), &PipelineConfig::default(), &mut EventLog::new()).unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(report.success_percent(), 0.0);
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_errors(&dir.path().join("nope"), &PipelineConfig::default(), &mut EventLog::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Directory { .. }));
    }
}
