//! On-disk staging of the processing chain.
//!
//! `save_yearly_raw` turns run files into one raw table per station-year,
//! `post_process_all_years` stitches every raw table that has no post table
//! yet, and `assemble_multi_year` joins the post tables of a station into the
//! final product. Existing yearly outputs are never recomputed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::ThreadPool;
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::cross_year::stitch_years;
use crate::error::{PipelineError, Result};
use crate::error_scan::ErrorReport;
use crate::multi_year;
use crate::overlap_stitcher::{stitch_year, YearlyContainer};
use crate::report::{Component, Event, EventSink, Severity};
use crate::run_assembler::{assemble_station_year, RawYearlyContainer};
use crate::run_id::{RunId, StationCode};
use crate::table::{parse_yearly_file_name, yearly_file_name, Stage, Table};

/// Fails unless `dir` is an existing, listable directory.
pub fn ensure_input_dir(dir: &Path) -> Result<()> {
    let unusable = |reason: String| PipelineError::Directory {
        path: dir.to_path_buf(),
        reason,
    };
    if !dir.is_dir() {
        return Err(unusable("not a directory".to_string()));
    }
    fs::read_dir(dir).map_err(|e| unusable(e.to_string()))?;
    Ok(())
}

/// Creates `dir` if needed and fails unless it can be written to.
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    let unusable = |reason: String| PipelineError::Directory {
        path: dir.to_path_buf(),
        reason,
    };
    fs::create_dir_all(dir).map_err(|e| unusable(e.to_string()))?;
    let meta = fs::metadata(dir).map_err(|e| unusable(e.to_string()))?;
    if meta.permissions().readonly() {
        return Err(unusable("read-only".to_string()));
    }
    Ok(())
}

/// Files under `dir` (recursively) with the given extension, sorted by path.
pub fn find_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| PipelineError::io(dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(extension));
        if matches {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Run files grouped by station and year. Names that are not run identifiers
/// are returned separately.
#[derive(Debug, Default)]
pub struct Discovery {
    pub groups: BTreeMap<(StationCode, i32), Vec<PathBuf>>,
    pub rejected: Vec<(PathBuf, PipelineError)>,
}

pub fn discover_run_files(
    dir: &Path,
    config: &PipelineConfig,
    station: Option<&StationCode>,
) -> Result<Discovery> {
    let mut discovery = Discovery::default();
    for path in find_files(dir, &config.success_extension)? {
        match RunId::from_path(&path) {
            Ok(id) => {
                if station.map_or(true, |s| *s == id.station) {
                    let year = id.year();
                    discovery
                        .groups
                        .entry((id.station, year))
                        .or_default()
                        .push(path);
                }
            }
            Err(e) => discovery.rejected.push((path, e)),
        }
    }
    Ok(discovery)
}

/// Counts of what a stage did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StageSummary {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: usize,
}

impl StageSummary {
    fn emit(&self, stage: &str, sink: &mut dyn EventSink) {
        sink.emit(Event::info(
            Component::Driver,
            format!(
                "{}: {} written, {} skipped, {} failed",
                stage,
                self.written.len(),
                self.skipped.len(),
                self.failed
            ),
        ));
    }
}

fn write_table(
    table: &Table,
    path: &Path,
    config: &PipelineConfig,
    summary: &mut StageSummary,
    sink: &mut dyn EventSink,
    event: Event,
) {
    match table.write(path, config.compression_level) {
        Ok(()) => {
            sink.emit(event);
            summary.written.push(path.to_path_buf());
        }
        Err(e) => {
            sink.emit(Event {
                severity: Severity::Error,
                message: e.to_string(),
                ..event
            });
            summary.failed += 1;
        }
    }
}

/// Stage 1: one raw table per station-year.
pub fn save_yearly_raw(
    tdp_dir: &Path,
    save_dir: &Path,
    station: Option<&StationCode>,
    config: &PipelineConfig,
    pool: &ThreadPool,
    report: &mut ErrorReport,
    sink: &mut dyn EventSink,
) -> Result<StageSummary> {
    let discovery = discover_run_files(tdp_dir, config, station)?;
    let mut summary = StageSummary::default();
    for (path, err) in &discovery.rejected {
        sink.emit(Event::warning(Component::Driver, err.to_string()));
        report.record_unreadable(path, err);
    }

    for ((station, year), files) in &discovery.groups {
        let path = save_dir.join(yearly_file_name(station, Stage::Raw, *year));
        if path.exists() {
            sink.emit(
                Event::warning(
                    Component::Driver,
                    format!("{} already exists, skipping", path.display()),
                )
                .station(station)
                .year(*year),
            );
            summary.skipped.push(path);
            continue;
        }

        sink.emit(
            Event::info(Component::Driver, format!("reading {} run files", files.len()))
                .station(station)
                .year(*year),
        );
        let assembly = assemble_station_year(station, Some(*year), files, pool, sink);
        for (file, err) in &assembly.failures {
            report.record_unreadable(file, err);
        }
        let Some(container) = assembly.container else {
            summary.failed += 1;
            continue;
        };
        let saved = Event::info(Component::Driver, format!("{} was saved", path.display()))
            .station(station)
            .year(*year);
        write_table(&container.to_table(), &path, config, &mut summary, sink, saved);
    }

    summary.emit("raw", sink);
    Ok(summary)
}

/// Stage 2: stitch every raw table that has no post table yet.
pub fn post_process_all_years(
    save_dir: &Path,
    station: Option<&StationCode>,
    config: &PipelineConfig,
    sink: &mut dyn EventSink,
) -> Result<StageSummary> {
    let mut summary = StageSummary::default();
    for raw_path in yearly_tables(save_dir, Stage::Raw, station)? {
        let Some((code, _, year)) = file_name(&raw_path).and_then(parse_yearly_file_name) else {
            continue;
        };
        let post_path = save_dir.join(yearly_file_name(&code, Stage::Post, year));
        if post_path.exists() {
            sink.emit(
                Event::warning(
                    Component::Driver,
                    format!("{} already exists, skipping", post_path.display()),
                )
                .station(&code)
                .year(year),
            );
            summary.skipped.push(post_path);
            continue;
        }

        sink.emit(
            Event::info(Component::Driver, "post-processing")
                .station(&code)
                .year(year),
        );
        let raw = match Table::read(&raw_path)
            .and_then(|t| RawYearlyContainer::from_table(&t, year, &raw_path))
        {
            Ok(raw) => raw,
            Err(e) => {
                sink.emit(
                    Event::error(Component::Driver, e.to_string())
                        .station(&code)
                        .year(year),
                );
                summary.failed += 1;
                continue;
            }
        };
        let post = stitch_year(raw, &config.stitch, sink);
        let saved = Event::info(
            Component::Driver,
            format!("{} was saved", post_path.display()),
        )
        .station(&code)
        .year(year);
        write_table(&post.to_table(), &post_path, config, &mut summary, sink, saved);
    }

    summary.emit("post", sink);
    Ok(summary)
}

/// Stage 3: stitch the years of one station together and write the final
/// table. Returns the written path, or `None` when there is nothing to join.
pub fn assemble_multi_year(
    save_dir: &Path,
    station: &StationCode,
    config: &PipelineConfig,
    sink: &mut dyn EventSink,
) -> Result<Option<PathBuf>> {
    let mut years = Vec::new();
    for path in yearly_tables(save_dir, Stage::Post, Some(station))? {
        let Some((_, _, year)) = file_name(&path).and_then(parse_yearly_file_name) else {
            continue;
        };
        sink.emit(
            Event::info(Component::Driver, format!("reading {}", path.display()))
                .station(station)
                .year(year),
        );
        let table = Table::read(&path)?;
        years.push(YearlyContainer::from_table(&table, year, &path)?);
    }

    let stitched = stitch_years(years, &config.stitch, sink);
    let Some(series) = multi_year::assemble(stitched, &config.stitch, sink) else {
        sink.emit(Event::warning(Component::Driver, "no post-processed years found").station(station));
        return Ok(None);
    };
    let Some(name) = series.file_name() else {
        return Ok(None);
    };
    let path = save_dir.join(name);
    series.to_table().write(&path, config.compression_level)?;
    sink.emit(
        Event::info(Component::Driver, format!("{} was saved", path.display())).station(station),
    );
    Ok(Some(path))
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}

/// Yearly tables of `stage` in `dir`, ordered by station then year.
fn yearly_tables(
    dir: &Path,
    stage: Stage,
    station: Option<&StationCode>,
) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut found = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        let Some((code, st, year)) = file_name(&path).and_then(parse_yearly_file_name) else {
            continue;
        };
        if st == stage && station.map_or(true, |s| *s == code) {
            found.push((code, year, path));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

/// Stations that have post tables in `dir`.
pub fn post_stations(dir: &Path) -> Result<Vec<StationCode>> {
    let mut stations: Vec<StationCode> = yearly_tables(dir, Stage::Post, None)?
        .iter()
        .filter_map(|p| file_name(p).and_then(parse_yearly_file_name))
        .map(|(code, _, _)| code)
        .collect();
    stations.dedup();
    Ok(stations)
}

/// Everything one `process` invocation produced.
#[derive(Debug, Default)]
pub struct ProcessSummary {
    pub raw: StageSummary,
    pub post: StageSummary,
    pub multi_year: Vec<PathBuf>,
    pub report: ErrorReport,
}

/// Runs the three stages. Directory problems abort before any work is done.
pub fn process(
    tdp_dir: &Path,
    save_dir: &Path,
    station: Option<&StationCode>,
    config: &PipelineConfig,
    sink: &mut dyn EventSink,
) -> Result<ProcessSummary> {
    ensure_input_dir(tdp_dir)?;
    ensure_output_dir(save_dir)?;
    config.validate()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_count())
        .build()
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    let mut summary = ProcessSummary::default();
    summary.raw = save_yearly_raw(
        tdp_dir,
        save_dir,
        station,
        config,
        &pool,
        &mut summary.report,
        sink,
    )?;
    summary.post = post_process_all_years(save_dir, station, config, sink)?;

    let stations = match station {
        Some(s) => vec![s.clone()],
        None => post_stations(save_dir)?,
    };
    for code in &stations {
        match assemble_multi_year(save_dir, code, config, sink) {
            Ok(Some(path)) => summary.multi_year.push(path),
            Ok(None) => {}
            Err(e) => sink.emit(Event::error(Component::Driver, e.to_string()).station(code)),
        }
    }
    Ok(summary)
}
