//! Station-year assembly of daily runs.
//!
//! Every run file of a station-year is parsed (in parallel), the successful
//! parses are ordered by their first timestamp and numbered, and each field of
//! run `i` becomes the instance `{field}-{i}` of one `RawYearlyContainer`.
//! Files that fail to parse are reported and left out.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::daily_parser::{parse_run_file, DailySeries};
use crate::error::{PipelineError, Result};
use crate::fields::{FieldKey, FieldMeta};
use crate::report::{Component, Event, EventSink, Severity};
use crate::run_id::{RunId, StationCode};
use crate::series::TimeSeries;
use crate::table::{Table, TableHeader};

/// One field of one numbered run, rendered `{field}-{run}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey {
    pub field: FieldKey,
    pub run: usize,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.field, self.run)
    }
}

impl FromStr for InstanceKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (field, run) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("'{}' has no run index", s))?;
        Ok(InstanceKey {
            field: field.parse()?,
            run: run
                .parse()
                .map_err(|_| format!("bad run index in '{}'", s))?,
        })
    }
}

/// A parsed run together with its position in the station-year.
#[derive(Debug, Clone)]
pub struct RunInstance {
    pub index: usize,
    pub series: DailySeries,
}

/// All run instances of one station-year, before stitching.
#[derive(Debug, Clone, PartialEq)]
pub struct RawYearlyContainer {
    pub station: StationCode,
    pub year: i32,
    pub instances: BTreeMap<InstanceKey, TimeSeries>,
    pub metadata: BTreeMap<FieldKey, FieldMeta>,
}

impl RawYearlyContainer {
    pub fn from_runs(station: StationCode, year: i32, runs: &[RunInstance]) -> Self {
        let mut instances = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for run in runs {
            for (key, series) in &run.series.fields {
                instances.insert(
                    InstanceKey {
                        field: *key,
                        run: run.index,
                    },
                    series.clone(),
                );
            }
            metadata.extend(run.series.metadata());
        }
        RawYearlyContainer {
            station,
            year,
            instances,
            metadata,
        }
    }

    pub fn fields(&self) -> Vec<FieldKey> {
        let mut fields: Vec<FieldKey> = self.instances.keys().map(|k| k.field).collect();
        fields.dedup();
        fields
    }

    /// Instances of one field ordered by run index.
    pub fn instances_of(&self, field: FieldKey) -> Vec<(usize, &TimeSeries)> {
        self.instances
            .iter()
            .filter(|(k, _)| k.field == field)
            .map(|(k, s)| (k.run, s))
            .collect()
    }

    pub fn run_count(&self) -> usize {
        self.instances
            .keys()
            .map(|k| k.run + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn to_table(&self) -> Table {
        let series: BTreeMap<String, TimeSeries> = self
            .instances
            .iter()
            .map(|(k, s)| (k.to_string(), s.clone()))
            .collect();
        let columns = self
            .instances
            .keys()
            .filter_map(|k| self.metadata.get(&k.field).map(|m| (k.to_string(), m.clone())))
            .collect();
        let header = TableHeader {
            station: self.station.as_str().to_string(),
            title: format!("raw {}", self.year),
            columns,
        };
        Table::from_series(header, &series)
    }

    pub fn from_table(table: &Table, year: i32, path: &Path) -> Result<Self> {
        let bad = |reason: String| PipelineError::TableFormat {
            path: path.to_path_buf(),
            reason,
        };
        let station = StationCode::parse(&table.header.station)?;
        let mut instances = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for name in table.columns.keys() {
            let key: InstanceKey = name.parse().map_err(bad)?;
            let series = table.series(name).unwrap_or_default();
            instances.insert(key, series);
            let meta = table
                .header
                .columns
                .get(name)
                .cloned()
                .unwrap_or_else(|| key.field.meta());
            metadata.entry(key.field).or_insert(meta);
        }
        Ok(RawYearlyContainer {
            station,
            year,
            instances,
            metadata,
        })
    }
}

/// Result of assembling one station-year.
#[derive(Debug)]
pub struct Assembly {
    /// `None` when no run file could be parsed.
    pub container: Option<RawYearlyContainer>,
    pub failures: Vec<(PathBuf, PipelineError)>,
}

/// Parses `files` on `pool` and assembles those belonging to `station` (and
/// to `year`, when given) into one container.
pub fn assemble_station_year(
    station: &StationCode,
    year: Option<i32>,
    files: &[PathBuf],
    pool: &ThreadPool,
    sink: &mut dyn EventSink,
) -> Assembly {
    let mut failures = Vec::new();
    let mut selected = Vec::new();
    for path in files {
        match RunId::from_path(path) {
            Ok(id) if &id.station == station && year.map_or(true, |y| id.year() == y) => {
                selected.push(path.clone())
            }
            Ok(_) => {}
            Err(e) => failures.push((path.clone(), e)),
        }
    }

    let parsed: Vec<(PathBuf, Result<DailySeries>)> = pool.install(|| {
        selected
            .par_iter()
            .map(|path| (path.clone(), parse_run_file(path)))
            .collect()
    });

    let mut daily = Vec::with_capacity(parsed.len());
    for (path, result) in parsed {
        match result {
            Ok(series) => daily.push(series),
            Err(e) => failures.push((path, e)),
        }
    }

    for (path, err) in &failures {
        let mut event = Event::error(
            Component::RunAssembler,
            format!("problem reading {}, excluded from assembly: {}", path.display(), err),
        )
        .station(station);
        if let Some(y) = year {
            event = event.year(y);
        }
        sink.emit(event);
    }

    for series in &daily {
        sink.emit(
            Event::new(
                Component::DailyParser,
                Severity::Debug,
                format!("parsed {} with {} samples per field", series.run, series.sample_count()),
            )
            .station(station)
            .year(series.run.year()),
        );
    }

    daily.sort_by(|a, b| {
        a.first_time()
            .cmp(&b.first_time())
            .then_with(|| a.run.cmp(&b.run))
    });

    let container_year = year.or_else(|| daily.iter().map(|d| d.run.year()).min());
    let container = match container_year {
        Some(y) if !daily.is_empty() => {
            let runs: Vec<RunInstance> = daily
                .into_iter()
                .enumerate()
                .map(|(index, series)| RunInstance { index, series })
                .collect();
            sink.emit(
                Event::info(
                    Component::RunAssembler,
                    format!(
                        "assembled {} runs ({} failed)",
                        runs.len(),
                        failures.len()
                    ),
                )
                .station(station)
                .year(y),
            );
            Some(RawYearlyContainer::from_runs(station.clone(), y, &runs))
        }
        _ => {
            let mut event = Event::warning(Component::RunAssembler, "no run file could be parsed")
                .station(station);
            if let Some(y) = year {
                event = event.year(y);
            }
            sink.emit(event);
            None
        }
    };

    Assembly {
        container,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daily_parser::test_util::synthetic_tdp;
    use crate::daily_parser::{parse_run_text, seconds_to_timestamp};
    use crate::fields::Field;
    use crate::report::{EventLog, Severity};
    use std::fs;

    // 2019-01-01T00:00:00Z relative to the solution epoch.
    const JAN1_2019: f64 = 599_572_800.0;
    const DAY: f64 = 86_400.0;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn write_runs(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        // Written out of chronological order on purpose.
        for (name, day) in [("tela0030.19d", 2.0), ("tela0010.19d", 0.0), ("tela0020.19d", 1.0)] {
            let path = dir.join(format!("{}.tdp", name));
            let text = synthetic_tdp(JAN1_2019 + day * DAY - 3.0 * 3600.0, 360, |i| 0.1 + i as f64 * 1e-5);
            fs::write(&path, text).unwrap();
            files.push(path);
        }
        let broken = dir.join("tela0040.19d.tdp");
        fs::write(&broken, "1.0 0 0.1 0.001 Station.TELA.Trop.WetZ\n").unwrap();
        files.push(broken);
        let other_year = dir.join("tela0010.18d.tdp");
        fs::write(&other_year, synthetic_tdp(JAN1_2019 - 365.0 * DAY, 10, |_| 0.1)).unwrap();
        files.push(other_year);
        files
    }

    #[test]
    fn test_orders_runs_and_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_runs(dir.path());
        let station = StationCode::parse("tela").unwrap();
        let mut log = EventLog::new();

        let assembly = assemble_station_year(&station, Some(2019), &files, &pool(), &mut log);
        let container = assembly.container.unwrap();

        assert_eq!(assembly.failures.len(), 1);
        assert!(matches!(assembly.failures[0].1, PipelineError::MalformedRunFile { .. }));
        assert_eq!(log.count(Severity::Error), 1);

        assert_eq!(container.run_count(), 3);
        assert_eq!(container.instances.len(), 36);
        let wetz = container.instances_of(FieldKey::value(Field::WetZ));
        let firsts: Vec<_> = wetz.iter().map(|(_, s)| s.first_time().unwrap()).collect();
        assert!(firsts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(firsts[0], seconds_to_timestamp(JAN1_2019 - 3.0 * 3600.0).unwrap());
        assert_eq!(container.metadata[&FieldKey::value(Field::WetZ)].unit, "cm");
    }

    #[test]
    fn test_assembly_output_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_runs(dir.path());
        let station = StationCode::parse("tela").unwrap();

        let mut outputs = Vec::new();
        for attempt in 0..2 {
            let mut log = EventLog::new();
            let assembly = assemble_station_year(&station, Some(2019), &files, &pool(), &mut log);
            let path = dir.path().join(format!("out{}.csv.zst", attempt));
            assembly.container.unwrap().to_table().write(&path, 19).unwrap();
            outputs.push(fs::read(&path).unwrap());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn test_all_failures_yield_no_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tela0010.19d.tdp");
        fs::write(&path, "garbage\n").unwrap();
        let station = StationCode::parse("tela").unwrap();
        let mut log = EventLog::new();

        let assembly = assemble_station_year(&station, Some(2019), &[path], &pool(), &mut log);
        assert!(assembly.container.is_none());
        assert_eq!(assembly.failures.len(), 1);
        assert_eq!(log.count(Severity::Warning), 1);
    }

    #[test]
    fn test_raw_table_round_trip() {
        let text = synthetic_tdp(JAN1_2019, 12, |i| 0.2 + i as f64 * 0.001);
        let daily = parse_run_text(
            RunId::parse("tela0010.19d").unwrap(),
            Path::new("tela0010.19d.tdp"),
            &text,
        )
        .unwrap();
        let station = StationCode::parse("tela").unwrap();
        let container = RawYearlyContainer::from_runs(
            station,
            2019,
            &[RunInstance { index: 0, series: daily.clone() }],
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tela_ppp_raw_2019.csv.zst");
        container.to_table().write(&path, 3).unwrap();
        let back = RawYearlyContainer::from_table(&Table::read(&path).unwrap(), 2019, &path).unwrap();

        assert_eq!(back.instances.len(), 12);
        assert_eq!(back.metadata, daily.metadata());
        for (key, series) in &daily.fields {
            let instance = &back.instances[&InstanceKey { field: *key, run: 0 }];
            assert_eq!(instance.len(), series.len());
        }
    }

    #[test]
    fn test_instance_key_names() {
        let key = InstanceKey {
            field: FieldKey::error(Field::GradNorth),
            run: 12,
        };
        assert_eq!(key.to_string(), "GradNorth_error-12");
        assert_eq!("GradNorth_error-12".parse::<InstanceKey>().unwrap(), key);
        assert!("WetZ".parse::<InstanceKey>().is_err());
    }
}
