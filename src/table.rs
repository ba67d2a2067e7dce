//! On-disk table format for raw, post-processed and final products.
//!
//! A table is a zstd-compressed text stream: a `#`-prefixed JSON header line
//! with station and per-column metadata, then CSV with a `time` column
//! (RFC 3339, UTC) and one column per field. Missing values are empty cells.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, Writer};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::fields::FieldMeta;
use crate::run_id::StationCode;
use crate::series::{TimeSeries, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableHeader {
    pub station: String,
    pub title: String,
    pub columns: BTreeMap<String, FieldMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub header: TableHeader,
    pub index: Vec<Timestamp>,
    pub columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl Table {
    /// Builds a table over the union of the columns' timestamps.
    pub fn from_series(header: TableHeader, series: &BTreeMap<String, TimeSeries>) -> Self {
        let index: Vec<Timestamp> = series
            .values()
            .flat_map(|s| s.times())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let columns = series
            .iter()
            .map(|(name, s)| (name.clone(), s.reindex(&index)))
            .collect();
        Table {
            header,
            index,
            columns,
        }
    }

    /// Non-missing samples of one column.
    pub fn series(&self, name: &str) -> Option<TimeSeries> {
        let cells = self.columns.get(name)?;
        Some(
            self.index
                .iter()
                .zip(cells)
                .filter_map(|(t, v)| v.map(|v| (*t, v)))
                .collect(),
        )
    }

    /// Writes to a `.part` sibling and renames it over `path` once complete.
    /// Nothing is left at either location when the write fails.
    pub fn write(&self, path: &Path, level: i32) -> Result<()> {
        let partial = partial_path(path);
        let written = self
            .write_stream(&partial, level)
            .and_then(|()| fs::rename(&partial, path).map_err(|e| PipelineError::io(path, e)));
        if written.is_err() {
            let _ = fs::remove_file(&partial);
        }
        written
    }

    fn write_stream(&self, path: &Path, level: i32) -> Result<()> {
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), level)
            .map_err(|e| PipelineError::io(path, e))?;

        let header = serde_json::to_string(&self.header).map_err(|e| PipelineError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        writeln!(encoder, "#{}", header).map_err(|e| PipelineError::io(path, e))?;

        {
            let csv_err = |e: csv::Error| PipelineError::Csv {
                path: path.to_path_buf(),
                source: e,
            };
            let mut wtr = Writer::from_writer(&mut encoder);
            let mut head = vec!["time".to_string()];
            head.extend(self.columns.keys().cloned());
            wtr.write_record(&head).map_err(csv_err)?;

            for (row, t) in self.index.iter().enumerate() {
                let mut record = Vec::with_capacity(self.columns.len() + 1);
                record.push(t.to_rfc3339_opts(SecondsFormat::AutoSi, true));
                for (name, cells) in &self.columns {
                    let cell = cells.get(row).ok_or_else(|| PipelineError::TableFormat {
                        path: path.to_path_buf(),
                        reason: format!("column {} is shorter than the index", name),
                    })?;
                    record.push(cell.map(|v| v.to_string()).unwrap_or_default());
                }
                wtr.write_record(&record).map_err(csv_err)?;
            }
            wtr.flush().map_err(|e| PipelineError::io(path, e))?;
        }

        let mut inner = encoder.finish().map_err(|e| PipelineError::io(path, e))?;
        inner.flush().map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let decoder =
            zstd::stream::read::Decoder::new(file).map_err(|e| PipelineError::io(path, e))?;
        let mut reader = BufReader::new(decoder);

        let bad = |reason: &str| PipelineError::TableFormat {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut first = String::new();
        reader
            .read_line(&mut first)
            .map_err(|e| PipelineError::io(path, e))?;
        let json = first
            .trim_end()
            .strip_prefix('#')
            .ok_or_else(|| bad("missing metadata header"))?;
        let header: TableHeader = serde_json::from_str(json).map_err(|e| PipelineError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;

        let csv_err = |e: csv::Error| PipelineError::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        let mut rdr = ReaderBuilder::new().from_reader(reader);
        let names: Vec<String> = rdr
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(String::from)
            .collect();
        if names.first().map(String::as_str) != Some("time") {
            return Err(bad("first column must be 'time'"));
        }

        let mut index = Vec::new();
        let mut cells: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len() - 1];
        for record in rdr.records() {
            let record = record.map_err(csv_err)?;
            let t = record
                .get(0)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .ok_or_else(|| bad("unparseable timestamp"))?
                .with_timezone(&Utc);
            index.push(t);
            for (col, cell) in cells.iter_mut().enumerate() {
                let raw = record.get(col + 1).unwrap_or("");
                let value = if raw.is_empty() {
                    None
                } else {
                    Some(raw.parse::<f64>().map_err(|_| bad("unparseable value"))?)
                };
                cell.push(value);
            }
        }

        let columns = names.into_iter().skip(1).zip(cells).collect();
        Ok(Table {
            header,
            index,
            columns,
        })
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Which product a yearly file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Raw,
    Post,
}

impl Stage {
    fn tag(self) -> &'static str {
        match self {
            Stage::Raw => "raw",
            Stage::Post => "post",
        }
    }
}

pub const TABLE_EXTENSION: &str = "csv.zst";

pub fn yearly_file_name(station: &StationCode, stage: Stage, year: i32) -> String {
    format!("{}_ppp_{}_{}.{}", station.as_str(), stage.tag(), year, TABLE_EXTENSION)
}

pub fn multi_year_file_name(station: &StationCode, first_year: i32, last_year: i32) -> String {
    format!(
        "{}_PPP_{}-{}.{}",
        station.as_str(),
        first_year,
        last_year,
        TABLE_EXTENSION
    )
}

/// Splits `{station}_ppp_{stage}_{year}.csv.zst` back into its parts.
pub fn parse_yearly_file_name(name: &str) -> Option<(StationCode, Stage, i32)> {
    let stem = name.strip_suffix(&format!(".{}", TABLE_EXTENSION))?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() != 4 || parts[1] != "ppp" {
        return None;
    }
    let stage = match parts[2] {
        "raw" => Stage::Raw,
        "post" => Stage::Post,
        _ => return None,
    };
    let station = StationCode::parse(parts[0]).ok()?;
    let year = parts[3].parse().ok()?;
    Some((station, stage, year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_util::{regular, ts};

    fn header() -> TableHeader {
        let mut columns = BTreeMap::new();
        columns.insert(
            "WetZ".to_string(),
            FieldMeta {
                unit: "cm".to_string(),
                description: "Zenith Wet Delay".to_string(),
                action: Some("stitched".to_string()),
            },
        );
        TableHeader {
            station: "tela".to_string(),
            title: "post".to_string(),
            columns,
        }
    }

    #[test]
    fn test_write_then_read_keeps_gaps_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv.zst");

        let t0 = ts(2019, 3, 1, 0, 0);
        let mut series = BTreeMap::new();
        series.insert("WetZ".to_string(), regular(t0, 4, |i| 10.0 + i as f64 * 0.125));
        series.insert(
            "WetZ_error".to_string(),
            regular(t0 + chrono::Duration::minutes(10), 3, |_| 0.1),
        );
        let table = Table::from_series(header(), &series);
        assert_eq!(table.index.len(), 5);

        table.write(&path, 3).unwrap();
        let back = Table::read(&path).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.series("WetZ").unwrap().len(), 4);
        assert_eq!(back.series("WetZ_error").unwrap().len(), 3);
        assert!(back.series("X").is_none());
    }

    #[test]
    fn test_rejects_stream_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.csv.zst");
        let bytes = zstd::encode_all(&b"time,WetZ\n"[..], 3).unwrap();
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            Table::read(&path),
            Err(PipelineError::TableFormat { .. })
        ));
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tela_ppp_raw_2019.csv.zst");

        let t0 = ts(2019, 3, 1, 0, 0);
        let mut ragged = Table::from_series(
            header(),
            &BTreeMap::from([("WetZ".to_string(), regular(t0, 4, |_| 1.0))]),
        );
        ragged.columns.get_mut("WetZ").unwrap().truncate(2);

        let err = ragged.write(&path, 3).unwrap_err();
        assert!(matches!(err, PipelineError::TableFormat { .. }));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());

        // A later write of a sound table succeeds at the same path.
        ragged.columns.get_mut("WetZ").unwrap().extend([None, Some(2.0)]);
        ragged.write(&path, 3).unwrap();
        assert_eq!(Table::read(&path).unwrap(), ragged);
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_file_names() {
        let station = StationCode::parse("TELA").unwrap();
        let raw = yearly_file_name(&station, Stage::Raw, 2019);
        assert_eq!(raw, "tela_ppp_raw_2019.csv.zst");
        assert_eq!(
            parse_yearly_file_name(&raw),
            Some((station.clone(), Stage::Raw, 2019))
        );
        assert_eq!(
            multi_year_file_name(&station, 2015, 2019),
            "tela_PPP_2015-2019.csv.zst"
        );
        assert_eq!(parse_yearly_file_name("tela_PPP_2015-2019.csv.zst"), None);
        assert_eq!(parse_yearly_file_name("tela_ppp_post_2019.nc"), None);
    }
}
