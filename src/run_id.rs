//! Typed identifiers for stations and processing runs.
//!
//! Run files are named after the RINEX-2 observation file they were computed
//! from (`ssssdddf.yyt`, e.g. `tela0010.19d`). The name is parsed once at
//! ingestion and the resulting `RunId` travels through every stage.

use std::fmt;
use std::path::Path;

use chrono::{Datelike, NaiveDate};

use crate::error::{PipelineError, Result};

/// Length of the RINEX short name that prefixes every run file.
pub const RUN_KEY_LEN: usize = 12;

/// Four-character GNSS station code, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StationCode(String);

impl StationCode {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.chars().count() != 4 || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PipelineError::InvalidStation(raw.to_string()));
        }
        Ok(StationCode(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    pub station: StationCode,
    pub date: NaiveDate,
    /// `0` for a daily session, `a`..`x` for hourly sessions.
    pub session: char,
    key: String,
}

impl RunId {
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidRunId(name.to_string());
        let key: String = name.chars().take(RUN_KEY_LEN).collect();
        if key.len() != RUN_KEY_LEN || !key.is_ascii() || key.as_bytes()[8] != b'.' {
            return Err(invalid());
        }

        let station = StationCode::parse(&key[0..4]).map_err(|_| invalid())?;
        let doy: u32 = key[4..7].parse().map_err(|_| invalid())?;
        let session = key.as_bytes()[7] as char;
        if !(session == '0' || ('a'..='x').contains(&session)) {
            return Err(invalid());
        }
        let yy: i32 = key[9..11].parse().map_err(|_| invalid())?;
        let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
        let date = NaiveDate::from_yo_opt(year, doy).ok_or_else(invalid)?;

        Ok(RunId {
            station,
            date,
            session,
            key,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::InvalidRunId(path.display().to_string()))?;
        Self::parse(name)
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// The 12-character name this id was parsed from.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
