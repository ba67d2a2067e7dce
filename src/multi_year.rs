//! Final multi-year product of one station.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike;

use crate::config::StitchConfig;
use crate::fields::{FieldKey, FieldMeta};
use crate::overlap_stitcher::YearlyContainer;
use crate::report::{Component, Event, EventSink};
use crate::run_id::StationCode;
use crate::series::{date_range, TimeSeries, Timestamp};
use crate::table::{multi_year_file_name, Table, TableHeader};

/// All years of a station on one regular grid. Grid points without a sample
/// hold `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiYearSeries {
    pub station: StationCode,
    pub index: Vec<Timestamp>,
    pub columns: BTreeMap<FieldKey, Vec<Option<f64>>>,
    pub metadata: BTreeMap<FieldKey, FieldMeta>,
}

impl MultiYearSeries {
    pub fn year_range(&self) -> Option<(i32, i32)> {
        Some((self.index.first()?.year(), self.index.last()?.year()))
    }

    pub fn file_name(&self) -> Option<String> {
        let (first, last) = self.year_range()?;
        Some(multi_year_file_name(&self.station, first, last))
    }

    pub fn to_table(&self) -> Table {
        let title = match self.year_range() {
            Some((first, last)) => format!("PPP {}-{}", first, last),
            None => "PPP".to_string(),
        };
        Table {
            header: TableHeader {
                station: self.station.as_str().to_string(),
                title,
                columns: self
                    .metadata
                    .iter()
                    .map(|(k, m)| (k.to_string(), m.clone()))
                    .collect(),
            },
            index: self.index.clone(),
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

/// Concatenates stitched years (keep-first on repeated timestamps), drops
/// values whose uncertainty is missing and reindexes onto the sampling grid.
/// Returns `None` when the containers hold no samples.
pub fn assemble(
    mut containers: Vec<YearlyContainer>,
    config: &StitchConfig,
    sink: &mut dyn EventSink,
) -> Option<MultiYearSeries> {
    containers.sort_by_key(|c| c.year);
    let station = containers.first()?.station.clone();

    let mut metadata = BTreeMap::new();
    for container in &containers {
        for (key, meta) in &container.metadata {
            metadata.entry(*key).or_insert_with(|| meta.clone());
        }
    }

    let keys: Vec<FieldKey> = metadata
        .keys()
        .copied()
        .chain(containers.iter().flat_map(|c| c.fields.keys().copied()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut merged: BTreeMap<FieldKey, TimeSeries> = keys
        .iter()
        .map(|key| {
            let parts = containers.iter().filter_map(|c| c.fields.get(key));
            (*key, TimeSeries::concat_keep_first(parts))
        })
        .collect();

    let mut dropped = 0usize;
    for key in keys.iter().filter(|k| !k.is_error()) {
        let errors = merged.get(&key.error_key()).cloned().unwrap_or_default();
        if let Some(values) = merged.get_mut(key) {
            let before = values.len();
            values.retain(|t, _| errors.get(t).map_or(false, |e| !e.is_nan()));
            dropped += before - values.len();
        }
    }

    let start = merged.values().filter_map(|s| s.first_time()).min()?;
    let end = merged.values().filter_map(|s| s.last_time()).max()?;
    let index = date_range(start, end, config.sampling_interval());

    let columns: BTreeMap<FieldKey, Vec<Option<f64>>> = merged
        .iter()
        .map(|(key, series)| (*key, series.reindex(&index)))
        .collect();
    for key in &keys {
        metadata.entry(*key).or_insert_with(|| key.meta());
    }

    sink.emit(
        Event::info(
            Component::MultiYear,
            format!(
                "assembled {} years into {} grid points, dropped {} values without uncertainty",
                containers.len(),
                index.len(),
                dropped
            ),
        )
        .station(&station),
    );

    Some(MultiYearSeries {
        station,
        index,
        columns,
        metadata,
    })
}
