//! Ordered single-field time series.
//!
//! A `TimeSeries` maps each timestamp to at most one value, so a series is
//! always sorted and duplicate-free. Combining series is done through
//! `concat_keep_first`, which resolves duplicates in favor of the series that
//! comes first.

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    samples: BTreeMap<Timestamp, f64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from samples; a repeated timestamp keeps its first value.
    pub fn from_samples<I: IntoIterator<Item = (Timestamp, f64)>>(samples: I) -> Self {
        let mut series = TimeSeries::new();
        for (t, v) in samples {
            series.insert_if_absent(t, v);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, t: &Timestamp) -> Option<f64> {
        self.samples.get(t).copied()
    }

    /// Sets the value at `t`, replacing any previous one.
    pub fn set(&mut self, t: Timestamp, value: f64) {
        self.samples.insert(t, value);
    }

    pub fn insert_if_absent(&mut self, t: Timestamp, value: f64) {
        self.samples.entry(t).or_insert(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, f64)> + '_ {
        self.samples.iter().map(|(t, v)| (*t, *v))
    }

    pub fn times(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.samples.keys().copied()
    }

    pub fn first_time(&self) -> Option<Timestamp> {
        self.samples.keys().next().copied()
    }

    pub fn last_time(&self) -> Option<Timestamp> {
        self.samples.keys().next_back().copied()
    }

    /// Samples with `start <= t <= end`.
    pub fn slice(&self, start: Timestamp, end: Timestamp) -> TimeSeries {
        if start > end {
            return TimeSeries::new();
        }
        TimeSeries {
            samples: self
                .samples
                .range(start..=end)
                .map(|(t, v)| (*t, *v))
                .collect(),
        }
    }

    /// Timestamps present in both series, ascending.
    pub fn common_times(&self, other: &TimeSeries) -> Vec<Timestamp> {
        self.samples
            .keys()
            .filter(|t| other.samples.contains_key(t))
            .copied()
            .collect()
    }

    /// Overwrites (or adds) every sample of `other` into `self`.
    pub fn overwrite_with(&mut self, other: &TimeSeries) {
        for (t, v) in other.iter() {
            self.set(t, v);
        }
    }

    /// Like `overwrite_with`, limited to `start <= t <= end`.
    pub fn overwrite_within(&mut self, other: &TimeSeries, start: Timestamp, end: Timestamp) {
        self.overwrite_with(&other.slice(start, end));
    }

    pub fn retain<F: FnMut(&Timestamp, &f64) -> bool>(&mut self, mut keep: F) {
        self.samples.retain(|t, v| keep(t, v));
    }

    /// Concatenates series in order; on duplicate timestamps the earliest
    /// series in the sequence wins.
    pub fn concat_keep_first<'a, I>(parts: I) -> TimeSeries
    where
        I: IntoIterator<Item = &'a TimeSeries>,
    {
        let mut out = TimeSeries::new();
        for part in parts {
            for (t, v) in part.iter() {
                out.insert_if_absent(t, v);
            }
        }
        out
    }

    /// Values on the regular grid `start, start + step, ... <= end`.
    /// Grid points without a sample are `None`.
    pub fn reindex(&self, grid: &[Timestamp]) -> Vec<Option<f64>> {
        grid.iter().map(|t| self.get(t)).collect()
    }
}

impl IntoIterator for TimeSeries {
    type Item = (Timestamp, f64);
    type IntoIter = btree_map::IntoIter<Timestamp, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl FromIterator<(Timestamp, f64)> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = (Timestamp, f64)>>(iter: I) -> Self {
        TimeSeries::from_samples(iter)
    }
}

/// Sorted union of the timestamps of several series.
pub fn union_times<'a, I>(series: I) -> Vec<Timestamp>
where
    I: IntoIterator<Item = &'a TimeSeries>,
{
    let mut all = BTreeSet::new();
    for s in series {
        all.extend(s.times());
    }
    all.into_iter().collect()
}

/// Regular grid from `start` to `end` inclusive.
pub fn date_range(start: Timestamp, end: Timestamp, step: Duration) -> Vec<Timestamp> {
    let mut grid = Vec::new();
    if step <= Duration::zero() {
        return grid;
    }
    let mut t = start;
    while t <= end {
        grid.push(t);
        t += step;
    }
    grid
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use chrono::TimeZone;

    pub fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    /// `count` samples every 5 minutes from `start`, values from `f(i)`.
    pub fn regular<F: Fn(usize) -> f64>(start: Timestamp, count: usize, f: F) -> TimeSeries {
        (0..count)
            .map(|i| (start + Duration::minutes(5 * i as i64), f(i)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_keep_first_on_duplicates() {
        let t = ts(2019, 1, 1, 0, 0);
        let s = TimeSeries::from_samples(vec![(t, 1.0), (t, 2.0)]);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(&t), Some(1.0));

        let a = regular(t, 3, |_| 1.0);
        let b = regular(t + Duration::minutes(5), 3, |_| 2.0);
        let joined = TimeSeries::concat_keep_first([&a, &b]);
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.get(&(t + Duration::minutes(10))), Some(1.0));
        assert_eq!(joined.get(&(t + Duration::minutes(15))), Some(2.0));
    }

    #[test]
    fn test_slice_is_inclusive() {
        let t = ts(2019, 1, 1, 0, 0);
        let s = regular(t, 10, |i| i as f64);
        let cut = s.slice(t + Duration::minutes(10), t + Duration::minutes(20));
        assert_eq!(cut.len(), 3);
        assert_eq!(cut.first_time(), Some(t + Duration::minutes(10)));
        assert!(s.slice(t + Duration::hours(1), t).is_empty());
    }

    #[test]
    fn test_common_times_and_union() {
        let t = ts(2019, 1, 1, 0, 0);
        let a = regular(t, 6, |_| 0.0);
        let b = regular(t + Duration::minutes(20), 6, |_| 0.0);
        assert_eq!(a.common_times(&b).len(), 2);
        assert_eq!(union_times([&a, &b]).len(), 10);
    }

    #[test]
    fn test_reindex_marks_gaps() {
        let t = ts(2019, 1, 1, 0, 0);
        let s = TimeSeries::from_samples(vec![(t, 1.0), (t + Duration::minutes(15), 4.0)]);
        let grid = date_range(t, t + Duration::minutes(15), Duration::minutes(5));
        assert_eq!(grid.len(), 4);
        assert_eq!(s.reindex(&grid), vec![Some(1.0), None, None, Some(4.0)]);
    }
}
