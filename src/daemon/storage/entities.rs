use std::{borrow::Borrow, collections::BTreeMap, fmt::Display, sync::Arc};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lower-cased hostname used as the attribution unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainKey(Arc<str>);

impl DomainKey {
    /// Callers are expected to pass an already normalized hostname, see
    /// [extract](crate::daemon::collection::domain::extract).
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DomainKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for DomainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cumulative usage of one domain. Fields are private so that every mutation keeps
/// `total_time == sum(daily)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    total_time: u64,
    visits: u64,
    last_visit: u64,
    daily: BTreeMap<NaiveDate, u64>,
}

impl DomainRecord {
    pub fn new(last_visit: u64) -> Self {
        Self {
            total_time: 0,
            visits: 0,
            last_visit,
            daily: BTreeMap::new(),
        }
    }

    /// Builds a record from external data. Returns `None` when the declared total disagrees with
    /// the daily breakdown.
    pub fn from_parts(
        total_time: u64,
        visits: u64,
        last_visit: u64,
        daily: BTreeMap<NaiveDate, u64>,
    ) -> Option<Self> {
        let sum = daily
            .values()
            .try_fold(0u64, |acc, value| acc.checked_add(*value))?;
        (sum == total_time).then_some(Self {
            total_time,
            visits,
            last_visit,
            daily,
        })
    }

    /// Total attributed time in milliseconds.
    pub fn total_time(&self) -> u64 {
        self.total_time
    }

    pub fn visits(&self) -> u64 {
        self.visits
    }

    /// Epoch milliseconds of the latest visit or attribution.
    pub fn last_visit(&self) -> u64 {
        self.last_visit
    }

    pub fn daily(&self) -> &BTreeMap<NaiveDate, u64> {
        &self.daily
    }

    pub fn time_on(&self, day: NaiveDate) -> u64 {
        self.daily.get(&day).copied().unwrap_or(0)
    }

    /// Time attributed between `from` and `to`, both inclusive.
    pub fn time_between(&self, from: NaiveDate, to: NaiveDate) -> u64 {
        if from > to {
            return 0;
        }
        self.daily.range(from..=to).map(|(_, value)| *value).sum()
    }

    /// Adds time to `day`. The total saturates, and the bucket only receives what the total
    /// could take, so the breakdown keeps summing to the total.
    pub fn add_time(&mut self, day: NaiveDate, duration_ms: u64, at: u64) {
        let added = duration_ms.min(u64::MAX - self.total_time);
        *self.daily.entry(day).or_insert(0) += added;
        self.total_time += added;
        self.last_visit = self.last_visit.max(at);
    }

    pub fn record_visit(&mut self, at: u64) {
        self.visits = self.visits.saturating_add(1);
        self.last_visit = self.last_visit.max(at);
    }

    /// Sum of both records' counters. `None` when a counter would overflow, in which case
    /// neither record is touched.
    pub fn combined(&self, other: &DomainRecord) -> Option<DomainRecord> {
        let mut daily = self.daily.clone();
        for (day, value) in &other.daily {
            let bucket = daily.entry(*day).or_insert(0);
            *bucket = bucket.checked_add(*value)?;
        }
        Some(Self {
            total_time: self.total_time.checked_add(other.total_time)?,
            visits: self.visits.checked_add(other.visits)?,
            last_visit: self.last_visit.max(other.last_visit),
            daily,
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.daily
            .values()
            .try_fold(0u64, |acc, value| acc.checked_add(*value))
            == Some(self.total_time)
    }
}

/// In-memory usage statistics keyed by domain. Serializes into the export file format:
/// `{"example.com": {"totalTime": .., "visits": .., "lastVisit": .., "daily": {..}}}`.
///
/// Deserialization goes through [parse_snapshot](super::merge::parse_snapshot) so that
/// malformed data is never accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AggregateStore {
    records: BTreeMap<DomainKey, DomainRecord>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, domain: &str) -> Option<&DomainRecord> {
        self.records.get(domain)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DomainKey, &DomainRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&mut self, key: DomainKey, record: DomainRecord) {
        self.records.insert(key, record);
    }

    fn entry(&mut self, key: &DomainKey, at: u64) -> &mut DomainRecord {
        self.records
            .entry(key.clone())
            .or_insert_with(|| DomainRecord::new(at))
    }

    pub fn attribute(&mut self, key: &DomainKey, day: NaiveDate, duration_ms: u64, at: u64) {
        self.entry(key, at).add_time(day, duration_ms, at);
    }

    pub fn record_visit(&mut self, key: &DomainKey, at: u64) {
        self.entry(key, at).record_visit(at);
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

impl FromIterator<(DomainKey, DomainRecord)> for AggregateStore {
    fn from_iter<T: IntoIterator<Item = (DomainKey, DomainRecord)>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AggregateStore {
    type Item = (DomainKey, DomainRecord);
    type IntoIter = std::collections::btree_map::IntoIter<DomainKey, DomainRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
