use std::fmt::Display;

use chrono::{Days, Months, NaiveDate};
use clap::ValueEnum;

use crate::{
    daemon::storage::entities::{AggregateStore, DomainKey, DomainRecord},
    utils::time::{start_of_month, start_of_week},
};

/// Period a report covers, relative to a reference day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Range {
    Today,
    Week,
    Month,
    All,
}

impl Range {
    /// Inclusive first and last day of the range containing `day`. `None` means no bound.
    pub fn bounds(self, day: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Range::Today => Some((day, day)),
            Range::Week => {
                let start = start_of_week(day);
                Some((start, start + Days::new(6)))
            }
            Range::Month => {
                let start = start_of_month(day);
                let end = start
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(day);
                Some((start, end))
            }
            Range::All => None,
        }
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Range::Today => write!(f, "today"),
            Range::Week => write!(f, "week"),
            Range::Month => write!(f, "month"),
            Range::All => write!(f, "all"),
        }
    }
}

pub fn time_for_range(record: &DomainRecord, range: Range, day: NaiveDate) -> u64 {
    match range.bounds(day) {
        Some((from, to)) => record.time_between(from, to),
        None => record.total_time(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainUsage<'a> {
    pub domain: &'a DomainKey,
    pub time_ms: u64,
    pub visits: u64,
}

/// Domains with time in the range, most used first. Ties are ordered by name so output is
/// stable.
pub fn ranking(store: &AggregateStore, range: Range, day: NaiveDate) -> Vec<DomainUsage<'_>> {
    let mut usages = store
        .iter()
        .map(|(domain, record)| DomainUsage {
            domain,
            time_ms: time_for_range(record, range, day),
            visits: record.visits(),
        })
        .filter(|usage| usage.time_ms > 0)
        .collect::<Vec<_>>();
    usages.sort_by(|a, b| {
        b.time_ms
            .cmp(&a.time_ms)
            .then_with(|| a.domain.cmp(b.domain))
    });
    usages
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const TEST_DATE: NaiveDate = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn record(daily: &[(NaiveDate, u64)]) -> DomainRecord {
        let daily = daily.iter().copied().collect::<BTreeMap<_, _>>();
        DomainRecord::from_parts(daily.values().sum(), 1, 0, daily).unwrap()
    }

    #[test]
    fn bounds_follow_calendar() {
        assert_eq!(Range::Today.bounds(TEST_DATE), Some((TEST_DATE, TEST_DATE)));
        // 2024-03-14 is a Thursday.
        assert_eq!(Range::Week.bounds(TEST_DATE), Some((day(11), day(17))));
        assert_eq!(Range::Month.bounds(TEST_DATE), Some((day(1), day(31))));
        assert_eq!(
            Range::Month.bounds(NaiveDate::from_ymd_opt(2024, 2, 10).unwrap()),
            Some((
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
            ))
        );
        assert_eq!(Range::All.bounds(TEST_DATE), None);
    }

    #[test]
    fn time_for_range_sums_matching_days() {
        let record = record(&[
            (NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(), 7000),
            (day(10), 1000),
            (day(12), 2000),
            (TEST_DATE, 3000),
        ]);
        assert_eq!(time_for_range(&record, Range::Today, TEST_DATE), 3000);
        assert_eq!(time_for_range(&record, Range::Week, TEST_DATE), 5000);
        assert_eq!(time_for_range(&record, Range::Month, TEST_DATE), 6000);
        assert_eq!(time_for_range(&record, Range::All, TEST_DATE), 13000);
    }

    #[test]
    fn ranking_orders_by_time_then_name() {
        let store = AggregateStore::from_iter([
            (DomainKey::new("b.com"), record(&[(TEST_DATE, 2000)])),
            (DomainKey::new("a.com"), record(&[(TEST_DATE, 2000)])),
            (DomainKey::new("c.com"), record(&[(TEST_DATE, 5000)])),
            (DomainKey::new("old.com"), record(&[(day(1), 9000)])),
        ]);

        let names = ranking(&store, Range::Today, TEST_DATE)
            .into_iter()
            .map(|usage| usage.domain.as_str().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["c.com", "a.com", "b.com"]);

        let all = ranking(&store, Range::All, TEST_DATE);
        assert_eq!(all[0].domain.as_str(), "old.com");
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn ranking_reports_range_time_and_lifetime_visits() {
        let key = DomainKey::new("a.com");
        let daily = BTreeMap::from([(day(1), 4000), (TEST_DATE, 1000)]);
        let store = AggregateStore::from_iter([(
            key.clone(),
            DomainRecord::from_parts(5000, 3, 77, daily).unwrap(),
        )]);

        assert_eq!(
            ranking(&store, Range::Today, TEST_DATE),
            [DomainUsage {
                domain: &key,
                time_ms: 1000,
                visits: 3,
            }]
        );
    }
}
