//! Combining usage snapshots. Used for imports and for reconciling the live store with whatever
//! another writer persisted.
//!
//! Merging sums counters, so importing the same snapshot twice doubles it. Imports are
//! expected to happen at most once per snapshot.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use super::entities::{AggregateStore, DomainKey, DomainRecord};
use crate::utils::time::DATE_KEY_FORMAT;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("data is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid format: {reason}")]
    InvalidFormat { reason: String },
}

impl ImportError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}

/// Combines two snapshots. Domains present on one side are copied, shared domains have their
/// counters summed, `lastVisit` takes the maximum and daily buckets are summed per date.
/// Fails when a summed counter does not fit in 64 bits.
pub fn merge(
    base: &AggregateStore,
    incoming: &AggregateStore,
) -> Result<AggregateStore, ImportError> {
    let mut merged = base.clone();
    merge_into(&mut merged, incoming)?;
    Ok(merged)
}

/// In-place form of [merge]. On failure `base` is left as it was.
pub fn merge_into(base: &mut AggregateStore, incoming: &AggregateStore) -> Result<(), ImportError> {
    let combined = incoming
        .iter()
        .map(|(key, record)| -> Result<_, ImportError> {
            let record = match base.get(key.as_str()) {
                Some(existing) => existing.combined(record).ok_or_else(|| {
                    ImportError::invalid(format!("counter overflow for {key}"))
                })?,
                None => record.clone(),
            };
            Ok((key.clone(), record))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (key, record) in combined {
        base.insert(key, record);
    }
    Ok(())
}

pub fn parse_snapshot_bytes(data: &[u8]) -> Result<AggregateStore, ImportError> {
    let value: Value = serde_json::from_slice(data)?;
    parse_snapshot(&value)
}

/// Validates a snapshot in the export format. The whole snapshot is rejected on the first bad
/// record, nothing is partially accepted.
pub fn parse_snapshot(value: &Value) -> Result<AggregateStore, ImportError> {
    let Value::Object(domains) = value else {
        return Err(ImportError::invalid("expected an object keyed by domain"));
    };

    domains
        .iter()
        .map(|(domain, record)| {
            if domain.is_empty() {
                return Err(ImportError::invalid("empty domain name"));
            }
            let record = parse_record(domain, record)?;
            Ok((DomainKey::new(domain.to_lowercase()), record))
        })
        .try_fold(AggregateStore::new(), |mut store, entry| {
            let (key, record) = entry?;
            // Two spellings of the same host collapse into one key.
            let single = AggregateStore::from_iter([(key, record)]);
            merge_into(&mut store, &single)?;
            Ok(store)
        })
}

fn parse_record(domain: &str, value: &Value) -> Result<DomainRecord, ImportError> {
    let Value::Object(fields) = value else {
        return Err(ImportError::invalid(format!(
            "record for {domain} is not an object"
        )));
    };

    let total_time = required_count(domain, fields, "totalTime")?;
    let visits = required_count(domain, fields, "visits")?;
    let last_visit = required_count(domain, fields, "lastVisit")?;
    let daily = parse_daily(domain, required(domain, fields, "daily")?)?;

    DomainRecord::from_parts(total_time, visits, last_visit, daily).ok_or_else(|| {
        ImportError::invalid(format!(
            "totalTime of {domain} does not match the sum of its daily entries"
        ))
    })
}

fn required<'a>(
    domain: &str,
    fields: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Value, ImportError> {
    fields
        .get(name)
        .ok_or_else(|| ImportError::invalid(format!("record for {domain} is missing {name}")))
}

fn required_count(
    domain: &str,
    fields: &Map<String, Value>,
    name: &str,
) -> Result<u64, ImportError> {
    as_count(required(domain, fields, name)?).ok_or_else(|| {
        ImportError::invalid(format!(
            "{name} of {domain} must be a non-negative integer"
        ))
    })
}

fn parse_daily(domain: &str, value: &Value) -> Result<BTreeMap<NaiveDate, u64>, ImportError> {
    let Value::Object(days) = value else {
        return Err(ImportError::invalid(format!(
            "daily of {domain} is not an object"
        )));
    };

    days.iter()
        .map(|(day, time)| {
            let date = NaiveDate::parse_from_str(day, DATE_KEY_FORMAT).map_err(|_| {
                ImportError::invalid(format!("daily of {domain} has invalid date {day}"))
            })?;
            let time = as_count(time).ok_or_else(|| {
                ImportError::invalid(format!(
                    "daily {day} of {domain} must be a non-negative integer"
                ))
            })?;
            Ok((date, time))
        })
        .collect()
}

/// Accepts `12` and `12.0` but neither `-1` nor `1.5`.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|v| v.fract() == 0. && *v >= 0. && *v <= u64::MAX as f64)
                .map(|v| v as u64)
        }),
        _ => None,
    }
}
