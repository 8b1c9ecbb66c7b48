//! In-memory Document Source
//!
//! For testing and demo purposes. Supports equality filters on dotted paths,
//! the common comparison operators and the aggregations in [`super::aggregate`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde_json::{json, Map, Number, Value};
use tokio::sync::RwLock;

use super::{Accumulator, Aggregation, DocumentSource, GroupKey, SortOrder, GROUP_KEY};
use crate::error::{Result, SourceError};

/// In-memory collections of JSON documents
#[derive(Default)]
pub struct MemoryDocumentSource {
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from prepared collections
    pub fn with_collections(collections: impl IntoIterator<Item = (String, Vec<Value>)>) -> Self {
        Self {
            collections: RwLock::new(collections.into_iter().collect()),
        }
    }

    /// Small traffic dataset for local runs without a database
    pub fn demo() -> Self {
        // [speed, density, occupancy, entered, waiting_time, time_loss]
        let lane = |ts: &str, lane_id: &str, [speed, density, occupancy, entered, waiting, loss]: [f64; 6]| {
            json!({
                "timestamp": ts,
                "metadata": { "lane_id": lane_id },
                "measurement": {
                    "speed": speed,
                    "density": density,
                    "occupancy": occupancy,
                    "entered": entered,
                    "waiting_time": waiting,
                    "time_loss": loss,
                },
            })
        };
        let sensor = |sensor_id: &str, ts: &str, speed: f64, flow: u64| {
            json!({ "sensor_id": sensor_id, "timestamp": ts, "speed": speed, "flow": flow })
        };

        Self::with_collections([
            (
                "lane_data".to_string(),
                vec![
                    lane("2024-05-01T08:00:00Z", ":13445139_0", [11.8, 34.0, 0.41, 12.0, 36.0, 4.2]),
                    lane("2024-05-01T08:05:00Z", ":13445139_0", [9.6, 41.5, 0.52, 15.0, 58.0, 6.9]),
                    lane("2024-05-01T08:00:00Z", "13445140_1", [15.2, 18.0, 0.22, 8.0, 4.0, 1.1]),
                    lane("2024-05-01T08:05:00Z", "13445140_1", [14.7, 20.5, 0.25, 9.0, 6.0, 1.6]),
                ],
            ),
            (
                "measurements".to_string(),
                vec![
                    sensor("S-101", "2024-05-01T08:00:00Z", 52.3, 1340),
                    sensor("S-101", "2024-05-01T09:00:00Z", 47.9, 1620),
                    sensor("S-205", "2024-05-01T08:00:00Z", 61.0, 880),
                ],
            ),
        ])
    }

    /// Append documents to a collection, creating it if needed
    pub async fn insert(&self, collection: impl Into<String>, documents: impl IntoIterator<Item = Value>) {
        self.collections
            .write()
            .await
            .entry(collection.into())
            .or_default()
            .extend(documents);
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn find(&self, collection: &str, filter: &Map<String, Value>, limit: usize) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let documents = documents_of(&collections, collection)?;

        let mut found = Vec::new();
        for doc in documents {
            if found.len() >= limit {
                break;
            }
            if matches(doc, filter)? {
                found.push(doc.clone());
            }
        }
        Ok(found)
    }

    async fn aggregate(&self, collection: &str, aggregation: &Aggregation) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let documents = documents_of(&collections, collection)?;

        let mut groups: Vec<(Value, Vec<&Value>)> = Vec::new();
        for doc in documents {
            if !matches(doc, &aggregation.filter)? {
                continue;
            }
            let key = group_key(doc, &aggregation.group_by);
            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(doc),
                None => groups.push((key, vec![doc])),
            }
        }

        let mut rows: Vec<Value> = groups
            .into_iter()
            .map(|(key, members)| {
                let mut row = Map::new();
                row.insert(GROUP_KEY.to_string(), key);
                for metric in &aggregation.metrics {
                    row.insert(metric.name.clone(), reduce(&metric.accumulator, &members));
                }
                Value::Object(row)
            })
            .collect();

        if let Some((field, order)) = &aggregation.sort {
            // missing values sort lowest
            rows.sort_by(|a, b| {
                let ordering = a[field.as_str()]
                    .as_f64()
                    .partial_cmp(&b[field.as_str()].as_f64())
                    .unwrap_or(Ordering::Equal);
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = aggregation.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn distinct(&self, collection: &str, path: &str, filter: &Map<String, Value>) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let documents = documents_of(&collections, collection)?;

        let mut values: Vec<Value> = Vec::new();
        for doc in documents {
            if !matches(doc, filter)? {
                continue;
            }
            let found = match lookup_path(doc, path) {
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for value in found {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn documents_of<'a>(collections: &'a BTreeMap<String, Vec<Value>>, collection: &str) -> Result<&'a [Value]> {
    collections
        .get(collection)
        .map(Vec::as_slice)
        .ok_or_else(|| SourceError::CollectionNotFound(collection.to_string()))
}

fn group_key(doc: &Value, group_by: &GroupKey) -> Value {
    match group_by {
        GroupKey::All => Value::Null,
        GroupKey::Field(path) => lookup_path(doc, path).cloned().unwrap_or(Value::Null),
        GroupKey::HourOf(path) => lookup_path(doc, path)
            .and_then(Value::as_str)
            .and_then(hour_of)
            .map_or(Value::Null, |hour| json!(hour)),
    }
}

/// UTC hour of an RFC 3339 timestamp; zone-less timestamps are taken as UTC
fn hour_of(timestamp: &str) -> Option<u32> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.with_timezone(&Utc).hour());
    }
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|parsed| parsed.hour())
}

fn numbers<'a>(members: &'a [&'a Value], path: &'a str) -> impl Iterator<Item = f64> + 'a {
    members
        .iter()
        .filter_map(move |doc| lookup_path(doc, path).and_then(Value::as_f64))
}

fn reduce(accumulator: &Accumulator, members: &[&Value]) -> Value {
    match accumulator {
        Accumulator::Count => json!(members.len()),
        Accumulator::Sum(path) => number(numbers(members, path).sum()),
        Accumulator::Avg(path) => {
            let (total, n) = numbers(members, path).fold((0.0, 0_u32), |(total, n), v| (total + v, n + 1));
            if n == 0 { Value::Null } else { number(total / f64::from(n)) }
        }
        Accumulator::Min(path) => numbers(members, path).reduce(f64::min).map_or(Value::Null, number),
        Accumulator::Max(path) => numbers(members, path).reduce(f64::max).map_or(Value::Null, number),
    }
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, segment| value.get(segment))
}

fn matches(doc: &Value, filter: &Map<String, Value>) -> Result<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" | "$or" => {
                let clauses = condition
                    .as_array()
                    .ok_or_else(|| SourceError::InvalidFilter(format!("{key} expects an array")))?;
                let mut results = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let clause = clause
                        .as_object()
                        .ok_or_else(|| SourceError::InvalidFilter(format!("{key} clauses must be objects")))?;
                    results.push(matches(doc, clause)?);
                }
                if key == "$and" {
                    results.iter().all(|r| *r)
                } else {
                    results.iter().any(|r| *r)
                }
            }
            op if op.starts_with('$') => {
                return Err(SourceError::InvalidFilter(format!("unsupported top-level operator {op}")));
            }
            path => matches_condition(lookup_path(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(field: Option<&Value>, condition: &Value) -> Result<bool> {
    let Value::Object(ops) = condition else {
        return Ok(equals(field, condition));
    };
    if ops.is_empty() || !ops.keys().all(|k| k.starts_with('$')) {
        return Ok(equals(field, condition));
    }

    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(field, operand),
            "$ne" => !equals(field, operand),
            "$gt" => compare(field, operand) == Some(Ordering::Greater),
            "$gte" => matches!(compare(field, operand), Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => compare(field, operand) == Some(Ordering::Less),
            "$lte" => matches!(compare(field, operand), Some(Ordering::Less | Ordering::Equal)),
            "$in" | "$nin" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| SourceError::InvalidFilter(format!("{op} expects an array")))?;
                let found = candidates.iter().any(|c| equals(field, c));
                if op == "$in" { found } else { !found }
            }
            "$exists" => operand.as_bool().unwrap_or(true) == field.is_some(),
            other => return Err(SourceError::InvalidFilter(format!("unsupported operator {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with array-contains semantics
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(Value::Number(a)) => match expected {
            Value::Number(b) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        Some(value) => value == expected,
        None => expected.is_null(),
    }
}

fn compare(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (field?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
