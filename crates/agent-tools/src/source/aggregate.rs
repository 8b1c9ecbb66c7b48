//! Aggregation Queries
//!
//! A small group-and-reduce language both sources can execute: MongoDB turns
//! it into a `$match`/`$group`/`$sort`/`$limit` pipeline, the in-memory source
//! evaluates it directly.

use serde_json::{Map, Value};

/// Field holding the group value in every result row
pub const GROUP_KEY: &str = "key";

/// What documents are grouped by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    /// One group for everything that matched
    All,
    /// Value at a dotted path
    Field(String),
    /// UTC hour (0-23) of the timestamp at a dotted path
    HourOf(String),
}

/// Reduction applied to each group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accumulator {
    /// Mean of the numeric values at a path; null when there are none
    Avg(String),
    /// Sum of the numeric values at a path
    Sum(String),
    Min(String),
    Max(String),
    /// Number of documents in the group
    Count,
}

/// One named output field of an aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
    pub accumulator: Accumulator,
}

impl Metric {
    pub fn avg(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Accumulator::Avg(path.into()))
    }

    pub fn sum(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Accumulator::Sum(path.into()))
    }

    pub fn min(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Accumulator::Min(path.into()))
    }

    pub fn max(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Accumulator::Max(path.into()))
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self::new(name, Accumulator::Count)
    }

    fn new(name: impl Into<String>, accumulator: Accumulator) -> Self {
        Self {
            name: name.into(),
            accumulator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Group-and-reduce query over one collection
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub filter: Map<String, Value>,
    pub group_by: GroupKey,
    pub metrics: Vec<Metric>,
    /// Metric name to order rows by; ties keep first-seen order
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl Aggregation {
    pub fn new(group_by: GroupKey) -> Self {
        Self {
            filter: Map::new(),
            group_by,
            metrics: Vec::new(),
            sort: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Map<String, Value>) -> Self {
        self.filter = filter;
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn sort_by(mut self, metric: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((metric.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
