use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub type Tags = BTreeMap<String, String>;

/// Tenant used when a request carries no `Hawkular-Tenant` header.
pub const DEFAULT_TENANT: &str = "_ops";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Gauge,
    Counter,
    Availability,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Availability => "availability",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" | "gauges" => Ok(MetricType::Gauge),
            "counter" | "counters" => Ok(MetricType::Counter),
            "availability" => Ok(MetricType::Availability),
            other => Err(StorageError::invalid_argument(format!(
                "unknown metric type: {}",
                other
            ))),
        }
    }
}

/// A metric inside one tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub kind: MetricType,
    pub id: String,
}

impl MetricKey {
    pub fn new(kind: MetricType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn gauge(id: impl Into<String>) -> Self {
        Self::new(MetricType::Gauge, id)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: i64,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityState {
    Up,
    Down,
    Unknown,
}

impl AvailabilityState {
    pub fn from_value(value: f64) -> Self {
        if value == 1.0 {
            AvailabilityState::Up
        } else if value == 0.0 {
            AvailabilityState::Down
        } else {
            AvailabilityState::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityPoint {
    pub timestamp: i64,
    pub value: AvailabilityState,
}

impl From<DataPoint> for AvailabilityPoint {
    fn from(point: DataPoint) -> Self {
        Self {
            timestamp: point.timestamp,
            value: AvailabilityState::from_value(point.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricType,
    #[serde(rename = "tenantId")]
    pub tenant: String,
    pub tags: Tags,
}

/// Half-open interval `[start, end)` in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Result<Self, StorageError> {
        if start >= end {
            return Err(StorageError::invalid_argument(format!(
                "start ({}) must be before end ({})",
                start, end
            )));
        }
        if end.checked_sub(start).is_none() {
            return Err(StorageError::invalid_argument(format!(
                "range {}..{} is too long",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Always positive; `new` rejects ranges whose length overflows.
    pub fn len(&self) -> i64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Raw,
    /// Statistics per bucket of the given width; `None` means one bucket
    /// spanning the whole range.
    Stats { bucket: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsBucket {
    pub start: i64,
    pub end: i64,
    pub empty: bool,
    pub samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    pub sum: f64,
}

impl StatsBucket {
    pub fn empty(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            empty: true,
            samples: 0,
            min: None,
            max: None,
            avg: None,
            sum: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Raw(Vec<DataPoint>),
    Stats(Vec<StatsBucket>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPredicate {
    Exact(String),
    AnyOf(Vec<String>),
    Exists,
}

/// One `key:value` term of a tag filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub predicate: TagPredicate,
}

impl TagFilter {
    /// Parses `k1:v1,k2:*,k3:a|b`. A bare key means "key exists".
    pub fn parse_list(expr: &str) -> Result<Vec<TagFilter>, StorageError> {
        expr.split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| {
                let (key, value) = match term.split_once(':') {
                    Some((key, value)) => (key.trim(), Some(value.trim())),
                    None => (term, None),
                };
                if key.is_empty() {
                    return Err(StorageError::invalid_argument(format!(
                        "tag filter without key: {}",
                        term
                    )));
                }

                let predicate = match value {
                    None | Some("*") | Some("") => TagPredicate::Exists,
                    Some(v) if v.contains('|') => {
                        TagPredicate::AnyOf(v.split('|').map(str::to_string).collect())
                    }
                    Some(v) => TagPredicate::Exact(v.to_string()),
                };

                Ok(TagFilter {
                    key: key.to_string(),
                    predicate,
                })
            })
            .collect()
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        match (tags.get(&self.key), &self.predicate) {
            (None, _) => false,
            (Some(_), TagPredicate::Exists) => true,
            (Some(v), TagPredicate::Exact(expected)) => v == expected,
            (Some(v), TagPredicate::AnyOf(options)) => options.iter().any(|o| o == v),
        }
    }
}

pub fn matches_all(filters: &[TagFilter], tags: &Tags) -> bool {
    filters.iter().all(|f| f.matches(tags))
}

/// Parses durations such as `500ms`, `60s`, `5mn`, `5m`, `8h` or `7d` into
/// milliseconds. A bare number is taken as seconds.
pub fn parse_duration_ms(input: &str) -> Result<i64, StorageError> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let amount: i64 = digits
        .parse()
        .map_err(|_| StorageError::invalid_argument(format!("bad duration: {}", input)))?;
    let scale = match unit {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" | "mn" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => {
            return Err(StorageError::invalid_argument(format!(
                "bad duration unit: {}",
                input
            )))
        }
    };

    let millis = amount
        .checked_mul(scale)
        .ok_or_else(|| StorageError::invalid_argument(format!("duration overflow: {}", input)))?;
    if millis <= 0 {
        return Err(StorageError::invalid_argument(format!(
            "duration must be positive: {}",
            input
        )));
    }
    Ok(millis)
}
