//! Query-string and body options shared by the data endpoints.

use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use serde::Deserialize;
use serde_json::Value;

use crate::error::MohawkError;
use crate::models::{parse_duration_ms, QueryKind, TagFilter, TimeRange, DEFAULT_TENANT};
use crate::storage::stats::ceil_div;
use crate::Result;

pub const TENANT_HEADER: &str = "hawkular-tenant";

/// Range used when a request gives no `start`.
pub const DEFAULT_LOOKBACK_MS: i64 = 8 * 3_600_000;

/// Which view of a metric a route returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Raw,
    Stats,
    /// Stats when a bucket option is present, raw otherwise.
    Auto,
}

pub fn tenant(headers: &HeaderMap) -> String {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_TENANT)
        .to_string()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Options accepted by the data endpoints, kept as text until validated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub bucket_duration: Option<String>,
    pub buckets: Option<String>,
    pub order: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub tags: Option<String>,
}

fn bad(message: String) -> MohawkError {
    MohawkError::InvalidArgument(message)
}

/// Absolute milliseconds, or `-<duration>` relative to `now`. The relative
/// form needs a unit (`-30mn`, `-8h`); a bare `-5` is the absolute
/// timestamp -5.
fn parse_time(raw: &str, now: i64) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    let ago = raw
        .strip_prefix('-')
        .and_then(|ago| parse_duration_ms(ago).ok())
        .ok_or_else(|| bad(format!("bad timestamp: {}", raw)))?;
    now.checked_sub(ago)
        .ok_or_else(|| bad(format!("timestamp out of range: {}", raw)))
}

impl DataParams {
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        if uri.query().is_none() {
            return Ok(Self::default());
        }
        Query::<DataParams>::try_from_uri(uri)
            .map(|Query(params)| params)
            .map_err(|e| bad(format!("bad query string: {}", e)))
    }

    pub fn range(&self, now: i64) -> Result<TimeRange> {
        let end = match &self.end {
            Some(raw) => parse_time(raw, now)?,
            None => now,
        };
        let start = match &self.start {
            Some(raw) => parse_time(raw, now)?,
            None => end
                .checked_sub(DEFAULT_LOOKBACK_MS)
                .ok_or_else(|| bad(format!("end out of range: {}", end)))?,
        };
        Ok(TimeRange::new(start, end)?)
    }

    fn wants_buckets(&self) -> bool {
        self.bucket_duration.is_some() || self.buckets.is_some()
    }

    /// Bucket width requested through `bucketDuration` or `buckets`.
    pub fn bucket(&self, range: TimeRange) -> Result<Option<i64>> {
        if let Some(raw) = &self.bucket_duration {
            return Ok(Some(parse_duration_ms(raw)?));
        }
        match &self.buckets {
            Some(raw) => {
                let count: i64 = raw
                    .trim()
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| bad(format!("bad bucket count: {}", raw)))?;
                Ok(Some(ceil_div(range.len(), count)))
            }
            None => Ok(None),
        }
    }

    pub fn query_kind(&self, view: View, range: TimeRange) -> Result<QueryKind> {
        let stats = match view {
            View::Raw => false,
            View::Stats => true,
            View::Auto => self.wants_buckets(),
        };
        if stats {
            Ok(QueryKind::Stats {
                bucket: self.bucket(range)?,
            })
        } else {
            Ok(QueryKind::Raw)
        }
    }

    pub fn descending(&self) -> Result<bool> {
        match self.order.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("ASC") => Ok(false),
            Some("DESC") => Ok(true),
            Some(other) => Err(bad(format!("bad order: {}", other))),
        }
    }

    pub fn limit(&self) -> Result<Option<usize>> {
        self.limit
            .as_deref()
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| bad(format!("bad limit: {}", raw)))
            })
            .transpose()
    }

    pub fn tag_filters(&self) -> Result<Vec<TagFilter>> {
        match &self.tags {
            Some(expr) => Ok(TagFilter::parse_list(expr)?),
            None => Ok(Vec::new()),
        }
    }
}

/// Body of `POST .../raw/query`. Times and counts may be numbers or strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBody {
    #[serde(default)]
    pub ids: Vec<String>,
    pub tags: Option<String>,
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub bucket_duration: Option<Value>,
    pub buckets: Option<Value>,
    pub order: Option<Value>,
    pub limit: Option<Value>,
}

fn text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

impl QueryBody {
    pub fn params(&self) -> DataParams {
        DataParams {
            start: text(&self.start),
            end: text(&self.end),
            bucket_duration: text(&self.bucket_duration),
            buckets: text(&self.buckets),
            order: text(&self.order),
            limit: text(&self.limit),
            kind: None,
            tags: self.tags.clone(),
        }
    }
}
