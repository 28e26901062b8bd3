//! Bucket layout and aggregation shared by all backends.

use crate::error::StorageError;
use crate::models::{DataPoint, StatsBucket, TimeRange};

/// Upper bound on buckets per query; wider requests are rejected.
pub const MAX_BUCKETS: i64 = 10_000;

/// Resolves the bucket width for a stats query. No width means one bucket
/// spanning the whole range.
pub fn bucket_width(range: TimeRange, bucket: Option<i64>) -> Result<i64, StorageError> {
    let width = bucket.unwrap_or_else(|| range.len());
    if width <= 0 {
        return Err(StorageError::invalid_argument(format!(
            "bucket duration must be positive, got {}",
            width
        )));
    }

    let count = bucket_count(range, width);
    if count > MAX_BUCKETS {
        return Err(StorageError::invalid_argument(format!(
            "query would produce {} buckets, limit is {}",
            count, MAX_BUCKETS
        )));
    }
    Ok(width)
}

pub fn bucket_count(range: TimeRange, width: i64) -> i64 {
    ceil_div(range.len(), width)
}

/// `ceil(total / parts)` for positive operands, without the `total + parts - 1`
/// overflow.
pub fn ceil_div(total: i64, parts: i64) -> i64 {
    total / parts + i64::from(total % parts != 0)
}

/// Empty buckets covering `range`; the last one is clipped to `range.end`.
pub fn layout(range: TimeRange, width: i64) -> Vec<StatsBucket> {
    (0..bucket_count(range, width))
        .map(|i| {
            let start = range.start + i * width;
            let end = start.saturating_add(width).min(range.end);
            StatsBucket::empty(start, end)
        })
        .collect()
}

/// Index of the bucket holding `timestamp`, if it falls inside `range`.
pub fn bucket_index(range: TimeRange, width: i64, timestamp: i64) -> Option<usize> {
    if !range.contains(timestamp) {
        return None;
    }
    Some(((timestamp - range.start) / width) as usize)
}

pub fn record(bucket: &mut StatsBucket, value: f64) {
    bucket.empty = false;
    bucket.samples += 1;
    bucket.sum += value;
    bucket.min = Some(bucket.min.map_or(value, |m| m.min(value)));
    bucket.max = Some(bucket.max.map_or(value, |m| m.max(value)));
    bucket.avg = Some(bucket.sum / bucket.samples as f64);
}

/// Aggregates raw points into fixed-width buckets over `range`.
pub fn aggregate<I>(range: TimeRange, width: i64, points: I) -> Vec<StatsBucket>
where
    I: IntoIterator<Item = DataPoint>,
{
    let mut buckets = layout(range, width);
    for point in points {
        if let Some(idx) = bucket_index(range, width, point.timestamp) {
            record(&mut buckets[idx], point.value);
        }
    }
    buckets
}

/// Pre-aggregated row for one bucket, as produced by SQL backends.
#[derive(Debug, Clone, Copy)]
pub struct BucketRow {
    pub index: i64,
    pub samples: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
}

/// Merges pre-aggregated rows into the full layout, leaving gaps empty.
pub fn fill(range: TimeRange, width: i64, rows: impl IntoIterator<Item = BucketRow>) -> Vec<StatsBucket> {
    let mut buckets = layout(range, width);
    for row in rows {
        if row.samples == 0 || row.index < 0 {
            continue;
        }
        if let Some(bucket) = buckets.get_mut(row.index as usize) {
            bucket.empty = false;
            bucket.samples = row.samples;
            bucket.min = Some(row.min);
            bucket.max = Some(row.max);
            bucket.avg = Some(row.avg);
            bucket.sum = row.sum;
        }
    }
    buckets
}
