use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{stats, validate_write, Backend, BackendOptions, StorageResult};
use crate::error::StorageError;
use crate::models::{
    matches_all, DataPoint, MetricDescriptor, MetricKey, MetricType, QueryKind, QueryResult,
    TagFilter, Tags, TimeRange,
};
use crate::Result;

#[derive(Debug, Default)]
struct Series {
    tags: Tags,
    points: BTreeMap<i64, f64>,
}

type SharedSeries = Arc<RwLock<Series>>;

/// Keeps every tenant in process memory. The tenant map lock is only held to
/// find or create a series; each series has its own lock, so writers to
/// different metrics never wait on each other.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tenants: RwLock<HashMap<String, HashMap<MetricKey, SharedSeries>>>,
    max_size: Option<usize>,
    retention: Option<i64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options: `max-size` caps points per metric, `retention` drops points
    /// older than the given duration on every write.
    pub fn open(options: &BackendOptions) -> Result<Self> {
        Ok(Self {
            tenants: RwLock::new(HashMap::new()),
            max_size: options.get_usize("max-size")?,
            retention: options.get_duration_ms("retention")?,
        })
    }

    fn series(&self, tenant: &str, metric: &MetricKey) -> Option<SharedSeries> {
        self.tenants
            .read()
            .get(tenant)
            .and_then(|metrics| metrics.get(metric))
            .cloned()
    }

    fn series_or_create(&self, tenant: &str, metric: &MetricKey) -> SharedSeries {
        if let Some(series) = self.series(tenant, metric) {
            return series;
        }

        let mut tenants = self.tenants.write();
        tenants
            .entry(tenant.to_string())
            .or_default()
            .entry(metric.clone())
            .or_default()
            .clone()
    }

    fn expect_series(&self, tenant: &str, metric: &MetricKey) -> StorageResult<SharedSeries> {
        self.series(tenant, metric).ok_or_else(|| {
            StorageError::not_found(format!("metric {} not found for tenant {}", metric, tenant))
        })
    }

    fn trim(&self, series: &mut Series) {
        if let Some(retention) = self.retention {
            let cutoff = chrono::Utc::now().timestamp_millis() - retention;
            series.points = series.points.split_off(&cutoff);
        }
        if let Some(max) = self.max_size {
            while series.points.len() > max {
                series.points.pop_first();
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_tenants(&self) -> StorageResult<Vec<String>> {
        let mut tenants: Vec<String> = self.tenants.read().keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn list_metrics(
        &self,
        tenant: &str,
        kind: Option<MetricType>,
        tags: &[TagFilter],
    ) -> StorageResult<Vec<MetricDescriptor>> {
        let candidates: Vec<(MetricKey, SharedSeries)> = match self.tenants.read().get(tenant) {
            Some(metrics) => metrics
                .iter()
                .filter(|(key, _)| kind.map_or(true, |k| key.kind == k))
                .map(|(key, series)| (key.clone(), series.clone()))
                .collect(),
            None => return Ok(Vec::new()),
        };

        let mut found: Vec<MetricDescriptor> = candidates
            .into_iter()
            .filter_map(|(key, series)| {
                let series = series.read();
                matches_all(tags, &series.tags).then(|| MetricDescriptor {
                    id: key.id,
                    kind: key.kind,
                    tenant: tenant.to_string(),
                    tags: series.tags.clone(),
                })
            })
            .collect();
        found.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));
        Ok(found)
    }

    async fn write(
        &self,
        tenant: &str,
        metric: &MetricKey,
        points: &[DataPoint],
    ) -> StorageResult<()> {
        validate_write(metric, points)?;

        let series = self.series_or_create(tenant, metric);
        let mut series = series.write();
        for point in points {
            series.points.insert(point.timestamp, point.value);
        }
        self.trim(&mut series);

        debug!("Stored {} points for {}/{}", points.len(), tenant, metric);
        Ok(())
    }

    async fn query(
        &self,
        tenant: &str,
        metric: &MetricKey,
        range: TimeRange,
        kind: QueryKind,
    ) -> StorageResult<QueryResult> {
        let points: Vec<DataPoint> = match self.series(tenant, metric) {
            Some(series) => series
                .read()
                .points
                .range(range.start..range.end)
                .map(|(&ts, &value)| DataPoint::new(ts, value))
                .collect(),
            None => Vec::new(),
        };

        match kind {
            QueryKind::Raw => Ok(QueryResult::Raw(points)),
            QueryKind::Stats { bucket } => {
                let width = stats::bucket_width(range, bucket)?;
                Ok(QueryResult::Stats(stats::aggregate(range, width, points)))
            }
        }
    }

    async fn put_tags(&self, tenant: &str, metric: &MetricKey, tags: &Tags) -> StorageResult<()> {
        let series = self.expect_series(tenant, metric)?;
        let mut series = series.write();
        series
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_tags(
        &self,
        tenant: &str,
        metric: &MetricKey,
        keys: &[String],
    ) -> StorageResult<()> {
        let series = self.expect_series(tenant, metric)?;
        let mut series = series.write();
        for key in keys {
            series.tags.remove(key);
        }
        Ok(())
    }

    async fn delete_data(
        &self,
        tenant: &str,
        metric: &MetricKey,
        range: TimeRange,
    ) -> StorageResult<()> {
        if let Some(series) = self.series(tenant, metric) {
            series
                .write()
                .points
                .retain(|ts, _| !range.contains(*ts));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagFilter;
    use pretty_assertions::assert_eq;

    fn raw(result: QueryResult) -> Vec<DataPoint> {
        match result {
            QueryResult::Raw(points) => points,
            other => panic!("expected raw points, got {:?}", other),
        }
    }

    fn range(start: i64, end: i64) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    #[tokio::test]
    async fn test_write_then_query_is_ordered_and_last_write_wins() {
        let backend = MemoryBackend::new();
        let cpu = MetricKey::gauge("cpu");

        backend
            .write("t1", &cpu, &[DataPoint::new(30, 3.0), DataPoint::new(10, 1.0)])
            .await
            .unwrap();
        backend
            .write("t1", &cpu, &[DataPoint::new(20, 2.0), DataPoint::new(10, 9.0)])
            .await
            .unwrap();

        let points = raw(backend.query("t1", &cpu, range(0, 100), QueryKind::Raw).await.unwrap());
        assert_eq!(
            points,
            vec![
                DataPoint::new(10, 9.0),
                DataPoint::new(20, 2.0),
                DataPoint::new(30, 3.0)
            ]
        );

        let window = raw(backend.query("t1", &cpu, range(10, 30), QueryKind::Raw).await.unwrap());
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_tenants_are_created_on_write() {
        let backend = MemoryBackend::new();
        assert!(backend.list_tenants().await.unwrap().is_empty());

        backend
            .write("b", &MetricKey::gauge("x"), &[DataPoint::new(1, 1.0)])
            .await
            .unwrap();
        backend
            .write("a", &MetricKey::gauge("x"), &[DataPoint::new(1, 1.0)])
            .await
            .unwrap();

        assert_eq!(backend.list_tenants().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_tags_filter_metrics() {
        let backend = MemoryBackend::new();
        let cpu = MetricKey::gauge("cpu");
        let hits = MetricKey::new(MetricType::Counter, "hits");
        backend.write("t", &cpu, &[DataPoint::new(1, 1.0)]).await.unwrap();
        backend.write("t", &hits, &[DataPoint::new(1, 1.0)]).await.unwrap();

        let tags: Tags = [("host".to_string(), "web1".to_string())].into_iter().collect();
        backend.put_tags("t", &cpu, &tags).await.unwrap();

        let filter = TagFilter::parse_list("host:web1").unwrap();
        let found = backend.list_metrics("t", None, &filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "cpu");

        backend
            .delete_tags("t", &cpu, &["host".to_string()])
            .await
            .unwrap();
        assert!(backend.list_metrics("t", None, &filter).await.unwrap().is_empty());

        let counters = backend
            .list_metrics("t", Some(MetricType::Counter), &[])
            .await
            .unwrap();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].id, "hits");
    }

    #[tokio::test]
    async fn test_tags_on_unknown_metric_are_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .put_tags("t", &MetricKey::gauge("ghost"), &Tags::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);

        let err = backend
            .delete_tags("t", &MetricKey::gauge("ghost"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_data_in_range() {
        let backend = MemoryBackend::new();
        let cpu = MetricKey::gauge("cpu");
        let points: Vec<DataPoint> = (0..10).map(|i| DataPoint::new(i * 10, i as f64)).collect();
        backend.write("t", &cpu, &points).await.unwrap();

        backend.delete_data("t", &cpu, range(20, 50)).await.unwrap();
        let left = raw(backend.query("t", &cpu, range(0, 100), QueryKind::Raw).await.unwrap());
        let stamps: Vec<i64> = left.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![0, 10, 50, 60, 70, 80, 90]);

        // absent metric is a no-op
        backend
            .delete_data("t", &MetricKey::gauge("ghost"), range(0, 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_query() {
        let backend = MemoryBackend::new();
        let cpu = MetricKey::gauge("cpu");
        backend
            .write(
                "t",
                &cpu,
                &[DataPoint::new(0, 1.0), DataPoint::new(5, 3.0), DataPoint::new(25, 10.0)],
            )
            .await
            .unwrap();

        let result = backend
            .query("t", &cpu, range(0, 30), QueryKind::Stats { bucket: Some(10) })
            .await
            .unwrap();
        let QueryResult::Stats(buckets) = result else {
            panic!("expected stats");
        };
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].samples, 2);
        assert_eq!(buckets[0].avg, Some(2.0));
        assert!(buckets[1].empty);
        assert_eq!(buckets[2].max, Some(10.0));
    }

    #[tokio::test]
    async fn test_max_size_drops_oldest() {
        let options = BackendOptions::parse("max-size=3").unwrap();
        let backend = MemoryBackend::open(&options).unwrap();
        let cpu = MetricKey::gauge("cpu");
        let points: Vec<DataPoint> = (0..5).map(|i| DataPoint::new(i, i as f64)).collect();
        backend.write("t", &cpu, &points).await.unwrap();

        let left = raw(backend.query("t", &cpu, range(0, 10), QueryKind::Raw).await.unwrap());
        let stamps: Vec<i64> = left.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let backend = Arc::new(MemoryBackend::new());
        let mut handles = Vec::new();
        for worker in 0..8i64 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let cpu = MetricKey::gauge("shared");
                let own = MetricKey::gauge(format!("own-{}", worker));
                for i in 0..50i64 {
                    let ts = worker * 1000 + i;
                    backend.write("t", &cpu, &[DataPoint::new(ts, 1.0)]).await.unwrap();
                    backend.write("t", &own, &[DataPoint::new(i, 1.0)]).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let shared = raw(
            backend
                .query("t", &MetricKey::gauge("shared"), range(0, 100_000), QueryKind::Raw)
                .await
                .unwrap(),
        );
        assert_eq!(shared.len(), 400);
        assert!(shared.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(backend.list_metrics("t", None, &[]).await.unwrap().len(), 9);
    }
}
