//! Behaviour every registered storage engine must share.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use mohawk::models::{
    DataPoint, MetricKey, MetricType, QueryKind, QueryResult, TagFilter, Tags, TimeRange,
};
use mohawk::storage::{open_backend, Backend, StorageKind};
use mohawk::ErrorKind;

fn engines() -> Vec<(StorageKind, Arc<dyn Backend>)> {
    StorageKind::ALL
        .into_iter()
        .map(|kind| (kind, open_backend(kind.as_str(), "").unwrap()))
        .collect()
}

fn range(start: i64, end: i64) -> TimeRange {
    TimeRange::new(start, end).unwrap()
}

async fn raw(backend: &dyn Backend, metric: &MetricKey, start: i64, end: i64) -> Vec<DataPoint> {
    match backend
        .query("t", metric, range(start, end), QueryKind::Raw)
        .await
        .unwrap()
    {
        QueryResult::Raw(points) => points,
        other => panic!("expected raw points, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_last_write_wins() {
    for (kind, backend) in engines() {
        let cpu = MetricKey::gauge("cpu");
        backend
            .write("t", &cpu, &[DataPoint::new(20, 2.0), DataPoint::new(10, 1.0)])
            .await
            .unwrap();
        backend
            .write("t", &cpu, &[DataPoint::new(10, 5.0), DataPoint::new(10, 7.0)])
            .await
            .unwrap();

        assert_eq!(
            raw(backend.as_ref(), &cpu, 0, 100).await,
            vec![DataPoint::new(10, 7.0), DataPoint::new(20, 2.0)],
            "engine {}",
            kind
        );
        assert_eq!(backend.list_tenants().await.unwrap(), vec!["t"], "engine {}", kind);
    }
}

#[test_log::test(tokio::test)]
async fn test_stats_partition_with_empty_buckets() {
    for (kind, backend) in engines() {
        let cpu = MetricKey::gauge("cpu");
        backend
            .write(
                "t",
                &cpu,
                &[
                    DataPoint::new(100, 1.0),
                    DataPoint::new(105, 3.0),
                    DataPoint::new(130, 8.0),
                    DataPoint::new(140, 99.0),
                ],
            )
            .await
            .unwrap();

        let QueryResult::Stats(buckets) = backend
            .query("t", &cpu, range(100, 140), QueryKind::Stats { bucket: Some(10) })
            .await
            .unwrap()
        else {
            panic!("expected stats from {}", kind);
        };

        assert_eq!(buckets.len(), 4, "engine {}", kind);
        assert_eq!(buckets[0].samples, 2, "engine {}", kind);
        assert_eq!(buckets[0].min, Some(1.0));
        assert_eq!(buckets[0].max, Some(3.0));
        assert_eq!(buckets[0].avg, Some(2.0));
        assert!(buckets[1].empty && buckets[2].empty, "engine {}", kind);
        assert_eq!(buckets[1].avg, None);
        assert_eq!((buckets[3].samples, buckets[3].sum), (1, 8.0), "engine {}", kind);

        let QueryResult::Stats(whole) = backend
            .query("t", &cpu, range(100, 140), QueryKind::Stats { bucket: None })
            .await
            .unwrap()
        else {
            panic!("expected stats from {}", kind);
        };
        assert_eq!(whole.len(), 1, "engine {}", kind);
        assert_eq!(whole[0].samples, 3, "engine {}", kind);
    }
}

#[test_log::test(tokio::test)]
async fn test_tags_put_filter_delete() {
    for (kind, backend) in engines() {
        let cpu = MetricKey::gauge("cpu");
        let mem = MetricKey::gauge("mem");
        let hits = MetricKey::new(MetricType::Counter, "hits");
        for metric in [&cpu, &mem, &hits] {
            backend.write("t", metric, &[DataPoint::new(1, 1.0)]).await.unwrap();
        }

        let tags: Tags = [("host".to_string(), "a".to_string())].into_iter().collect();
        backend.put_tags("t", &cpu, &tags).await.unwrap();
        backend.put_tags("t", &hits, &tags).await.unwrap();

        let filter = TagFilter::parse_list("host:a").unwrap();
        let gauges = backend
            .list_metrics("t", Some(MetricType::Gauge), &filter)
            .await
            .unwrap();
        assert_eq!(gauges.len(), 1, "engine {}", kind);
        assert_eq!(gauges[0].id, "cpu");
        assert_eq!(gauges[0].tags, tags);
        assert_eq!(backend.list_metrics("t", None, &filter).await.unwrap().len(), 2);

        let changed: Tags = [("host".to_string(), "b".to_string())].into_iter().collect();
        backend.put_tags("t", &cpu, &changed).await.unwrap();
        let gauges = backend
            .list_metrics("t", Some(MetricType::Gauge), &filter)
            .await
            .unwrap();
        assert!(gauges.is_empty(), "engine {}", kind);

        backend.delete_tags("t", &hits, &["host".to_string()]).await.unwrap();
        assert!(
            backend.list_metrics("t", None, &filter).await.unwrap().is_empty(),
            "engine {}",
            kind
        );
    }
}

#[test_log::test(tokio::test)]
async fn test_tags_on_unknown_metric_not_found() {
    for (kind, backend) in engines() {
        let ghost = MetricKey::gauge("ghost");
        let tags: Tags = [("host".to_string(), "a".to_string())].into_iter().collect();

        let err = backend.put_tags("t", &ghost, &tags).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound, "engine {}", kind);

        let err = backend
            .delete_tags("t", &ghost, &["host".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound, "engine {}", kind);
    }
}

#[test_log::test(tokio::test)]
async fn test_delete_range_is_half_open() {
    for (kind, backend) in engines() {
        let cpu = MetricKey::gauge("cpu");
        let points: Vec<DataPoint> = (0..5).map(|i| DataPoint::new(i, i as f64)).collect();
        backend.write("t", &cpu, &points).await.unwrap();
        backend.delete_data("t", &cpu, range(1, 3)).await.unwrap();

        let stamps: Vec<i64> = raw(backend.as_ref(), &cpu, 0, 10)
            .await
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(stamps, vec![0, 3, 4], "engine {}", kind);
    }
}
