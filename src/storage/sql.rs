use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use duckdb::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{stats, validate_write, Backend, BackendOptions, StorageResult};
use crate::error::{MohawkError, StorageError};
use crate::models::{
    matches_all, DataPoint, MetricDescriptor, MetricKey, MetricType, QueryKind, QueryResult,
    TagFilter, Tags, TimeRange,
};
use crate::Result;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metrics (
        tenant VARCHAR NOT NULL,
        type VARCHAR NOT NULL,
        id VARCHAR NOT NULL,
        PRIMARY KEY (tenant, type, id)
    );
    CREATE TABLE IF NOT EXISTS tags (
        tenant VARCHAR NOT NULL,
        type VARCHAR NOT NULL,
        id VARCHAR NOT NULL,
        key VARCHAR NOT NULL,
        value VARCHAR NOT NULL,
        PRIMARY KEY (tenant, type, id, key)
    );
    CREATE TABLE IF NOT EXISTS points (
        tenant VARCHAR NOT NULL,
        type VARCHAR NOT NULL,
        id VARCHAR NOT NULL,
        timestamp BIGINT NOT NULL,
        value DOUBLE NOT NULL,
        PRIMARY KEY (tenant, type, id, timestamp)
    );
";

/// Embedded relational engine backed by DuckDB.
///
/// All writes go through one connection behind a mutex, each write call in
/// its own transaction. Reads clone a fresh connection to the same database
/// and release the mutex before running, so they only ever see committed
/// writes.
#[derive(Clone)]
pub struct DuckDbBackend {
    db: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Options: `db-dirname` is the directory holding `mohawk.db`; without it
    /// the database lives in memory.
    pub fn open(options: &BackendOptions) -> Result<Self> {
        let conn = match options.get("db-dirname") {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    MohawkError::Configuration(format!(
                        "can't create db-dirname {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
                let path = dir.join("mohawk.db");
                info!("Opening DuckDB database at {}", path.display());
                Connection::open(&path)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|e| MohawkError::Configuration(format!("can't open database: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| MohawkError::Configuration(format!("can't create schema: {}", e)))?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&BackendOptions::default())
    }

    async fn reader(&self) -> StorageResult<Connection> {
        let conn = self.db.lock().await;
        conn.try_clone()
            .map_err(|e| StorageError::unavailable(format!("can't open read connection: {}", e)))
    }

    fn metric_exists(conn: &Connection, tenant: &str, metric: &MetricKey) -> StorageResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM metrics WHERE tenant = ? AND type = ? AND id = ?",
            params![tenant, metric.kind.as_str(), metric.id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn not_found(tenant: &str, metric: &MetricKey) -> StorageError {
        StorageError::not_found(format!("metric {} not found for tenant {}", metric, tenant))
    }
}

#[async_trait]
impl Backend for DuckDbBackend {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    async fn list_tenants(&self) -> StorageResult<Vec<String>> {
        let conn = self.reader().await?;
        let mut stmt = conn.prepare("SELECT DISTINCT tenant FROM metrics ORDER BY tenant")?;
        let tenants = stmt
            .query_map(params![], |row| row.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(tenants)
    }

    async fn list_metrics(
        &self,
        tenant: &str,
        kind: Option<MetricType>,
        tags: &[TagFilter],
    ) -> StorageResult<Vec<MetricDescriptor>> {
        let conn = self.reader().await?;
        let mut stmt = conn.prepare(
            "SELECT m.type, m.id, t.key, t.value
             FROM metrics m
             LEFT JOIN tags t ON m.tenant = t.tenant AND m.type = t.type AND m.id = t.id
             WHERE m.tenant = ?",
        )?;
        let rows = stmt
            .query_map(params![tenant], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let mut metrics: BTreeMap<(MetricType, String), Tags> = BTreeMap::new();
        for (kind_name, id, key, value) in rows {
            let metric_kind: MetricType = kind_name.parse()?;
            if kind.map_or(false, |k| k != metric_kind) {
                continue;
            }
            let entry = metrics.entry((metric_kind, id)).or_default();
            if let (Some(key), Some(value)) = (key, value) {
                entry.insert(key, value);
            }
        }

        Ok(metrics
            .into_iter()
            .filter(|(_, metric_tags)| matches_all(tags, metric_tags))
            .map(|((kind, id), tags)| MetricDescriptor {
                id,
                kind,
                tenant: tenant.to_string(),
                tags,
            })
            .collect())
    }

    async fn write(
        &self,
        tenant: &str,
        metric: &MetricKey,
        points: &[DataPoint],
    ) -> StorageResult<()> {
        validate_write(metric, points)?;

        // collapse duplicate timestamps so one transaction never touches a key twice
        let latest: BTreeMap<i64, f64> = points.iter().map(|p| (p.timestamp, p.value)).collect();

        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO metrics (tenant, type, id) VALUES (?, ?, ?)
             ON CONFLICT (tenant, type, id) DO NOTHING",
            params![tenant, metric.kind.as_str(), metric.id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO points (tenant, type, id, timestamp, value)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (tenant, type, id, timestamp) DO UPDATE SET value = excluded.value",
            )?;
            for (&timestamp, &value) in &latest {
                stmt.execute(params![tenant, metric.kind.as_str(), metric.id, timestamp, value])?;
            }
        }
        tx.commit()?;

        debug!("Stored {} points for {}/{}", latest.len(), tenant, metric);
        Ok(())
    }

    async fn query(
        &self,
        tenant: &str,
        metric: &MetricKey,
        range: TimeRange,
        kind: QueryKind,
    ) -> StorageResult<QueryResult> {
        let conn = self.reader().await?;

        match kind {
            QueryKind::Raw => {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, value FROM points
                     WHERE tenant = ? AND type = ? AND id = ? AND timestamp >= ? AND timestamp < ?
                     ORDER BY timestamp",
                )?;
                let points = stmt
                    .query_map(
                        params![tenant, metric.kind.as_str(), metric.id, range.start, range.end],
                        |row| Ok(DataPoint::new(row.get(0)?, row.get(1)?)),
                    )?
                    .collect::<duckdb::Result<Vec<_>>>()?;
                Ok(QueryResult::Raw(points))
            }
            QueryKind::Stats { bucket } => {
                let width = stats::bucket_width(range, bucket)?;
                let mut stmt = conn.prepare(
                    "SELECT (timestamp - CAST(? AS BIGINT)) // CAST(? AS BIGINT) AS bucket,
                            COUNT(*), MIN(value), MAX(value), AVG(value), SUM(value)
                     FROM points
                     WHERE tenant = ? AND type = ? AND id = ? AND timestamp >= ? AND timestamp < ?
                     GROUP BY bucket
                     ORDER BY bucket",
                )?;
                let rows = stmt
                    .query_map(
                        params![
                            range.start,
                            width,
                            tenant,
                            metric.kind.as_str(),
                            metric.id,
                            range.start,
                            range.end
                        ],
                        |row| {
                            Ok(stats::BucketRow {
                                index: row.get(0)?,
                                samples: row.get::<_, i64>(1)? as u64,
                                min: row.get(2)?,
                                max: row.get(3)?,
                                avg: row.get(4)?,
                                sum: row.get(5)?,
                            })
                        },
                    )?
                    .collect::<duckdb::Result<Vec<_>>>()?;
                Ok(QueryResult::Stats(stats::fill(range, width, rows)))
            }
        }
    }

    async fn put_tags(&self, tenant: &str, metric: &MetricKey, tags: &Tags) -> StorageResult<()> {
        let mut conn = self.db.lock().await;
        if !Self::metric_exists(&conn, tenant, metric)? {
            return Err(Self::not_found(tenant, metric));
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tags (tenant, type, id, key, value)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (tenant, type, id, key) DO UPDATE SET value = excluded.value",
            )?;
            for (key, value) in tags {
                stmt.execute(params![tenant, metric.kind.as_str(), metric.id, key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_tags(
        &self,
        tenant: &str,
        metric: &MetricKey,
        keys: &[String],
    ) -> StorageResult<()> {
        let mut conn = self.db.lock().await;
        if !Self::metric_exists(&conn, tenant, metric)? {
            return Err(Self::not_found(tenant, metric));
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM tags WHERE tenant = ? AND type = ? AND id = ? AND key = ?",
            )?;
            for key in keys {
                stmt.execute(params![tenant, metric.kind.as_str(), metric.id, key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_data(
        &self,
        tenant: &str,
        metric: &MetricKey,
        range: TimeRange,
    ) -> StorageResult<()> {
        let conn = self.db.lock().await;
        let removed = conn.execute(
            "DELETE FROM points
             WHERE tenant = ? AND type = ? AND id = ? AND timestamp >= ? AND timestamp < ?",
            params![tenant, metric.kind.as_str(), metric.id, range.start, range.end],
        )?;
        debug!("Deleted {} points from {}/{}", removed, tenant, metric);
        Ok(())
    }
}
