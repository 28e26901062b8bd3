//! The storage contract and the registry of concrete engines.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{MohawkError, StorageError};
use crate::models::{
    parse_duration_ms, DataPoint, MetricDescriptor, MetricKey, MetricType, QueryKind,
    QueryResult, TagFilter, Tags, TimeRange,
};
use crate::Result;

pub mod memory;
pub mod sql;
pub mod stats;

pub use memory::MemoryBackend;
pub use sql::DuckDbBackend;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Operations every storage engine provides. Callers hold an
/// `Arc<dyn Backend>` and never name a concrete engine.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier reported by the status endpoint.
    fn name(&self) -> &'static str;

    async fn list_tenants(&self) -> StorageResult<Vec<String>>;

    async fn list_metrics(
        &self,
        tenant: &str,
        kind: Option<MetricType>,
        tags: &[TagFilter],
    ) -> StorageResult<Vec<MetricDescriptor>>;

    /// Inserts points, replacing values at existing timestamps. Creates the
    /// tenant and metric on first write. Atomic per call.
    async fn write(&self, tenant: &str, metric: &MetricKey, points: &[DataPoint])
        -> StorageResult<()>;

    async fn query(
        &self,
        tenant: &str,
        metric: &MetricKey,
        range: TimeRange,
        kind: QueryKind,
    ) -> StorageResult<QueryResult>;

    /// Merges tags into an existing metric; unknown metrics are `not-found`.
    async fn put_tags(&self, tenant: &str, metric: &MetricKey, tags: &Tags) -> StorageResult<()>;

    /// Removes tag keys from an existing metric; unknown metrics are `not-found`.
    async fn delete_tags(&self, tenant: &str, metric: &MetricKey, keys: &[String])
        -> StorageResult<()>;

    async fn delete_data(&self, tenant: &str, metric: &MetricKey, range: TimeRange)
        -> StorageResult<()>;
}

/// Rejects writes the contract never stores.
pub fn validate_write(metric: &MetricKey, points: &[DataPoint]) -> StorageResult<()> {
    if metric.id.trim().is_empty() {
        return Err(StorageError::invalid_argument("metric id must not be empty"));
    }
    if let Some(p) = points.iter().find(|p| !p.value.is_finite()) {
        return Err(StorageError::invalid_argument(format!(
            "{}: value at {} is not a finite number",
            metric, p.timestamp
        )));
    }
    Ok(())
}

/// Engine options given as a URL query string, e.g. `db-dirname=/var/lib&max-size=100`.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    values: HashMap<String, String>,
}

impl BackendOptions {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim().trim_start_matches('?');
        let mut values = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            if key.is_empty() {
                return Err(MohawkError::Configuration(format!(
                    "can't parse storage options: {}",
                    raw
                )));
            }
            values.insert(key.into_owned(), value.into_owned());
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|v| {
                v.parse().map_err(|_| {
                    MohawkError::Configuration(format!("option {} is not a number: {}", key, v))
                })
            })
            .transpose()
    }

    pub fn get_duration_ms(&self, key: &str) -> Result<Option<i64>> {
        self.get(key)
            .map(|v| {
                parse_duration_ms(v).map_err(|e| {
                    MohawkError::Configuration(format!("option {}: {}", key, e.message))
                })
            })
            .transpose()
    }
}

/// The closed set of storage engines, selected by name in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    DuckDb,
}

impl StorageKind {
    pub const ALL: [StorageKind; 2] = [StorageKind::Memory, StorageKind::DuckDb];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::DuckDb => "duckdb",
        }
    }

    pub fn open(&self, options: &BackendOptions) -> Result<Arc<dyn Backend>> {
        let backend: Arc<dyn Backend> = match self {
            StorageKind::Memory => Arc::new(MemoryBackend::open(options)?),
            StorageKind::DuckDb => Arc::new(DuckDbBackend::open(options)?),
        };
        info!("Opened storage backend: {}", backend.name());
        Ok(backend)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = MohawkError;

    fn from_str(s: &str) -> Result<Self> {
        StorageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MohawkError::Configuration(format!("can't find storage: {}", s)))
    }
}

/// Resolves `name` in the registry and opens it with the raw option string.
pub fn open_backend(name: &str, options: &str) -> Result<Arc<dyn Backend>> {
    let kind: StorageKind = name.parse()?;
    let options = BackendOptions::parse(options)?;
    kind.open(&options)
}
