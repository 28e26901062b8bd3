use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MohawkError;
use crate::models::{parse_duration_ms, MetricKey, MetricType, StatsBucket, DEFAULT_TENANT};
use crate::Result;

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_kind() -> MetricType {
    MetricType::Gauge
}

fn default_operator() -> String {
    ">".to_string()
}

fn default_interval() -> String {
    "30s".to_string()
}

fn default_aggregate() -> String {
    "avg".to_string()
}

/// An alert rule as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub id: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: MetricType,
    pub metric: String,
    pub threshold: f64,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default = "default_aggregate")]
    pub aggregate: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
            Comparison::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = MohawkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" | "gt" => Ok(Comparison::GreaterThan),
            ">=" | "gte" => Ok(Comparison::GreaterOrEqual),
            "<" | "lt" => Ok(Comparison::LessThan),
            "<=" | "lte" => Ok(Comparison::LessOrEqual),
            "==" | "=" | "eq" => Ok(Comparison::Equal),
            "!=" | "ne" => Ok(Comparison::NotEqual),
            other => Err(MohawkError::Configuration(format!(
                "unknown alert operator: {}",
                other
            ))),
        }
    }
}

/// Which statistic of the evaluation window is compared to the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Avg,
    Min,
    Max,
    Sum,
    Count,
}

impl Aggregate {
    /// The statistic for `bucket`. Count is always defined; the others are
    /// `None` for an empty window.
    pub fn pick(&self, bucket: &StatsBucket) -> Option<f64> {
        match self {
            Aggregate::Avg => bucket.avg,
            Aggregate::Min => bucket.min,
            Aggregate::Max => bucket.max,
            Aggregate::Sum if bucket.empty => None,
            Aggregate::Sum => Some(bucket.sum),
            Aggregate::Count => Some(bucket.samples as f64),
        }
    }
}

impl FromStr for Aggregate {
    type Err = MohawkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "avg" => Ok(Aggregate::Avg),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            "sum" => Ok(Aggregate::Sum),
            "count" | "samples" => Ok(Aggregate::Count),
            other => Err(MohawkError::Configuration(format!(
                "unknown alert aggregate: {}",
                other
            ))),
        }
    }
}

/// A validated rule, ready to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub id: String,
    pub tenant: String,
    pub metric: MetricKey,
    pub threshold: f64,
    pub comparison: Comparison,
    pub interval: Duration,
    pub window_ms: i64,
    pub aggregate: Aggregate,
}

fn config_duration(rule: &str, field: &str, raw: &str) -> Result<i64> {
    parse_duration_ms(raw).map_err(|e| {
        MohawkError::Configuration(format!("alert {}: bad {}: {}", rule, field, e.message))
    })
}

impl AlertRule {
    pub fn from_config(config: &AlertRuleConfig) -> Result<Self> {
        if config.id.trim().is_empty() {
            return Err(MohawkError::Configuration("alert without id".to_string()));
        }
        if config.metric.trim().is_empty() {
            return Err(MohawkError::Configuration(format!(
                "alert {}: metric must not be empty",
                config.id
            )));
        }
        if !config.threshold.is_finite() {
            return Err(MohawkError::Configuration(format!(
                "alert {}: threshold must be a finite number",
                config.id
            )));
        }

        let interval_ms = config_duration(&config.id, "interval", &config.interval)?;
        let window_ms = match &config.window {
            Some(raw) => config_duration(&config.id, "window", raw)?,
            None => interval_ms,
        };

        Ok(Self {
            id: config.id.clone(),
            tenant: config.tenant.clone(),
            metric: MetricKey::new(config.kind, config.metric.clone()),
            threshold: config.threshold,
            comparison: config.operator.parse()?,
            interval: Duration::from_millis(interval_ms as u64),
            window_ms,
            aggregate: config.aggregate.parse()?,
        })
    }
}
