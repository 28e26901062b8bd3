//! Threshold alerts evaluated in the background against stored metrics.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::storage::Backend;
use crate::Result;

pub mod engine;
pub mod rule;

pub use engine::{AlertEngine, AlertEvent, AlertState, Notifier, RuleEvaluator};
pub use rule::{Aggregate, AlertRule, AlertRuleConfig, Comparison};

const EVENT_BUFFER: usize = 64;

/// Validates `configs` and starts the rule tasks plus the notifier. The
/// returned handles finish once `shutdown` turns true.
pub fn start(
    backend: Arc<dyn Backend>,
    configs: &[AlertRuleConfig],
    webhook: Option<String>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let rules = configs
        .iter()
        .map(AlertRule::from_config)
        .collect::<Result<Vec<_>>>()?;

    let (events, receiver) = mpsc::channel(EVENT_BUFFER);
    let mut tasks = AlertEngine::new(backend, rules).spawn(events, shutdown);
    tasks.push(Notifier::new(webhook).spawn(receiver));
    Ok(tasks)
}
