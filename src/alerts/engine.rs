use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::rule::AlertRule;
use crate::metrics::record_alert_transition;
use crate::models::{QueryKind, QueryResult, TimeRange};
use crate::storage::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Ok,
    Firing,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Ok => "ok",
            AlertState::Firing => "firing",
        }
    }
}

/// A state transition of one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub rule: String,
    pub tenant: String,
    pub metric: String,
    pub state: AlertState,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: i64,
}

/// Evaluates one rule and tracks its state between ticks.
pub struct RuleEvaluator {
    rule: AlertRule,
    backend: Arc<dyn Backend>,
    state: AlertState,
}

impl RuleEvaluator {
    pub fn new(rule: AlertRule, backend: Arc<dyn Backend>) -> Self {
        Self {
            rule,
            backend,
            state: AlertState::Ok,
        }
    }

    pub fn rule(&self) -> &AlertRule {
        &self.rule
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Reads the window ending at `now` and returns an event when the rule
    /// changes state. Query failures and empty windows leave the state alone.
    pub async fn evaluate(&mut self, now: i64) -> Option<AlertEvent> {
        let range = TimeRange::new(now.checked_sub(self.rule.window_ms)?, now).ok()?;
        let result = self
            .backend
            .query(
                &self.rule.tenant,
                &self.rule.metric,
                range,
                QueryKind::Stats { bucket: None },
            )
            .await;

        let bucket = match result {
            Ok(QueryResult::Stats(buckets)) => buckets.into_iter().next()?,
            Ok(QueryResult::Raw(_)) => return None,
            Err(e) => {
                warn!("Alert {}: query failed, skipping tick: {}", self.rule.id, e);
                return None;
            }
        };
        let Some(value) = self.rule.aggregate.pick(&bucket) else {
            debug!("Alert {}: no data in window", self.rule.id);
            return None;
        };

        let holds = self.rule.comparison.holds(value, self.rule.threshold);
        let next = match (self.state, holds) {
            (AlertState::Ok, true) => AlertState::Firing,
            (AlertState::Firing, false) => AlertState::Ok,
            _ => return None,
        };
        self.state = next;
        record_alert_transition(next.as_str());

        Some(AlertEvent {
            id: Uuid::new_v4(),
            rule: self.rule.id.clone(),
            tenant: self.rule.tenant.clone(),
            metric: self.rule.metric.to_string(),
            state: next,
            value,
            threshold: self.rule.threshold,
            timestamp: now,
        })
    }
}

/// Runs every rule on its own timer and sends transitions to `events`.
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    backend: Arc<dyn Backend>,
}

impl AlertEngine {
    pub fn new(backend: Arc<dyn Backend>, rules: Vec<AlertRule>) -> Self {
        Self { rules, backend }
    }

    /// Starts one task per rule. Tasks stop when `shutdown` turns true or
    /// the event receiver is dropped.
    pub fn spawn(
        self,
        events: mpsc::Sender<AlertEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        info!("Starting {} alert rule(s)", self.rules.len());
        self.rules
            .into_iter()
            .map(|rule| {
                let evaluator = RuleEvaluator::new(rule, self.backend.clone());
                tokio::spawn(run_rule(evaluator, events.clone(), shutdown.clone()))
            })
            .collect()
    }
}

async fn run_rule(
    mut evaluator: RuleEvaluator,
    events: mpsc::Sender<AlertEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(evaluator.rule().interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(
        "Alert {} every {:?}: {} {} {} ({:?})",
        evaluator.rule().id,
        evaluator.rule().interval,
        evaluator.rule().metric,
        evaluator.rule().comparison,
        evaluator.rule().threshold,
        evaluator.rule().aggregate
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        if let Some(event) = evaluator.evaluate(now).await {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
    debug!("Alert {} stopped", evaluator.rule().id);
}

/// Logs transitions and optionally posts them to a webhook.
pub struct Notifier {
    webhook: Option<(reqwest::Client, String)>,
}

impl Notifier {
    pub fn new(webhook: Option<String>) -> Self {
        Self {
            webhook: webhook
                .filter(|url| !url.trim().is_empty())
                .map(|url| (reqwest::Client::new(), url)),
        }
    }

    pub async fn notify(&self, event: &AlertEvent) {
        match event.state {
            AlertState::Firing => warn!(
                "Alert {} FIRING: {} = {} (threshold {})",
                event.rule, event.metric, event.value, event.threshold
            ),
            AlertState::Ok => info!(
                "Alert {} resolved: {} = {} (threshold {})",
                event.rule, event.metric, event.value, event.threshold
            ),
        }

        let Some((client, url)) = &self.webhook else {
            return;
        };
        let sent = client
            .post(url.as_str())
            .json(event)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(e) = sent {
            error!("Alert {}: webhook {} failed: {}", event.rule, url, e);
        }
    }

    /// Drains `events` until every sender is gone.
    pub fn spawn(self, mut events: mpsc::Receiver<AlertEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.notify(&event).await;
            }
        })
    }
}
