//! Alert evaluation for monitored processes.
//!
//! A session asks its [`AlertPolicy`] about every sample it takes. The
//! policy shipped here evaluates user-supplied [`AlertRule`]s; there are no
//! built-in thresholds.

use chrono::{DateTime, Utc};
use humansize::{format_size, BINARY};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::history::SampleHistory;
use super::metrics::ProcessSample;
use super::rules::{AlertRule, MetricKind, WindowCondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => f.write_str("INFO"),
            AlertSeverity::Warning => f.write_str("WARNING"),
            AlertSeverity::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// An individual alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    /// Expression of the rule that fired
    pub rule: String,
    pub metric: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub pid: u32,
    pub process_name: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Decides which alerts a new sample raises.
///
/// `history` already contains `sample` as its latest entry.
pub trait AlertPolicy: Send {
    fn evaluate(&mut self, sample: &ProcessSample, history: &SampleHistory) -> Vec<Alert>;

    /// Forget all windowed state (e.g. when the monitored pid changes)
    fn reset(&mut self);
}

/// Policy that never alerts
#[derive(Debug, Default)]
pub struct NoAlerts;

impl AlertPolicy for NoAlerts {
    fn evaluate(&mut self, _sample: &ProcessSample, _history: &SampleHistory) -> Vec<Alert> {
        Vec::new()
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone)]
struct WindowPoint {
    at: DateTime<Utc>,
    sample: ProcessSample,
}

/// Evaluates a list of [`AlertRule`]s, tracking the state windowed rules need
pub struct RuleAlertPolicy {
    rules: Vec<AlertRule>,
    window: Duration,
    /// When the condition of a `for` rule started holding, per (pid, rule index)
    trigger_starts: HashMap<(u32, usize), DateTime<Utc>>,
    points: HashMap<u32, VecDeque<WindowPoint>>,
}

impl RuleAlertPolicy {
    /// `window` bounds how much per-pid state is kept; it is widened to the
    /// longest rule duration when that is larger.
    pub fn new(rules: Vec<AlertRule>, window: Duration) -> Self {
        let longest = rules
            .iter()
            .filter_map(|r| r.window.map(|w| w.duration))
            .max()
            .unwrap_or_default();
        Self {
            rules,
            window: window.max(longest),
            trigger_starts: HashMap::new(),
            points: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn record(&mut self, sample: &ProcessSample) {
        let points = self.points.entry(sample.pid).or_default();
        points.push_back(WindowPoint {
            at: sample.captured_at,
            sample: ProcessSample {
                jvm: None,
                ..sample.clone()
            },
        });

        if let Ok(window) = chrono::Duration::from_std(self.window) {
            let cutoff = sample.captured_at - window;
            while points.front().map(|p| p.at < cutoff).unwrap_or(false) {
                points.pop_front();
            }
        }
    }

    fn check(&mut self, index: usize, sample: &ProcessSample) -> Option<f64> {
        let rule = &self.rules[index];
        let key = (sample.pid, index);

        let value = match rule.metric.value_of(sample) {
            Some(value) => value,
            None => {
                self.trigger_starts.remove(&key);
                return None;
            }
        };
        let threshold = rule.normalized_threshold();

        let window = match rule.window {
            None => return rule.comparison.holds(value, threshold).then_some(value),
            Some(window) => window,
        };

        match window.condition {
            WindowCondition::For => {
                if !rule.comparison.holds(value, threshold) {
                    self.trigger_starts.remove(&key);
                    return None;
                }
                let started = *self.trigger_starts.entry(key).or_insert(sample.captured_at);
                let held = (sample.captured_at - started).to_std().unwrap_or_default();
                (held >= window.duration).then_some(value)
            }
            WindowCondition::Increasing | WindowCondition::Decreasing => {
                let points = self.points.get(&sample.pid)?;
                if points.len() < 2 {
                    return None;
                }
                let span = chrono::Duration::from_std(window.duration).ok()?;
                let cutoff = sample.captured_at - span;
                let oldest = points
                    .iter()
                    .find(|p| p.at >= cutoff)
                    .or_else(|| points.front())?;
                if oldest.at >= sample.captured_at {
                    return None;
                }
                let previous = rule.metric.value_of(&oldest.sample)?;
                let change = if window.condition == WindowCondition::Increasing {
                    value - previous
                } else {
                    previous - value
                };
                (change >= threshold).then_some(value)
            }
        }
    }
}

impl AlertPolicy for RuleAlertPolicy {
    fn evaluate(&mut self, sample: &ProcessSample, _history: &SampleHistory) -> Vec<Alert> {
        self.record(sample);

        let mut alerts = Vec::new();
        for index in 0..self.rules.len() {
            if let Some(value) = self.check(index, sample) {
                let rule = &self.rules[index];
                alerts.push(build_alert(rule, value, sample));
            }
        }
        alerts
    }

    fn reset(&mut self) {
        self.trigger_starts.clear();
        self.points.clear();
    }
}

fn format_metric(metric: MetricKind, value: f64) -> String {
    match metric {
        MetricKind::Cpu => format!("{:.1}%", value),
        m if m.is_bytes() => format_size(value.max(0.0) as u64, BINARY),
        _ => format!("{}", value as u64),
    }
}

fn build_alert(rule: &AlertRule, value: f64, sample: &ProcessSample) -> Alert {
    let threshold = rule.normalized_threshold();
    Alert {
        severity: rule.severity,
        rule: rule.expression.clone(),
        metric: rule.metric,
        value,
        threshold,
        pid: sample.pid,
        process_name: sample.name.clone(),
        message: format!(
            "{}: current {}, threshold {} (pid {} {})",
            rule,
            format_metric(rule.metric, value),
            format_metric(rule.metric, threshold),
            sample.pid,
            sample.name
        ),
        triggered_at: sample.captured_at,
    }
}
