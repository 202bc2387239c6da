//! Alert rule expressions.
//!
//! ```text
//! [severity:] metric OP threshold[unit] [for|increasing|decreasing N(s|m|h)]
//! ```
//!
//! e.g. `cpu>80% for 30s`, `critical: rss>1.5GB`, `fd>1000`,
//! `rss>200MB increasing 5m`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::alerts::AlertSeverity;
use super::metrics::ProcessSample;
use crate::error::{ProcwatchError, Result};

static RULE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(info|warning|warn|critical|crit)\s*:\s*)?([\w%]+)\s*(>=|<=|>|<|==|!=)\s*([\d.]+)\s*(%|GB|MB|KB|B)?\s*(?:(for|increasing|decreasing)\s+([\d.]+)\s*(s|m|h))?\s*$",
    )
    .expect("alert rule pattern is valid")
});

/// Tolerance for `==` / `!=` on floating point values
const EQUALITY_EPSILON: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Cpu,
    Rss,
    Virtual,
    Threads,
    Fds,
    ReadBytes,
    WriteBytes,
}

impl MetricKind {
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Rss => "rss",
            MetricKind::Virtual => "virtual",
            MetricKind::Threads => "threads",
            MetricKind::Fds => "fd",
            MetricKind::ReadBytes => "read",
            MetricKind::WriteBytes => "write",
        }
    }

    pub fn is_bytes(&self) -> bool {
        matches!(
            self,
            MetricKind::Rss | MetricKind::Virtual | MetricKind::ReadBytes | MetricKind::WriteBytes
        )
    }

    /// Current value of this metric; `None` when the sample cannot provide it
    pub fn value_of(&self, sample: &ProcessSample) -> Option<f64> {
        match self {
            MetricKind::Cpu => Some(sample.cpu.percent_instant),
            MetricKind::Rss => Some(sample.memory.resident_bytes as f64),
            MetricKind::Virtual => Some(sample.memory.virtual_bytes as f64),
            MetricKind::Threads => Some(f64::from(sample.thread_count)),
            MetricKind::Fds => Some(f64::from(sample.fd_count)),
            MetricKind::ReadBytes => sample.io.bytes_read().map(|v| v as f64),
            MetricKind::WriteBytes => sample.io.bytes_written().map(|v| v as f64),
        }
    }
}

impl FromStr for MetricKind {
    type Err = ProcwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" | "cpu%" => Ok(MetricKind::Cpu),
            "rss" | "mem" | "memory" => Ok(MetricKind::Rss),
            "virtual" | "vsz" | "virt" => Ok(MetricKind::Virtual),
            "threads" | "thread" => Ok(MetricKind::Threads),
            "fd" | "fds" | "files" => Ok(MetricKind::Fds),
            "read" | "read_bytes" => Ok(MetricKind::ReadBytes),
            "write" | "write_bytes" => Ok(MetricKind::WriteBytes),
            other => Err(ProcwatchError::invalid_rule(format!(
                "unknown metric '{}' (supported: cpu, rss, virtual, threads, fd, read, write)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Greater => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::Less => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }

    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::Less => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < EQUALITY_EPSILON,
            Comparison::NotEqual => (value - threshold).abs() >= EQUALITY_EPSILON,
        }
    }
}

impl FromStr for Comparison {
    type Err = ProcwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(Comparison::Greater),
            ">=" => Ok(Comparison::GreaterOrEqual),
            "<" => Ok(Comparison::Less),
            "<=" => Ok(Comparison::LessOrEqual),
            "==" => Ok(Comparison::Equal),
            "!=" => Ok(Comparison::NotEqual),
            other => Err(ProcwatchError::invalid_rule(format!("unknown operator '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdUnit {
    None,
    Percent,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
}

impl ThresholdUnit {
    pub fn multiplier(&self) -> f64 {
        match self {
            ThresholdUnit::None | ThresholdUnit::Percent | ThresholdUnit::Bytes => 1.0,
            ThresholdUnit::Kilobytes => 1024.0,
            ThresholdUnit::Megabytes => 1024.0 * 1024.0,
            ThresholdUnit::Gigabytes => 1024.0 * 1024.0 * 1024.0,
        }
    }

    fn parse(unit: Option<&str>, metric: MetricKind) -> Self {
        match unit.map(|u| u.to_uppercase()).as_deref() {
            Some("%") => ThresholdUnit::Percent,
            Some("B") => ThresholdUnit::Bytes,
            Some("KB") => ThresholdUnit::Kilobytes,
            Some("MB") => ThresholdUnit::Megabytes,
            Some("GB") => ThresholdUnit::Gigabytes,
            _ if metric == MetricKind::Cpu => ThresholdUnit::Percent,
            _ if metric.is_bytes() => ThresholdUnit::Bytes,
            _ => ThresholdUnit::None,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            ThresholdUnit::None | ThresholdUnit::Bytes => "",
            ThresholdUnit::Percent => "%",
            ThresholdUnit::Kilobytes => "KB",
            ThresholdUnit::Megabytes => "MB",
            ThresholdUnit::Gigabytes => "GB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowCondition {
    /// The comparison must hold continuously for the duration
    For,
    /// The value grew by at least the threshold within the duration
    Increasing,
    /// The value shrank by at least the threshold within the duration
    Decreasing,
}

impl WindowCondition {
    pub fn keyword(&self) -> &'static str {
        match self {
            WindowCondition::For => "for",
            WindowCondition::Increasing => "increasing",
            WindowCondition::Decreasing => "decreasing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleWindow {
    pub condition: WindowCondition,
    pub duration: Duration,
}

/// A parsed alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub expression: String,
    pub severity: AlertSeverity,
    pub metric: MetricKind,
    pub comparison: Comparison,
    pub threshold: f64,
    pub unit: ThresholdUnit,
    pub window: Option<RuleWindow>,
}

impl AlertRule {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ProcwatchError::invalid_rule("expression is empty"));
        }

        let caps = RULE_PATTERN.captures(trimmed).ok_or_else(|| {
            ProcwatchError::invalid_rule(format!(
                "'{}' does not match metric OP threshold[unit] [for|increasing|decreasing N(s|m|h)]",
                trimmed
            ))
        })?;

        let severity = match caps.get(1).map(|m| m.as_str().to_lowercase()).as_deref() {
            Some("info") => AlertSeverity::Info,
            Some("critical") | Some("crit") => AlertSeverity::Critical,
            _ => AlertSeverity::Warning,
        };
        let metric: MetricKind = caps[2].parse()?;
        let comparison: Comparison = caps[3].parse()?;
        let threshold: f64 = caps[4]
            .parse()
            .map_err(|_| ProcwatchError::invalid_rule(format!("bad threshold '{}'", &caps[4])))?;
        let unit = ThresholdUnit::parse(caps.get(5).map(|m| m.as_str()), metric);

        let window = match (caps.get(6), caps.get(7), caps.get(8)) {
            (Some(condition), Some(amount), Some(span)) => Some(RuleWindow {
                condition: match condition.as_str().to_lowercase().as_str() {
                    "for" => WindowCondition::For,
                    "increasing" => WindowCondition::Increasing,
                    _ => WindowCondition::Decreasing,
                },
                duration: parse_duration(amount.as_str(), span.as_str())?,
            }),
            _ => None,
        };

        Ok(Self {
            expression: trimmed.to_string(),
            severity,
            metric,
            comparison,
            threshold,
            unit,
            window,
        })
    }

    /// Threshold in the metric's own unit (bytes for memory and IO)
    pub fn normalized_threshold(&self) -> f64 {
        if self.metric.is_bytes() {
            self.threshold * self.unit.multiplier()
        } else {
            self.threshold
        }
    }

    /// Whether the comparison holds for `sample`; `None` when the metric is unavailable
    pub fn holds(&self, sample: &ProcessSample) -> Option<bool> {
        self.metric
            .value_of(sample)
            .map(|value| self.comparison.holds(value, self.normalized_threshold()))
    }
}

impl FromStr for AlertRule {
    type Err = ProcwatchError;

    fn from_str(s: &str) -> Result<Self> {
        AlertRule::parse(s)
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}",
            self.metric.name(),
            self.comparison.symbol(),
            self.threshold,
            self.unit.suffix()
        )?;
        if let Some(window) = &self.window {
            write!(f, " {} {}", window.condition.keyword(), format_span(window.duration))?;
        }
        Ok(())
    }
}

fn parse_duration(amount: &str, span: &str) -> Result<Duration> {
    let amount: f64 = amount
        .parse()
        .map_err(|_| ProcwatchError::invalid_rule(format!("bad duration '{}'", amount)))?;
    let seconds = match span.to_lowercase().as_str() {
        "s" => amount,
        "m" => amount * 60.0,
        _ => amount * 3600.0,
    };
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ProcwatchError::invalid_rule(format!("duration out of range: {}{}", amount, span)))
}

fn format_span(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 || seconds % 60 != 0 {
        format!("{}s", seconds)
    } else if seconds < 3600 || seconds % 3600 != 0 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}h", seconds / 3600)
    }
}

/// Parse every expression, failing on the first invalid one
pub fn parse_rules<S: AsRef<str>>(expressions: &[S]) -> Result<Vec<AlertRule>> {
    expressions
        .iter()
        .map(|expr| AlertRule::parse(expr.as_ref()))
        .collect()
}

pub const SYNTAX_HELP: &str = "\
Alert rule syntax:
  [severity:] metric OP threshold[unit] [condition duration]

Metrics:
  cpu             Instantaneous cpu percentage
  rss, mem        Resident memory
  virtual, vsz    Virtual memory
  threads         Thread count
  fd, fds         Open descriptors / handles
  read, write     Cumulative IO bytes (never fires where IO is unavailable)

Operators:   >  >=  <  <=  ==  !=
Units:       %  B  KB  MB  GB   (cpu defaults to %, memory and IO to bytes)
Severity:    info:  warning:  critical:   (default warning)

Conditions:
  for N         comparison must hold continuously for N
  increasing N  value grew by at least the threshold within N
  decreasing N  value shrank by at least the threshold within N
Durations:   30s  5m  1h

Examples:
  cpu>80%
  critical: rss>1.5GB
  cpu>80% for 30s
  rss>200MB increasing 5m
";
