//! Static threshold evaluation
//!
//! Every rule reads the newest value of its metric path. Rules with no data
//! yet are skipped; every breaching rule yields its own candidate alert.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alert::{AlertSeverity, AlertType, CandidateAlert};
use crate::error::ConfigResult;
use crate::sample::MetricPath;
use crate::store::MetricStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Lt,
}

impl Comparator {
    pub fn breached(&self, value: f64, limit: f64) -> bool {
        match self {
            Comparator::Gt => value > limit,
            Comparator::Lt => value < limit,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Lt => "<",
        }
    }
}

/// A configured threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Metric path, `category.field` or a unique bare field
    pub metric: String,
    pub comparator: Comparator,
    pub limit: f64,
    pub severity: AlertSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ThresholdRule {
    pub fn new(metric: impl Into<String>, comparator: Comparator, limit: f64, severity: AlertSeverity) -> Self {
        Self {
            metric: metric.into(),
            comparator,
            limit,
            severity,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Evaluate against a single value
    pub fn check(&self, path: &MetricPath, value: f64) -> Option<CandidateAlert> {
        if !self.comparator.breached(value, self.limit) {
            return None;
        }

        let title = match &self.name {
            Some(name) => format!("{} breached", name),
            None => format!("{} {} {}", path, self.comparator.symbol(), self.limit),
        };

        Some(
            CandidateAlert::new(AlertType::ThresholdBreach, self.severity, path.to_string(), title)
                .with_description(format!(
                    "{} is {} (limit {} {})",
                    path,
                    value,
                    self.comparator.symbol(),
                    self.limit
                ))
                .with_metric("value", value)
                .with_metric("limit", self.limit),
        )
    }
}

/// Rules with their metric paths resolved once at construction
pub struct ThresholdEvaluator {
    rules: Vec<(MetricPath, ThresholdRule)>,
}

impl ThresholdEvaluator {
    pub fn new(rules: &[ThresholdRule]) -> ConfigResult<Self> {
        let rules = rules
            .iter()
            .map(|rule| Ok((MetricPath::parse(&rule.metric)?, rule.clone())))
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate every rule against the newest sample of its category
    pub async fn evaluate(&self, store: &MetricStore) -> Vec<CandidateAlert> {
        let mut candidates = Vec::new();

        for (path, rule) in &self.rules {
            let Some((_, value)) = store.latest_value(path).await else {
                debug!(metric = %path, "No sample yet, skipping threshold rule");
                continue;
            };

            if let Some(candidate) = rule.check(path, value) {
                candidates.push(candidate);
            }
        }

        candidates
    }
}
