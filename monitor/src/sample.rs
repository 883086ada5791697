//! Metric samples, categories and the catalogue of known metric paths

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Partition of the time-series store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    User,
    Transaction,
    FeatureAdoption,
    Performance,
    Feedback,
}

impl MetricCategory {
    pub const ALL: [MetricCategory; 5] = [
        MetricCategory::User,
        MetricCategory::Transaction,
        MetricCategory::FeatureAdoption,
        MetricCategory::Performance,
        MetricCategory::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::User => "user",
            MetricCategory::Transaction => "transaction",
            MetricCategory::FeatureAdoption => "feature_adoption",
            MetricCategory::Performance => "performance",
            MetricCategory::Feedback => "feedback",
        }
    }

    /// Fields every sample of this category carries
    pub fn known_fields(&self) -> &'static [&'static str] {
        match self {
            MetricCategory::User => &["total_users", "active_users", "new_users", "retention_rate"],
            MetricCategory::Transaction => &[
                "total_transactions",
                "successful_transactions",
                "failed_transactions",
                "average_gas_used",
                "success_rate",
            ],
            MetricCategory::FeatureAdoption => &[
                "proposals_created",
                "votes_cast",
                "delegations",
                "treasury_operations",
                "staking_operations",
            ],
            MetricCategory::Performance => &["response_time_ms", "error_rate", "throughput", "uptime"],
            MetricCategory::Feedback => &[
                "satisfaction_score",
                "bug_reports",
                "feature_requests",
                "support_tickets",
            ],
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        MetricCategory::ALL
            .iter()
            .copied()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "category".to_string(),
                value: s.to_string(),
            })
    }
}

/// A single immutable observation of one category's fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub category: MetricCategory,
    pub fields: BTreeMap<String, f64>,
}

impl MetricSample {
    pub fn new(category: MetricCategory, timestamp: DateTime<Utc>, fields: BTreeMap<String, f64>) -> Self {
        Self {
            timestamp,
            category,
            fields,
        }
    }

    pub fn value(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied()
    }
}

/// Reference to one field of one category, written `category.field`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricPath {
    pub category: MetricCategory,
    pub field: String,
}

impl MetricPath {
    /// Parse a metric path against the catalogue.
    ///
    /// Accepts `category.field`, or a bare `field` when exactly one category
    /// declares it. camelCase spellings (`errorRate`) are normalized first.
    pub fn parse(path: &str) -> ConfigResult<Self> {
        let unknown = || ConfigError::UnknownMetricPath { path: path.to_string() };
        let normalized = to_snake_case(path);

        if let Some((category, field)) = normalized.split_once('.') {
            let category: MetricCategory = category.parse().map_err(|_| unknown())?;
            if !category.known_fields().contains(&field) {
                return Err(unknown());
            }
            return Ok(Self {
                category,
                field: field.to_string(),
            });
        }

        let mut owners = MetricCategory::ALL
            .iter()
            .filter(|category| category.known_fields().contains(&normalized.as_str()));
        match (owners.next(), owners.next()) {
            (Some(category), None) => Ok(Self {
                category: *category,
                field: normalized,
            }),
            _ => Err(unknown()),
        }
    }

    /// Every path in the catalogue
    pub fn catalogue() -> Vec<MetricPath> {
        MetricCategory::ALL
            .iter()
            .flat_map(|category| {
                category.known_fields().iter().map(move |field| MetricPath {
                    category: *category,
                    field: field.to_string(),
                })
            })
            .collect()
    }
}

fn to_snake_case(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 4);
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() && !out.ends_with('.') && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

impl fmt::Display for MetricPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.field)
    }
}
