//! The read-only boundary to the DAO platform and chain
//!
//! The engine never retries; a failed query skips one collection cycle.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::DataSourceConfig;
use crate::error::{ConfigError, ConfigResult, DataSourceError, DataSourceResult};
use crate::sample::MetricCategory;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserFields {
    pub total_users: f64,
    pub active_users: f64,
    pub new_users: f64,
    pub retention_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFields {
    pub total_transactions: f64,
    pub successful_transactions: f64,
    pub failed_transactions: f64,
    pub average_gas_used: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFields {
    pub proposals_created: f64,
    pub votes_cast: f64,
    pub delegations: f64,
    pub treasury_operations: f64,
    pub staking_operations: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceFields {
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub throughput: f64,
    pub uptime: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackFields {
    pub satisfaction_score: f64,
    pub bug_reports: f64,
    pub feature_requests: f64,
    pub support_tickets: f64,
}

macro_rules! into_fields {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $ty {
            /// Flatten into catalogue field names
            pub fn into_fields(self) -> BTreeMap<String, f64> {
                let mut fields = BTreeMap::new();
                $(fields.insert(stringify!($field).to_string(), self.$field);)+
                fields
            }
        }
    };
}

into_fields!(UserFields { total_users, active_users, new_users, retention_rate });
into_fields!(TransactionFields {
    total_transactions,
    successful_transactions,
    failed_transactions,
    average_gas_used,
    success_rate,
});
into_fields!(FeatureFields {
    proposals_created,
    votes_cast,
    delegations,
    treasury_operations,
    staking_operations,
});
into_fields!(PerformanceFields { response_time_ms, error_rate, throughput, uptime });
into_fields!(FeedbackFields { satisfaction_score, bug_reports, feature_requests, support_tickets });

/// Numeric queries against the platform. Implementations report failures
/// as [`DataSourceError::DataUnavailable`].
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    async fn user_metrics(&self) -> DataSourceResult<UserFields>;

    async fn transaction_metrics(&self) -> DataSourceResult<TransactionFields>;

    async fn feature_adoption_metrics(&self) -> DataSourceResult<FeatureFields>;

    async fn performance_metrics(&self) -> DataSourceResult<PerformanceFields>;

    async fn feedback_metrics(&self) -> DataSourceResult<FeedbackFields>;

    /// Query one category and flatten the result
    async fn query(&self, category: MetricCategory) -> DataSourceResult<BTreeMap<String, f64>> {
        Ok(match category {
            MetricCategory::User => self.user_metrics().await?.into_fields(),
            MetricCategory::Transaction => self.transaction_metrics().await?.into_fields(),
            MetricCategory::FeatureAdoption => self.feature_adoption_metrics().await?.into_fields(),
            MetricCategory::Performance => self.performance_metrics().await?.into_fields(),
            MetricCategory::Feedback => self.feedback_metrics().await?.into_fields(),
        })
    }
}

/// Reads `GET {base_url}/metrics/{category}` returning the category's fields as JSON
pub struct HttpDataSource {
    client: Client,
    base_url: String,
}

impl HttpDataSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ConfigResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder().timeout(timeout).build().map_err(|e| ConfigError::InvalidValue {
            field: "data_source.base_url".to_string(),
            value: format!("{} ({})", base_url, e),
        })?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &DataSourceConfig) -> ConfigResult<Option<Self>> {
        config
            .base_url
            .as_ref()
            .map(|url| Self::new(url.clone(), Duration::from_secs(config.timeout_secs)))
            .transpose()
    }

    async fn fetch<T: DeserializeOwned>(&self, category: MetricCategory) -> DataSourceResult<T> {
        let unavailable = |reason: String| DataSourceError::DataUnavailable { category, reason };

        let response = self
            .client
            .get(format!("{}/metrics/{}", self.base_url, category))
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("platform responded with status {}", response.status())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| unavailable(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl ChainDataSource for HttpDataSource {
    async fn user_metrics(&self) -> DataSourceResult<UserFields> {
        self.fetch(MetricCategory::User).await
    }

    async fn transaction_metrics(&self) -> DataSourceResult<TransactionFields> {
        self.fetch(MetricCategory::Transaction).await
    }

    async fn feature_adoption_metrics(&self) -> DataSourceResult<FeatureFields> {
        self.fetch(MetricCategory::FeatureAdoption).await
    }

    async fn performance_metrics(&self) -> DataSourceResult<PerformanceFields> {
        self.fetch(MetricCategory::Performance).await
    }

    async fn feedback_metrics(&self) -> DataSourceResult<FeedbackFields> {
        self.fetch(MetricCategory::Feedback).await
    }
}
