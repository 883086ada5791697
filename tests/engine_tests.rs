//! Engine lifecycle, configuration validation and query surface

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use dao_monitor::collectors::collect_at;
use dao_monitor::threshold::{Comparator, ThresholdRule};
use dao_monitor::{
    AlertFilter, AlertSeverity, AlertType, CandidateAlert, ConfigError, MetricCategory, MonitorError,
    MonitoringEngine, TimeRange,
};
use dao_monitor_tests::{test_config, MockDataSource, TestHarness};

async fn initialize(config: dao_monitor::MonitorConfig) -> dao_monitor::Result<MonitoringEngine> {
    MonitoringEngine::initialize(config, Arc::new(MockDataSource::new()), Vec::new()).await
}

#[tokio::test]
async fn test_initialize_rejects_sub_second_interval() {
    let mut config = test_config();
    config.intervals.alerting_secs = 0;

    let result = initialize(config).await;
    assert!(matches!(
        result,
        Err(MonitorError::Config(ConfigError::IntervalTooShort { .. }))
    ));
}

#[tokio::test]
async fn test_initialize_rejects_unknown_metric_path() {
    let mut config = test_config();
    config
        .thresholds
        .push(ThresholdRule::new("performance.gas_price", Comparator::Gt, 10.0, AlertSeverity::Low));

    let result = initialize(config).await;
    assert!(matches!(
        result,
        Err(MonitorError::Config(ConfigError::UnknownMetricPath { .. }))
    ));
}

#[tokio::test]
async fn test_initialize_rejects_non_positive_z_score() {
    let mut config = test_config();
    config.anomaly.z_score_threshold = -1.0;

    let result = initialize(config).await;
    assert!(matches!(result, Err(MonitorError::Config(ConfigError::InvalidValue { .. }))));
}

#[tokio::test]
async fn test_initialize_rejects_anomaly_window_below_ten_samples() {
    let mut config = test_config();
    config.anomaly.min_samples = 9;

    let result = initialize(config).await;
    assert!(matches!(
        result,
        Err(MonitorError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "anomaly.min_samples"
    ));

    let mut config = test_config();
    config.anomaly.min_samples = 15;
    assert!(initialize(config).await.is_ok());
}

#[tokio::test]
async fn test_camel_case_threshold_paths_are_accepted() {
    let mut config = test_config();
    config.thresholds = vec![ThresholdRule::new("errorRate", Comparator::Gt, 5.0, AlertSeverity::High)];
    assert!(initialize(config).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_are_idempotent() {
    let harness = TestHarness::new(test_config()).await.unwrap();
    let engine = &harness.engine;

    assert!(!engine.is_running().await);
    assert!(engine.start().await.unwrap());
    assert!(!engine.start().await.unwrap());
    assert!(engine.is_running().await);

    let report = engine.stop().await.unwrap().expect("engine was running");
    assert!(report.is_clean());
    assert!(engine.stop().await.unwrap().is_none());
    assert!(!engine.is_running().await);

    // A stopped engine can be started again
    assert!(engine.start().await.unwrap());
    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_threshold_breach_end_to_end() {
    let harness = TestHarness::new(test_config()).await.unwrap();
    harness.source.set_value("performance.error_rate", 7.2);

    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(125)).await;
    harness.engine.stop().await.unwrap();

    let breaches = harness
        .engine
        .query_alerts(&AlertFilter::all().with_type(AlertType::ThresholdBreach))
        .await;
    assert_eq!(breaches.len(), 1, "repeated evaluations collapse into one alert");
    assert_eq!(breaches[0].metric, "performance.error_rate");
    assert_eq!(breaches[0].severity, AlertSeverity::High);
    assert_eq!(breaches[0].source_metrics.get("value"), Some(&7.2));

    let delivered: Vec<_> = harness
        .channel
        .received()
        .into_iter()
        .filter(|alert| alert.alert_type == AlertType::ThresholdBreach)
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, breaches[0].id);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_platform_raises_nothing() {
    let harness = TestHarness::new(test_config()).await.unwrap();

    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    harness.engine.stop().await.unwrap();

    assert!(harness.engine.query_alerts(&AlertFilter::all()).await.is_empty());
    assert_eq!(harness.channel.count(), 0);
}

#[tokio::test]
async fn test_resolve_alert_lifecycle() {
    let harness = TestHarness::new(test_config()).await.unwrap();
    let alerts = &harness.engine.state().alerts;

    let raised = alerts
        .raise(CandidateAlert::new(
            AlertType::ThresholdBreach,
            AlertSeverity::Medium,
            "performance.response_time_ms",
            "Slow responses",
        ))
        .await
        .unwrap();

    let resolved = harness.engine.resolve_alert(&raised.alert.id).await.unwrap();
    let resolved = resolved.expect("first resolve changes state");
    assert!(resolved.resolved);
    assert!(resolved.resolved_at.is_some());

    assert!(harness.engine.resolve_alert(&raised.alert.id).await.unwrap().is_none());
    assert!(harness.engine.resolve_alert("no-such-alert").await.unwrap().is_none());

    let unresolved = harness.engine.query_alerts(&AlertFilter::unresolved()).await;
    assert!(unresolved.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_alert_log_rejects_mutation_after_stop() {
    let harness = TestHarness::new(test_config()).await.unwrap();
    harness.engine.start().await.unwrap();
    harness.engine.stop().await.unwrap();

    let result = harness
        .engine
        .state()
        .alerts
        .raise(CandidateAlert::new(AlertType::Operational, AlertSeverity::Low, "collector.user", "late"))
        .await;
    assert!(matches!(result, Err(MonitorError::Sealed(_))));
    assert!(matches!(
        harness.engine.resolve_alert("anything").await,
        Err(MonitorError::Sealed(_))
    ));
}

#[tokio::test]
async fn test_query_series_respects_time_range() {
    let harness = TestHarness::new(test_config()).await.unwrap();
    let state = harness.engine.state();
    let now = Utc::now();

    for minutes_ago in [50, 40, 30, 20, 10] {
        let at = now - chrono::Duration::minutes(minutes_ago);
        collect_at(state, MetricCategory::User, Some(at)).await.unwrap();
    }

    let all = harness.engine.query_series(MetricCategory::User, TimeRange::all()).await;
    assert_eq!(all.len(), 5);

    let window = TimeRange::between(now - chrono::Duration::minutes(35), now - chrono::Duration::minutes(15));
    let recent = harness.engine.query_series(MetricCategory::User, window).await;
    assert_eq!(recent.len(), 2);
    assert!(recent.values("active_users").all(|value| value == 420.0));

    let other = harness.engine.query_series(MetricCategory::Feedback, TimeRange::all()).await;
    assert!(other.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_status_lists_every_task() {
    let harness = TestHarness::new(test_config()).await.unwrap();
    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let status = harness.engine.status().await;
    assert!(status.running);
    let names: Vec<&str> = status.tasks.iter().map(|task| task.name.as_str()).collect();
    for expected in [
        "collect_user",
        "collect_transaction",
        "collect_feature_adoption",
        "collect_performance",
        "collect_feedback",
        "thresholds",
        "anomaly",
        "rollup_hourly",
        "rollup_daily",
        "rollup_weekly",
        "retention",
    ] {
        assert!(names.contains(&expected), "missing task {}", expected);
    }
    assert!(status.tasks.iter().all(|task| task.runs >= 1));
    assert_eq!(status.series_lengths[&MetricCategory::User], 1);

    harness.engine.stop().await.unwrap();
    let status = harness.engine.status().await;
    assert!(!status.running);
    assert!(status.tasks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_export_metrics_after_a_run() {
    let harness = TestHarness::new(test_config()).await.unwrap();
    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.engine.stop().await.unwrap();

    let text = harness.engine.export_metrics("prometheus").unwrap();
    assert!(text.contains("dao_monitor_samples_collected_total"));
    assert!(text.contains("dao_monitor_task_runs_total"));

    let json: serde_json::Value = serde_json::from_str(&harness.engine.export_metrics("json").unwrap()).unwrap();
    assert!(json["engine_stats"]["samples_collected"].as_u64().unwrap() >= 5);

    assert!(harness.engine.export_metrics("xml").is_err());
}
