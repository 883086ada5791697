//! Scheduler behaviour through the engine, on tokio's paused clock

use std::sync::Arc;
use std::time::Duration;

use dao_monitor::{AlertFilter, AlertType, MetricCategory, MonitorConfig, OperationalEventKind};
use dao_monitor_tests::{test_config, MockDataSource, TestHarness};

fn fast_config() -> MonitorConfig {
    let mut config = test_config();
    config.intervals.real_time_secs = 10;
    config.intervals.alerting_secs = 1;
    config.data_source.timeout_secs = 60;
    config.shutdown_timeout_secs = 120;
    config
}

async fn harness_with(config: MonitorConfig, source: MockDataSource) -> TestHarness {
    TestHarness::with_source(config, Arc::new(source)).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_slow_collector_never_overlaps_or_blocks_others() {
    let source = MockDataSource::new();
    source.set_delay(MetricCategory::User, Duration::from_secs(25));
    let harness = harness_with(fast_config(), source).await;

    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(100)).await;

    let user_calls = harness.source.calls(MetricCategory::User);
    assert!(user_calls <= 100 / 10, "{} invocations in 100s at a 10s cadence", user_calls);
    assert!(user_calls >= 3);
    assert_eq!(harness.source.max_in_flight(MetricCategory::User), 1);

    // Other collectors keep their own cadence
    assert!(harness.source.calls(MetricCategory::Transaction) >= 9);

    let status = harness.engine.status().await;
    let task = |name: &str| status.tasks.iter().find(|task| task.name == name).cloned().unwrap();
    assert!(task("collect_user").ticks_skipped > 0);
    assert_eq!(task("collect_transaction").ticks_skipped, 0);
    assert!(task("thresholds").runs >= 50);

    let report = harness.engine.stop().await.unwrap().unwrap();
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_stop_drains_in_flight_collection() {
    let source = MockDataSource::new();
    source.set_delay(MetricCategory::User, Duration::from_secs(5));
    let harness = harness_with(fast_config(), source).await;

    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.engine.state().store.len(MetricCategory::User).await, 0);

    let report = harness.engine.stop().await.unwrap().unwrap();
    assert!(report.is_clean());
    assert!(report.completed.contains(&"collect_user".to_string()));

    // The in-flight cycle finished before the store was sealed
    assert_eq!(harness.engine.state().store.len(MetricCategory::User).await, 1);
    assert!(harness.engine.state().store.is_sealed().await);
}

#[tokio::test(start_paused = true)]
async fn test_no_samples_land_after_stop() {
    let harness = harness_with(fast_config(), MockDataSource::new()).await;

    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;
    harness.engine.stop().await.unwrap();

    let calls = harness.source.total_calls();
    let lengths: Vec<usize> = futures::future::join_all(
        MetricCategory::ALL
            .iter()
            .map(|category| harness.engine.state().store.len(*category)),
    )
    .await;

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(harness.source.total_calls(), calls);
    for (category, before) in MetricCategory::ALL.iter().zip(lengths) {
        assert_eq!(harness.engine.state().store.len(*category).await, before);
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_abandons_stuck_task() {
    let source = MockDataSource::new();
    source.set_delay(MetricCategory::User, Duration::from_secs(20));
    let mut config = fast_config();
    config.shutdown_timeout_secs = 2;
    let harness = harness_with(config, source).await;

    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = harness.engine.stop().await.unwrap().unwrap();
    assert_eq!(report.abandoned, vec!["collect_user".to_string()]);
    assert!(!report.is_clean());

    let abandoned = harness
        .engine
        .state()
        .oplog
        .events_of(OperationalEventKind::TaskAbandoned);
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].subject, "collect_user");

    // The detached cycle completes later but finds the store sealed
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.source.calls(MetricCategory::User), 1);
    assert_eq!(harness.engine.state().store.len(MetricCategory::User).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_collection_keeps_firing() {
    let source = MockDataSource::new();
    source.set_failing(true);
    let harness = harness_with(fast_config(), source).await;

    harness.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(35)).await;

    assert!(harness.source.calls(MetricCategory::User) >= 3);
    assert_eq!(harness.engine.state().store.len(MetricCategory::User).await, 0);

    let skipped: Vec<_> = harness
        .engine
        .operational_events()
        .into_iter()
        .filter(|event| event.kind == OperationalEventKind::CollectionSkipped && event.subject == "user")
        .collect();
    assert!(skipped.len() >= 3);

    // Repeated failures collapse into one operational alert per collector
    let operational = harness
        .engine
        .query_alerts(&AlertFilter::all().with_type(AlertType::Operational))
        .await;
    assert_eq!(operational.iter().filter(|alert| alert.metric == "collector.user").count(), 1);

    let status = harness.engine.status().await;
    let user = status.tasks.iter().find(|task| task.name == "collect_user").unwrap();
    assert!(!user.disabled);

    harness.source.set_failing(false);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(harness.engine.state().store.len(MetricCategory::User).await >= 1);

    harness.engine.stop().await.unwrap();
}
