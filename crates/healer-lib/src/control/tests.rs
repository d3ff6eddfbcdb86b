//! Control loop tests

use super::*;
use crate::context::tests::{flat, leaking_memory, quiet_cpu, spiking_cpu, StaticProvider};
use crate::context::{ContextConfig, ServiceContext};
use crate::decision::REASON_MEMORY_LEAK;
use crate::detector::{single_split_forest, AnomalyDetector};
use crate::dispatch::tests::RecordingControlPlane;
use crate::dispatch::DispatchConfig;
use crate::forecaster::TrendForecaster;
use crate::health::{Component, ComponentStatus};
use crate::models::{ActionKind, TriggerSource};

struct Harness {
    control: ControlLoop,
    plane: Arc<RecordingControlPlane>,
    health: HealthRegistry,
}

fn harness_with(
    provider: StaticProvider,
    detector: AnomalyDetector,
    plane: RecordingControlPlane,
) -> Harness {
    let ctx = ServiceContext::new(
        Arc::new(provider),
        detector,
        TrendForecaster::default(),
        ContextConfig::default(),
    );
    let plane = Arc::new(plane);
    let health = HealthRegistry::new();
    let control = ControlLoop::new(
        Arc::new(ctx),
        DecisionEngine::default(),
        ActuationDispatcher::new(plane.clone(), DispatchConfig::default()),
        Duration::from_secs(10),
        health.clone(),
        StructuredLogger::new("test-node"),
    );
    Harness {
        control,
        plane,
        health,
    }
}

fn harness_every(provider: StaticProvider, interval: Duration) -> Harness {
    let mut h = harness(provider);
    h.control.interval = interval;
    h
}

fn harness(provider: StaticProvider) -> Harness {
    harness_with(
        provider,
        AnomalyDetector::new(single_split_forest(0.8)),
        RecordingControlPlane::default(),
    )
}

fn signals(cpu: Vec<f64>, memory: Vec<f64>, disk: Vec<f64>) -> StaticProvider {
    let config = ContextConfig::default();
    StaticProvider::default()
        .with(&config.cpu_query, cpu)
        .with(&config.memory.query, memory)
        .with(&config.disk.query, disk)
}

async fn status_of(health: &HealthRegistry, component: Component) -> ComponentStatus {
    health.snapshot().await.components[&component].status
}

#[tokio::test]
async fn test_quiet_cycle_dispatches_nothing() {
    let h = harness(signals(quiet_cpu(), flat(300.0, 36), flat(40.0, 48)));

    let report = h.control.run_cycle().await;

    assert!(report.actions.is_empty());
    assert!(report.outcomes.is_empty());
    assert_eq!(report.failed_stages(), 0);
    assert!(h.plane.calls().is_empty());
    assert_eq!(h.health.snapshot().await.status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_cpu_spike_deletes_chaos_pods() {
    let h = harness(signals(spiking_cpu(), flat(300.0, 36), flat(40.0, 48)));

    let report = h.control.run_cycle().await;

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].kind, ActionKind::DeletePods);
    assert_eq!(report.failed_actions(), 0);
    assert_eq!(h.plane.calls(), vec!["delete monitoring/metadata.name=cpu-chaos-test"]);
}

#[tokio::test]
async fn test_memory_leak_restarts_workload() {
    let h = harness(signals(quiet_cpu(), leaking_memory(), flat(40.0, 48)));

    let report = h.control.run_cycle().await;

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].kind, ActionKind::RestartWorkload);
    assert_eq!(report.actions[0].reason, REASON_MEMORY_LEAK);
    assert_eq!(h.plane.calls(), vec!["restart default/memory-leak-app"]);
}

#[tokio::test]
async fn test_empty_memory_series_only_silences_its_rule() {
    let h = harness(signals(spiking_cpu(), vec![], flat(75.0, 48)));

    let report = h.control.run_cycle().await;

    assert!(matches!(
        report.observations.memory,
        Err(HealerError::InsufficientHistory { samples: 0, .. })
    ));
    assert_eq!(report.failed_stages(), 1);

    let sources: Vec<TriggerSource> = report.actions.iter().map(|a| a.triggered_by).collect();
    assert_eq!(
        sources,
        vec![TriggerSource::Reactive, TriggerSource::DiskCapacity]
    );
    assert_eq!(
        h.plane.calls(),
        vec![
            "delete monitoring/metadata.name=cpu-chaos-test",
            "restart default/storage-app"
        ]
    );
    assert_eq!(
        status_of(&h.health, Component::MemoryForecast).await,
        ComponentStatus::Degraded
    );
    assert_eq!(
        status_of(&h.health, Component::Detector).await,
        ComponentStatus::Healthy
    );
}

#[tokio::test]
async fn test_missing_model_keeps_forecasts_running() {
    let h = harness_with(
        signals(spiking_cpu(), leaking_memory(), flat(40.0, 48)),
        AnomalyDetector::unavailable(),
        RecordingControlPlane::default(),
    );

    let report = h.control.run_cycle().await;

    assert_eq!(report.observations.detection, Err(HealerError::ModelUnavailable));
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].triggered_by, TriggerSource::MemoryTrend);
    assert_eq!(
        status_of(&h.health, Component::Detector).await,
        ComponentStatus::Unhealthy
    );
}

#[tokio::test]
async fn test_failed_action_is_recorded_and_later_actions_run() {
    let plane = RecordingControlPlane {
        failing: vec!["metadata.name=cpu-chaos-test".to_string()],
        ..Default::default()
    };
    let h = harness_with(
        signals(spiking_cpu(), leaking_memory(), flat(40.0, 48)),
        AnomalyDetector::new(single_split_forest(0.8)),
        plane,
    );

    let report = h.control.run_cycle().await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failed_actions(), 1);
    assert!(report.outcomes[1].succeeded());
    assert_eq!(h.plane.calls().len(), 2);
    assert_eq!(
        status_of(&h.health, Component::Dispatcher).await,
        ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_unreachable_store_marks_upstream_unhealthy() {
    let h = harness(StaticProvider::default());

    let report = h.control.run_cycle().await;

    assert_eq!(report.failed_stages(), 3);
    assert!(report.actions.is_empty());
    assert_eq!(
        status_of(&h.health, Component::Upstream).await,
        ComponentStatus::Unhealthy
    );
}

#[tokio::test]
async fn test_condition_refires_every_cycle() {
    let h = harness(signals(quiet_cpu(), leaking_memory(), flat(40.0, 48)));

    h.control.run_cycle().await;
    h.control.run_cycle().await;

    assert_eq!(
        h.plane.calls(),
        vec![
            "restart default/memory-leak-app",
            "restart default/memory-leak-app"
        ]
    );
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = harness(signals(spiking_cpu(), flat(300.0, 36), flat(40.0, 48)));
    let plane = h.plane.clone();
    let (tx, rx) = broadcast::channel(1);

    let handle = tokio::spawn(h.control.run(rx));

    // The first tick fires immediately
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(plane.calls().len(), 1);
}

#[tokio::test]
async fn test_run_sleeps_full_interval_after_slow_cycle() {
    let delay = Duration::from_millis(150);
    let interval = Duration::from_millis(300);
    let provider = StaticProvider {
        delay: Some(delay),
        ..signals(quiet_cpu(), flat(300.0, 36), flat(40.0, 48))
    };
    let started = provider.started.clone();
    // Three sequential queries per cycle make each cycle outlast the interval
    let h = harness_every(provider, interval);
    let (tx, rx) = broadcast::channel(1);

    let handle = tokio::spawn(h.control.run(rx));
    tokio::time::sleep(Duration::from_millis(1400)).await;
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap();

    let started = started.lock().unwrap().clone();
    assert!(started.len() >= 4, "second cycle never started");
    let cycles: Vec<&[tokio::time::Instant]> = started.chunks(3).collect();
    for pair in cycles.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        if previous.len() < 3 {
            continue;
        }
        let gap = next[0] - (previous[2] + delay);
        assert!(
            gap >= interval - Duration::from_millis(5),
            "gap between cycles was {:?}",
            gap
        );
    }
}
