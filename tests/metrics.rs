mod support;

use std::{collections::HashSet, sync::Arc, time::Duration};

use courseviz::{
    application::{
        classifier::tasks_from_value,
        orchestrator::Orchestrator,
        registry::StrategyRegistry,
        strategy::{CaptureSettings, slide::SlideStrategy},
    },
    infra::storage::ArtifactStorage,
};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use support::Probe;
use tempfile::TempDir;

#[tokio::test]
async fn orchestration_emits_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = TempDir::new().expect("temp dir");
    let engine = support::engine(
        Arc::new(Probe::default()),
        Duration::from_millis(5),
        dir.path().join("videos"),
    );
    let storage = Arc::new(
        ArtifactStorage::new(dir.path().join("artifacts"), "/generated-images").expect("storage"),
    );
    let registry = StrategyRegistry::new().with(Arc::new(SlideStrategy::new(
        engine,
        storage,
        CaptureSettings {
            operation_timeout: Duration::from_secs(5),
            chart_animation: Duration::from_millis(100),
        },
    )));
    let orchestrator = Orchestrator::new(Arc::new(registry), 15);

    let tasks = tasks_from_value(json!([
        { "id": "ok", "type": "beautify_slide", "refined_prompt": "Cells: Nucleus." },
        { "id": "missing", "type": "visual_concept", "refined_prompt": "A lab" }
    ]))
    .expect("tasks");
    let report = orchestrator.run(tasks).await;
    assert_eq!(report.metadata.succeeded, 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "courseviz_tasks_total",
        "courseviz_task_duration_ms",
        "courseviz_tasks_in_flight",
        "courseviz_engine_launch_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
