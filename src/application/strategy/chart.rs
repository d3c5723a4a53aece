//! Chart strategy: renders `data_viz` tasks through the chart runtime.

use std::{sync::Arc, time::Duration};

use askama::Template;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    domain::{
        chart::{ChartKind, ChartPayload, LayoutFamily},
        generation::GenerationResult,
        task::{Task, TaskKind, TaskPayload},
    },
    infra::{
        assets::AssetLibrary,
        engine::{CaptureTarget, EngineManager},
        storage::ArtifactStorage,
    },
};

use super::{
    CaptureSettings, Readiness, Strategy, StrategyError, TaskConsole, artifact_name,
    capture::{capture_recording, capture_still},
};

const BACKGROUND: &str = "#0f172a";
const PALETTE: [&str; 5] = ["#00f5ff", "#b400ff", "#ff0055", "#f5d90a", "#39ff14"];
const CANVAS_SELECTOR: &str = "#chart-container canvas";
const CONTAINER_SELECTOR: &str = "#chart-container";
const STILL_SETTLE: Duration = Duration::from_millis(500);
const RECORDING_TAIL: Duration = Duration::from_millis(500);

#[derive(Template)]
#[template(path = "chart.html")]
struct ChartPage<'a> {
    background: &'a str,
    width: u32,
    height: u32,
    runtime: &'a str,
    spec_json: String,
}

pub struct ChartStrategy {
    engine: Arc<EngineManager>,
    storage: Arc<ArtifactStorage>,
    assets: AssetLibrary,
    capture: CaptureSettings,
}

impl ChartStrategy {
    pub fn new(
        engine: Arc<EngineManager>,
        storage: Arc<ArtifactStorage>,
        assets: AssetLibrary,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            engine,
            storage,
            assets,
            capture,
        }
    }

    fn page(&self, runtime: &str, spec: &Value) -> Result<String, StrategyError> {
        let viewport = self.engine.viewport();
        let page = ChartPage {
            background: BACKGROUND,
            width: viewport.width,
            height: viewport.height,
            runtime,
            spec_json: script_safe_json(spec),
        };
        Ok(page.render()?)
    }
}

#[async_trait]
impl Strategy for ChartStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::DataViz
    }

    async fn generate(
        &self,
        task: &Task,
        position: usize,
    ) -> Result<GenerationResult, StrategyError> {
        let TaskPayload::DataViz(chart) = task.payload() else {
            return Err(StrategyError::mismatch(TaskKind::DataViz, task));
        };
        let runtime = self.assets.chart_runtime().ok_or_else(|| {
            StrategyError::Unavailable("chart runtime asset `vchart.js` is not loaded".into())
        })?;

        let readiness = Readiness::Selector(CANVAS_SELECTOR.to_string());
        let target = CaptureTarget::Element(CONTAINER_SELECTOR.to_string());
        let title = task.refined_prompt();
        let still_page = self.page(runtime, &chart_spec(chart, title, None))?;
        let auxiliary = json!({
            "chartType": chart.kind,
            "points": chart.points.len(),
        });

        if !task.format().is_animated() {
            let png = capture_still(
                &self.engine,
                TaskConsole::for_task(task),
                &still_page,
                &readiness,
                STILL_SETTLE,
                &target,
                self.capture.operation_timeout,
            )
            .await?;
            let stored = self
                .storage
                .store(&artifact_name(position, TaskKind::DataViz, "png"), png)
                .await?;
            return Ok(GenerationResult::image(stored.url).with_auxiliary(auxiliary));
        }

        let animated_page = self.page(
            runtime,
            &chart_spec(chart, title, Some(self.capture.chart_animation)),
        )?;

        // Poster and recording run in separate contexts so neither pass sees the other's state.
        let (poster, recording) = tokio::try_join!(
            capture_still(
                &self.engine,
                TaskConsole::for_task(task),
                &still_page,
                &readiness,
                STILL_SETTLE,
                &target,
                self.capture.operation_timeout,
            ),
            capture_recording(
                &self.engine,
                TaskConsole::for_task(task),
                &animated_page,
                &readiness,
                self.capture.chart_animation + RECORDING_TAIL,
                self.capture.operation_timeout,
            ),
        )?;

        let poster = self
            .storage
            .store(&artifact_name(position, TaskKind::DataViz, "png"), poster)
            .await?;
        let video = self
            .storage
            .store_file(
                &artifact_name(position, TaskKind::DataViz, "webm"),
                recording.path(),
            )
            .await?;

        Ok(GenerationResult::video(video.url, poster.url).with_auxiliary(auxiliary))
    }
}

/// Build the chart runtime spec. `animation` enables the one-by-one entrance
/// animation; without it the chart draws its final frame immediately.
fn chart_spec(chart: &ChartPayload, title: &str, animation: Option<Duration>) -> Value {
    let values: Vec<Value> = chart
        .points
        .iter()
        .map(|point| json!({ "label": point.label, "value": point.value }))
        .collect();

    let mut spec = json!({
        "type": chart.kind.runtime_type(),
        "data": [{ "id": "series", "values": values }],
        "background": BACKGROUND,
        "color": PALETTE,
        "title": {
            "visible": !title.is_empty(),
            "text": title,
            "textStyle": { "fontSize": 32, "fill": "#f8fafc", "fontWeight": "bold" }
        },
        "legends": {
            "visible": true,
            "orient": "bottom",
            "item": { "label": { "style": { "fill": "#cbd5e1", "fontSize": 16 } } }
        },
    });

    match animation {
        Some(duration) => {
            spec["animationAppear"] = json!({
                "duration": duration.as_millis() as u64,
                "easing": "cubicOut",
                "oneByOne": true
            });
        }
        None => spec["animation"] = json!(false),
    }

    match chart.kind.layout() {
        LayoutFamily::Cartesian => {
            spec["xField"] = json!("label");
            spec["yField"] = json!("value");
            spec["axes"] = json!([
                {
                    "orient": "left",
                    "grid": { "style": { "stroke": "#334155", "lineDash": [4, 4] } },
                    "label": { "style": { "fill": "#94a3b8", "fontSize": 16 } }
                },
                {
                    "orient": "bottom",
                    "label": { "style": { "fill": "#94a3b8", "fontSize": 16 } }
                }
            ]);
            match chart.kind {
                ChartKind::Line | ChartKind::Area => {
                    spec["point"] = json!({
                        "style": { "size": 10, "fill": BACKGROUND, "stroke": PALETTE[0], "lineWidth": 3 }
                    });
                    spec["line"] = json!({ "style": { "lineWidth": 4, "stroke": PALETTE[0] } });
                }
                _ => {
                    spec["seriesField"] = json!("label");
                    spec["bar"] = json!({
                        "style": {
                            "cornerRadius": [8, 8, 0, 0],
                            "shadowBlur": 20,
                            "shadowColor": "rgba(0, 245, 255, 0.45)"
                        }
                    });
                }
            }
        }
        LayoutFamily::Radial => {
            spec["categoryField"] = json!("label");
            spec["valueField"] = json!("value");
            spec["label"] = json!({ "visible": true, "style": { "fill": "#f8fafc", "fontSize": 18 } });
            if chart.kind != ChartKind::Funnel {
                spec["outerRadius"] = json!(0.8);
            }
            if chart.kind == ChartKind::Donut {
                spec["innerRadius"] = json!(0.5);
            }
        }
    }

    spec
}

/// Serialize for inlining inside a `<script>` element.
fn script_safe_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}
