use std::{sync::Arc, time::Duration};

use askama::Template;
use async_trait::async_trait;
use katex::{OptsBuilder, OutputType};
use serde_json::json;

use crate::{
    domain::{
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
    capture::capture_still,
};

const READY_EXPRESSION: &str = "window.formulaReady === true";
const FONT_SETTLE: Duration = Duration::from_millis(200);

#[derive(Template)]
#[template(path = "formula.html")]
struct FormulaPage<'a> {
    stylesheet: &'a str,
    width: u32,
    height: u32,
    formula_html: String,
}

/// Typesets `math_formula` tasks with KaTeX and captures the full canvas.
pub struct FormulaStrategy {
    engine: Arc<EngineManager>,
    storage: Arc<ArtifactStorage>,
    assets: AssetLibrary,
    capture: CaptureSettings,
}

impl FormulaStrategy {
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
}

#[async_trait]
impl Strategy for FormulaStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::MathFormula
    }

    async fn generate(
        &self,
        task: &Task,
        position: usize,
    ) -> Result<GenerationResult, StrategyError> {
        let TaskPayload::MathFormula(formula) = task.payload() else {
            return Err(StrategyError::mismatch(TaskKind::MathFormula, task));
        };

        // The KaTeX engine is synchronous JavaScript; keep it off the runtime threads.
        let latex = formula.latex.clone();
        let formula_html = tokio::task::spawn_blocking(move || typeset(&latex))
            .await
            .map_err(|err| StrategyError::Typesetting(err.to_string()))??;

        let viewport = self.engine.viewport();
        let page = FormulaPage {
            stylesheet: self.assets.katex_stylesheet(),
            width: viewport.width,
            height: viewport.height,
            formula_html,
        }
        .render()?;

        let png = capture_still(
            &self.engine,
            TaskConsole::for_task(task),
            &page,
            &Readiness::Function(READY_EXPRESSION.to_string()),
            FONT_SETTLE,
            &CaptureTarget::Viewport,
            self.capture.operation_timeout,
        )
        .await?;

        let stored = self
            .storage
            .store(&artifact_name(position, TaskKind::MathFormula, "png"), png)
            .await?;

        Ok(GenerationResult::image(stored.url).with_auxiliary(json!({ "latex": formula.latex })))
    }
}

/// Render `latex` as display-mode KaTeX HTML.
fn typeset(latex: &str) -> Result<String, StrategyError> {
    let mut builder = OptsBuilder::default();
    builder.display_mode(true);
    builder.output_type(OutputType::Html);

    let opts = builder
        .build()
        .map_err(|err| StrategyError::Typesetting(format!("invalid KaTeX options: {err}")))?;

    katex::render_with_opts(latex, opts).map_err(|err| StrategyError::Typesetting(err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        domain::task::RawTask,
        infra::engine::testing::{EngineProbe, FakeLauncher, manager},
    };

    #[test]
    fn typesets_display_math() {
        let html = typeset(r"E = mc^2").expect("katex html");
        assert!(html.contains("katex-display"), "{html}");
    }

    #[test]
    fn malformed_latex_is_reported() {
        let err = typeset(r"\frac{1}{").expect_err("unbalanced braces");
        assert!(matches!(err, StrategyError::Typesetting(_)));
    }

    #[tokio::test]
    async fn stores_a_math_png() {
        let dir = TempDir::new().expect("temp dir");
        let probe = Arc::new(EngineProbe::default());
        let engine = Arc::new(manager(
            FakeLauncher::new(probe.clone()),
            dir.path().join("videos"),
        ));
        let storage = Arc::new(
            ArtifactStorage::new(dir.path().join("out"), "/generated-images").expect("storage"),
        );
        let strategy = FormulaStrategy::new(
            engine,
            storage,
            AssetLibrary::new(None, Some(".katex { font: inherit; }".to_string())),
            CaptureSettings {
                operation_timeout: Duration::from_secs(10),
                chart_animation: Duration::from_millis(20),
            },
        );
        let raw: RawTask = serde_json::from_value(json!({
            "id": "math-1",
            "type": "math_formula",
            "refined_prompt": "Pythagorean theorem",
            "payload": { "latex": "a^2 + b^2 = c^2" }
        }))
        .expect("raw task");
        let task = Task::from_raw(raw).expect("task");

        let result = strategy.generate(&task, 4).await.expect("result");

        assert!(result.url().ends_with("-task-4-math.png"), "{}", result.url());
        assert_eq!(probe.open_contexts(), 0);
        let pages = probe.pages.lock().expect("pages");
        assert!(pages[0].contains(".katex { font: inherit; }"));
        assert!(pages[0].contains("window.formulaReady = true"));
    }
}
