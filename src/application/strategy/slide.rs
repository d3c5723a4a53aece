use std::{sync::Arc, time::Duration};

use askama::Template;
use async_trait::async_trait;
use serde_json::json;

use crate::{
    domain::{
        generation::GenerationResult,
        task::{SlidePayload, Task, TaskKind, TaskPayload},
    },
    infra::{
        engine::{CaptureTarget, EngineManager},
        storage::ArtifactStorage,
    },
};

use super::{
    CaptureSettings, Readiness, Strategy, StrategyError, TaskConsole, artifact_name,
    capture::capture_still,
};

const DEFAULT_TITLE: &str = "Educational Slide";
const SETTLE: Duration = Duration::from_millis(500);

#[derive(Template)]
#[template(path = "slide.html")]
struct SlidePage<'a> {
    width: u32,
    height: u32,
    title: &'a str,
    bullets: &'a [String],
}

/// Lays out `beautify_slide` tasks as a titled bullet list.
pub struct SlideStrategy {
    engine: Arc<EngineManager>,
    storage: Arc<ArtifactStorage>,
    capture: CaptureSettings,
}

impl SlideStrategy {
    pub fn new(
        engine: Arc<EngineManager>,
        storage: Arc<ArtifactStorage>,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            engine,
            storage,
            capture,
        }
    }
}

#[async_trait]
impl Strategy for SlideStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::BeautifySlide
    }

    async fn generate(
        &self,
        task: &Task,
        position: usize,
    ) -> Result<GenerationResult, StrategyError> {
        let TaskPayload::BeautifySlide(payload) = task.payload() else {
            return Err(StrategyError::mismatch(TaskKind::BeautifySlide, task));
        };

        let content = SlideContent::resolve(task.refined_prompt(), payload);
        let viewport = self.engine.viewport();
        let page = SlidePage {
            width: viewport.width,
            height: viewport.height,
            title: &content.title,
            bullets: &content.bullets,
        }
        .render()?;

        let png = capture_still(
            &self.engine,
            TaskConsole::for_task(task),
            &page,
            &Readiness::Selector(".slide".to_string()),
            SETTLE,
            &CaptureTarget::Viewport,
            self.capture.operation_timeout,
        )
        .await?;

        let stored = self
            .storage
            .store(&artifact_name(position, TaskKind::BeautifySlide, "png"), png)
            .await?;

        Ok(GenerationResult::image(stored.url).with_auxiliary(json!({
            "title": content.title,
            "bullets": content.bullets,
        })))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SlideContent {
    title: String,
    bullets: Vec<String>,
}

impl SlideContent {
    /// Explicit payload fields win; anything missing is derived from the prompt.
    fn resolve(prompt: &str, payload: &SlidePayload) -> Self {
        let derived = split_slide(prompt);
        let title = payload
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .unwrap_or(derived.title);
        let bullets = payload
            .bullets
            .as_ref()
            .map(|bullets| {
                bullets
                    .iter()
                    .map(|bullet| bullet.trim().to_string())
                    .filter(|bullet| !bullet.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|bullets| !bullets.is_empty())
            .unwrap_or(derived.bullets);
        Self { title, bullets }
    }
}

/// `"Title: first point. second point."` becomes a title and one bullet per
/// sentence. Without a colon the whole prompt is both title and body.
fn split_slide(prompt: &str) -> SlideContent {
    let (title, body) = prompt.split_once(':').unwrap_or((prompt, prompt));
    let title = match title.trim() {
        "" => DEFAULT_TITLE,
        title => title,
    };
    let body = if body.trim().is_empty() { prompt } else { body };

    let bullets = body
        .split(". ")
        .map(|sentence| sentence.trim().trim_end_matches('.').trim())
        .filter(|sentence| !sentence.is_empty())
        .map(str::to_string)
        .collect();

    SlideContent {
        title: title.to_string(),
        bullets,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        domain::task::RequestedFormat,
        infra::engine::testing::{EngineProbe, FakeLauncher, manager},
    };

    #[test]
    fn prompt_is_split_into_title_and_bullets() {
        let content = split_slide("Photosynthesis: Light is absorbed. Water is split. Sugar is made.");
        assert_eq!(content.title, "Photosynthesis");
        assert_eq!(
            content.bullets,
            vec!["Light is absorbed", "Water is split", "Sugar is made"]
        );
    }

    #[test]
    fn prompt_without_colon_is_its_own_title() {
        let content = split_slide("Mitochondria produce energy.");
        assert_eq!(content.title, "Mitochondria produce energy.");
        assert_eq!(content.bullets, vec!["Mitochondria produce energy"]);
    }

    #[test]
    fn blank_title_falls_back_to_default() {
        let content = split_slide(": Nucleus. Membrane");
        assert_eq!(content.title, DEFAULT_TITLE);
        assert_eq!(content.bullets, vec!["Nucleus", "Membrane"]);
    }

    #[test]
    fn payload_overrides_derived_content() {
        let payload = SlidePayload {
            title: Some("Cells".to_string()),
            bullets: Some(vec!["  ".to_string()]),
        };
        let content = SlideContent::resolve("Biology: Nucleus. Membrane", &payload);
        assert_eq!(content.title, "Cells");
        assert_eq!(content.bullets, vec!["Nucleus", "Membrane"]);
    }

    #[tokio::test]
    async fn renders_escaped_slide_markup() {
        let dir = TempDir::new().expect("temp dir");
        let probe = Arc::new(EngineProbe::default());
        let engine = Arc::new(manager(
            FakeLauncher::new(probe.clone()),
            dir.path().join("videos"),
        ));
        let storage = Arc::new(
            ArtifactStorage::new(dir.path().join("out"), "/generated-images").expect("storage"),
        );
        let strategy = SlideStrategy::new(
            engine,
            storage,
            CaptureSettings {
                operation_timeout: Duration::from_secs(10),
                chart_animation: Duration::from_millis(20),
            },
        );
        let task = Task::new(
            "slide-1",
            "Markup: <b>bold</b> claims",
            TaskPayload::BeautifySlide(SlidePayload::default()),
            RequestedFormat::Static,
        );

        let result = strategy.generate(&task, 2).await.expect("result");

        assert!(result.url().ends_with("-task-2-slide.png"), "{}", result.url());
        let pages = probe.pages.lock().expect("pages");
        assert!(!pages[0].contains("<b>bold</b>"), "{}", pages[0]);
        assert!(pages[0].contains("bold"));
        assert!(pages[0].contains("<h1>Markup</h1>"));
    }
}
