//! Infographic strategy: plan a blueprint, illustrate each item, compose and capture.

mod palette;
mod template;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    domain::{
        blueprint::{Blueprint, NarrativeShape},
        generation::GenerationResult,
        task::{Task, TaskKind, TaskPayload},
    },
    infra::{
        engine::{CaptureTarget, EngineManager},
        reasoning::ReasoningService,
        storage::ArtifactStorage,
        synthesis::ImageSynthesizer,
    },
};

use super::{
    CaptureSettings, Readiness, Strategy, StrategyError, TaskConsole, artifact_name,
    capture::{capture_recording, capture_still},
    synthesize,
};

use palette::Palette;
use template::{ComposedImages, ENTRANCE_MS, STAGGER_MS, compose};

const CANVAS_SELECTOR: &str = "#infographic svg";
const STILL_SETTLE: Duration = Duration::from_millis(500);
const RECORDING_TAIL: Duration = Duration::from_millis(500);
const DEFAULT_SHAPE: NarrativeShape = NarrativeShape::Process;

const BLUEPRINT_INSTRUCTION: &str = r##"You are an information designer planning an educational infographic.
Analyse the request and answer with STRICT JSON only, matching:
{
  "narrative": "journey" | "hub" | "stack" | "timeline" | "process" | "comparison",
  "title": "short headline",
  "mood": "professional" | "playful" | "urgent" | "calm",
  "style": "one cohesive illustration style shared by every image",
  "accentColor": "#rrggbb",
  "textColor": "#rrggbb",
  "items": [ { "subject": "what to illustrate", "label": "2-4 word caption" } ]
}
Capacities: journey 5, timeline 6, hub 6, stack 5, process 4, comparison 2 items.
Pick the narrative that matches the meaning of the content, not its visual layout."##;

pub struct InfographicStrategy {
    engine: Arc<EngineManager>,
    storage: Arc<ArtifactStorage>,
    planner: Arc<dyn ReasoningService>,
    synthesizer: Arc<dyn ImageSynthesizer>,
    image_concurrency: usize,
    capture: CaptureSettings,
}

impl InfographicStrategy {
    pub fn new(
        engine: Arc<EngineManager>,
        storage: Arc<ArtifactStorage>,
        planner: Arc<dyn ReasoningService>,
        synthesizer: Arc<dyn ImageSynthesizer>,
        image_concurrency: usize,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            engine,
            storage,
            planner,
            synthesizer,
            image_concurrency: image_concurrency.max(1),
            capture,
        }
    }

    async fn plan(
        &self,
        task: &Task,
        hint: Option<NarrativeShape>,
    ) -> Result<Blueprint, StrategyError> {
        let prompt = match hint {
            Some(shape) => format!(
                "{}\n\nPreferred narrative: {}",
                task.refined_prompt(),
                shape.as_str()
            ),
            None => task.refined_prompt().to_string(),
        };

        let value = self
            .planner
            .complete_json(BLUEPRINT_INSTRUCTION, &prompt)
            .await
            .map_err(|err| StrategyError::Blueprint(err.to_string()))?;

        Blueprint::from_value(
            value,
            hint.unwrap_or(DEFAULT_SHAPE),
            task.refined_prompt(),
        )
        .map_err(|err| StrategyError::Blueprint(err.to_string()))
    }

    /// One image per item plus a background, at most `image_concurrency` in flight.
    /// A failed image leaves its slot with a lettered placeholder.
    async fn illustrate(&self, task: &Task, blueprint: &Blueprint) -> ComposedImages {
        let style = blueprint.style.as_str();
        let mut prompts: Vec<String> = blueprint
            .items
            .iter()
            .map(|item| with_style(&item.subject, style))
            .collect();
        prompts.push(with_style(
            &format!(
                "{} abstract background, soft and minimal, no text",
                blueprint.title
            ),
            style,
        ));

        let mut images: Vec<Option<String>> = stream::iter(prompts)
            .map(|prompt| async move {
                let image = synthesize(self.synthesizer.as_ref(), task, &prompt).await;
                match image {
                    Ok(image) => Some(image.data_uri()),
                    Err(err) => {
                        warn!(
                            target = "courseviz::strategy::infographic",
                            task_id = task.id(),
                            prompt = %prompt,
                            error = %err,
                            "infographic image failed; using placeholder"
                        );
                        None
                    }
                }
            })
            .buffered(self.image_concurrency)
            .collect()
            .await;

        let background = images.pop().flatten();
        ComposedImages {
            background,
            items: images,
        }
    }
}

#[async_trait]
impl Strategy for InfographicStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::Infographic
    }

    async fn generate(
        &self,
        task: &Task,
        position: usize,
    ) -> Result<GenerationResult, StrategyError> {
        let TaskPayload::Infographic(payload) = task.payload() else {
            return Err(StrategyError::mismatch(TaskKind::Infographic, task));
        };

        let mut blueprint = self.plan(task, payload.narrative).await?;
        let original_count = blueprint.items.len();
        let truncation = blueprint.fit_to_template();
        if let Some(truncation) = truncation {
            warn!(
                target = "courseviz::strategy::infographic",
                task_id = task.id(),
                narrative = blueprint.narrative.as_str(),
                capacity = truncation.capacity,
                dropped = truncation.dropped,
                "blueprint exceeds template capacity; extra items dropped"
            );
        }
        info!(
            target = "courseviz::strategy::infographic",
            task_id = task.id(),
            narrative = blueprint.narrative.as_str(),
            items = blueprint.items.len(),
            "blueprint planned"
        );

        let palette = Palette::resolve(
            blueprint.mood,
            blueprint.accent_color.as_deref(),
            blueprint.text_color.as_deref(),
        );
        let images = self.illustrate(task, &blueprint).await;
        let missing_images = images.items.iter().filter(|image| image.is_none()).count();
        let viewport = self.engine.viewport();

        let auxiliary = json!({
            "narrative": blueprint.narrative,
            "title": blueprint.title,
            "mood": blueprint.mood,
            "items": blueprint.items,
            "truncatedFrom": truncation.map(|_| original_count),
            "missingImages": missing_images,
        });

        let readiness = Readiness::Selector(CANVAS_SELECTOR.to_string());
        let target = CaptureTarget::Element(CANVAS_SELECTOR.to_string());
        let still_page = compose(&blueprint, &palette, &images, viewport, false)?;

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
                .store(&artifact_name(position, TaskKind::Infographic, "png"), png)
                .await?;
            return Ok(GenerationResult::image(stored.url).with_auxiliary(auxiliary));
        }

        let animated_page = compose(&blueprint, &palette, &images, viewport, true)?;
        let hold = entrance_duration(blueprint.items.len()) + RECORDING_TAIL;

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
                hold,
                self.capture.operation_timeout,
            ),
        )?;

        let poster = self
            .storage
            .store(&artifact_name(position, TaskKind::Infographic, "png"), poster)
            .await?;
        let video = self
            .storage
            .store_file(
                &artifact_name(position, TaskKind::Infographic, "webm"),
                recording.path(),
            )
            .await?;

        Ok(GenerationResult::video(video.url, poster.url).with_auxiliary(auxiliary))
    }
}

fn with_style(subject: &str, style: &str) -> String {
    if style.is_empty() {
        subject.to_string()
    } else {
        format!("{subject}, {style}")
    }
}

/// Time until the last slot has finished its entrance.
fn entrance_duration(items: usize) -> Duration {
    let last_start = items.saturating_sub(1) as u64 * STAGGER_MS;
    Duration::from_millis(last_start + ENTRANCE_MS)
}
