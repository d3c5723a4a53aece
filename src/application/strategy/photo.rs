use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{
    domain::{
        generation::GenerationResult,
        task::{Task, TaskKind, TaskPayload},
    },
    infra::{
        storage::ArtifactStorage,
        synthesis::ImageSynthesizer,
    },
};

use super::{Strategy, StrategyError, artifact_name, synthesize};

/// Produces `visual_concept` illustrations through the image-synthesis service.
pub struct PhotoStrategy {
    synthesizer: Arc<dyn ImageSynthesizer>,
    storage: Arc<ArtifactStorage>,
    permits: Semaphore,
}

impl PhotoStrategy {
    /// `concurrency` bounds in-flight synthesis calls independently of the global cap.
    pub fn new(
        synthesizer: Arc<dyn ImageSynthesizer>,
        storage: Arc<ArtifactStorage>,
        concurrency: usize,
    ) -> Self {
        Self {
            synthesizer,
            storage,
            permits: Semaphore::new(concurrency.max(1)),
        }
    }
}

#[async_trait]
impl Strategy for PhotoStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::VisualConcept
    }

    async fn generate(
        &self,
        task: &Task,
        position: usize,
    ) -> Result<GenerationResult, StrategyError> {
        let TaskPayload::VisualConcept(concept) = task.payload() else {
            return Err(StrategyError::mismatch(TaskKind::VisualConcept, task));
        };

        let prompt = match concept.style.as_deref().map(str::trim) {
            Some(style) if !style.is_empty() => format!("{}, {style}", task.refined_prompt()),
            _ => task.refined_prompt().to_string(),
        };

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StrategyError::Unavailable("image synthesis is shutting down".into()))?;
        debug!(
            target = "courseviz::strategy",
            task_id = task.id(),
            "synthesizing concept image"
        );

        let image = synthesize(self.synthesizer.as_ref(), task, &prompt).await?;

        let stored = self
            .storage
            .store(
                &artifact_name(position, TaskKind::VisualConcept, image.extension),
                image.bytes,
            )
            .await?;

        Ok(GenerationResult::image(stored.url).with_auxiliary(json!({ "prompt": prompt })))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use bytes::Bytes;
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;
    use crate::application::{
        classifier::tasks_from_value, orchestrator::Orchestrator, registry::StrategyRegistry,
    };
    use crate::domain::task::{ConceptPayload, RequestedFormat};
    use crate::infra::synthesis::{SynthesisError, SynthesizedImage};

    #[derive(Default)]
    struct FlakySynthesizer {
        calls: AtomicUsize,
        transport_failures: usize,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageSynthesizer for FlakySynthesizer {
        async fn generate_image(&self, prompt: &str) -> Result<SynthesizedImage, SynthesisError> {
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.transport_failures {
                return Err(SynthesisError::Transport("connection reset".into()));
            }
            Ok(SynthesizedImage::from_bytes(Bytes::from_static(
                b"\xFF\xD8\xFF\xE0 jpeg body",
            )))
        }
    }

    fn concept(style: Option<&str>) -> Task {
        Task::new(
            "photo-1",
            "A chemistry lab at dawn",
            TaskPayload::VisualConcept(ConceptPayload {
                style: style.map(str::to_string),
            }),
            RequestedFormat::Static,
        )
    }

    fn strategy(synthesizer: Arc<FlakySynthesizer>, dir: &TempDir) -> PhotoStrategy {
        let storage = Arc::new(
            ArtifactStorage::new(dir.path().to_path_buf(), "/generated-images").expect("storage"),
        );
        PhotoStrategy::new(synthesizer, storage, 8)
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried_once() {
        let dir = TempDir::new().expect("temp dir");
        let synthesizer = Arc::new(FlakySynthesizer {
            transport_failures: 1,
            ..Default::default()
        });

        let started = tokio::time::Instant::now();
        let result = strategy(synthesizer.clone(), &dir)
            .generate(&concept(Some("watercolor")), 1)
            .await
            .expect("result");

        assert!(result.url().ends_with("-task-1-photo.jpg"), "{}", result.url());
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(
            synthesizer.prompts.lock().expect("prompts")[0],
            "A chemistry lab at dawn, watercolor"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_transport_failures_fail_the_task() {
        let dir = TempDir::new().expect("temp dir");
        let synthesizer = Arc::new(FlakySynthesizer {
            transport_failures: 5,
            ..Default::default()
        });

        let err = strategy(synthesizer.clone(), &dir)
            .generate(&concept(None), 1)
            .await
            .expect_err("failure");

        assert!(matches!(err, StrategyError::Synthesis(SynthesisError::Transport(_))));
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
    }

    #[derive(Default)]
    struct SlowSynthesizer {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ImageSynthesizer for SlowSynthesizer {
        async fn generate_image(&self, _prompt: &str) -> Result<SynthesizedImage, SynthesisError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(SynthesizedImage::from_bytes(Bytes::from_static(
                b"\xFF\xD8\xFF\xE0 jpeg body",
            )))
        }
    }

    #[tokio::test]
    async fn local_limit_caps_synthesis_below_the_global_cap() {
        let dir = TempDir::new().expect("temp dir");
        let synthesizer = Arc::new(SlowSynthesizer::default());
        let storage = Arc::new(
            ArtifactStorage::new(dir.path().to_path_buf(), "/generated-images").expect("storage"),
        );
        let registry = StrategyRegistry::new().with(Arc::new(PhotoStrategy::new(
            synthesizer.clone(),
            storage,
            2,
        )));
        let orchestrator = Orchestrator::new(Arc::new(registry), 15);

        let tasks = tasks_from_value(Value::Array(
            (0..6)
                .map(|index| {
                    serde_json::json!({
                        "id": format!("lab-{index}"),
                        "type": "visual_concept",
                        "refined_prompt": "A modern lab"
                    })
                })
                .collect(),
        ))
        .expect("tasks");
        let report = orchestrator.run(tasks).await;

        assert_eq!(report.metadata.succeeded, 6);
        assert_eq!(synthesizer.peak.load(Ordering::SeqCst), 2);
    }
}
