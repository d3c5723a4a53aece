//! Artifact strategies: one producer per task kind behind a common contract.

mod capture;
pub mod chart;
pub mod formula;
pub mod infographic;
pub mod photo;
pub mod slide;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;
use tracing::{Level, debug, error, event, info, warn};

use crate::{
    domain::{
        generation::GenerationResult,
        task::{Task, TaskKind, TaskPhase},
    },
    infra::{
        engine::{ConsoleLevel, ConsoleSink, EngineError},
        storage::StorageError,
        synthesis::{ImageSynthesizer, SynthesisError, SynthesizedImage},
    },
};

pub use capture::{CaptureSettings, Readiness};

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Request one image, giving a transport failure a single second attempt.
pub(crate) async fn synthesize(
    synthesizer: &dyn ImageSynthesizer,
    task: &Task,
    prompt: &str,
) -> Result<SynthesizedImage, SynthesisError> {
    (|| synthesizer.generate_image(prompt))
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(TRANSPORT_RETRY_DELAY)
                .with_max_times(1),
        )
        .when(SynthesisError::is_transport)
        .notify(|err: &SynthesisError, delay: Duration| {
            warn!(
                target = "courseviz::strategy",
                task_id = task.id(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "image synthesis transport failure; retrying"
            );
        })
        .await
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to store artifact: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("blueprint generation failed: {0}")]
    Blueprint(String),
    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),
    #[error("formula typesetting failed: {0}")]
    Typesetting(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("strategy for `{expected}` received a `{actual}` task")]
    PayloadMismatch { expected: TaskKind, actual: TaskKind },
}

impl StrategyError {
    pub fn mismatch(expected: TaskKind, task: &Task) -> Self {
        Self::PayloadMismatch {
            expected,
            actual: task.kind(),
        }
    }
}

/// A strategy failure tagged with the task it came from.
#[derive(Debug, Error)]
#[error("task `{task_id}` ({kind}) failed: {source}")]
pub struct TaskFailure {
    pub task_id: String,
    pub kind: TaskKind,
    #[source]
    pub source: StrategyError,
}

/// Turns one task kind into a stored artifact.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// `position` is the 1-based index of the task in its request and only feeds
    /// artifact names.
    async fn generate(
        &self,
        task: &Task,
        position: usize,
    ) -> Result<GenerationResult, StrategyError>;
}

/// Run a strategy inside the common envelope: phase logging on entry and exit,
/// payload-kind check, and the task id attached to any failure.
pub async fn run_strategy(
    strategy: &dyn Strategy,
    task: &Task,
    position: usize,
) -> Result<GenerationResult, TaskFailure> {
    let kind = task.kind();
    let started = Instant::now();
    log_phase(task, TaskPhase::Pending, None);

    if strategy.kind() != kind {
        let source = StrategyError::mismatch(strategy.kind(), task);
        log_phase(task, TaskPhase::Failed, Some(&source));
        return Err(TaskFailure {
            task_id: task.id().to_string(),
            kind,
            source,
        });
    }

    log_phase(task, TaskPhase::Rendering, None);
    match strategy.generate(task, position).await {
        Ok(result) => {
            info!(
                target = "courseviz::strategy",
                task_id = task.id(),
                kind = kind.as_str(),
                phase = TaskPhase::Succeeded.as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                url = result.url(),
                video = result.is_video(),
                "task generated"
            );
            Ok(result)
        }
        Err(source) => {
            error!(
                target = "courseviz::strategy",
                task_id = task.id(),
                kind = kind.as_str(),
                phase = TaskPhase::Failed.as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %source,
                "task failed"
            );
            Err(TaskFailure {
                task_id: task.id().to_string(),
                kind,
                source,
            })
        }
    }
}

fn log_phase(task: &Task, phase: TaskPhase, error: Option<&StrategyError>) {
    match error {
        Some(error) => error!(
            target = "courseviz::strategy",
            task_id = task.id(),
            kind = task.kind().as_str(),
            phase = phase.as_str(),
            error = %error,
            "task rejected"
        ),
        None => debug!(
            target = "courseviz::strategy",
            task_id = task.id(),
            kind = task.kind().as_str(),
            phase = phase.as_str(),
            "task phase"
        ),
    }
}

/// Artifact file name for the task at `position`.
pub(crate) fn artifact_name(position: usize, kind: TaskKind, extension: &str) -> String {
    format!("task-{position}-{}.{extension}", kind.file_tag())
}

/// Forwards diagnostics from rendered content to the process log, tagged with the task.
#[derive(Debug, Clone)]
pub struct TaskConsole {
    task_id: String,
    kind: TaskKind,
}

impl TaskConsole {
    pub fn for_task(task: &Task) -> Arc<dyn ConsoleSink> {
        Arc::new(Self {
            task_id: task.id().to_string(),
            kind: task.kind(),
        })
    }
}

impl ConsoleSink for TaskConsole {
    fn emit(&self, level: ConsoleLevel, text: &str) {
        macro_rules! forward {
            ($level:expr) => {
                event!(
                    target: "courseviz::browser",
                    $level,
                    task_id = %self.task_id,
                    kind = self.kind.as_str(),
                    text = %text,
                    "browser console"
                )
            };
        }
        match level {
            ConsoleLevel::Debug => forward!(Level::DEBUG),
            ConsoleLevel::Info => forward!(Level::INFO),
            ConsoleLevel::Warning => forward!(Level::WARN),
            ConsoleLevel::Error | ConsoleLevel::PageError => forward!(Level::ERROR),
        }
    }
}
