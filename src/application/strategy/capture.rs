use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::warn;

use crate::infra::engine::{
    CaptureTarget, ConsoleSink, ContextOptions, EngineError, EngineManager, Recording,
    RenderContext,
};

use super::StrategyError;

/// Timing knobs shared by the engine-backed strategies.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Limit for each readiness wait inside the page.
    pub operation_timeout: Duration,
    /// Length of the chart entrance animation.
    pub chart_animation: Duration,
}

/// How a page signals it is ready to be captured.
#[derive(Debug, Clone)]
pub enum Readiness {
    Selector(String),
    Function(String),
}

impl Readiness {
    async fn wait(&self, context: &RenderContext, timeout: Duration) -> Result<(), EngineError> {
        match self {
            Self::Selector(selector) => context.wait_for_selector(selector, timeout).await,
            Self::Function(expression) => context.wait_for_function(expression, timeout).await,
        }
    }
}

/// Load `html` into a fresh context, wait for readiness plus `settle`, and capture a
/// still. The context is closed whether or not the capture succeeds.
pub(crate) async fn capture_still(
    engine: &EngineManager,
    sink: Arc<dyn ConsoleSink>,
    html: &str,
    readiness: &Readiness,
    settle: Duration,
    target: &CaptureTarget,
    timeout: Duration,
) -> Result<Bytes, StrategyError> {
    let context = engine.new_context(ContextOptions::still(), sink).await?;

    let captured = async {
        context.set_content(html).await?;
        readiness.wait(&context, timeout).await?;
        tokio::time::sleep(settle).await;
        context.screenshot(target).await
    }
    .await;

    if let Err(err) = context.close().await {
        warn!(
            target = "courseviz::strategy",
            error = %err,
            "failed to close capture context"
        );
    }

    Ok(captured?)
}

/// Load `html` into a recording context and keep it open for `hold` so the full
/// animation is on tape. The recording is finalised when the context closes.
pub(crate) async fn capture_recording(
    engine: &EngineManager,
    sink: Arc<dyn ConsoleSink>,
    html: &str,
    readiness: &Readiness,
    hold: Duration,
    timeout: Duration,
) -> Result<Recording, StrategyError> {
    let context = engine.new_context(ContextOptions::recording(), sink).await?;

    let played = async {
        context.set_content(html).await?;
        readiness.wait(&context, timeout).await?;
        tokio::time::sleep(hold).await;
        Ok::<_, EngineError>(())
    }
    .await;

    let closed = context.close().await;
    played?;
    closed?.ok_or_else(|| {
        StrategyError::Engine(EngineError::operation(
            "closeContext",
            "recording context returned no video",
        ))
    })
}
