//! Shared headless rendering engine and per-task isolated contexts.
//!
//! One engine instance is launched lazily on first demand and shared by every
//! strategy; each render gets its own [`RenderContext`], which is never reused.

mod driver;

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::infra::telemetry::ENGINE_LAUNCH_TOTAL;

pub use driver::DriverLauncher;

/// Errors raised by the rendering engine and its contexts.
///
/// Messages are captured as strings so one launch failure can be handed to every
/// caller waiting on the same attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("rendering engine failed to launch: {0}")]
    Launch(String),
    #[error("rendering engine has been shut down")]
    ShutDown,
    #[error("rendering engine connection closed")]
    Disconnected,
    #[error("rendering engine protocol error: {0}")]
    Protocol(String),
    #[error("`{operation}` timed out after {timeout_ms} ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },
    #[error("`{operation}` failed: {message}")]
    Operation { operation: String, message: String },
    #[error("capture produced an empty image")]
    EmptyCapture,
}

impl EngineError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Per-surface settings handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub viewport: Viewport,
    pub record_video_dir: Option<PathBuf>,
}

/// What a strategy asks for when opening a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextOptions {
    pub record_video: bool,
}

impl ContextOptions {
    pub fn still() -> Self {
        Self { record_video: false }
    }

    pub fn recording() -> Self {
        Self { record_video: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    Viewport,
    Element(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warning,
    Error,
    PageError,
}

impl ConsoleLevel {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "debug" | "trace" => Self::Debug,
            "warning" | "warn" => Self::Warning,
            "error" | "assert" => Self::Error,
            "pageerror" => Self::PageError,
            _ => Self::Info,
        }
    }
}

/// Receives diagnostics emitted by content rendered inside one context.
pub trait ConsoleSink: Send + Sync {
    fn emit(&self, level: ConsoleLevel, text: &str);
}

#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError>;
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn new_surface(
        &self,
        options: SurfaceOptions,
        sink: Arc<dyn ConsoleSink>,
    ) -> Result<Box<dyn RenderSurface>, EngineError>;

    async fn shutdown(&self) -> Result<(), EngineError>;
}

/// One isolated page inside the engine.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    async fn set_content(&self, html: &str) -> Result<(), EngineError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
    -> Result<(), EngineError>;

    async fn wait_for_function(
        &self,
        expression: &str,
        timeout: Duration,
    ) -> Result<(), EngineError>;

    async fn screenshot(&self, target: &CaptureTarget) -> Result<Bytes, EngineError>;

    /// Close the surface, returning the recorded video path when recording was enabled.
    async fn close(&self) -> Result<Option<PathBuf>, EngineError>;
}

type LaunchFuture = Shared<BoxFuture<'static, Result<Arc<dyn RenderEngine>, EngineError>>>;

enum SlotState {
    Idle,
    Launching { attempt: u64, launch: LaunchFuture },
    Ready(Arc<dyn RenderEngine>),
    ShutDown,
}

struct EngineSlot {
    state: SlotState,
    attempts: u64,
}

/// Owns the shared engine and hands out isolated contexts.
pub struct EngineManager {
    launcher: Arc<dyn EngineLauncher>,
    slot: Mutex<EngineSlot>,
    viewport: Viewport,
    video_dir: PathBuf,
}

impl EngineManager {
    pub fn new(launcher: Arc<dyn EngineLauncher>, viewport: Viewport, video_dir: PathBuf) -> Self {
        Self {
            launcher,
            slot: Mutex::new(EngineSlot {
                state: SlotState::Idle,
                attempts: 0,
            }),
            viewport,
            video_dir,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn lock_slot(&self) -> MutexGuard<'_, EngineSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the shared engine, launching it if needed. Concurrent callers during a
    /// launch all await that one attempt.
    pub async fn ensure_engine(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
        let (attempt, launch) = {
            let mut slot = self.lock_slot();
            match &slot.state {
                SlotState::Ready(engine) => return Ok(engine.clone()),
                SlotState::ShutDown => return Err(EngineError::ShutDown),
                SlotState::Launching { attempt, launch } => match launch.clone().now_or_never() {
                    // Every waiter of that attempt went away before it failed, so nobody
                    // returned the slot to idle.
                    Some(Err(_)) => self.begin_launch(&mut slot),
                    _ => (*attempt, launch.clone()),
                },
                SlotState::Idle => self.begin_launch(&mut slot),
            }
        };

        let outcome = launch.await;

        let mut slot = self.lock_slot();
        let owns_attempt =
            matches!(&slot.state, SlotState::Launching { attempt: current, .. } if *current == attempt);
        if owns_attempt {
            match &outcome {
                Ok(engine) => {
                    slot.state = SlotState::Ready(engine.clone());
                    metrics::counter!(ENGINE_LAUNCH_TOTAL, "outcome" => "ok").increment(1);
                    info!(
                        target = "courseviz::engine",
                        attempt, "rendering engine ready"
                    );
                }
                Err(err) => {
                    slot.state = SlotState::Idle;
                    metrics::counter!(ENGINE_LAUNCH_TOTAL, "outcome" => "error").increment(1);
                    error!(
                        target = "courseviz::engine",
                        attempt,
                        error = %err,
                        "rendering engine launch failed"
                    );
                }
            }
        } else if matches!(slot.state, SlotState::ShutDown) {
            return Err(EngineError::ShutDown);
        }

        outcome
    }

    fn begin_launch(&self, slot: &mut EngineSlot) -> (u64, LaunchFuture) {
        slot.attempts += 1;
        let attempt = slot.attempts;
        let launch = self.spawn_launch(attempt);
        slot.state = SlotState::Launching {
            attempt,
            launch: launch.clone(),
        };
        (attempt, launch)
    }

    /// The launch runs on its own task so it completes even if every waiter goes away.
    fn spawn_launch(&self, attempt: u64) -> LaunchFuture {
        let launcher = self.launcher.clone();
        debug!(target = "courseviz::engine", attempt, "launching rendering engine");
        let handle = tokio::spawn(async move { launcher.launch().await });
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(EngineError::Launch(format!("launch task aborted: {err}"))),
            }
        }
        .boxed()
        .shared()
    }

    /// Open a fresh isolated context on the shared engine.
    pub async fn new_context(
        &self,
        options: ContextOptions,
        sink: Arc<dyn ConsoleSink>,
    ) -> Result<RenderContext, EngineError> {
        let engine = self.ensure_engine().await?;

        let workspace = if options.record_video {
            Some(recording_workspace(&self.video_dir).await?)
        } else {
            None
        };

        let surface = engine
            .new_surface(
                SurfaceOptions {
                    viewport: self.viewport,
                    record_video_dir: workspace.as_ref().map(|dir| dir.path().to_path_buf()),
                },
                sink,
            )
            .await?;

        Ok(RenderContext {
            surface: Some(surface),
            workspace,
        })
    }

    /// Close the shared engine. Safe to call repeatedly or before any launch; later
    /// calls to [`ensure_engine`](Self::ensure_engine) fail with [`EngineError::ShutDown`].
    pub async fn teardown(&self) -> Result<(), EngineError> {
        let previous = {
            let mut slot = self.lock_slot();
            std::mem::replace(&mut slot.state, SlotState::ShutDown)
        };

        let engine = match previous {
            SlotState::Ready(engine) => engine,
            SlotState::Launching { launch, .. } => match launch.await {
                Ok(engine) => engine,
                Err(_) => return Ok(()),
            },
            SlotState::Idle | SlotState::ShutDown => return Ok(()),
        };

        info!(target = "courseviz::engine", "shutting down rendering engine");
        engine.shutdown().await
    }
}

async fn recording_workspace(video_dir: &Path) -> Result<TempDir, EngineError> {
    let video_dir = video_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&video_dir)?;
        tempfile::Builder::new()
            .prefix("recording-")
            .tempdir_in(&video_dir)
    })
    .await
    .map_err(|err| EngineError::operation("prepare recording", err.to_string()))?
    .map_err(|err| EngineError::operation("prepare recording", err.to_string()))
}

/// A recorded video, kept on disk until this value is dropped.
#[derive(Debug)]
pub struct Recording {
    path: PathBuf,
    _workspace: Option<TempDir>,
}

impl Recording {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Isolated, single-task rendering sandbox. Call [`close`](Self::close) when done; a
/// context dropped without closing is closed in the background.
pub struct RenderContext {
    surface: Option<Box<dyn RenderSurface>>,
    workspace: Option<TempDir>,
}

impl RenderContext {
    fn surface(&self) -> Result<&dyn RenderSurface, EngineError> {
        self.surface.as_deref().ok_or(EngineError::Disconnected)
    }

    pub async fn set_content(&self, html: &str) -> Result<(), EngineError> {
        self.surface()?.set_content(html).await
    }

    pub async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        self.surface()?.wait_for_selector(selector, timeout).await
    }

    pub async fn wait_for_function(
        &self,
        expression: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        self.surface()?.wait_for_function(expression, timeout).await
    }

    /// Capture a still image; an empty buffer is an error.
    pub async fn screenshot(&self, target: &CaptureTarget) -> Result<Bytes, EngineError> {
        let bytes = self.surface()?.screenshot(target).await?;
        if bytes.is_empty() {
            return Err(EngineError::EmptyCapture);
        }
        Ok(bytes)
    }

    /// Close the context, returning the finished recording if one was made.
    pub async fn close(mut self) -> Result<Option<Recording>, EngineError> {
        let Some(surface) = self.surface.take() else {
            return Ok(None);
        };
        let workspace = self.workspace.take();
        let video = surface.close().await?;
        Ok(video.map(|path| Recording {
            path,
            _workspace: workspace,
        }))
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        let workspace = self.workspace.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = surface.close().await {
                        warn!(
                            target = "courseviz::engine",
                            error = %err,
                            "failed to close abandoned render context"
                        );
                    }
                    drop(workspace);
                });
            }
            Err(_) => warn!(
                target = "courseviz::engine",
                "render context dropped outside a runtime; context left open"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory engine used by unit and integration tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    pub struct EngineProbe {
        pub launches: AtomicUsize,
        pub shutdowns: AtomicUsize,
        pub contexts_opened: AtomicUsize,
        pub contexts_closed: AtomicUsize,
        pub recordings: AtomicUsize,
        pub pages: Mutex<Vec<String>>,
    }

    impl EngineProbe {
        pub fn open_contexts(&self) -> usize {
            self.contexts_opened.load(Ordering::SeqCst) - self.contexts_closed.load(Ordering::SeqCst)
        }
    }

    pub struct FakeLauncher {
        pub probe: Arc<EngineProbe>,
        pub delay: Duration,
        pub failures_before_success: AtomicUsize,
        pub fail_selector: Option<String>,
    }

    impl FakeLauncher {
        pub fn new(probe: Arc<EngineProbe>) -> Self {
            Self {
                probe,
                delay: Duration::from_millis(50),
                failures_before_success: AtomicUsize::new(0),
                fail_selector: None,
            }
        }
    }

    #[async_trait]
    impl EngineLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
            self.probe.launches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(EngineError::Launch("browser binary missing".to_string()));
            }
            Ok(Arc::new(FakeEngine {
                probe: self.probe.clone(),
                fail_selector: self.fail_selector.clone(),
            }))
        }
    }

    pub struct FakeEngine {
        probe: Arc<EngineProbe>,
        fail_selector: Option<String>,
    }

    #[async_trait]
    impl RenderEngine for FakeEngine {
        async fn new_surface(
            &self,
            options: SurfaceOptions,
            sink: Arc<dyn ConsoleSink>,
        ) -> Result<Box<dyn RenderSurface>, EngineError> {
            self.probe.contexts_opened.fetch_add(1, Ordering::SeqCst);
            sink.emit(ConsoleLevel::Info, "surface opened");
            Ok(Box::new(FakeSurface {
                probe: self.probe.clone(),
                record_dir: options.record_video_dir,
                fail_selector: self.fail_selector.clone(),
            }))
        }

        async fn shutdown(&self) -> Result<(), EngineError> {
            self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct FakeSurface {
        probe: Arc<EngineProbe>,
        record_dir: Option<PathBuf>,
        fail_selector: Option<String>,
    }

    #[async_trait]
    impl RenderSurface for FakeSurface {
        async fn set_content(&self, html: &str) -> Result<(), EngineError> {
            self.probe
                .pages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(html.to_string());
            Ok(())
        }

        async fn wait_for_selector(
            &self,
            selector: &str,
            timeout: Duration,
        ) -> Result<(), EngineError> {
            if self.fail_selector.as_deref() == Some(selector) {
                return Err(EngineError::timeout(
                    format!("waitForSelector {selector}"),
                    timeout,
                ));
            }
            Ok(())
        }

        async fn wait_for_function(
            &self,
            _expression: &str,
            _timeout: Duration,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn screenshot(&self, _target: &CaptureTarget) -> Result<Bytes, EngineError> {
            Ok(Bytes::from_static(b"\x89PNG fake"))
        }

        async fn close(&self) -> Result<Option<PathBuf>, EngineError> {
            self.probe.contexts_closed.fetch_add(1, Ordering::SeqCst);
            match &self.record_dir {
                Some(dir) => {
                    let path = dir.join("recording.webm");
                    tokio::fs::write(&path, b"webm fake")
                        .await
                        .map_err(|err| EngineError::operation("closeContext", err.to_string()))?;
                    self.probe.recordings.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(path))
                }
                None => Ok(None),
            }
        }
    }

    pub struct NullSink;

    impl ConsoleSink for NullSink {
        fn emit(&self, _level: ConsoleLevel, _text: &str) {}
    }

    pub fn manager(launcher: FakeLauncher, video_dir: PathBuf) -> EngineManager {
        EngineManager::new(
            Arc::new(launcher),
            Viewport {
                width: 1024,
                height: 1024,
            },
            video_dir,
        )
    }
}
