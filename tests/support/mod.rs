//! In-memory engine and service fakes shared by the integration tests.

#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use courseviz::{
    application::classifier::{ClassificationError, Classifier, tasks_from_value},
    domain::task::Task,
    infra::{
        engine::{
            CaptureTarget, ConsoleSink, EngineError, EngineLauncher, EngineManager, RenderEngine,
            RenderSurface, SurfaceOptions, Viewport,
        },
        synthesis::{ImageSynthesizer, SynthesisError, SynthesizedImage},
    },
};
use serde_json::Value;

/// Minimal PNG signature so format sniffing treats screenshots as images.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";

#[derive(Debug, Default)]
pub struct Probe {
    pub launches: AtomicUsize,
    pub surfaces: AtomicUsize,
    pub closed: AtomicUsize,
    pub peak_open: AtomicUsize,
    pub pages: Mutex<Vec<String>>,
}

impl Probe {
    pub fn open_surfaces(&self) -> usize {
        self.surfaces.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

pub struct MemoryLauncher {
    pub probe: Arc<Probe>,
    pub render_time: Duration,
}

#[async_trait]
impl EngineLauncher for MemoryLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Arc::new(MemoryEngine {
            probe: self.probe.clone(),
            render_time: self.render_time,
        }))
    }
}

struct MemoryEngine {
    probe: Arc<Probe>,
    render_time: Duration,
}

#[async_trait]
impl RenderEngine for MemoryEngine {
    async fn new_surface(
        &self,
        options: SurfaceOptions,
        _sink: Arc<dyn ConsoleSink>,
    ) -> Result<Box<dyn RenderSurface>, EngineError> {
        let opened = self.probe.surfaces.fetch_add(1, Ordering::SeqCst) + 1;
        let open = opened - self.probe.closed.load(Ordering::SeqCst);
        self.probe.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MemorySurface {
            probe: self.probe.clone(),
            render_time: self.render_time,
            record_dir: options.record_video_dir,
        }))
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

struct MemorySurface {
    probe: Arc<Probe>,
    render_time: Duration,
    record_dir: Option<PathBuf>,
}

#[async_trait]
impl RenderSurface for MemorySurface {
    async fn set_content(&self, html: &str) -> Result<(), EngineError> {
        self.probe
            .pages
            .lock()
            .expect("pages")
            .push(html.to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<(), EngineError> {
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
        tokio::time::sleep(self.render_time).await;
        Ok(Bytes::from_static(PNG_BYTES))
    }

    async fn close(&self) -> Result<Option<PathBuf>, EngineError> {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
        match &self.record_dir {
            Some(dir) => {
                let path = dir.join("capture.webm");
                tokio::fs::write(&path, b"webm")
                    .await
                    .map_err(|err| EngineError::operation("closeContext", err.to_string()))?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

pub fn engine(probe: Arc<Probe>, render_time: Duration, video_dir: PathBuf) -> Arc<EngineManager> {
    Arc::new(EngineManager::new(
        Arc::new(MemoryLauncher { probe, render_time }),
        Viewport {
            width: 1024,
            height: 1024,
        },
        video_dir,
    ))
}

/// Classifier that answers every request with the same task list.
pub struct CannedClassifier {
    pub response: Value,
}

#[async_trait]
impl Classifier for CannedClassifier {
    async fn classify(&self, _content: &str) -> Result<Vec<Task>, ClassificationError> {
        tasks_from_value(self.response.clone())
    }
}

/// Synthesizer returning a tiny PNG, failing for prompts that contain `fail`.
#[derive(Default)]
pub struct StaticSynthesizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ImageSynthesizer for StaticSynthesizer {
    async fn generate_image(&self, prompt: &str) -> Result<SynthesizedImage, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("fail") {
            return Err(SynthesisError::Status {
                status: 500,
                body: "upstream error".to_string(),
            });
        }
        Ok(SynthesizedImage::from_bytes(Bytes::from_static(PNG_BYTES)))
    }
}
