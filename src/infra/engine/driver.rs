//! Headless-browser engine backed by a long-lived driver process.
//!
//! The driver (`scripts/render-driver.mjs`) speaks newline-delimited JSON on
//! stdio: requests `{id, method, params}`, responses `{id, ok, result|error}`,
//! and unsolicited events `{event, context, level, text}`.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{Mutex, oneshot},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CaptureTarget, ConsoleLevel, ConsoleSink, EngineError, EngineLauncher, RenderEngine,
    RenderSurface, SurfaceOptions,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launches the driver process with `program script`.
#[derive(Debug, Clone)]
pub struct DriverLauncher {
    program: PathBuf,
    script: PathBuf,
    launch_timeout: Duration,
    call_timeout: Duration,
}

impl DriverLauncher {
    pub fn new(
        program: PathBuf,
        script: PathBuf,
        launch_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            program,
            script,
            launch_timeout,
            call_timeout,
        }
    }
}

#[async_trait]
impl EngineLauncher for DriverLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
        let mut child = Command::new(&self.program)
            .arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                EngineError::Launch(format!(
                    "failed to spawn `{} {}`: {err}",
                    self.program.display(),
                    self.script.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Launch("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Launch("driver stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target = "courseviz::engine::driver", line = %line, "driver stderr");
                }
            });
        }

        let shared = Arc::new(DriverShared {
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pending: DashMap::new(),
            sinks: DashMap::new(),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            call_timeout: self.call_timeout,
        });

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(read_loop(shared.clone(), stdout, ready_tx));

        match tokio::time::timeout(self.launch_timeout, ready_rx).await {
            Ok(Ok(())) => {
                info!(
                    target = "courseviz::engine::driver",
                    program = %self.program.display(),
                    script = %self.script.display(),
                    "render driver ready"
                );
                Ok(Arc::new(DriverEngine { shared }))
            }
            Ok(Err(_)) => {
                shared.kill().await;
                Err(EngineError::Launch(
                    "driver exited before signalling readiness".to_string(),
                ))
            }
            Err(_) => {
                shared.kill().await;
                Err(EngineError::Launch(format!(
                    "driver not ready after {} ms",
                    self.launch_timeout.as_millis()
                )))
            }
        }
    }
}

type Reply = Result<Value, EngineError>;

struct DriverShared {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    pending: DashMap<u64, oneshot::Sender<Reply>>,
    sinks: DashMap<String, Arc<dyn ConsoleSink>>,
    next_id: AtomicU64,
    alive: AtomicBool,
    call_timeout: Duration,
}

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
}

async fn read_loop(shared: Arc<DriverShared>, stdout: ChildStdout, ready: oneshot::Sender<()>) {
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(target = "courseviz::engine::driver", error = %err, "driver stdout failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Incoming>(&line) {
            Ok(Incoming::Response {
                id,
                ok,
                result,
                error,
            }) => {
                let reply = if ok {
                    Ok(result)
                } else {
                    Err(EngineError::Protocol(
                        error.unwrap_or_else(|| "driver reported an error".to_string()),
                    ))
                };
                match shared.pending.remove(&id) {
                    Some((_, sender)) => {
                        let _ = sender.send(reply);
                    }
                    None => debug!(
                        target = "courseviz::engine::driver",
                        id, "response for unknown or expired request"
                    ),
                }
            }
            Ok(Incoming::Event {
                event,
                context,
                level,
                text,
            }) => match event.as_str() {
                "ready" => {
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(());
                    }
                }
                "console" | "pageerror" => {
                    let level = if event == "pageerror" {
                        ConsoleLevel::PageError
                    } else {
                        ConsoleLevel::parse(level.as_deref().unwrap_or("log"))
                    };
                    let text = text.unwrap_or_default();
                    match context.as_deref().and_then(|id| shared.sinks.get(id)) {
                        Some(sink) => sink.emit(level, &text),
                        None => debug!(
                            target = "courseviz::browser",
                            text = %text,
                            "console output from unknown context"
                        ),
                    }
                }
                other => debug!(
                    target = "courseviz::engine::driver",
                    event = other,
                    "ignoring driver event"
                ),
            },
            Err(err) => warn!(
                target = "courseviz::engine::driver",
                error = %err,
                line = %line,
                "unparseable driver output"
            ),
        }
    }

    shared.alive.store(false, Ordering::SeqCst);
    let ids: Vec<u64> = shared.pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, sender)) = shared.pending.remove(&id) {
            let _ = sender.send(Err(EngineError::Disconnected));
        }
    }
    warn!(target = "courseviz::engine::driver", "render driver output closed");
}

impl DriverShared {
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Reply {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let mut line = serde_json::to_vec(&Request { id, method, params })
            .map_err(|err| EngineError::Protocol(err.to_string()))?;
        line.push(b'\n');

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(&line).await {
                Ok(()) => stdin.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            self.pending.remove(&id);
            warn!(target = "courseviz::engine::driver", method, error = %err, "driver write failed");
            return Err(EngineError::Disconnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(EngineError::Protocol(message)))) => {
                Err(EngineError::operation(method, message))
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(EngineError::Disconnected),
            Err(_) => {
                self.pending.remove(&id);
                Err(EngineError::timeout(method, timeout))
            }
        }
    }

    async fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

struct DriverEngine {
    shared: Arc<DriverShared>,
}

#[async_trait]
impl RenderEngine for DriverEngine {
    async fn new_surface(
        &self,
        options: SurfaceOptions,
        sink: Arc<dyn ConsoleSink>,
    ) -> Result<Box<dyn RenderSurface>, EngineError> {
        let context = Uuid::new_v4().to_string();
        self.shared.sinks.insert(context.clone(), sink);

        let params = json!({
            "context": context,
            "viewport": { "width": options.viewport.width, "height": options.viewport.height },
            "recordVideoDir": options.record_video_dir.as_ref().map(|dir| dir.display().to_string()),
        });
        if let Err(err) = self
            .shared
            .call("newContext", params, self.shared.call_timeout)
            .await
        {
            self.shared.sinks.remove(&context);
            return Err(err);
        }

        Ok(Box::new(DriverSurface {
            shared: self.shared.clone(),
            context,
        }))
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        let outcome = self
            .shared
            .call("shutdown", json!({}), SHUTDOWN_GRACE)
            .await
            .map(|_| ());

        let child = self.shared.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(
                    target = "courseviz::engine::driver",
                    status = %status,
                    "render driver exited"
                ),
                _ => {
                    let _ = child.kill().await;
                }
            }
        }
        self.shared.alive.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) | Err(EngineError::Disconnected) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

struct DriverSurface {
    shared: Arc<DriverShared>,
    context: String,
}

impl DriverSurface {
    /// Waits run inside the driver with their own limit; allow the round trip on top.
    fn wait_budget(&self, timeout: Duration) -> Duration {
        timeout + self.shared.call_timeout
    }
}

#[async_trait]
impl RenderSurface for DriverSurface {
    async fn set_content(&self, html: &str) -> Result<(), EngineError> {
        self.shared
            .call(
                "setContent",
                json!({ "context": self.context, "html": html }),
                self.shared.call_timeout,
            )
            .await
            .map(|_| ())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        self.shared
            .call(
                "waitForSelector",
                json!({
                    "context": self.context,
                    "selector": selector,
                    "timeoutMs": timeout.as_millis() as u64,
                }),
                self.wait_budget(timeout),
            )
            .await
            .map(|_| ())
    }

    async fn wait_for_function(
        &self,
        expression: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        self.shared
            .call(
                "waitForFunction",
                json!({
                    "context": self.context,
                    "expression": expression,
                    "timeoutMs": timeout.as_millis() as u64,
                }),
                self.wait_budget(timeout),
            )
            .await
            .map(|_| ())
    }

    async fn screenshot(&self, target: &CaptureTarget) -> Result<Bytes, EngineError> {
        let selector = match target {
            CaptureTarget::Viewport => None,
            CaptureTarget::Element(selector) => Some(selector.as_str()),
        };
        let result = self
            .shared
            .call(
                "screenshot",
                json!({ "context": self.context, "selector": selector }),
                self.shared.call_timeout,
            )
            .await?;

        let encoded = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Protocol("screenshot response missing `data`".into()))?;
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|err| EngineError::Protocol(format!("screenshot is not base64: {err}")))?;
        Ok(Bytes::from(decoded))
    }

    async fn close(&self) -> Result<Option<PathBuf>, EngineError> {
        let outcome = self
            .shared
            .call(
                "closeContext",
                json!({ "context": self.context }),
                self.shared.call_timeout,
            )
            .await;
        self.shared.sinks.remove(&self.context);

        let result = outcome?;
        Ok(result
            .get("videoPath")
            .and_then(Value::as_str)
            .map(PathBuf::from))
    }
}
