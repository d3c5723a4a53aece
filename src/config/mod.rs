//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CliArgs, Command, ContentSource, GenerateArgs, ServeArgs, ServeOverrides, SharedOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "courseviz";
const ENV_PREFIX: &str = "COURSEVIZ";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONCURRENCY: u64 = 15;
const DEFAULT_DRIVER_PROGRAM: &str = "node";
const DEFAULT_DRIVER_SCRIPT: &str = "scripts/render-driver.mjs";
const DEFAULT_CANVAS_SIZE: u64 = 1024;
const DEFAULT_VIDEO_DIR: &str = "videos";
const DEFAULT_ASSETS_DIR: &str = "assets";
const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CHART_ANIMATION_MS: u64 = 1500;
const DEFAULT_STORAGE_DIR: &str = "public/generated-images";
const DEFAULT_PUBLIC_PREFIX: &str = "/generated-images";
const DEFAULT_SYNTHESIS_BASE_URL: &str = "https://api.siliconflow.com/v1";
const DEFAULT_SYNTHESIS_MODEL: &str = "black-forest-labs/FLUX.1-schnell";
const DEFAULT_SYNTHESIS_SIZE: &str = "1024x1024";
const DEFAULT_SYNTHESIS_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SYNTHESIS_CONCURRENCY: u64 = 8;
const DEFAULT_INFOGRAPHIC_CONCURRENCY: u64 = 3;
const DEFAULT_REASONING_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const DEFAULT_REASONING_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_CLASSIFIER_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_REASONING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub orchestrator: OrchestratorSettings,
    pub render: RenderSettings,
    pub storage: StorageSettings,
    pub synthesis: SynthesisSettings,
    pub reasoning: ReasoningSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Global admission limit across every task of every request.
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub driver_program: PathBuf,
    pub driver_script: PathBuf,
    pub canvas_width: NonZeroU32,
    pub canvas_height: NonZeroU32,
    pub video_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub launch_timeout: Duration,
    pub operation_timeout: Duration,
    pub warm_on_startup: bool,
    pub chart_animation: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub public_prefix: String,
}

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub model: String,
    pub size: String,
    pub timeout: Duration,
    /// Sub-limit for the photo strategy.
    pub concurrency: NonZeroU32,
    /// Images fetched at once for a single infographic.
    pub infographic_concurrency: NonZeroU32,
    pub rate_limit_retries: u32,
}

#[derive(Debug, Clone)]
pub struct ReasoningSettings {
    pub base_url: Url,
    pub api_key: Option<String>,
    /// Model used for infographic blueprints.
    pub model: String,
    pub classifier_model: String,
    pub timeout: Duration,
    pub rate_limit_retries: u32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Generate(args)) => raw.apply_shared_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    orchestrator: RawOrchestratorSettings,
    render: RawRenderSettings,
    storage: RawStorageSettings,
    synthesis: RawSynthesisSettings,
    reasoning: RawReasoningSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        self.apply_shared_overrides(&overrides.shared);
    }

    fn apply_shared_overrides(&mut self, overrides: &SharedOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(concurrency) = overrides.concurrency {
            self.orchestrator.concurrency = Some(concurrency);
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(script) = overrides.render_driver_script.as_ref() {
            self.render.driver_script = Some(script.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            orchestrator,
            render,
            storage,
            synthesis,
            reasoning,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            orchestrator: build_orchestrator_settings(orchestrator)?,
            render: build_render_settings(render)?,
            storage: build_storage_settings(storage)?,
            synthesis: build_synthesis_settings(synthesis)?,
            reasoning: build_reasoning_settings(reasoning)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);

    Ok(ServerSettings {
        addr,
        graceful_shutdown: positive_seconds(graceful_secs, "server.graceful_shutdown_seconds")?,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_orchestrator_settings(
    orchestrator: RawOrchestratorSettings,
) -> Result<OrchestratorSettings, LoadError> {
    let value = orchestrator.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
    let concurrency = usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "orchestrator.concurrency",
                "must be greater than zero and fit in usize",
            )
        })?;
    Ok(OrchestratorSettings { concurrency })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let driver_program = non_empty_path(
        render.driver_program,
        DEFAULT_DRIVER_PROGRAM,
        "render.driver_program",
    )?;
    let driver_script = non_empty_path(
        render.driver_script,
        DEFAULT_DRIVER_SCRIPT,
        "render.driver_script",
    )?;
    let video_dir = non_empty_path(render.video_dir, DEFAULT_VIDEO_DIR, "render.video_dir")?;
    let assets_dir = non_empty_path(render.assets_dir, DEFAULT_ASSETS_DIR, "render.assets_dir")?;

    let canvas_width = non_zero_u32(
        render.canvas_width.unwrap_or(DEFAULT_CANVAS_SIZE),
        "render.canvas_width",
    )?;
    let canvas_height = non_zero_u32(
        render.canvas_height.unwrap_or(DEFAULT_CANVAS_SIZE),
        "render.canvas_height",
    )?;

    let launch_timeout = positive_seconds(
        render
            .launch_timeout_seconds
            .unwrap_or(DEFAULT_LAUNCH_TIMEOUT_SECS),
        "render.launch_timeout_seconds",
    )?;
    let operation_timeout = positive_seconds(
        render
            .operation_timeout_seconds
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT_SECS),
        "render.operation_timeout_seconds",
    )?;

    let chart_animation_ms = render
        .chart_animation_ms
        .unwrap_or(DEFAULT_CHART_ANIMATION_MS);
    if chart_animation_ms == 0 {
        return Err(LoadError::invalid(
            "render.chart_animation_ms",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        driver_program,
        driver_script,
        canvas_width,
        canvas_height,
        video_dir,
        assets_dir,
        launch_timeout,
        operation_timeout,
        warm_on_startup: render.warm_on_startup.unwrap_or(true),
        chart_animation: Duration::from_millis(chart_animation_ms),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = non_empty_path(storage.directory, DEFAULT_STORAGE_DIR, "storage.directory")?;

    let public_prefix = storage
        .public_prefix
        .unwrap_or_else(|| DEFAULT_PUBLIC_PREFIX.to_string());
    if !public_prefix.starts_with('/') {
        return Err(LoadError::invalid(
            "storage.public_prefix",
            "must start with `/`",
        ));
    }
    let public_prefix = public_prefix.trim_end_matches('/').to_string();
    if public_prefix.is_empty() {
        return Err(LoadError::invalid(
            "storage.public_prefix",
            "must name a path below the site root",
        ));
    }

    Ok(StorageSettings {
        directory,
        public_prefix,
    })
}

fn build_synthesis_settings(
    synthesis: RawSynthesisSettings,
) -> Result<SynthesisSettings, LoadError> {
    let base_url = parse_base_url(
        synthesis.base_url.as_deref(),
        DEFAULT_SYNTHESIS_BASE_URL,
        "synthesis.base_url",
    )?;

    let size = synthesis
        .size
        .unwrap_or_else(|| DEFAULT_SYNTHESIS_SIZE.to_string());
    if !is_image_size(&size) {
        return Err(LoadError::invalid(
            "synthesis.size",
            format!("expected WIDTHxHEIGHT, got `{size}`"),
        ));
    }

    Ok(SynthesisSettings {
        base_url,
        api_key: non_blank(synthesis.api_key),
        model: non_blank(synthesis.model).unwrap_or_else(|| DEFAULT_SYNTHESIS_MODEL.to_string()),
        size,
        timeout: positive_seconds(
            synthesis
                .timeout_seconds
                .unwrap_or(DEFAULT_SYNTHESIS_TIMEOUT_SECS),
            "synthesis.timeout_seconds",
        )?,
        concurrency: non_zero_u32(
            synthesis
                .concurrency
                .unwrap_or(DEFAULT_SYNTHESIS_CONCURRENCY),
            "synthesis.concurrency",
        )?,
        infographic_concurrency: non_zero_u32(
            synthesis
                .infographic_concurrency
                .unwrap_or(DEFAULT_INFOGRAPHIC_CONCURRENCY),
            "synthesis.infographic_concurrency",
        )?,
        rate_limit_retries: synthesis
            .rate_limit_retries
            .unwrap_or(DEFAULT_RATE_LIMIT_RETRIES),
    })
}

fn build_reasoning_settings(
    reasoning: RawReasoningSettings,
) -> Result<ReasoningSettings, LoadError> {
    let base_url = parse_base_url(
        reasoning.base_url.as_deref(),
        DEFAULT_REASONING_BASE_URL,
        "reasoning.base_url",
    )?;

    Ok(ReasoningSettings {
        base_url,
        api_key: non_blank(reasoning.api_key),
        model: non_blank(reasoning.model).unwrap_or_else(|| DEFAULT_REASONING_MODEL.to_string()),
        classifier_model: non_blank(reasoning.classifier_model)
            .unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.to_string()),
        timeout: positive_seconds(
            reasoning
                .timeout_seconds
                .unwrap_or(DEFAULT_REASONING_TIMEOUT_SECS),
            "reasoning.timeout_seconds",
        )?,
        rate_limit_retries: reasoning
            .rate_limit_retries
            .unwrap_or(DEFAULT_RATE_LIMIT_RETRIES),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOrchestratorSettings {
    concurrency: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    driver_program: Option<PathBuf>,
    driver_script: Option<PathBuf>,
    canvas_width: Option<u64>,
    canvas_height: Option<u64>,
    video_dir: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
    launch_timeout_seconds: Option<u64>,
    operation_timeout_seconds: Option<u64>,
    warm_on_startup: Option<bool>,
    chart_animation_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
    public_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSynthesisSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    size: Option<String>,
    timeout_seconds: Option<u64>,
    concurrency: Option<u64>,
    infographic_concurrency: Option<u64>,
    rate_limit_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReasoningSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    classifier_model: Option<String>,
    timeout_seconds: Option<u64>,
    rate_limit_retries: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Endpoints are joined relative to the base, so the path always ends in `/`.
fn parse_base_url(
    value: Option<&str>,
    default: &str,
    key: &'static str,
) -> Result<Url, LoadError> {
    let raw = value.map(str::trim).filter(|value| !value.is_empty());
    let raw = raw.unwrap_or(default);
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{raw}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(url)
}

fn is_image_size(value: &str) -> bool {
    value
        .split_once('x')
        .is_some_and(|(width, height)| {
            matches!(width.parse::<u32>(), Ok(w) if w > 0)
                && matches!(height.parse::<u32>(), Ok(h) if h > 0)
        })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
