use std::{process, sync::Arc};

use courseviz::{
    application::{
        classifier::{Classifier, ReasoningClassifier, UnavailableClassifier},
        error::AppError,
        generation::GenerationService,
        orchestrator::Orchestrator,
        registry::StrategyRegistry,
        strategy::{
            CaptureSettings, chart::ChartStrategy, formula::FormulaStrategy,
            infographic::InfographicStrategy, photo::PhotoStrategy, slide::SlideStrategy,
        },
    },
    config::{self, Command, ContentSource, Settings},
    infra::{
        assets::AssetLibrary,
        engine::{DriverLauncher, EngineManager, Viewport},
        error::InfraError,
        http::{self, AppState},
        reasoning::{HttpReasoningService, ReasoningService},
        storage::ArtifactStorage,
        synthesis::{HttpImageSynthesizer, ImageSynthesizer},
        telemetry,
    },
};
use tokio::{signal, sync::Notify};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let app = build_application_context(&settings).await?;

    let result = match command {
        Command::Serve(_) => serve_http(&settings, &app).await,
        Command::Generate(args) => run_generate(&app, args.source).await,
    };

    if let Err(err) = app.engine.teardown().await {
        warn!(
            target = "courseviz::main",
            error = %err,
            "rendering engine did not shut down cleanly"
        );
    }

    result
}

struct ApplicationContext {
    engine: Arc<EngineManager>,
    storage: Arc<ArtifactStorage>,
    generation: GenerationService,
}

async fn build_application_context(settings: &Settings) -> Result<ApplicationContext, AppError> {
    let assets = AssetLibrary::load(&settings.render.assets_dir).await?;

    let storage = Arc::new(
        ArtifactStorage::new(
            settings.storage.directory.clone(),
            settings.storage.public_prefix.clone(),
        )
        .map_err(InfraError::from)?,
    );

    let launcher = Arc::new(DriverLauncher::new(
        settings.render.driver_program.clone(),
        settings.render.driver_script.clone(),
        settings.render.launch_timeout,
        settings.render.operation_timeout,
    ));
    let engine = Arc::new(EngineManager::new(
        launcher,
        Viewport {
            width: settings.render.canvas_width.get(),
            height: settings.render.canvas_height.get(),
        },
        settings.render.video_dir.clone(),
    ));

    if settings.render.warm_on_startup {
        match engine.ensure_engine().await {
            Ok(_) => info!(target = "courseviz::main", "rendering engine warmed up"),
            Err(err) => warn!(
                target = "courseviz::main",
                error = %err,
                "rendering engine warm-up failed; launching on first use"
            ),
        }
    }

    let registry = build_registry(settings, &engine, &storage, assets)?;
    info!(
        target = "courseviz::main",
        kinds = ?registry.kinds(),
        "strategies registered"
    );

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        settings.orchestrator.concurrency.get(),
    );

    let classifier: Arc<dyn Classifier> = if settings.reasoning.api_key.is_some() {
        let service = HttpReasoningService::new(
            &settings.reasoning,
            &settings.reasoning.classifier_model,
        )?;
        Arc::new(ReasoningClassifier::new(Arc::new(service)))
    } else {
        warn!(
            target = "courseviz::main",
            "reasoning.api_key is not set; requests cannot be classified"
        );
        Arc::new(UnavailableClassifier::new("reasoning.api_key is not set"))
    };

    Ok(ApplicationContext {
        engine,
        storage,
        generation: GenerationService::new(classifier, orchestrator),
    })
}

fn build_registry(
    settings: &Settings,
    engine: &Arc<EngineManager>,
    storage: &Arc<ArtifactStorage>,
    assets: AssetLibrary,
) -> Result<StrategyRegistry, AppError> {
    let capture = CaptureSettings {
        operation_timeout: settings.render.operation_timeout,
        chart_animation: settings.render.chart_animation,
    };

    let mut registry = StrategyRegistry::new();
    registry
        .register(Arc::new(ChartStrategy::new(
            engine.clone(),
            storage.clone(),
            assets.clone(),
            capture,
        )))
        .register(Arc::new(FormulaStrategy::new(
            engine.clone(),
            storage.clone(),
            assets,
            capture,
        )))
        .register(Arc::new(SlideStrategy::new(
            engine.clone(),
            storage.clone(),
            capture,
        )));

    if settings.synthesis.api_key.is_none() {
        warn!(
            target = "courseviz::main",
            "synthesis.api_key is not set; visual_concept and infographic tasks are disabled"
        );
        return Ok(registry);
    }

    let synthesizer: Arc<dyn ImageSynthesizer> =
        Arc::new(HttpImageSynthesizer::new(&settings.synthesis)?);
    registry.register(Arc::new(PhotoStrategy::new(
        synthesizer.clone(),
        storage.clone(),
        settings.synthesis.concurrency.get() as usize,
    )));

    if settings.reasoning.api_key.is_none() {
        warn!(
            target = "courseviz::main",
            "reasoning.api_key is not set; infographic tasks are disabled"
        );
        return Ok(registry);
    }

    let planner: Arc<dyn ReasoningService> = Arc::new(HttpReasoningService::new(
        &settings.reasoning,
        &settings.reasoning.model,
    )?);
    registry.register(Arc::new(InfographicStrategy::new(
        engine.clone(),
        storage.clone(),
        planner,
        synthesizer,
        settings.synthesis.infographic_concurrency.get() as usize,
        capture,
    )));

    Ok(registry)
}

async fn run_generate(app: &ApplicationContext, source: ContentSource) -> Result<(), AppError> {
    let content = match (source.content, source.file) {
        (Some(content), _) => content,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .map_err(InfraError::from)?,
        (None, None) => {
            return Err(AppError::validation("either --content or --file is required"));
        }
    };

    let report = app.generation.generate(&content).await?;
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn serve_http(settings: &Settings, app: &ApplicationContext) -> Result<(), AppError> {
    let router = http::build_router(AppState {
        generation: app.generation.clone(),
        storage: app.storage.clone(),
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "courseviz::main",
        addr = %settings.server.addr,
        "listening"
    );

    let shutdown = Arc::new(Notify::new());
    let trigger = Arc::clone(&shutdown);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            wait_for_shutdown().await;
            trigger.notify_one();
        },
    );

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = async { server.await } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = async {
            shutdown.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "courseviz::main",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(target = "courseviz::main", error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "courseviz::main", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!(target = "courseviz::main", "shutdown signal received");
}
