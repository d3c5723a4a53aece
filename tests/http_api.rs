mod support;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use bytes::Bytes;
use courseviz::{
    application::{
        classifier::{ClassificationError, Classifier, UnavailableClassifier},
        generation::GenerationService,
        orchestrator::Orchestrator,
        registry::StrategyRegistry,
        strategy::{Strategy, StrategyError},
    },
    domain::{
        generation::GenerationResult,
        task::{Task, TaskKind},
    },
    infra::{
        http::{AppState, build_router},
        storage::ArtifactStorage,
    },
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use support::CannedClassifier;
use tempfile::TempDir;
use tower::ServiceExt;

/// Stores a fixed payload as the task's artifact.
struct StoringSlides {
    storage: Arc<ArtifactStorage>,
}

#[async_trait]
impl Strategy for StoringSlides {
    fn kind(&self) -> TaskKind {
        TaskKind::BeautifySlide
    }

    async fn generate(
        &self,
        _task: &Task,
        position: usize,
    ) -> Result<GenerationResult, StrategyError> {
        let stored = self
            .storage
            .store(
                &format!("task-{position}-slide.png"),
                Bytes::from_static(support::PNG_BYTES),
            )
            .await?;
        Ok(GenerationResult::image(stored.url))
    }
}

fn app(dir: &TempDir, classifier: Arc<dyn Classifier>) -> Router {
    let storage = Arc::new(
        ArtifactStorage::new(dir.path().to_path_buf(), "/generated-images").expect("storage"),
    );
    let registry = StrategyRegistry::new().with(Arc::new(StoringSlides {
        storage: storage.clone(),
    }));
    build_router(AppState {
        generation: GenerationService::new(classifier, Orchestrator::new(Arc::new(registry), 15)),
        storage,
    })
}

fn slide_classifier() -> Arc<dyn Classifier> {
    Arc::new(CannedClassifier {
        response: json!({ "tasks": [
            { "id": "s1", "type": "beautify_slide", "refined_prompt": "Cells: Nucleus. Membrane." },
            { "id": "m1", "type": "math_formula", "refined_prompt": "a^2 + b^2 = c^2" }
        ] }),
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    (status, body)
}

fn post_generate(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/generate")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

#[tokio::test]
async fn generate_returns_the_report() {
    let dir = TempDir::new().expect("temp dir");
    let app = app(&dir, slide_classifier());

    let (status, body) = send(&app, post_generate(json!({ "content": "Explain cells" }))).await;

    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(report["metadata"]["total"], 2);
    assert_eq!(report["metadata"]["succeeded"], 1);
    assert_eq!(report["results"][0]["taskId"], "s1");
    assert_eq!(report["results"][0]["type"], "beautify_slide");
    assert_eq!(
        report["results"][1]["error"],
        "no handler for type `math_formula`"
    );

    let url = report["results"][0]["url"].as_str().expect("url");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(url)
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("image/png")
    );
}

#[tokio::test]
async fn blank_or_missing_content_is_a_bad_request() {
    let dir = TempDir::new().expect("temp dir");
    let app = app(&dir, slide_classifier());

    for body in [json!({}), json!({ "content": "   " })] {
        let (status, body) = send(&app, post_generate(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(error["error"]["code"], "bad_request");
    }

    let request = Request::builder()
        .method(Method::POST)
        .uri("/generate")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("not json"))
        .expect("request should build");
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn classification_failures_are_bad_gateway() {
    let dir = TempDir::new().expect("temp dir");
    let app = app(
        &dir,
        Arc::new(UnavailableClassifier::new("reasoning.api_key is not set")),
    );

    let (status, body) = send(&app, post_generate(json!({ "content": "Explain cells" }))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let error: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(error["error"]["code"], "classification_failed");
    assert!(
        error["error"]["hint"]
            .as_str()
            .expect("hint")
            .contains("reasoning.api_key")
    );
}

#[tokio::test]
async fn malformed_classifier_output_fails_the_whole_request() {
    struct Garbage;

    #[async_trait]
    impl Classifier for Garbage {
        async fn classify(&self, _content: &str) -> Result<Vec<Task>, ClassificationError> {
            Err(ClassificationError::Malformed(
                "task #1: unknown task type `hologram`".to_string(),
            ))
        }
    }

    let dir = TempDir::new().expect("temp dir");
    let app = app(&dir, Arc::new(Garbage));

    let (status, _) = send(&app, post_generate(json!({ "content": "Explain cells" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unknown_and_escaping_artifact_paths_are_not_found() {
    let dir = TempDir::new().expect("temp dir");
    let app = app(&dir, slide_classifier());

    for uri in [
        "/generated-images/2024/01/01/missing.png",
        "/generated-images/..%2F..%2Fetc%2Fpasswd",
    ] {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn health_answers_no_content() {
    let dir = TempDir::new().expect("temp dir");
    let app = app(&dir, slide_classifier());

    let request = Request::builder()
        .uri("/_health")
        .body(Body::empty())
        .expect("request should build");
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let dir = TempDir::new().expect("temp dir");
    let app = app(&dir, slide_classifier());

    let generated = app
        .clone()
        .oneshot(post_generate(json!({ "content": "Explain cells" })))
        .await
        .expect("router should respond");
    let id = generated
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .expect("request id");
    assert_eq!(id.len(), 36);

    let echoed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/_health")
                .header("x-request-id", "lesson-42")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");
    assert_eq!(
        echoed
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("lesson-42")
    );
}
