//! Client for the external image-synthesis service.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SynthesisSettings;

use super::error::InfraError;

const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("image synthesis is rate limited")]
    RateLimited,
    #[error("image synthesis transport failure: {0}")]
    Transport(String),
    #[error("image synthesis returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("image synthesis response is invalid: {0}")]
    InvalidResponse(String),
}

impl SynthesisError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for SynthesisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A downloaded image and its sniffed encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedImage {
    pub bytes: Bytes,
    pub extension: &'static str,
    pub mime: &'static str,
}

impl SynthesizedImage {
    pub fn from_bytes(bytes: Bytes) -> Self {
        let (extension, mime) = match imagesize::image_type(&bytes) {
            Ok(imagesize::ImageType::Jpeg) => ("jpg", "image/jpeg"),
            Ok(imagesize::ImageType::Webp) => ("webp", "image/webp"),
            Ok(imagesize::ImageType::Gif) => ("gif", "image/gif"),
            _ => ("png", "image/png"),
        };
        Self {
            bytes,
            extension,
            mime,
        }
    }

    /// Inline `data:` URI for embedding into composed documents.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> Result<SynthesizedImage, SynthesisError>;
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerationResponse {
    images: Vec<ImageRef>,
    data: Vec<ImageRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageRef {
    url: Option<String>,
    b64_json: Option<String>,
}

/// Calls `POST {base_url}/images/generations` and downloads the first image.
#[derive(Debug, Clone)]
pub struct HttpImageSynthesizer {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    size: String,
    backoff: ExponentialBuilder,
}

impl HttpImageSynthesizer {
    pub fn new(settings: &SynthesisSettings) -> Result<Self, InfraError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| InfraError::configuration("synthesis.api_key is not set"))?;
        let endpoint = settings
            .base_url
            .join("images/generations")
            .map_err(|err| InfraError::configuration(format!("synthesis.base_url: {err}")))?;
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: settings.model.clone(),
            size: settings.size.clone(),
            backoff: ExponentialBuilder::default()
                .with_min_delay(RATE_LIMIT_BASE_DELAY)
                .with_max_times(settings.rate_limit_retries as usize),
        })
    }

    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request_generation(&self, prompt: &str) -> Result<ImageRef, SynthesisError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&GenerationRequest {
                model: &self.model,
                prompt,
                size: &self.size,
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SynthesisError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerationResponse = response.json().await?;
        parsed
            .images
            .into_iter()
            .chain(parsed.data)
            .find(|image| image.url.is_some() || image.b64_json.is_some())
            .ok_or_else(|| SynthesisError::InvalidResponse("response contains no image".into()))
    }

    async fn fetch(&self, image: ImageRef) -> Result<Bytes, SynthesisError> {
        if let Some(encoded) = image.b64_json {
            return STANDARD
                .decode(encoded.trim())
                .map(Bytes::from)
                .map_err(|err| SynthesisError::InvalidResponse(format!("b64_json: {err}")));
        }

        let url = image
            .url
            .ok_or_else(|| SynthesisError::InvalidResponse("image has no url".into()))?;
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body: format!("download of {url} failed"),
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ImageSynthesizer for HttpImageSynthesizer {
    async fn generate_image(&self, prompt: &str) -> Result<SynthesizedImage, SynthesisError> {
        let started = std::time::Instant::now();
        let image = (|| self.request_generation(prompt))
            .retry(&self.backoff)
            .when(SynthesisError::is_rate_limited)
            .notify(|err: &SynthesisError, delay: Duration| {
                warn!(
                    target = "courseviz::synthesis",
                    op = "synthesis::generate",
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "image synthesis rate limited; backing off"
                );
            })
            .await?;
        debug!(
            target = "courseviz::synthesis",
            inline = image.b64_json.is_some(),
            "image generated"
        );

        let bytes = self.fetch(image).await?;
        if bytes.is_empty() {
            return Err(SynthesisError::InvalidResponse("image is empty".into()));
        }

        info!(
            target = "courseviz::synthesis",
            op = "synthesis::generate_image",
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "image synthesized"
        );
        Ok(SynthesizedImage::from_bytes(bytes))
    }
}

pub(crate) fn user_agent() -> &'static str {
    concat!("courseviz/", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        num::NonZeroU32,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::{get, post},
    };
    use serde_json::{Value, json};

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";

    #[derive(Clone)]
    struct FakeService {
        calls: Arc<AtomicUsize>,
        rate_limited_calls: usize,
        base: String,
    }

    async fn generations(
        State(state): State<FakeService>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        let call = state.calls.fetch_add(1, Ordering::SeqCst);
        if call < state.rate_limited_calls {
            return AxumStatus::TOO_MANY_REQUESTS.into_response();
        }
        assert_eq!(
            headers
                .get("authorization")
                .and_then(|value| value.to_str().ok()),
            Some("Bearer secret")
        );
        assert_eq!(body["model"], "flux");
        Json(json!({ "images": [{ "url": format!("{}/files/out.png", state.base) }] }))
            .into_response()
    }

    async fn image() -> impl IntoResponse {
        PNG_HEADER.to_vec()
    }

    async fn spawn(rate_limited_calls: usize) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/v1/images/generations", post(generations))
            .route("/files/out.png", get(image))
            .with_state(FakeService {
                calls: calls.clone(),
                rate_limited_calls,
                base: base.clone(),
            });
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        (base, calls)
    }

    fn settings(base: &str, retries: u32) -> SynthesisSettings {
        SynthesisSettings {
            base_url: Url::parse(&format!("{base}/v1/")).expect("url"),
            api_key: Some("secret".to_string()),
            model: "flux".to_string(),
            size: "1024x1024".to_string(),
            timeout: Duration::from_secs(5),
            concurrency: NonZeroU32::new(8).expect("non-zero"),
            infographic_concurrency: NonZeroU32::new(3).expect("non-zero"),
            rate_limit_retries: retries,
        }
    }

    fn fast_backoff(retries: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(5))
            .with_max_times(retries)
    }

    #[tokio::test]
    async fn downloads_generated_image() {
        let (base, calls) = spawn(0).await;
        let client = HttpImageSynthesizer::new(&settings(&base, 3)).expect("client");

        let image = client.generate_image("a lab").await.expect("image");
        assert_eq!(image.extension, "png");
        assert_eq!(image.bytes.as_ref(), PNG_HEADER);
        assert!(image.data_uri().starts_with("data:image/png;base64,"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backs_off_on_rate_limits() {
        let (base, calls) = spawn(2).await;
        let client = HttpImageSynthesizer::new(&settings(&base, 3))
            .expect("client")
            .with_backoff(fast_backoff(3));

        client.generate_image("a lab").await.expect("image");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_rate_limit_budget() {
        let (base, calls) = spawn(10).await;
        let client = HttpImageSynthesizer::new(&settings(&base, 2))
            .expect("client")
            .with_backoff(fast_backoff(2));

        let err = client.generate_image("a lab").await.expect_err("rate limited");
        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let mut settings = settings("http://localhost", 1);
        settings.api_key = None;
        assert!(matches!(
            HttpImageSynthesizer::new(&settings),
            Err(InfraError::Configuration { .. })
        ));
    }
}
