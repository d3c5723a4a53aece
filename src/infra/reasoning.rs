//! Client for the external reasoning service (OpenAI-compatible chat completions).

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::ReasoningSettings;

use super::{error::InfraError, synthesis::user_agent};

const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("reasoning service is rate limited")]
    RateLimited,
    #[error("reasoning service transport failure: {0}")]
    Transport(String),
    #[error("reasoning service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("reasoning service returned no content")]
    EmptyResponse,
    #[error("reasoning service returned invalid JSON: {0}")]
    InvalidJson(String),
}

impl ReasoningError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl From<reqwest::Error> for ReasoningError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Structured-output completion: instruction plus free text in, JSON out.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete_json(&self, instruction: &str, prompt: &str)
    -> Result<Value, ReasoningError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpReasoningService {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    backoff: ExponentialBuilder,
}

impl HttpReasoningService {
    /// Build a client for `model`; the classifier and the blueprint planner use
    /// different models against the same endpoint.
    pub fn new(settings: &ReasoningSettings, model: &str) -> Result<Self, InfraError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| InfraError::configuration("reasoning.api_key is not set"))?;
        let endpoint = settings
            .base_url
            .join("chat/completions")
            .map_err(|err| InfraError::configuration(format!("reasoning.base_url: {err}")))?;
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.to_string(),
            backoff: ExponentialBuilder::default()
                .with_min_delay(RATE_LIMIT_BASE_DELAY)
                .with_max_times(settings.rate_limit_retries as usize),
        })
    }

    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request(&self, instruction: &str, prompt: &str) -> Result<String, ReasoningError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: instruction,
                    },
                    ChatMessage {
                        role: "user",
                        content: prompt,
                    },
                ],
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReasoningError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ReasoningError::InvalidJson(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ReasoningError::EmptyResponse)
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn complete_json(
        &self,
        instruction: &str,
        prompt: &str,
    ) -> Result<Value, ReasoningError> {
        let started = std::time::Instant::now();
        let content = (|| self.request(instruction, prompt))
            .retry(&self.backoff)
            .when(ReasoningError::is_rate_limited)
            .notify(|err: &ReasoningError, delay: Duration| {
                warn!(
                    target = "courseviz::reasoning",
                    op = "reasoning::complete_json",
                    model = %self.model,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "reasoning service rate limited; backing off"
                );
            })
            .await?;

        let value = parse_json_content(&content)?;
        info!(
            target = "courseviz::reasoning",
            op = "reasoning::complete_json",
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "structured completion received"
        );
        Ok(value)
    }
}

/// Parse model output as JSON, tolerating a surrounding Markdown code fence.
pub fn parse_json_content(content: &str) -> Result<Value, ReasoningError> {
    serde_json::from_str(strip_code_fence(content))
        .map_err(|err| ReasoningError::InvalidJson(err.to_string()))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Instant,
    };

    use axum::{
        Json, Router, extract::State, http::StatusCode as AxumStatus, response::IntoResponse,
        routing::post,
    };
    use serde_json::json;

    #[derive(Clone)]
    struct FakeCompletions {
        calls: Arc<AtomicUsize>,
        rate_limited_calls: usize,
    }

    async fn completions(
        State(state): State<FakeCompletions>,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        let call = state.calls.fetch_add(1, Ordering::SeqCst);
        if call < state.rate_limited_calls {
            return AxumStatus::TOO_MANY_REQUESTS.into_response();
        }
        assert_eq!(body["model"], "planner");
        assert_eq!(body["response_format"]["type"], "json_object");
        Json(json!({
            "choices": [{ "message": { "content": "```json\n{\"narrative\": \"hub\"}\n```" } }]
        }))
        .into_response()
    }

    async fn spawn(rate_limited_calls: usize) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(FakeCompletions {
                calls: calls.clone(),
                rate_limited_calls,
            });
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        (base, calls)
    }

    fn client(base: &str, retries: usize) -> HttpReasoningService {
        let settings = ReasoningSettings {
            base_url: Url::parse(&format!("{base}/v1/")).expect("url"),
            api_key: Some("secret".to_string()),
            model: "planner".to_string(),
            classifier_model: "router".to_string(),
            timeout: Duration::from_secs(5),
            rate_limit_retries: 3,
        };
        HttpReasoningService::new(&settings, "planner")
            .expect("client")
            .with_backoff(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(20))
                    .with_max_times(retries),
            )
    }

    #[tokio::test]
    async fn backs_off_on_rate_limits() {
        let (base, calls) = spawn(2).await;
        let started = Instant::now();

        let value = client(&base, 3)
            .complete_json("plan", "Water cycle")
            .await
            .expect("completion");

        assert_eq!(value, json!({ "narrative": "hub" }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 20 ms, then 40 ms
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn gives_up_after_rate_limit_budget() {
        let (base, calls) = spawn(10).await;

        let err = client(&base, 2)
            .complete_json("plan", "Water cycle")
            .await
            .expect_err("rate limited");

        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let settings = ReasoningSettings {
            base_url: Url::parse("http://localhost/v1/").expect("url"),
            api_key: None,
            model: "planner".to_string(),
            classifier_model: "router".to_string(),
            timeout: Duration::from_secs(5),
            rate_limit_retries: 3,
        };
        assert!(matches!(
            HttpReasoningService::new(&settings, "planner"),
            Err(InfraError::Configuration { .. })
        ));
    }

    #[test]
    fn strips_fenced_json() {
        let value = parse_json_content("```json\n{\"tasks\": []}\n```").expect("json");
        assert_eq!(value, json!({ "tasks": [] }));

        let bare = parse_json_content("  [1, 2]  ").expect("json");
        assert_eq!(bare, json!([1, 2]));
    }

    #[test]
    fn rejects_prose() {
        let err = parse_json_content("Sure! Here is your blueprint.").expect_err("prose");
        assert!(matches!(err, ReasoningError::InvalidJson(_)));
    }

    #[test]
    fn unterminated_fence_still_parses() {
        let value = parse_json_content("```\n{\"a\": 1}").expect("json");
        assert_eq!(value, json!({ "a": 1 }));
    }
}
