//! Turns free-text course content into typed generation tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::{
    domain::task::{RawTask, Task},
    infra::reasoning::{ReasoningError, ReasoningService},
};

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("content classifier is unavailable: {0}")]
    Unavailable(String),
    #[error("content classification failed: {0}")]
    Service(#[from] ReasoningError),
    #[error("content classifier returned malformed tasks: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, content: &str) -> Result<Vec<Task>, ClassificationError>;
}

const ROUTER_INSTRUCTION: &str = r#"You split course content into visual assets to generate.
Return STRICT JSON: {"tasks": [ ... ]}. Each task is
{
  "id": "short unique id",
  "type": "visual_concept" | "data_viz" | "math_formula" | "beautify_slide" | "infographic",
  "refined_prompt": "self-contained description of the asset",
  "requested_format": "static" | "animated",
  "payload": { ... }
}
Payload by type:
- visual_concept: { "style": "optional art direction" }
- data_viz: { "chartType": "bar" | "line" | "area" | "pie" | "donut" | "funnel",
              "data": [ { "label": "A", "value": 1 } ] }
- math_formula: { "latex": "LaTeX source without delimiters" }
- beautify_slide: { "title": "optional", "bullets": ["optional"] }
- infographic: { "narrative": "journey" | "hub" | "stack" | "timeline" | "process" | "comparison" }
Use "animated" only when the content asks for motion or video. Keep the order of the content."#;

/// Classifier backed by the reasoning service.
pub struct ReasoningClassifier {
    service: Arc<dyn ReasoningService>,
}

impl ReasoningClassifier {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Classifier for ReasoningClassifier {
    async fn classify(&self, content: &str) -> Result<Vec<Task>, ClassificationError> {
        let value = self.service.complete_json(ROUTER_INSTRUCTION, content).await?;
        let tasks = tasks_from_value(value)?;
        info!(
            target = "courseviz::classifier",
            tasks = tasks.len(),
            "content classified"
        );
        Ok(tasks)
    }
}

/// Stand-in used when no reasoning service is configured.
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Classifier for UnavailableClassifier {
    async fn classify(&self, _content: &str) -> Result<Vec<Task>, ClassificationError> {
        Err(ClassificationError::Unavailable(self.reason.clone()))
    }
}

/// Accepts `{"tasks": [...]}` or a bare array. One bad entry rejects the whole list.
pub fn tasks_from_value(value: Value) -> Result<Vec<Task>, ClassificationError> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("tasks") {
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(ClassificationError::Malformed(
                    "`tasks` is not an array".to_string(),
                ));
            }
            None => {
                return Err(ClassificationError::Malformed(
                    "response has no `tasks` field".to_string(),
                ));
            }
        },
        other => {
            return Err(ClassificationError::Malformed(format!(
                "expected an object or array, got `{other}`"
            )));
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let raw: RawTask = serde_json::from_value(entry).map_err(|err| {
                ClassificationError::Malformed(format!("task #{}: {err}", index + 1))
            })?;
            Task::from_raw(raw).map_err(|err| {
                ClassificationError::Malformed(format!("task #{}: {err}", index + 1))
            })
        })
        .collect()
}
