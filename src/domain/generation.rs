//! Strategy results and aggregated generation reports.

use serde::Serialize;
use serde_json::Value;

use super::task::{Task, TaskKind};

/// Successful output of one strategy invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    url: String,
    poster_url: Option<String>,
    auxiliary: Option<Value>,
}

impl GenerationResult {
    /// A still image artifact.
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            poster_url: None,
            auxiliary: None,
        }
    }

    /// A recorded video artifact with its still-frame poster.
    pub fn video(url: impl Into<String>, poster_url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            poster_url: Some(poster_url.into()),
            auxiliary: None,
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: Value) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn poster_url(&self) -> Option<&str> {
        self.poster_url.as_deref()
    }

    pub fn is_video(&self) -> bool {
        self.poster_url.is_some()
    }

    pub fn auxiliary(&self) -> Option<&Value> {
        self.auxiliary.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRecord {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub prompt: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary_payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub task_id: String,
    pub error: String,
}

/// Terminal record for one task; callers tell them apart by the presence of `url`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    Success(SuccessRecord),
    Failure(FailureRecord),
}

impl TaskOutcome {
    pub fn success(task: &Task, result: GenerationResult) -> Self {
        Self::Success(SuccessRecord {
            task_id: task.id().to_string(),
            kind: task.kind(),
            prompt: task.refined_prompt().to_string(),
            url: result.url,
            poster_url: result.poster_url,
            auxiliary_payload: result.auxiliary,
        })
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failure(FailureRecord {
            task_id: task_id.into(),
            error: error.into(),
        })
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Success(record) => &record.task_id,
            Self::Failure(record) => &record.task_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub total: usize,
    pub succeeded: usize,
    pub duration_seconds: f64,
}

/// Aggregated, input-ordered output of one orchestrated request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub metadata: ReportMetadata,
    pub results: Vec<TaskOutcome>,
}

impl GenerationReport {
    pub fn new(results: Vec<TaskOutcome>, duration_seconds: f64) -> Self {
        let succeeded = results.iter().filter(|outcome| outcome.is_success()).count();
        Self {
            metadata: ReportMetadata {
                total: results.len(),
                succeeded,
                duration_seconds: (duration_seconds * 100.0).round() / 100.0,
            },
            results,
        }
    }
}
