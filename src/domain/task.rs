//! Classified generation tasks.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{blueprint::NarrativeShape, chart::ChartPayload, error::DomainError};

/// Task type identifiers, as produced by the content classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    VisualConcept,
    DataViz,
    MathFormula,
    BeautifySlide,
    Infographic,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::VisualConcept,
        TaskKind::DataViz,
        TaskKind::MathFormula,
        TaskKind::BeautifySlide,
        TaskKind::Infographic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VisualConcept => "visual_concept",
            Self::DataViz => "data_viz",
            Self::MathFormula => "math_formula",
            Self::BeautifySlide => "beautify_slide",
            Self::Infographic => "infographic",
        }
    }

    /// Short tag used in artifact file names.
    pub fn file_tag(self) -> &'static str {
        match self {
            Self::VisualConcept => "photo",
            Self::DataViz => "data_viz",
            Self::MathFormula => "math",
            Self::BeautifySlide => "slide",
            Self::Infographic => "infographic",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown task type `{value}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedFormat {
    #[default]
    Static,
    Animated,
}

impl RequestedFormat {
    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "animated" | "animation" | "video" | "mp4" | "webm" => Self::Animated,
            _ => Self::Static,
        }
    }

    pub fn is_animated(self) -> bool {
        matches!(self, Self::Animated)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConceptPayload {
    /// Optional style hint appended to the synthesis prompt.
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaPayload {
    pub latex: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlidePayload {
    pub title: Option<String>,
    pub bullets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfographicPayload {
    pub narrative: Option<NarrativeShape>,
}

/// Type-specific task data; the arm always agrees with the task kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    VisualConcept(ConceptPayload),
    DataViz(ChartPayload),
    MathFormula(FormulaPayload),
    BeautifySlide(SlidePayload),
    Infographic(InfographicPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::VisualConcept(_) => TaskKind::VisualConcept,
            Self::DataViz(_) => TaskKind::DataViz,
            Self::MathFormula(_) => TaskKind::MathFormula,
            Self::BeautifySlide(_) => TaskKind::BeautifySlide,
            Self::Infographic(_) => TaskKind::Infographic,
        }
    }
}

/// One unit of requested generation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    id: String,
    refined_prompt: String,
    payload: TaskPayload,
    format: RequestedFormat,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        refined_prompt: impl Into<String>,
        payload: TaskPayload,
        format: RequestedFormat,
    ) -> Self {
        Self {
            id: id.into(),
            refined_prompt: refined_prompt.into(),
            payload,
            format,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn refined_prompt(&self) -> &str {
        &self.refined_prompt
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn format(&self) -> RequestedFormat {
        self.format
    }

    /// Convert one classifier entry into a typed task.
    pub fn from_raw(raw: RawTask) -> Result<Self, DomainError> {
        let kind: TaskKind = raw.kind.parse()?;
        let payload_value = raw.payload.unwrap_or(Value::Null);

        let format = raw
            .requested_format
            .or(raw.export_type)
            .or_else(|| {
                payload_value
                    .get("format")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .map(|value| RequestedFormat::parse_lenient(&value))
            .unwrap_or_default();

        let id = raw
            .id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let prompt = raw.refined_prompt.trim().to_string();
        let payload = build_payload(kind, payload_value, &prompt)
            .map_err(|err| DomainError::validation(format!("task `{id}` ({kind}): {err}")))?;

        Ok(Self {
            id,
            refined_prompt: prompt,
            payload,
            format,
        })
    }
}

fn build_payload(kind: TaskKind, value: Value, prompt: &str) -> Result<TaskPayload, DomainError> {
    let object = match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };

    match kind {
        TaskKind::VisualConcept => {
            if prompt.is_empty() {
                return Err(DomainError::validation("visual concept requires a prompt"));
            }
            let payload: ConceptPayload = serde_json::from_value(object).map_err(|err| {
                DomainError::validation(format!("invalid concept payload: {err}"))
            })?;
            Ok(TaskPayload::VisualConcept(payload))
        }
        TaskKind::DataViz => Ok(TaskPayload::DataViz(ChartPayload::from_value(object)?)),
        TaskKind::MathFormula => {
            let latex = object
                .get("latex")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(prompt);
            if latex.is_empty() {
                return Err(DomainError::validation(
                    "math formula requires `latex` or a prompt",
                ));
            }
            Ok(TaskPayload::MathFormula(FormulaPayload {
                latex: latex.to_string(),
            }))
        }
        TaskKind::BeautifySlide => {
            let payload: SlidePayload = serde_json::from_value(object).map_err(|err| {
                DomainError::validation(format!("invalid slide payload: {err}"))
            })?;
            Ok(TaskPayload::BeautifySlide(payload))
        }
        TaskKind::Infographic => {
            let narrative = object
                .get("narrative")
                .and_then(Value::as_str)
                .and_then(|value| value.parse::<NarrativeShape>().ok());
            Ok(TaskPayload::Infographic(InfographicPayload { narrative }))
        }
    }
}

/// Classifier wire shape for one task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTask {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub refined_prompt: String,
    pub payload: Option<Value>,
    pub requested_format: Option<String>,
    #[serde(rename = "exportType")]
    pub export_type: Option<String>,
}

/// Lifecycle of one task inside a strategy invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Rendering,
    Succeeded,
    Failed,
}

impl TaskPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rendering => "rendering",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}
