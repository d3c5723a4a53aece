//! Infographic blueprints returned by the reasoning service.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Narrative layout of an infographic; each shape maps to one vector template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeShape {
    Journey,
    Hub,
    Stack,
    Timeline,
    Process,
    Comparison,
}

impl NarrativeShape {
    pub const ALL: [NarrativeShape; 6] = [
        NarrativeShape::Journey,
        NarrativeShape::Hub,
        NarrativeShape::Stack,
        NarrativeShape::Timeline,
        NarrativeShape::Process,
        NarrativeShape::Comparison,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Journey => "journey",
            Self::Hub => "hub",
            Self::Stack => "stack",
            Self::Timeline => "timeline",
            Self::Process => "process",
            Self::Comparison => "comparison",
        }
    }

    /// Number of item slots the template for this shape can hold.
    pub fn max_slots(self) -> usize {
        match self {
            Self::Journey => 5,
            Self::Hub => 6,
            Self::Stack => 5,
            Self::Timeline => 6,
            Self::Process => 4,
            Self::Comparison => 2,
        }
    }
}

impl FromStr for NarrativeShape {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim().to_ascii_lowercase();
        NarrativeShape::ALL
            .into_iter()
            .find(|shape| shape.as_str() == needle)
            .ok_or_else(|| DomainError::validation(format!("unknown narrative shape `{value}`")))
    }
}

/// Tone of the infographic, used to pick a base palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Professional,
    Playful,
    Urgent,
    Calm,
    #[default]
    Neutral,
}

impl Mood {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "professional" | "serious" | "corporate" => Self::Professional,
            "playful" | "fun" | "friendly" => Self::Playful,
            "urgent" | "alarming" | "warning" => Self::Urgent,
            "calm" | "peaceful" | "soft" => Self::Calm,
            _ => Self::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintItem {
    /// What the item's illustration should depict.
    pub subject: String,
    /// Short caption rendered under the illustration.
    pub label: String,
}

/// Structured plan for one infographic.
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    pub narrative: NarrativeShape,
    pub title: String,
    pub mood: Mood,
    /// Shared visual style appended to every image prompt.
    pub style: String,
    pub accent_color: Option<String>,
    pub text_color: Option<String>,
    pub items: Vec<BlueprintItem>,
}

/// Outcome of fitting a blueprint into its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    pub capacity: usize,
    pub dropped: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawBlueprint {
    narrative: Option<String>,
    title: Option<String>,
    mood: Option<String>,
    style: Option<String>,
    accent_color: Option<String>,
    text_color: Option<String>,
    items: Vec<RawBlueprintItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBlueprintItem {
    subject: Option<String>,
    label: Option<String>,
}

impl RawBlueprintItem {
    /// Items need at least one of subject or label; a missing side copies the other.
    fn into_item(self) -> Option<BlueprintItem> {
        let clean = |value: Option<String>| {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        match (clean(self.subject), clean(self.label)) {
            (Some(subject), Some(label)) => Some(BlueprintItem { subject, label }),
            (Some(subject), None) => Some(BlueprintItem {
                label: subject.clone(),
                subject,
            }),
            (None, Some(label)) => Some(BlueprintItem {
                subject: label.clone(),
                label,
            }),
            (None, None) => None,
        }
    }
}

impl Blueprint {
    /// Validate a reasoning-service response. `fallback_shape` is used when the response
    /// names no recognisable narrative.
    pub fn from_value(
        value: serde_json::Value,
        fallback_shape: NarrativeShape,
        fallback_title: &str,
    ) -> Result<Self, DomainError> {
        let raw: RawBlueprint = serde_json::from_value(value)
            .map_err(|err| DomainError::validation(format!("invalid blueprint: {err}")))?;

        let narrative = raw
            .narrative
            .as_deref()
            .and_then(|value| value.parse().ok())
            .unwrap_or(fallback_shape);

        let items: Vec<BlueprintItem> = raw
            .items
            .into_iter()
            .filter_map(RawBlueprintItem::into_item)
            .collect();

        if items.is_empty() {
            return Err(DomainError::validation("blueprint contains no items"));
        }

        Ok(Self {
            narrative,
            title: raw
                .title
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| fallback_title.to_string()),
            mood: raw.mood.as_deref().map(Mood::parse_lenient).unwrap_or_default(),
            style: raw
                .style
                .map(|value| value.trim().to_string())
                .unwrap_or_default(),
            accent_color: raw.accent_color,
            text_color: raw.text_color,
            items,
        })
    }

    /// Drop items beyond the template capacity of the chosen narrative.
    pub fn fit_to_template(&mut self) -> Option<Truncation> {
        let capacity = self.narrative.max_slots();
        if self.items.len() <= capacity {
            return None;
        }
        let dropped = self.items.len() - capacity;
        self.items.truncate(capacity);
        Some(Truncation { capacity, dropped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(count: usize) -> serde_json::Value {
        (0..count)
            .map(|index| json!({ "subject": format!("subject {index}"), "label": format!("Step {index}") }))
            .collect()
    }

    #[test]
    fn twelve_items_are_cut_to_journey_capacity() {
        let mut blueprint = Blueprint::from_value(
            json!({ "narrative": "journey", "title": "Cell division", "items": items(12) }),
            NarrativeShape::Process,
            "fallback",
        )
        .expect("blueprint");

        let truncation = blueprint.fit_to_template().expect("truncated");
        assert_eq!(truncation, Truncation { capacity: 5, dropped: 7 });
        assert_eq!(blueprint.items.len(), 5);
        assert_eq!(blueprint.items[0].label, "Step 0");
        assert_eq!(blueprint.items[4].label, "Step 4");
    }

    #[test]
    fn small_blueprints_are_left_alone() {
        let mut blueprint = Blueprint::from_value(
            json!({ "narrative": "hub", "items": items(3), "mood": "Calm" }),
            NarrativeShape::Process,
            "Photosynthesis",
        )
        .expect("blueprint");

        assert!(blueprint.fit_to_template().is_none());
        assert_eq!(blueprint.title, "Photosynthesis");
        assert_eq!(blueprint.mood, Mood::Calm);
    }

    #[test]
    fn unknown_narrative_uses_fallback() {
        let blueprint = Blueprint::from_value(
            json!({ "narrative": "spiral", "items": [{ "label": "Only" }] }),
            NarrativeShape::Stack,
            "t",
        )
        .expect("blueprint");

        assert_eq!(blueprint.narrative, NarrativeShape::Stack);
        assert_eq!(blueprint.items[0].subject, "Only");
    }

    #[test]
    fn empty_blueprint_is_rejected() {
        let err = Blueprint::from_value(json!({ "items": [] }), NarrativeShape::Hub, "t")
            .expect_err("no items");
        assert!(err.to_string().contains("no items"), "{err}");
    }
}
