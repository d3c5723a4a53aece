//! Chart payloads and series normalization.

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Chart kinds understood by the chart renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
    Area,
    Pie,
    Donut,
    Funnel,
}

/// Layout family selected from the chart kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutFamily {
    /// Category axis on the bottom, value axis on the left.
    Cartesian,
    /// Axis-free layouts driven by category/value fields.
    Radial,
}

impl ChartKind {
    /// Parse a chart kind, mapping anything unrecognised to [`ChartKind::Bar`].
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "line" => Self::Line,
            "area" => Self::Area,
            "pie" => Self::Pie,
            "donut" | "doughnut" | "ring" => Self::Donut,
            "funnel" => Self::Funnel,
            _ => Self::Bar,
        }
    }

    pub fn layout(self) -> LayoutFamily {
        match self {
            Self::Bar | Self::Line | Self::Area => LayoutFamily::Cartesian,
            Self::Pie | Self::Donut | Self::Funnel => LayoutFamily::Radial,
        }
    }

    /// Series type name used by the chart runtime.
    pub fn runtime_type(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Area => "area",
            Self::Pie | Self::Donut => "pie",
            Self::Funnel => "funnel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub label: String,
    pub value: f64,
}

/// Validated chart payload carried by a `data_viz` task.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPayload {
    pub kind: ChartKind,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawChartPayload {
    chart_type: Option<String>,
    data: Option<RawSeries>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSeries {
    Points(Vec<RawPoint>),
    Parallel {
        labels: Vec<RawLabel>,
        values: Vec<f64>,
    },
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    label: RawLabel,
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Text(String),
    Number(serde_json::Number),
}

impl RawLabel {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

impl RawSeries {
    /// Parallel `labels`/`values` arrays are zipped into points; surplus entries on the
    /// longer side are dropped.
    fn normalize(self) -> Vec<DataPoint> {
        match self {
            Self::Points(points) => points
                .into_iter()
                .map(|point| DataPoint {
                    label: point.label.into_string(),
                    value: point.value,
                })
                .collect(),
            Self::Parallel { labels, values } => labels
                .into_iter()
                .zip(values)
                .map(|(label, value)| DataPoint {
                    label: label.into_string(),
                    value,
                })
                .collect(),
        }
    }
}

impl ChartPayload {
    pub(crate) fn from_value(value: serde_json::Value) -> Result<Self, DomainError> {
        let raw: RawChartPayload = serde_json::from_value(value)
            .map_err(|err| DomainError::validation(format!("invalid chart payload: {err}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawChartPayload) -> Result<Self, DomainError> {
        let chart_type = raw
            .chart_type
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| DomainError::validation("chart payload is missing `chartType`"))?;
        let series = raw
            .data
            .ok_or_else(|| DomainError::validation("chart payload is missing `data`"))?;

        let points = series.normalize();
        if points.is_empty() {
            return Err(DomainError::validation("chart payload has no data points"));
        }
        if let Some(point) = points.iter().find(|point| !point.value.is_finite()) {
            return Err(DomainError::validation(format!(
                "chart value for `{}` is not a finite number",
                point.label
            )));
        }

        Ok(Self {
            kind: ChartKind::parse_lenient(&chart_type),
            points,
        })
    }
}
