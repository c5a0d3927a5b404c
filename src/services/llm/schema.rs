//! Structural checks on completion text. Anything that does not conform to
//! the declared shape is a [`SchemaViolation`], which the analyzer may retry once.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use super::types::{
    AnalysisResult, AxisBindings, BusinessUnderstanding, ExecutiveSynthesis,
    FigureInterpretation, VisualizationSpec, VizType,
};
use crate::error::ValidationError;
use crate::models::Table;
use crate::services::profiler::ProfileThresholds;
use crate::services::validator::validate_visualization_columns_with;

pub const VISUALIZATION_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("the response is not valid JSON ({0})")]
    NotJson(String),
    #[error("the response does not match the declared shape ({0})")]
    Shape(String),
    #[error("expected exactly {expected} visualizations, got {found}")]
    Cardinality { expected: usize, found: usize },
    #[error("visualization {index} ({viz_type}) is missing its required {axis}")]
    MissingAxis {
        index: usize,
        viz_type: VizType,
        axis: &'static str,
    },
    #[error("required field '{0}' is empty")]
    EmptyField(String),
    #[error("visualization {index} references an unknown column: {reason}")]
    UnknownColumn { index: usize, reason: String },
}

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)\s*```").expect("code fence pattern is valid")
});

/// Extracts the JSON body from a reply that may be wrapped in a markdown
/// fence or surrounded by prose.
pub fn strip_code_fences(raw: &str) -> &str {
    if let Some(body) = CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        return body.as_str();
    }
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    }
}

fn to_json(raw: &str) -> Result<serde_json::Value, SchemaViolation> {
    serde_json::from_str(strip_code_fences(raw)).map_err(|e| SchemaViolation::NotJson(e.to_string()))
}

fn require_text(field: &str, value: &str) -> Result<(), SchemaViolation> {
    if value.trim().is_empty() {
        Err(SchemaViolation::EmptyField(field.to_string()))
    } else {
        Ok(())
    }
}

fn require_items(field: &str, items: &[String]) -> Result<(), SchemaViolation> {
    if items.iter().all(|i| i.trim().is_empty()) {
        Err(SchemaViolation::EmptyField(field.to_string()))
    } else {
        Ok(())
    }
}

/// `"null"`, `"none"` and blank strings mean the axis is unbound.
fn normalize_column(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null") && !v.eq_ignore_ascii_case("none"))
}

#[derive(Deserialize)]
struct RawRecommendation {
    analysis: String,
    visualizations: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawVisualization {
    viz_type: String,
    title: String,
    #[serde(default)]
    x_axis: Option<String>,
    #[serde(default)]
    y_axis: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    group_by: Option<String>,
    justification: String,
    #[serde(default)]
    best_practices: Vec<String>,
}

fn parse_visualization(index: usize, value: serde_json::Value) -> Result<VisualizationSpec, SchemaViolation> {
    let raw: RawVisualization = serde_json::from_value(value)
        .map_err(|e| SchemaViolation::Shape(format!("visualization {}: {}", index, e)))?;

    let viz_type: VizType = raw.viz_type.parse().map_err(|_| {
        SchemaViolation::Shape(format!(
            "visualization {}: viz_type '{}' is not one of {}",
            index,
            raw.viz_type,
            VizType::tag_list()
        ))
    })?;
    require_text(&format!("visualizations[{}].title", index), &raw.title)?;
    require_text(&format!("visualizations[{}].justification", index), &raw.justification)?;

    let bindings = AxisBindings {
        x_axis: normalize_column(raw.x_axis),
        y_axis: normalize_column(raw.y_axis),
        color: normalize_column(raw.color),
        group_by: normalize_column(raw.group_by),
    };
    let (needs_x, needs_y) = viz_type.required_axes();
    if needs_x && bindings.x_axis.is_none() {
        return Err(SchemaViolation::MissingAxis { index, viz_type, axis: "x_axis" });
    }
    if needs_y && bindings.y_axis.is_none() {
        return Err(SchemaViolation::MissingAxis { index, viz_type, axis: "y_axis" });
    }

    Ok(VisualizationSpec {
        viz_type,
        title: raw.title.trim().to_string(),
        bindings,
        justification: raw.justification.trim().to_string(),
        best_practices: raw.best_practices,
    })
}

/// Parses a recommendation reply into an [`AnalysisResult`] for `problem`.
pub fn parse_recommendation(raw: &str, problem: &str) -> Result<AnalysisResult, SchemaViolation> {
    let parsed: RawRecommendation =
        serde_json::from_value(to_json(raw)?).map_err(|e| SchemaViolation::Shape(e.to_string()))?;
    require_text("analysis", &parsed.analysis)?;

    if parsed.visualizations.len() != VISUALIZATION_COUNT {
        return Err(SchemaViolation::Cardinality {
            expected: VISUALIZATION_COUNT,
            found: parsed.visualizations.len(),
        });
    }

    let specs = parsed
        .visualizations
        .into_iter()
        .enumerate()
        .map(|(i, v)| parse_visualization(i + 1, v))
        .collect::<Result<Vec<_>, _>>()?;
    let visualizations: [VisualizationSpec; VISUALIZATION_COUNT] =
        specs.try_into().map_err(|v: Vec<VisualizationSpec>| SchemaViolation::Cardinality {
            expected: VISUALIZATION_COUNT,
            found: v.len(),
        })?;

    Ok(AnalysisResult {
        problem: problem.to_string(),
        analysis: parsed.analysis.trim().to_string(),
        visualizations,
    })
}

/// Checks each visualization's bindings against `table`. Unknown columns are
/// violations; type mismatches are only logged.
pub fn check_bindings(
    result: &AnalysisResult,
    table: &Table,
    thresholds: &ProfileThresholds,
) -> Result<(), SchemaViolation> {
    for (i, spec) in result.visualizations.iter().enumerate() {
        let index = i + 1;
        match validate_visualization_columns_with(table, spec.viz_type, &spec.bindings, thresholds) {
            Ok(()) => {}
            Err(e @ ValidationError::ColumnNotFound { .. }) => {
                return Err(SchemaViolation::UnknownColumn {
                    index,
                    reason: e.to_string(),
                });
            }
            Err(ValidationError::MissingBinding { viz_type, axis }) => {
                return Err(SchemaViolation::MissingAxis { index, viz_type, axis });
            }
            Err(e) => {
                tracing::warn!("visualization {} ({}) accepted despite: {}", index, spec.viz_type, e);
            }
        }
    }
    Ok(())
}

/// A JSON reply shape with its own non-emptiness rules.
pub trait StructuredOutput: DeserializeOwned {
    fn check(&self) -> Result<(), SchemaViolation>;
}

impl StructuredOutput for BusinessUnderstanding {
    fn check(&self) -> Result<(), SchemaViolation> {
        require_text("business_context", &self.business_context)?;
        require_items("hypotheses", &self.hypotheses)?;
        require_items("key_metrics", &self.key_metrics)
    }
}

impl StructuredOutput for FigureInterpretation {
    fn check(&self) -> Result<(), SchemaViolation> {
        require_items("figure_findings", &self.figure_findings)
    }
}

impl StructuredOutput for ExecutiveSynthesis {
    fn check(&self) -> Result<(), SchemaViolation> {
        require_text("executive_summary", &self.executive_summary)?;
        require_items("recommendations", &self.recommendations)
    }
}

pub fn parse_structured<T: StructuredOutput>(raw: &str) -> Result<T, SchemaViolation> {
    let value: T = serde_json::from_value(to_json(raw)?).map_err(|e| SchemaViolation::Shape(e.to_string()))?;
    value.check()?;
    Ok(value)
}
