//! Table quality gate and chart-binding checks.

use serde::Serialize;

use crate::error::ValidationError;
use crate::models::Table;
use crate::services::llm::types::{AxisBindings, VizType};
use crate::services::profiler::{assess_quality, infer_type, ProfileThresholds, SemanticType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub fn check_quality(table: &Table) -> QualityReport {
    check_quality_with(table, &ProfileThresholds::default())
}

/// Same rules the profiler grades with; only the shape of the answer differs.
pub fn check_quality_with(table: &Table, thresholds: &ProfileThresholds) -> QualityReport {
    let quality = assess_quality(table, thresholds);
    QualityReport {
        valid: quality.is_valid(),
        warnings: quality.warnings,
        errors: quality.errors,
    }
}

fn is_numeric(t: SemanticType) -> bool {
    t == SemanticType::Numeric
}

fn is_grouping(t: SemanticType) -> bool {
    matches!(t, SemanticType::Categorical | SemanticType::Boolean)
}

pub fn validate_visualization_columns(
    table: &Table,
    viz_type: VizType,
    bindings: &AxisBindings,
) -> Result<(), ValidationError> {
    validate_visualization_columns_with(table, viz_type, bindings, &ProfileThresholds::default())
}

/// Checks that every bound column exists, then that the bound axes suit `viz_type`.
pub fn validate_visualization_columns_with(
    table: &Table,
    viz_type: VizType,
    bindings: &AxisBindings,
    thresholds: &ProfileThresholds,
) -> Result<(), ValidationError> {
    for (_, name) in bindings.referenced() {
        if table.column(name).is_none() {
            return Err(ValidationError::ColumnNotFound {
                column: name.to_string(),
                available: table.column_names(),
            });
        }
    }

    let (needs_x, needs_y) = viz_type.required_axes();
    if needs_x && bindings.x_axis.is_none() {
        return Err(ValidationError::MissingBinding {
            viz_type,
            axis: "x_axis",
        });
    }
    if needs_y && bindings.y_axis.is_none() {
        return Err(ValidationError::MissingBinding {
            viz_type,
            axis: "y_axis",
        });
    }

    // Existence was checked above, so lookups only fail for unbound axes.
    let type_of = |name: &Option<String>| {
        name.as_deref()
            .and_then(|n| table.column(n))
            .map(|c| (c.name.clone(), infer_type(c, table.n_rows(), thresholds)))
    };
    let mismatch = |(column, found): (String, SemanticType), expected: &'static str| {
        ValidationError::TypeMismatch {
            column,
            viz_type,
            expected,
            found,
        }
    };
    let x = type_of(&bindings.x_axis);
    let y = type_of(&bindings.y_axis);

    match viz_type {
        VizType::Scatter | VizType::Line => {
            for axis in [x, y].into_iter().flatten() {
                if !matches!(axis.1, SemanticType::Numeric | SemanticType::Datetime) {
                    return Err(mismatch(axis, "numeric or datetime"));
                }
            }
        }
        VizType::Bar | VizType::BoxPlot => {
            if let (Some(x), Some(y)) = (x, y) {
                let ok = (is_grouping(x.1) && is_numeric(y.1)) || (is_numeric(x.1) && is_grouping(y.1));
                if !ok {
                    return Err(if is_numeric(y.1) {
                        mismatch(x, "categorical or boolean")
                    } else if is_numeric(x.1) {
                        mismatch(y, "categorical or boolean")
                    } else {
                        mismatch(y, "numeric")
                    });
                }
            }
        }
        VizType::Histogram => {
            if let Some(x) = x {
                if !is_numeric(x.1) {
                    return Err(mismatch(x, "numeric"));
                }
            }
        }
        VizType::Heatmap => {
            for axis in [x, y].into_iter().flatten() {
                if !is_numeric(axis.1) {
                    return Err(mismatch(axis, "numeric"));
                }
            }
            let found = table
                .columns()
                .iter()
                .filter(|c| is_numeric(infer_type(c, table.n_rows(), thresholds)))
                .count();
            if found < 2 {
                return Err(ValidationError::InsufficientNumericColumns {
                    viz_type,
                    required: 2,
                    found,
                });
            }
        }
    }

    Ok(())
}
