//! Deterministic statistical profile of a [`Table`].

pub mod infer;
pub mod stats;
pub mod summary;
pub mod types;

use std::time::Instant;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::models::{Column, Table};
pub use infer::infer_type;
pub use summary::estimate_tokens;
pub use types::*;

fn profile_column(column: &Column, n_rows: usize, thresholds: &ProfileThresholds) -> ColumnProfile {
    let semantic_type = infer_type(column, n_rows, thresholds);
    let n_missing = column.missing_count();

    let stats = match semantic_type {
        SemanticType::Numeric => stats::numeric_stats(column, thresholds.outlier_iqr_factor)
            .map(ColumnStats::Numeric),
        SemanticType::Datetime => stats::datetime_stats(column).map(ColumnStats::Datetime),
        SemanticType::Boolean => Some(ColumnStats::Boolean(stats::boolean_stats(column, n_rows))),
        SemanticType::Categorical => Some(ColumnStats::Categorical(stats::categorical_stats(column))),
        SemanticType::Text => None,
    }
    .unwrap_or_else(|| ColumnStats::Text(stats::text_stats(column)));

    let sample_values: SmallVec<[String; SAMPLE_SIZE]> = column
        .values
        .iter()
        .filter(|v| !v.is_missing())
        .take(SAMPLE_SIZE)
        .map(|v| v.to_string())
        .collect();

    ColumnProfile {
        name: column.name.clone(),
        semantic_type,
        n_unique: column.distinct_count(),
        n_missing,
        missing_percent: if n_rows == 0 {
            0.0
        } else {
            n_missing as f64 / n_rows as f64 * 100.0
        },
        sample_values,
        stats,
    }
}

fn column_types(table: &Table, thresholds: &ProfileThresholds) -> Vec<SemanticType> {
    table
        .columns()
        .par_iter()
        .map(|c| infer_type(c, table.n_rows(), thresholds))
        .collect()
}

fn quality_from_types(
    table: &Table,
    types: &[SemanticType],
    thresholds: &ProfileThresholds,
) -> DataQuality {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let cells = table.n_rows() * table.n_columns();
    let missing_fraction = if cells == 0 {
        0.0
    } else {
        table.missing_cells() as f64 / cells as f64
    };
    let missing_percent = missing_fraction * 100.0;

    if missing_fraction > thresholds.max_missing_fraction {
        errors.push(format!(
            "High missing values: {:.1}% of cells are missing (limit {:.0}%)",
            missing_percent,
            thresholds.max_missing_fraction * 100.0
        ));
    } else if missing_fraction > thresholds.warn_missing_fraction {
        warnings.push(format!("Moderate missing values: {:.1}%", missing_percent));
    }

    if table.n_rows() < thresholds.min_rows {
        errors.push(format!(
            "Dataset has {} rows, fewer than the minimum of {}",
            table.n_rows(),
            thresholds.min_rows
        ));
    } else if table.n_rows() < thresholds.small_dataset_rows {
        warnings.push(format!("Small dataset: only {} rows", table.n_rows()));
    }

    if table.n_columns() < thresholds.min_columns {
        errors.push(format!(
            "Dataset has {} columns, fewer than the minimum of {}",
            table.n_columns(),
            thresholds.min_columns
        ));
    }

    let n_duplicates = table.duplicate_row_count();
    if n_duplicates > 0 {
        warnings.push(format!("Duplicate rows found: {}", n_duplicates));
    }

    for column in table.columns() {
        if column.distinct_count() == 1 {
            warnings.push(format!("Column '{}' has only one unique value", column.name));
        }
    }

    if !types.contains(&SemanticType::Numeric) {
        warnings.push("No numeric columns found".to_string());
    }

    let grade = if !errors.is_empty() {
        QualityGrade::Poor
    } else if !warnings.is_empty() {
        QualityGrade::Fair
    } else {
        QualityGrade::Good
    };

    DataQuality {
        grade,
        warnings,
        errors,
        missing_percent,
        n_duplicates,
    }
}

/// Quality verdict for `table`. Shared by the profiler and the validator.
pub fn assess_quality(table: &Table, thresholds: &ProfileThresholds) -> DataQuality {
    quality_from_types(table, &column_types(table, thresholds), thresholds)
}

fn recommendations(columns: &[ColumnProfile], has_missing: bool) -> Vec<String> {
    let count = |t: SemanticType| columns.iter().filter(|c| c.semantic_type == t).count();
    let numeric = count(SemanticType::Numeric);
    let grouping = count(SemanticType::Categorical) + count(SemanticType::Boolean);
    let datetime = count(SemanticType::Datetime);

    let mut recs = Vec::new();
    if numeric >= 2 {
        recs.push("Consider scatter plots to explore relationships between numeric variables".to_string());
        recs.push("Correlation heatmap could reveal patterns between numeric columns".to_string());
    }
    if numeric >= 1 && grouping >= 1 {
        recs.push("Box plots or bar charts can compare numeric values across categories".to_string());
    }
    if numeric >= 1 {
        recs.push("Histograms can show distribution of numeric variables".to_string());
    }
    if datetime >= 1 && numeric >= 1 {
        recs.push("Line charts are ideal for showing trends over time".to_string());
    }
    if has_missing {
        recs.push("Consider handling missing values before visualization".to_string());
    }
    recs
}

pub fn profile(table: &Table) -> DatasetProfile {
    profile_with(table, &ProfileThresholds::default())
}

pub fn profile_with(table: &Table, thresholds: &ProfileThresholds) -> DatasetProfile {
    let start = Instant::now();
    let n_rows = table.n_rows();

    let columns: Vec<ColumnProfile> = table
        .columns()
        .par_iter()
        .map(|c| profile_column(c, n_rows, thresholds))
        .collect();

    let numeric: Vec<&Column> = table
        .columns()
        .iter()
        .zip(&columns)
        .filter(|(_, p)| p.semantic_type == SemanticType::Numeric)
        .map(|(c, _)| c)
        .collect();
    let correlations = stats::correlation_matrix(&numeric);

    let strong_correlations = correlations
        .ranked_pairs()
        .into_iter()
        .filter(|(_, _, r)| r.abs() > thresholds.strong_correlation)
        .map(|(a, b, r)| StrongCorrelation {
            column1: a.to_string(),
            column2: b.to_string(),
            correlation: r,
            strength: if r > 0.0 { "strong positive" } else { "strong negative" },
        })
        .collect();

    let types: Vec<SemanticType> = columns.iter().map(|c| c.semantic_type).collect();
    let quality = quality_from_types(table, &types, thresholds);
    let recommendations = recommendations(&columns, table.missing_cells() > 0);

    tracing::info!(
        "Profiled {} columns x {} rows in {:?} (quality {:?})",
        table.n_columns(),
        n_rows,
        start.elapsed(),
        quality.grade
    );

    DatasetProfile {
        n_rows,
        n_columns: table.n_columns(),
        columns,
        correlations,
        strong_correlations,
        quality,
        recommendations,
    }
}
