use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub const SAMPLE_SIZE: usize = 3;
pub const TOP_VALUES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Numeric,
    Categorical,
    Text,
    Datetime,
    Boolean,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Numeric => "numeric",
            SemanticType::Categorical => "categorical",
            SemanticType::Text => "text",
            SemanticType::Datetime => "datetime",
            SemanticType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heuristic cut-offs used by inference, outlier detection and quality rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileThresholds {
    /// Distinct/rows ratio below which a column is categorical rather than text.
    pub categorical_ratio: f64,
    pub outlier_iqr_factor: f64,
    pub strong_correlation: f64,
    /// Whole-table missing fraction above which the data is unusable.
    pub max_missing_fraction: f64,
    pub warn_missing_fraction: f64,
    pub min_rows: usize,
    pub min_columns: usize,
    pub small_dataset_rows: usize,
}

impl Default for ProfileThresholds {
    fn default() -> Self {
        Self {
            categorical_ratio: 0.5,
            outlier_iqr_factor: 1.5,
            strong_correlation: 0.7,
            max_missing_fraction: 0.5,
            warn_missing_fraction: 0.2,
            min_rows: 3,
            min_columns: 2,
            small_dataset_rows: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub q1: f64,
    pub q3: f64,
    pub has_outliers: bool,
    pub is_continuous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalStats {
    pub n_categories: usize,
    pub top_values: SmallVec<[ValueCount; TOP_VALUES]>,
    pub most_common: Option<String>,
    /// Share of non-missing values taken by `most_common`, in [0, 1].
    pub most_common_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStats {
    pub mean_length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatetimeStats {
    pub min: NaiveDateTime,
    pub max: NaiveDateTime,
    pub range_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BooleanStats {
    pub true_count: usize,
    pub false_count: usize,
    pub true_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnStats {
    Numeric(NumericStats),
    Categorical(CategoricalStats),
    Text(TextStats),
    Datetime(DatetimeStats),
    Boolean(BooleanStats),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub semantic_type: SemanticType,
    pub n_unique: usize,
    pub n_missing: usize,
    pub missing_percent: f64,
    pub sample_values: SmallVec<[String; SAMPLE_SIZE]>,
    pub stats: ColumnStats,
}

/// A Pearson coefficient, or an explicit marker when it cannot be computed
/// (fewer than two paired values, or a zero-variance side).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Correlation {
    Defined(f64),
    Undefined,
}

impl Correlation {
    pub fn value(&self) -> Option<f64> {
        match self {
            Correlation::Defined(r) => Some(*r),
            Correlation::Undefined => None,
        }
    }
}

/// Symmetric matrix over the numeric columns, in table order.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Correlation>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<Correlation> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        Some(self.values[i][j])
    }

    /// Defined off-diagonal pairs ordered by descending |r|; ties keep matrix order.
    pub fn ranked_pairs(&self) -> Vec<(&str, &str, f64)> {
        let mut pairs = Vec::new();
        for i in 0..self.columns.len() {
            for j in (i + 1)..self.columns.len() {
                if let Some(r) = self.values[i][j].value() {
                    pairs.push((self.columns[i].as_str(), self.columns[j].as_str(), r));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.abs().total_cmp(&a.2.abs()));
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrongCorrelation {
    pub column1: String,
    pub column2: String,
    pub correlation: f64,
    pub strength: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGrade {
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQuality {
    pub grade: QualityGrade,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub missing_percent: f64,
    pub n_duplicates: usize,
}

impl DataQuality {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetProfile {
    pub n_rows: usize,
    pub n_columns: usize,
    pub columns: Vec<ColumnProfile>,
    pub correlations: CorrelationMatrix,
    pub strong_correlations: Vec<StrongCorrelation>,
    pub quality: DataQuality,
    pub recommendations: Vec<String>,
}

impl DatasetProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_types(&self) -> Vec<(String, SemanticType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.semantic_type))
            .collect()
    }
}
