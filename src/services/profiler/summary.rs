use std::collections::HashSet;

use super::types::{ColumnProfile, ColumnStats, DatasetProfile};
use crate::models::TIMESTAMP_FORMAT;

const CHARS_PER_TOKEN: usize = 4;
const TOP_CORRELATIONS: usize = 3;

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn column_line(column: &ColumnProfile) -> String {
    let detail = match &column.stats {
        ColumnStats::Numeric(s) => format!(
            ": range [{:.2} - {:.2}], mean {:.2}, std {:.2}",
            s.min, s.max, s.mean, s.std
        ),
        ColumnStats::Categorical(s) => format!(
            ": {} categories, most common: {}",
            s.n_categories,
            s.most_common.as_deref().unwrap_or("N/A")
        ),
        ColumnStats::Datetime(s) => format!(
            ": {} to {}",
            s.min.format(TIMESTAMP_FORMAT),
            s.max.format(TIMESTAMP_FORMAT)
        ),
        ColumnStats::Boolean(s) => format!(": {:.1}% true", s.true_percent),
        ColumnStats::Text(_) => String::new(),
    };

    let mut line = format!("  - {} ({}){}", column.name, column.semantic_type, detail);
    if column.missing_percent > 0.0 {
        line.push_str(&format!(" [{:.1}% missing]", column.missing_percent));
    }
    line
}

impl DatasetProfile {
    /// Relative information score in [0, 1]; lower scores are dropped first
    /// when the summary has to shrink.
    fn informativeness(&self) -> Vec<f64> {
        let max_std = self
            .columns
            .iter()
            .filter_map(|c| match &c.stats {
                ColumnStats::Numeric(s) => Some(s.std),
                _ => None,
            })
            .fold(0.0_f64, f64::max);
        let max_categories = self
            .columns
            .iter()
            .filter_map(|c| match &c.stats {
                ColumnStats::Categorical(s) => Some(s.n_categories),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        self.columns
            .iter()
            .map(|c| match &c.stats {
                ColumnStats::Numeric(s) if max_std > 0.0 => s.std / max_std,
                ColumnStats::Categorical(s) if max_categories > 0 => {
                    s.n_categories as f64 / max_categories as f64
                }
                ColumnStats::Datetime(_) => 1.0,
                _ => 0.0,
            })
            .collect()
    }

    fn render_summary(&self, omitted: &HashSet<usize>) -> String {
        let mut parts = vec![
            format!("Dataset: {} rows x {} columns", self.n_rows, self.n_columns),
            "Columns:".to_string(),
        ];
        parts.extend(
            self.columns
                .iter()
                .enumerate()
                .filter(|(idx, _)| !omitted.contains(idx))
                .map(|(_, c)| column_line(c)),
        );

        if !self.quality.errors.is_empty() {
            parts.push("Data Quality Issues:".to_string());
            parts.extend(self.quality.errors.iter().map(|e| format!("  - {}", e)));
        }

        let kept: HashSet<&str> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| !omitted.contains(idx))
            .map(|(_, c)| c.name.as_str())
            .collect();
        let pairs: Vec<_> = self
            .correlations
            .ranked_pairs()
            .into_iter()
            .filter(|(a, b, _)| kept.contains(a) && kept.contains(b))
            .take(TOP_CORRELATIONS)
            .collect();
        if !pairs.is_empty() {
            parts.push("Top Correlations:".to_string());
            parts.extend(
                pairs
                    .iter()
                    .map(|(a, b, r)| format!("  - {} <-> {}: {:.2}", a, b, r)),
            );
        }

        if !omitted.is_empty() {
            parts.push(format!("(+{} more columns omitted)", omitted.len()));
        }
        parts.join("\n")
    }

    /// Text digest of the profile that fits within `budget_tokens`. Columns
    /// are left out least-informative first (lowest-variance numeric,
    /// lowest-cardinality categorical) until it fits; as a last resort the
    /// text is cut at the budget.
    pub fn summary_for_llm(&self, budget_tokens: usize) -> String {
        let mut omitted = HashSet::new();
        let mut summary = self.render_summary(&omitted);
        if estimate_tokens(&summary) <= budget_tokens {
            return summary;
        }

        let scores = self.informativeness();
        let mut drop_order: Vec<usize> = (0..self.columns.len()).collect();
        // ascending score; on ties the later column goes first
        drop_order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(b.cmp(&a)));

        for idx in drop_order {
            omitted.insert(idx);
            summary = self.render_summary(&omitted);
            if estimate_tokens(&summary) <= budget_tokens {
                tracing::debug!("summary fits after omitting {} columns", omitted.len());
                return summary;
            }
        }

        summary.chars().take(budget_tokens * CHARS_PER_TOKEN).collect()
    }
}
