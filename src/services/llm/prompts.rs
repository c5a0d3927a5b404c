//! Prompt rendering. Every builder is a pure function of its arguments and
//! declares the JSON shape it expects back.

use super::schema::SchemaViolation;
use super::types::{BusinessUnderstanding, FigureInterpretation, VizType};
use crate::services::profiler::{DatasetProfile, SemanticType};

const COMPACT_SAMPLE_CHARS: usize = 200;

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(limit).collect();
        cut.push_str("...");
        cut
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "  - (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("  - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn recommendation_schema() -> String {
    format!(
        r#"{{"analysis":"string","visualizations":[{{"viz_type":"{tags}","title":"string","x_axis":"column|null","y_axis":"column|null","color":"column|null","group_by":"column|null","justification":"string","best_practices":["string"]}}]}}"#,
        tags = VizType::tag_list()
    )
}

fn compact_recommendation(problem: &str, columns: &[(String, SemanticType)], sample: &str) -> String {
    let columns = columns
        .iter()
        .map(|(name, t)| format!("{}:{}", name, t))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Recommend 3 charts.\nPROBLEM: {problem}\nCOLUMNS: {columns}\nSAMPLE:\n{sample}\nJSON only, exactly 3 visualizations, listed columns only:\n{schema}",
        problem = problem,
        columns = columns,
        sample = truncate_chars(sample, COMPACT_SAMPLE_CHARS),
        schema = recommendation_schema(),
    )
}

fn detailed_recommendation(problem: &str, columns: &[(String, SemanticType)], sample: &str) -> String {
    let columns = columns
        .iter()
        .map(|(name, t)| format!("- {}: {}", name, t))
        .collect::<Vec<_>>()
        .join("\n");
    let tags = VizType::tag_list();

    format!(
        r#"You are an experienced data visualization consultant. A user has shared a dataset together with a question they want answered. Study the question and the dataset description below, work out what the user is actually trying to learn, and recommend the charts that will answer it most directly.

USER PROBLEM:
{problem}

DATASET COLUMNS (name: inferred type):
{columns}

SAMPLE ROWS:
{sample}

HOW TO CHOOSE CHARTS:
1. Read the problem carefully and decide which columns it is really about.
2. Recommend EXACTLY 3 visualizations. Each one must answer a different aspect of the problem.
3. Only reference column names that appear in the column list above, spelled exactly as shown.
4. Respect the column types:
   - scatter and line need numeric or datetime columns on both axes.
   - bar and box need one categorical (or boolean) column and one numeric column.
   - histogram needs a single numeric column on x_axis and no y_axis.
   - heatmap summarises correlations between numeric columns and needs no axes.
5. Use color or group_by only when a categorical column adds a useful comparison; otherwise set them to null.
6. For every chart, explain in the justification why it helps answer the problem, and list concrete best practices (labelling, scale choice, ordering, colour use).

ALLOWED viz_type VALUES: {tags}

OUTPUT FORMAT:
Respond with a single JSON object and nothing else. Do not wrap it in markdown. The object must follow this shape exactly:
{{
  "analysis": "A short paragraph describing what the user wants to discover and how the three charts work together",
  "visualizations": [
    {{
      "viz_type": "scatter",
      "title": "Descriptive chart title",
      "x_axis": "column_name",
      "y_axis": "column_name",
      "color": "column_name or null",
      "group_by": null,
      "justification": "Why this chart answers part of the problem",
      "best_practices": ["practice one", "practice two", "practice three"]
    }},
    {{
      "viz_type": "bar",
      "title": "Another descriptive title",
      "x_axis": "categorical_column",
      "y_axis": "numeric_column",
      "color": null,
      "group_by": null,
      "justification": "Why this comparison is useful",
      "best_practices": ["practice one", "practice two"]
    }},
    {{
      "viz_type": "histogram",
      "title": "Distribution title",
      "x_axis": "numeric_column",
      "y_axis": null,
      "color": null,
      "group_by": null,
      "justification": "Why the distribution matters",
      "best_practices": ["practice one", "practice two"]
    }}
  ]
}}

The "visualizations" array must contain exactly 3 objects. Every object must include viz_type, title, justification and the axes its chart type requires. Respond ONLY with the JSON object."#,
        problem = problem,
        columns = columns,
        sample = sample,
        tags = tags,
    )
}

/// Renders the single-shot recommendation request. Compact mode keeps only
/// the problem, column list, a trimmed sample and the output declaration.
pub fn analyze_problem_and_data(
    problem: &str,
    columns: &[(String, SemanticType)],
    sample: &str,
    compact: bool,
) -> String {
    if compact {
        compact_recommendation(problem, columns, sample)
    } else {
        detailed_recommendation(problem, columns, sample)
    }
}

pub fn scaffold_step1(profile: &DatasetProfile, problem: &str, budget_tokens: usize) -> String {
    format!(
        r#"You are a senior BI analyst. Step 1 of 3: business and data understanding.

PROBLEM: {problem}

DATASET PROFILE:
{summary}

Identify the business domain and the decisions this data can inform, 3-5 testable hypotheses grounded in the problem, and the columns that act as key metrics. Reference real column names.

Respond with JSON only:
{{"business_context":"string","hypotheses":["string"],"key_metrics":["string"]}}"#,
        problem = problem,
        summary = profile.summary_for_llm(budget_tokens),
    )
}

/// Step 2 embeds every field of the step 1 result verbatim.
pub fn scaffold_step2(
    profile: &DatasetProfile,
    understanding: &BusinessUnderstanding,
    figure_description: &str,
    budget_tokens: usize,
) -> String {
    format!(
        r#"You are a senior BI analyst. Step 2 of 3: figure interpretation.

DATASET PROFILE:
{summary}

STEP 1 RESULT
Business context: {context}
Hypotheses:
{hypotheses}
Key metrics:
{metrics}

FIGURES:
{figures}

Using the step 1 context, interpret the figures: overall performance, how segments compare, and specific findings per figure (trends, distributions, correlations, anomalies). Reference figures and data points.

Respond with JSON only:
{{"performance_insights":["string"],"segment_analysis":["string"],"figure_findings":["string"]}}"#,
        summary = profile.summary_for_llm(budget_tokens),
        context = understanding.business_context,
        hypotheses = bullet_list(&understanding.hypotheses),
        metrics = bullet_list(&understanding.key_metrics),
        figures = figure_description,
    )
}

pub fn scaffold_step3(
    profile: &DatasetProfile,
    understanding: &BusinessUnderstanding,
    interpretation: &FigureInterpretation,
    budget_tokens: usize,
) -> String {
    format!(
        r#"You are a senior BI analyst writing for executives. Step 3 of 3: synthesis.

DATASET PROFILE:
{summary}

STEP 1 RESULT
Business context: {context}
Hypotheses:
{hypotheses}
Key metrics:
{metrics}

STEP 2 RESULT
Performance insights:
{performance}
Segment analysis:
{segments}
Figure findings:
{findings}

Write a 3-4 sentence executive summary, 3-5 actionable recommendations ranked by impact, the business risks the data reveals, and concrete next steps.

Respond with JSON only:
{{"executive_summary":"string","recommendations":["string"],"risk_factors":["string"],"next_steps":["string"]}}"#,
        summary = profile.summary_for_llm(budget_tokens),
        context = understanding.business_context,
        hypotheses = bullet_list(&understanding.hypotheses),
        metrics = bullet_list(&understanding.key_metrics),
        performance = bullet_list(&interpretation.performance_insights),
        segments = bullet_list(&interpretation.segment_analysis),
        findings = bullet_list(&interpretation.figure_findings),
    )
}

/// Appended once to a prompt whose previous answer failed the schema check.
pub fn corrective_instruction(violation: &SchemaViolation) -> String {
    format!(
        "\n\nCORRECTION: your previous answer was rejected because {}. Reply again with ONLY one JSON object that matches the declared shape exactly, with every required field filled in.",
        violation
    )
}
