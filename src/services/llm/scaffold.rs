//! The three-step BI scaffold. Each step takes the earlier results as
//! immutable inputs and returns a fresh value; the chain stops at the first
//! fatal step.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::analyzer::Analyzer;
use super::prompts;
use super::schema::parse_structured;
use super::types::{
    BusinessUnderstanding, ExecutiveSynthesis, FigureInterpretation, PartialScaffold,
    ScaffoldReport, ScaffoldStage,
};
use crate::error::{AnalysisError, ScaffoldError};
use crate::models::Table;
use crate::services::profiler::{self, DatasetProfile};

impl Analyzer {
    pub async fn scaffold_understanding(
        &self,
        profile: &DatasetProfile,
        problem: &str,
        cancel: &CancellationToken,
    ) -> Result<BusinessUnderstanding, AnalysisError> {
        let prompt = prompts::scaffold_step1(profile, problem, self.settings().summary_token_budget);
        self.run_structured(prompt, cancel, parse_structured::<BusinessUnderstanding>).await
    }

    pub async fn scaffold_interpretation(
        &self,
        profile: &DatasetProfile,
        understanding: &BusinessUnderstanding,
        figure_description: &str,
        cancel: &CancellationToken,
    ) -> Result<FigureInterpretation, AnalysisError> {
        let prompt = prompts::scaffold_step2(
            profile,
            understanding,
            figure_description,
            self.settings().summary_token_budget,
        );
        self.run_structured(prompt, cancel, parse_structured::<FigureInterpretation>).await
    }

    pub async fn scaffold_synthesis(
        &self,
        profile: &DatasetProfile,
        understanding: &BusinessUnderstanding,
        interpretation: &FigureInterpretation,
        cancel: &CancellationToken,
    ) -> Result<ExecutiveSynthesis, AnalysisError> {
        let prompt = prompts::scaffold_step3(
            profile,
            understanding,
            interpretation,
            self.settings().summary_token_budget,
        );
        self.run_structured(prompt, cancel, parse_structured::<ExecutiveSynthesis>).await
    }

    /// Runs all three steps in order. On failure the error names the step
    /// and carries whatever earlier steps produced.
    pub async fn run_scaffold(
        &self,
        problem: &str,
        table: &Table,
        figure_description: &str,
        cancel: &CancellationToken,
    ) -> Result<ScaffoldReport, ScaffoldError> {
        let start = Instant::now();
        let profile = profiler::profile_with(table, &self.settings().thresholds);
        let mut partial = PartialScaffold::default();

        let understanding = self
            .scaffold_understanding(&profile, problem, cancel)
            .await
            .map_err(|source| abort(ScaffoldStage::Understanding, &partial, source))?;
        partial.understanding = Some(understanding.clone());
        tracing::info!("Scaffold {} complete", ScaffoldStage::Understanding);

        let interpretation = self
            .scaffold_interpretation(&profile, &understanding, figure_description, cancel)
            .await
            .map_err(|source| abort(ScaffoldStage::Interpretation, &partial, source))?;
        partial.interpretation = Some(interpretation.clone());
        tracing::info!("Scaffold {} complete", ScaffoldStage::Interpretation);

        let synthesis = self
            .scaffold_synthesis(&profile, &understanding, &interpretation, cancel)
            .await
            .map_err(|source| abort(ScaffoldStage::Synthesis, &partial, source))?;

        tracing::info!("Scaffold finished in {:?}", start.elapsed());
        Ok(ScaffoldReport {
            problem: problem.to_string(),
            understanding,
            interpretation,
            synthesis,
        })
    }
}

fn abort(step: ScaffoldStage, partial: &PartialScaffold, source: AnalysisError) -> ScaffoldError {
    tracing::error!("Scaffold {} failed: {}", step, source);
    ScaffoldError {
        step,
        partial: partial.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::models::{Column, Value};
    use crate::services::llm::analyzer::AnalyzerSettings;
    use crate::services::llm::cache::ResultCache;
    use crate::services::llm::client::{CompletionClient, RetryPolicy};
    use crate::services::llm::mock::MockCompletionService;

    const STEP1: &str = r#"{"business_context":"Regional retail sales","hypotheses":["North outsells South"],"key_metrics":["revenue"]}"#;
    const STEP2: &str = r#"{"performance_insights":["Revenue is flat"],"segment_analysis":["North leads"],"figure_findings":["Figure 1 shows a plateau"]}"#;
    const STEP3: &str = r#"{"executive_summary":"Sales plateaued.","recommendations":["Expand South"],"risk_factors":["Seasonality"],"next_steps":["Collect Q4 data"]}"#;

    fn sales() -> Table {
        Table::new(vec![
            Column::new("revenue", [10, 12, 11, 15, 13].iter().map(|&v| Value::Int(v)).collect()),
            Column::new(
                "region",
                ["North", "South", "North", "North", "South"]
                    .iter()
                    .map(|s| Value::Text(s.to_string()))
                    .collect(),
            ),
        ])
        .unwrap()
    }

    fn analyzer(mock: Arc<MockCompletionService>) -> Analyzer {
        let client = CompletionClient::new(mock, RetryPolicy::default(), Duration::from_secs(5));
        Analyzer::new(Arc::new(client), Arc::new(ResultCache::new()), AnalyzerSettings::default())
    }

    #[tokio::test]
    async fn each_step_feeds_the_next() {
        let mock = Arc::new(MockCompletionService::with_replies([STEP1, STEP2, STEP3]));
        let report = analyzer(mock.clone())
            .run_scaffold("Why is revenue flat?", &sales(), "Figure 1: revenue by month", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.synthesis.recommendations, vec!["Expand South".to_string()]);
        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("Regional retail sales"));
        assert!(prompts[1].contains("Figure 1: revenue by month"));
        assert!(prompts[2].contains("Regional retail sales"));
        assert!(prompts[2].contains("Figure 1 shows a plateau"));
    }

    #[tokio::test]
    async fn failed_step_keeps_earlier_results() {
        let mock = Arc::new(MockCompletionService::with_replies([STEP1, "not json", "still not json"]));
        let err = analyzer(mock.clone())
            .run_scaffold("q", &sales(), "figures", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.step, ScaffoldStage::Interpretation);
        assert_eq!(
            err.partial.understanding.as_ref().map(|u| u.business_context.as_str()),
            Some("Regional retail sales")
        );
        assert!(err.partial.interpretation.is_none());
        assert_eq!(err.source.kind(), "analysis_generation_failed");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn synthesis_failure_keeps_both_earlier_steps() {
        let mock = Arc::new(MockCompletionService::with_replies([STEP1, STEP2, "nope", "nope again"]));
        let err = analyzer(mock.clone())
            .run_scaffold("q", &sales(), "figures", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.step, ScaffoldStage::Synthesis);
        assert!(err.partial.understanding.is_some());
        assert_eq!(
            err.partial.interpretation.as_ref().map(|i| i.segment_analysis.clone()),
            Some(vec!["North leads".to_string()])
        );
        assert_eq!(err.source.kind(), "analysis_generation_failed");
        assert_eq!(mock.calls(), 4);
    }
}
