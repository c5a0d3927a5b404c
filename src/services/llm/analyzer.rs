use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::cache::{Fingerprint, ResultCache};
use super::client::{CompletionClient, UsageSnapshot};
use super::prompts;
use super::schema::{self, SchemaViolation};
use super::types::{AnalysisResult, CompletionRequest};
use crate::error::{AnalysisError, CompletionError, ValidationError};
use crate::models::Table;
use crate::services::profiler::{self, ProfileThresholds};
use crate::services::validator;

/// Rows of the table shown to the model as a sample.
pub const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub compact: bool,
    pub summary_token_budget: usize,
    pub thresholds: ProfileThresholds,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            compact: true,
            summary_token_budget: 800,
            thresholds: ProfileThresholds::default(),
        }
    }
}

/// Where one structured request currently stands. `Validated` and `Fatal`
/// are the loop's two exits.
#[derive(Debug)]
enum State {
    PromptBuilt,
    AwaitingCompletion,
    ParsingResponse(String),
    RetryableParseFailure { violation: SchemaViolation, raw: String },
}

/// Drives prompt, completion and schema parsing, caching recommendation
/// results by fingerprint.
pub struct Analyzer {
    client: Arc<CompletionClient>,
    cache: Arc<ResultCache>,
    settings: AnalyzerSettings,
}

impl Analyzer {
    pub fn new(client: Arc<CompletionClient>, cache: Arc<ResultCache>, settings: AnalyzerSettings) -> Self {
        Self {
            client,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.client.usage()
    }

    pub fn reset_usage(&self) {
        self.client.reset_usage();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Returns three validated chart recommendations for `problem` over `table`.
    ///
    /// A cached result for the same fingerprint is returned without calling
    /// the completion service unless `force_refresh` is set. Concurrent calls
    /// with one fingerprint are serialized: callers that waited on another take
    /// its outcome, success or failure, so only the first pays for a completion.
    pub async fn analyze_and_recommend(
        &self,
        problem: &str,
        table: &Table,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Arc<AnalysisResult>, AnalysisError> {
        let fingerprint = Fingerprint::compute(problem, table, self.settings.compact);
        if !force_refresh {
            if let Some(hit) = self.cache.get(&fingerprint) {
                tracing::info!("Cache hit for {}", fingerprint);
                return Ok(hit);
            }
        }

        let mut slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CompletionError::Cancelled.into()),
            slot = self.cache.acquire(&fingerprint) => slot,
        };
        if !force_refresh {
            if let Some(hit) = self.cache.get(&fingerprint) {
                tracing::info!("Reusing result computed while waiting on {}", fingerprint);
                return Ok(hit);
            }
            if let Some(outcome) = slot.shared_outcome() {
                tracing::info!("Reusing failed outcome of the request ahead on {}", fingerprint);
                return outcome;
            }
        }

        let outcome = self.recommend_uncached(problem, table, &fingerprint, cancel).await;
        // A cancelled leader says nothing about the request; waiters try for themselves.
        if !matches!(outcome, Err(AnalysisError::Completion(CompletionError::Cancelled))) {
            slot.publish(&outcome);
        }
        outcome
    }

    async fn recommend_uncached(
        &self,
        problem: &str,
        table: &Table,
        fingerprint: &Fingerprint,
        cancel: &CancellationToken,
    ) -> Result<Arc<AnalysisResult>, AnalysisError> {
        let start = Instant::now();
        let quality = validator::check_quality_with(table, &self.settings.thresholds);
        for warning in &quality.warnings {
            tracing::warn!("Data quality: {}", warning);
        }
        if !quality.valid {
            return Err(ValidationError::DataQuality {
                errors: quality.errors,
            }
            .into());
        }

        let profile = profiler::profile_with(table, &self.settings.thresholds);
        let prompt = prompts::analyze_problem_and_data(
            problem,
            &profile.column_types(),
            &table.head_text(SAMPLE_ROWS),
            self.settings.compact,
        );
        tracing::debug!(
            "Recommendation prompt built ({} tokens, compact={})",
            profiler::estimate_tokens(&prompt),
            self.settings.compact
        );

        let thresholds = &self.settings.thresholds;
        let result = self
            .run_structured(prompt, cancel, |raw| {
                let result = schema::parse_recommendation(raw, problem)?;
                schema::check_bindings(&result, table, thresholds)?;
                Ok(result)
            })
            .await?;

        let result = Arc::new(result);
        self.cache.insert(fingerprint.clone(), Arc::clone(&result));
        tracing::info!(
            "Analysis for {} completed in {:?}",
            fingerprint,
            start.elapsed()
        );
        Ok(result)
    }

    fn request(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Sends `prompt` and parses the reply with `parse`. A reply that fails
    /// the schema earns one corrective resend; a second failure is fatal.
    pub(crate) async fn run_structured<T, F>(
        &self,
        mut prompt: String,
        cancel: &CancellationToken,
        parse: F,
    ) -> Result<T, AnalysisError>
    where
        F: Fn(&str) -> Result<T, SchemaViolation>,
    {
        let mut corrected = false;
        let mut state = State::PromptBuilt;

        loop {
            state = match state {
                State::PromptBuilt => {
                    tracing::debug!("prompt ready (corrective={})", corrected);
                    State::AwaitingCompletion
                }
                State::AwaitingCompletion => {
                    let raw = self.client.complete(&self.request(&prompt), cancel).await?;
                    State::ParsingResponse(raw)
                }
                State::ParsingResponse(raw) => match parse(&raw) {
                    Ok(value) => {
                        tracing::debug!("response validated");
                        return Ok(value);
                    }
                    Err(violation) => State::RetryableParseFailure { violation, raw },
                },
                State::RetryableParseFailure { violation, raw } => {
                    if corrected {
                        tracing::error!("response rejected after corrective retry: {}", violation);
                        return Err(AnalysisError::GenerationFailed {
                            reason: violation.to_string(),
                            raw_response: raw,
                        });
                    }
                    tracing::warn!("response rejected ({}), retrying with a correction", violation);
                    corrected = true;
                    prompt.push_str(&prompts::corrective_instruction(&violation));
                    State::PromptBuilt
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, Value};
    use crate::services::llm::client::RetryPolicy;
    use crate::services::llm::mock::MockCompletionService;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const GOOD: &str = r#"{"analysis":"Size drives price","visualizations":[
        {"viz_type":"scatter","title":"Price vs size","x_axis":"size","y_axis":"price","justification":"direct relation","best_practices":["label axes"]},
        {"viz_type":"bar","title":"Price by city","x_axis":"city","y_axis":"price","justification":"compare cities","best_practices":[]},
        {"viz_type":"histogram","title":"Price spread","x_axis":"price","y_axis":null,"justification":"distribution","best_practices":[]}]}"#;

    fn houses() -> Table {
        Table::new(vec![
            Column::new("price", [100, 200, 150, 120, 180, 90].iter().map(|&v| Value::Int(v)).collect()),
            Column::new("size", [50, 75, 60, 55, 70, 40].iter().map(|&v| Value::Int(v)).collect()),
            Column::new(
                "city",
                ["Paris", "Lyon", "Paris", "Paris", "Lyon", "Lyon"]
                    .iter()
                    .map(|s| Value::Text(s.to_string()))
                    .collect(),
            ),
        ])
        .unwrap()
    }

    fn analyzer(mock: Arc<MockCompletionService>) -> Analyzer {
        let client = CompletionClient::new(mock, RetryPolicy::default(), Duration::from_secs(5));
        Analyzer::new(
            Arc::new(client),
            Arc::new(ResultCache::new()),
            AnalyzerSettings::default(),
        )
    }

    #[tokio::test]
    async fn second_identical_call_is_served_from_cache() {
        let mock = Arc::new(MockCompletionService::with_replies([GOOD]));
        let analyzer = analyzer(mock.clone());
        let cancel = CancellationToken::new();

        let first = assert_ok!(analyzer.analyze_and_recommend("q", &houses(), false, &cancel).await);
        let second = assert_ok!(analyzer.analyze_and_recommend("q", &houses(), false, &cancel).await);
        assert_eq!(first, second);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_the_cache() {
        let mock = Arc::new(MockCompletionService::with_replies([GOOD, GOOD]));
        let analyzer = analyzer(mock.clone());
        let cancel = CancellationToken::new();

        assert_ok!(analyzer.analyze_and_recommend("q", &houses(), false, &cancel).await);
        assert_ok!(analyzer.analyze_and_recommend("q", &houses(), true, &cancel).await);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn unknown_column_earns_one_correction() {
        let ghost = GOOD.replace("\"city\"", "\"district\"");
        let mock = Arc::new(MockCompletionService::with_replies([ghost.as_str(), GOOD]));
        let analyzer = analyzer(mock.clone());

        let result = assert_ok!(
            analyzer
                .analyze_and_recommend("q", &houses(), false, &CancellationToken::new())
                .await
        );
        assert_eq!(result.visualizations[1].bindings.x_axis.as_deref(), Some("city"));
        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("CORRECTION"));
        assert!(prompts[1].contains("district"));
    }

    #[tokio::test]
    async fn poor_quality_blocks_before_any_completion() {
        let sparse = Table::new(vec![
            Column::new("a", vec![Value::Int(1), Value::Missing, Value::Missing, Value::Missing]),
            Column::new("b", vec![Value::Missing, Value::Missing, Value::Int(3), Value::Missing]),
        ])
        .unwrap();
        let mock = Arc::new(MockCompletionService::with_replies([GOOD]));
        let analyzer = analyzer(mock.clone());

        let err = assert_err!(
            analyzer
                .analyze_and_recommend("q", &sparse, false, &CancellationToken::new())
                .await
        );
        assert_eq!(err.kind(), "data_quality_error");
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn transport_failures_are_not_cached() {
        let mock = Arc::new(MockCompletionService::new(vec![Err(
            CompletionError::Authentication("bad key".into()),
        )]));
        let analyzer = analyzer(mock.clone());
        let err = assert_err!(
            analyzer
                .analyze_and_recommend("q", &houses(), false, &CancellationToken::new())
                .await
        );
        assert_eq!(err.kind(), "authentication_error");
        assert!(analyzer.cache().is_empty());
    }

    #[tokio::test]
    async fn waiter_takes_the_leaders_failure_without_calling_again() {
        let mock = Arc::new(
            MockCompletionService::new(vec![Err(CompletionError::Authentication("bad key".into()))])
                .with_latency(Duration::from_millis(30)),
        );
        let analyzer = analyzer(mock.clone());
        let table = houses();
        let (leader, waiter) = (CancellationToken::new(), CancellationToken::new());

        let (first, second) = tokio::join!(
            analyzer.analyze_and_recommend("q", &table, false, &leader),
            analyzer.analyze_and_recommend("q", &table, false, &waiter),
        );
        assert_eq!(assert_err!(first).kind(), "authentication_error");
        assert_eq!(assert_err!(second).kind(), "authentication_error");
        assert_eq!(mock.calls(), 1);
        assert_eq!(analyzer.cache().in_flight_len(), 0);
    }

    #[tokio::test]
    async fn cancelled_leader_leaves_the_waiter_to_try_itself() {
        let mock = Arc::new(MockCompletionService::with_replies([GOOD]).with_latency(Duration::from_millis(50)));
        let analyzer = analyzer(mock.clone());
        let table = houses();
        let (leader, waiter) = (CancellationToken::new(), CancellationToken::new());
        let canceller = leader.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let (first, second) = tokio::join!(
            analyzer.analyze_and_recommend("q", &table, false, &leader),
            analyzer.analyze_and_recommend("q", &table, false, &waiter),
        );
        assert_eq!(assert_err!(first).kind(), "cancelled");
        assert_eq!(assert_ok!(second).visualizations.len(), 3);
        assert_eq!(mock.calls(), 2);
    }
}
