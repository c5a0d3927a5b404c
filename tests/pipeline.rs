use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use vizier::error::{AnalysisError, CompletionError};
use vizier::models::Table;
use vizier::services::ingest;
use vizier::services::llm::mock::{MockCompletionService, RecordingSleeper};
use vizier::services::llm::{
    Analyzer, AnalyzerSettings, CompletionClient, ResultCache, RetryPolicy, ScaffoldStage, VizType,
};

const HOUSES: &str = "price,size,rooms,location\n\
    250000,50,2,Paris\n310000,75,3,Lyon\n280000,60,2,Paris\n190000,45,1,Nice\n\
    420000,95,4,Paris\n230000,55,2,Lyon\n360000,80,3,Nice\n300000,70,3,Paris\n\
    210000,48,2,Lyon\n390000,90,4,Nice\n270000,62,2,Paris\n330000,78,3,Lyon\n";

fn viz(viz_type: &str, x: &str, y: &str) -> String {
    format!(
        r#"{{"viz_type":"{viz_type}","title":"{viz_type} view","x_axis":{x},"y_axis":{y},"color":null,"group_by":null,"justification":"answers part of the question","best_practices":["label both axes"]}}"#
    )
}

fn reply(vizzes: &[String]) -> String {
    format!(
        "```json\n{{\"analysis\":\"Size and location drive price\",\"visualizations\":[{}]}}\n```",
        vizzes.join(",")
    )
}

fn three() -> String {
    reply(&[
        viz("scatter", r#""size""#, r#""price""#),
        viz("box_plot", r#""location""#, r#""price""#),
        viz("histogram", r#""price""#, "null"),
    ])
}

fn two() -> String {
    reply(&[
        viz("scatter", r#""size""#, r#""price""#),
        viz("bar", r#""location""#, r#""price""#),
    ])
}

fn houses() -> Table {
    ingest::load(HOUSES.as_bytes(), 10 * 1024 * 1024).unwrap()
}

fn analyzer(mock: Arc<MockCompletionService>) -> Analyzer {
    let client = CompletionClient::new(mock, RetryPolicy::default(), Duration::from_secs(5))
        .with_sleeper(Arc::new(RecordingSleeper::default()));
    Analyzer::new(
        Arc::new(client),
        Arc::new(ResultCache::new()),
        AnalyzerSettings::default(),
    )
}

#[tokio::test]
async fn fenced_reply_with_two_charts_is_corrected_once() {
    let mock = Arc::new(MockCompletionService::with_replies([two(), three()]));
    let analyzer = analyzer(mock.clone());

    let result = assert_ok!(
        analyzer
            .analyze_and_recommend("What drives prices?", &houses(), false, &CancellationToken::new())
            .await
    );
    assert_eq!(result.visualizations.len(), 3);
    assert_eq!(result.visualizations[1].viz_type, VizType::BoxPlot);
    assert_eq!(mock.calls(), 2);
    assert!(mock.prompts()[1].contains("expected exactly 3 visualizations, got 2"));
}

#[tokio::test]
async fn second_malformed_reply_is_fatal_and_carries_the_raw_text() {
    let mock = Arc::new(MockCompletionService::with_replies([two(), two()]));
    let analyzer = analyzer(mock.clone());

    let err = assert_err!(
        analyzer
            .analyze_and_recommend("What drives prices?", &houses(), false, &CancellationToken::new())
            .await
    );
    match err {
        AnalysisError::GenerationFailed { reason, raw_response } => {
            assert!(reason.contains("got 2"), "{reason}");
            assert_eq!(raw_response, two());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mock.calls(), 2);
    assert!(analyzer.cache().is_empty());
}

#[tokio::test]
async fn repeated_requests_cost_one_completion() {
    let mock = Arc::new(MockCompletionService::with_replies([three()]));
    let analyzer = analyzer(mock.clone());
    let cancel = CancellationToken::new();

    let first = assert_ok!(analyzer.analyze_and_recommend("q", &houses(), false, &cancel).await);
    let usage = analyzer.usage();
    let second = assert_ok!(analyzer.analyze_and_recommend("q", &houses(), false, &cancel).await);

    assert_eq!(first, second);
    assert_eq!(mock.calls(), 1);
    assert_eq!(analyzer.usage(), usage);

    analyzer.clear_cache();
    mock.push(Ok(three()));
    assert_ok!(analyzer.analyze_and_recommend("q", &houses(), false, &cancel).await);
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_call() {
    let mock = Arc::new(
        MockCompletionService::with_replies([three()]).with_latency(Duration::from_millis(50)),
    );
    let analyzer = Arc::new(analyzer(mock.clone()));
    let table = Arc::new(houses());

    let calls = (0..4).map(|_| {
        let analyzer = Arc::clone(&analyzer);
        let table = Arc::clone(&table);
        tokio::spawn(async move {
            analyzer
                .analyze_and_recommend("q", &table, false, &CancellationToken::new())
                .await
        })
    });
    let results: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(mock.calls(), 1);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(analyzer.cache().in_flight_len(), 0);
}

#[tokio::test]
async fn cancellation_stops_a_retrying_request() {
    let mock = Arc::new(MockCompletionService::new(
        (0..5).map(|_| Err(CompletionError::RateLimited("slow down".into()))),
    ));
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(60),
    };
    let client = CompletionClient::new(mock.clone(), policy, Duration::from_secs(5));
    let analyzer = Analyzer::new(
        Arc::new(client),
        Arc::new(ResultCache::new()),
        AnalyzerSettings::default(),
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = assert_err!(analyzer.analyze_and_recommend("q", &houses(), false, &cancel).await);
    assert_eq!(err.kind(), "cancelled");
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn scaffold_propagates_business_context_and_reports_partial_failure() {
    let step1 = r#"{"business_context":"Urban residential pricing across three cities","hypotheses":["Larger homes cost more"],"key_metrics":["price","size"]}"#;
    let mock = Arc::new(MockCompletionService::with_replies([step1, "no json here", "{}"]));
    let analyzer = analyzer(mock.clone());

    let err = analyzer
        .run_scaffold("Where should we invest?", &houses(), "Figure 1: price by city", &CancellationToken::new())
        .await
        .unwrap_err();

    let prompts = mock.prompts();
    assert!(prompts[1].contains("Urban residential pricing across three cities"));
    assert_eq!(err.step, ScaffoldStage::Interpretation);
    assert!(err.partial.understanding.is_some());
    assert_eq!(mock.calls(), 3);
}
