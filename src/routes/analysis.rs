use axum::{
    extract::State,
    http::{Method, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::{AppError, IngestError},
    models::Table,
    services::{
        ingest,
        llm::{AnalysisResult, ScaffoldReport, UsageSnapshot},
        profiler::{self, DatasetProfile},
        validator::{self, QualityReport},
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/analysis/recommend", post(recommend))
        .route("/analysis/scaffold", post(scaffold))
        .route("/analysis/quality", post(quality))
        .route("/analysis/cache", delete(clear_cache))
        .route("/analysis/usage", get(usage).delete(reset_usage))
        .layer(cors)
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    problem: String,
    file_url: String,
    #[serde(default)]
    force_refresh: bool,
    #[serde(default)]
    drop_missing: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScaffoldRequest {
    problem: String,
    file_url: String,
    figure_description: String,
    #[serde(default)]
    drop_missing: bool,
}

#[derive(Debug, Deserialize)]
pub struct QualityRequest {
    file_url: String,
    #[serde(default)]
    drop_missing: bool,
}

#[derive(Debug, Serialize)]
pub struct QualityResponse {
    quality: QualityReport,
    profile: DatasetProfile,
    summary: String,
}

/// Downloads `url`, refusing bodies larger than `limit` bytes. The limit is
/// enforced while reading, so a body without `Content-Length` is cut off too.
pub async fn load_file_from_url(http: &Client, url: &str, limit: usize) -> Result<Bytes, AppError> {
    let mut response = http
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::HttpError(format!("Failed to fetch file: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::HttpError(format!(
            "Failed to fetch file. Status: {}",
            response.status()
        )));
    }

    let declared = response
        .content_length()
        .map(|size| usize::try_from(size).unwrap_or(usize::MAX));
    if let Some(size) = declared {
        if size > limit {
            return Err(IngestError::SizeExceeded { size, limit }.into());
        }
    }

    let mut body = BytesMut::with_capacity(declared.unwrap_or(0));
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AppError::HttpError(format!("Failed to read response bytes: {}", e)))?
    {
        let size = body.len() + chunk.len();
        if size > limit {
            tracing::warn!("Download from {} passed the {} byte limit, aborting", url, limit);
            return Err(IngestError::SizeExceeded { size, limit }.into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

async fn fetch_table(state: &AppState, url: &str, drop_missing: bool) -> Result<Table, AppError> {
    let download_start = std::time::Instant::now();
    let content = load_file_from_url(&state.http, url, state.config.max_file_size).await?;
    tracing::info!(
        "File downloaded, size: {}KB, took: {:?}",
        content.len() / 1024,
        download_start.elapsed()
    );

    let table = ingest::load(&content, state.config.max_file_size)?;
    Ok(ingest::clean(&table, drop_missing))
}

fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        Err(AppError::InvalidInput(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

async fn recommend(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecommendRequest>,
) -> Result<Json<AnalysisResult>, AppError> {
    require("problem", &request.problem)?;
    let start = std::time::Instant::now();

    // Dropping the handler future (client gone) cancels any pending retries.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let table = fetch_table(&state, &request.file_url, request.drop_missing).await?;
    let result = state
        .analyzer
        .analyze_and_recommend(&request.problem, &table, request.force_refresh, &cancel)
        .await?;

    tracing::info!("Recommendation served in {:?}", start.elapsed());
    Ok(Json(AnalysisResult::clone(&result)))
}

async fn scaffold(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScaffoldRequest>,
) -> Result<Json<ScaffoldReport>, AppError> {
    require("problem", &request.problem)?;
    require("figure_description", &request.figure_description)?;

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let table = fetch_table(&state, &request.file_url, request.drop_missing).await?;
    let report = state
        .analyzer
        .run_scaffold(&request.problem, &table, &request.figure_description, &cancel)
        .await?;
    Ok(Json(report))
}

async fn quality(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QualityRequest>,
) -> Result<Json<QualityResponse>, AppError> {
    let table = fetch_table(&state, &request.file_url, request.drop_missing).await?;
    let thresholds = &state.analyzer.settings().thresholds;
    let profile = profiler::profile_with(&table, thresholds);

    Ok(Json(QualityResponse {
        quality: validator::check_quality_with(&table, thresholds),
        summary: profile.summary_for_llm(state.config.summary_token_budget),
        profile,
    }))
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.analyzer.clear_cache();
    StatusCode::NO_CONTENT
}

async fn usage(State(state): State<Arc<AppState>>) -> Json<UsageSnapshot> {
    Json(state.analyzer.usage())
}

async fn reset_usage(State(state): State<Arc<AppState>>) -> Json<UsageSnapshot> {
    let before = state.analyzer.usage();
    state.analyzer.reset_usage();
    tracing::info!("Token usage reset after {} calls", before.calls);
    Json(before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::net::SocketAddr;

    const CHUNK: usize = 1024;

    /// Serves `chunks` chunks of `CHUNK` bytes as a streamed body, which
    /// goes out chunked with no `Content-Length` header.
    async fn serve_streamed(chunks: usize) -> SocketAddr {
        let app = Router::new().route(
            "/file",
            get(move || async move {
                let parts = (0..chunks).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![b'a'; CHUNK])));
                Body::from_stream(futures::stream::iter(parts))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn streamed_body_over_the_limit_is_cut_off() {
        let addr = serve_streamed(4).await;
        let err = load_file_from_url(&Client::new(), &format!("http://{}/file", addr), CHUNK)
            .await
            .unwrap_err();
        match err {
            AppError::Ingest(IngestError::SizeExceeded { size, limit }) => {
                assert_eq!(limit, CHUNK);
                assert!(size > CHUNK, "stopped at {size} bytes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn streamed_body_within_the_limit_is_returned_whole() {
        let addr = serve_streamed(2).await;
        let body = load_file_from_url(&Client::new(), &format!("http://{}/file", addr), 4 * CHUNK)
            .await
            .unwrap();
        assert_eq!(body.len(), 2 * CHUNK);
    }
}
