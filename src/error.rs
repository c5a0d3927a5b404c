use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::llm::types::{PartialScaffold, ScaffoldStage, VizType};
use crate::services::profiler::SemanticType;

/// Structural problems when assembling a [`crate::models::Table`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("column '{column}' has {found} values but the table has {expected} rows")]
    RaggedColumn {
        column: String,
        found: usize,
        expected: usize,
    },
    #[error("column name '{0}' appears more than once")]
    DuplicateColumn(String),
}

/// Failures while turning raw bytes into a table. Always fatal to the request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("file is {size} bytes, which exceeds the {limit} byte size limit")]
    SizeExceeded { size: usize, limit: usize },
    #[error("content could not be decoded as text (tried {tried})")]
    UndecodableContent { tried: String },
    #[error("dataset needs at least {required} columns but only {found} were found")]
    InsufficientColumns { found: usize, required: usize },
    #[error("file contains no data: {0}")]
    EmptyContent(String),
    #[error("malformed content at line {line}: {reason}")]
    MalformedContent { line: u64, reason: String },
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::SizeExceeded { .. } => "size_exceeded",
            IngestError::UndecodableContent { .. } => "undecodable_content",
            IngestError::InsufficientColumns { .. } => "insufficient_columns",
            IngestError::EmptyContent(_) => "empty_content",
            IngestError::MalformedContent { .. } => "malformed_content",
        }
    }
}

/// Column/type/quality rule violations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("column '{column}' not found in dataset (available: {})", available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },
    #[error("{viz_type} requires {axis} to be bound to a column")]
    MissingBinding { viz_type: VizType, axis: &'static str },
    #[error("column '{column}' is {found} but {viz_type} needs {expected} there")]
    TypeMismatch {
        column: String,
        viz_type: VizType,
        expected: &'static str,
        found: SemanticType,
    },
    #[error("{viz_type} needs at least {required} numeric columns but the dataset has {found}")]
    InsufficientNumericColumns {
        viz_type: VizType,
        required: usize,
        found: usize,
    },
    #[error("data quality check failed: {}", errors.join("; "))]
    DataQuality { errors: Vec<String> },
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::ColumnNotFound { .. } => "column_not_found",
            ValidationError::MissingBinding { .. } => "missing_binding",
            ValidationError::TypeMismatch { .. } => "type_mismatch",
            ValidationError::InsufficientNumericColumns { .. } => "insufficient_numeric_columns",
            ValidationError::DataQuality { .. } => "data_quality_error",
        }
    }
}

/// Transport-level failures of the completion service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("authentication with the completion service failed: {0}")]
    Authentication(String),
    #[error("rate limited by the completion service: {0}")]
    RateLimited(String),
    #[error("completion service temporarily unavailable: {0}")]
    TransientService(String),
    #[error("completion service returned a malformed response: {0}")]
    UpstreamMalformed(String),
    #[error("completion service rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("completion request was cancelled")]
    Cancelled,
    #[error("completion failed after {attempts} attempts: {last}")]
    Failed {
        attempts: u32,
        last: Box<CompletionError>,
    },
}

impl CompletionError {
    /// Only rate limiting and transient service errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited(_) | CompletionError::TransientService(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CompletionError::Authentication(_) => "authentication_error",
            CompletionError::RateLimited(_) => "rate_limited",
            CompletionError::TransientService(_) => "transient_service_error",
            CompletionError::UpstreamMalformed(_) => "upstream_malformed",
            CompletionError::Rejected { .. } => "rejected",
            CompletionError::Cancelled => "cancelled",
            CompletionError::Failed { .. } => "completion_failed",
        }
    }
}

/// Errors surfaced by the analyzer for a single structured request.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("analysis generation failed: {reason}")]
    GenerationFailed { reason: String, raw_response: String },
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Validation(e) => e.kind(),
            AnalysisError::Completion(e) => e.kind(),
            AnalysisError::GenerationFailed { .. } => "analysis_generation_failed",
        }
    }
}

/// A scaffold chain aborted at `step`; `partial` holds every step that completed before it.
#[derive(Debug, Error)]
#[error("scaffold {step} failed: {source}")]
pub struct ScaffoldError {
    pub step: ScaffoldStage,
    pub partial: PartialScaffold,
    pub source: AnalysisError,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("HTTP Error: {0}")]
    HttpError(String),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Scaffold(#[from] ScaffoldError),
}

fn analysis_status(error: &AnalysisError) -> StatusCode {
    match error {
        AnalysisError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::Completion(CompletionError::Cancelled) => StatusCode::REQUEST_TIMEOUT,
        AnalysisError::Completion(_) => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisError::GenerationFailed { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match &self {
            AppError::InvalidInput(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "kind": "invalid_input" }),
            ),
            AppError::HttpError(_) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": message, "kind": "http_error" }),
            ),
            AppError::Ingest(e) => {
                let status = match e {
                    IngestError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, json!({ "error": message, "kind": e.kind() }))
            }
            AppError::Validation(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": message, "kind": e.kind() }),
            ),
            AppError::Analysis(e) => {
                let mut body = json!({ "error": message, "kind": e.kind() });
                if let AnalysisError::GenerationFailed { raw_response, .. } = e {
                    body["raw_response"] = json!(raw_response);
                }
                (analysis_status(e), body)
            }
            AppError::Scaffold(e) => (
                analysis_status(&e.source),
                json!({
                    "error": message,
                    "kind": e.source.kind(),
                    "failed_step": e.step,
                    "completed": e.partial,
                }),
            ),
        };

        if status.is_server_error() {
            tracing::error!("{}", message);
        }

        (status, Json(body)).into_response()
    }
}
