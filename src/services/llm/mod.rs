//! Completion transport, prompt rendering, response schema and the analyzer
//! that ties them together.

pub mod analyzer;
pub mod cache;
pub mod client;
pub mod mock;
pub mod openai;
pub mod prompts;
pub mod scaffold;
pub mod schema;
pub mod types;

pub use analyzer::{Analyzer, AnalyzerSettings};
pub use cache::{Fingerprint, ResultCache};
pub use client::{CompletionClient, CompletionService, RetryPolicy, Sleeper, UsageSnapshot};
pub use openai::OpenAiService;
pub use types::*;
