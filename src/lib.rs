pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::services::llm::{Analyzer, CompletionClient, OpenAiService, ResultCache};

// Application state
pub struct AppState {
    pub config: Config,
    pub analyzer: Analyzer,
    pub http: Client,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let http = Client::new();
        let service = OpenAiService::new(
            http.clone(),
            config.completion_endpoint.clone(),
            config.openai_key.clone(),
        );
        let client = CompletionClient::new(
            Arc::new(service),
            config.retry.clone(),
            config.completion_timeout,
        );
        let analyzer = Analyzer::new(
            Arc::new(client),
            Arc::new(ResultCache::new()),
            config.analyzer_settings(),
        );
        Self {
            config,
            analyzer,
            http,
        }
    }
}
