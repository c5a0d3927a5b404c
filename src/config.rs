use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use dotenvy::dotenv;

use crate::services::llm::openai::DEFAULT_ENDPOINT;
use crate::services::llm::{AnalyzerSettings, RetryPolicy};
use crate::services::profiler::ProfileThresholds;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_key: String,
    pub completion_endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub completion_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_file_size: usize,
    pub summary_token_budget: usize,
    pub compact_prompts: bool,
    pub bind_addr: SocketAddr,
}

/// Parses `raw` for variable `name`, falling back to `default` when unset or blank.
fn parse_value<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", name, value, e)),
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(name, std::env::var(name).ok(), default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let openai_key = std::env::var("OPENAI_API_KEY")
            .map_err(|e| anyhow!("Failed to load OPENAI_API_KEY: {}", e))?;

        let temperature: f32 = env_or("COMPLETION_TEMPERATURE", 0.7)?;
        if !(0.0..=1.0).contains(&temperature) {
            bail!("Invalid value for COMPLETION_TEMPERATURE: {} is outside [0, 1]", temperature);
        }
        let max_attempts: u32 = env_or("RETRY_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            bail!("Invalid value for RETRY_MAX_ATTEMPTS: at least one attempt is required");
        }

        Ok(Config {
            openai_key,
            completion_endpoint: env_or("COMPLETION_ENDPOINT", DEFAULT_ENDPOINT.to_string())?,
            model: env_or("COMPLETION_MODEL", "gpt-4o-mini".to_string())?,
            temperature,
            max_tokens: env_or("COMPLETION_MAX_TOKENS", 2000)?,
            completion_timeout: Duration::from_secs(env_or("COMPLETION_TIMEOUT_SECS", 60)?),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(env_or("RETRY_BASE_DELAY_MS", 500)?),
                max_delay: Duration::from_millis(env_or("RETRY_MAX_DELAY_MS", 30_000)?),
            },
            max_file_size: env_or("MAX_FILE_SIZE", default_max_file_size())?,
            summary_token_budget: env_or("SUMMARY_TOKEN_BUDGET", 800)?,
            compact_prompts: env_or("COMPACT_PROMPTS", true)?,
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
        })
    }

    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            compact: self.compact_prompts,
            summary_token_budget: self.summary_token_budget,
            thresholds: ProfileThresholds::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_and_blank_values_use_the_default() {
        assert_eq!(parse_value("MAX_FILE_SIZE", None, 10usize).unwrap(), 10);
        assert_eq!(parse_value("MAX_FILE_SIZE", Some("  ".into()), 10usize).unwrap(), 10);
        assert_eq!(parse_value("MAX_FILE_SIZE", Some(" 42 ".into()), 10usize).unwrap(), 42);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = parse_value("COMPACT_PROMPTS", Some("maybe".into()), true).unwrap_err();
        assert!(err.to_string().contains("COMPACT_PROMPTS"), "{err}");
    }

    #[test]
    fn default_size_ceiling_is_ten_megabytes() {
        assert_eq!(default_max_file_size(), 10_485_760);
    }
}
