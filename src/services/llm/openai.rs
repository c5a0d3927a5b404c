use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    CreateChatCompletionResponse, Role,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::client::CompletionService;
use super::types::{CompletionRequest, CompletionResponse, TokenUsage};
use crate::error::CompletionError;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Chat-completions transport. Sends exactly one HTTP request per call;
/// retrying is left to [`super::client::CompletionClient`].
pub struct OpenAiService {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiService {
    pub fn new(http: Client, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn build_request(request: &CompletionRequest) -> CreateChatCompletionRequest {
        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(request.prompt.clone()),
                    name: None,
                    role: Role::User,
                },
            )],
            temperature: Some(request.temperature),
            max_tokens: request.max_tokens.try_into().ok(),
            ..Default::default()
        }
    }
}

/// Maps a non-success status onto the transport error taxonomy.
pub fn classify_status(status: StatusCode, message: String) -> CompletionError {
    match status.as_u16() {
        401 | 403 => CompletionError::Authentication(message),
        429 => CompletionError::RateLimited(message),
        408 => CompletionError::TransientService(format!("{}: {}", status, message)),
        _ if status.is_server_error() => {
            CompletionError::TransientService(format!("{}: {}", status, message))
        }
        code => CompletionError::Rejected {
            status: code,
            message,
        },
    }
}

#[async_trait]
impl CompletionService for OpenAiService {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        let body = Self::build_request(request);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::TransientService(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status, message));
        }

        let payload: CreateChatCompletionResponse = response.json().await.map_err(|e| {
            CompletionError::UpstreamMalformed(format!("unexpected response body: {}", e))
        })?;

        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                CompletionError::UpstreamMalformed("response carried no message content".to_string())
            })?;

        let usage = payload
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u64::from(u.prompt_tokens),
                completion_tokens: u64::from(u.completion_tokens),
            })
            .unwrap_or_default();

        Ok(CompletionResponse { text, usage })
    }
}
