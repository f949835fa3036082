//! Anthropic Messages API client.
//!
//! Wraps `POST /v1/messages`. When the caller passes exactly one tool the
//! request forces it through `tool_choice`, so the guard assistant always
//! gets a structured `submit_recommendations` call back instead of prose.
//! Request building and response parsing are pure for testing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::LlmTimeouts;
use super::types::{ChatResponse, ContentBlock, LlmError, Message, Tool};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
}

impl AnthropicClient {
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the reqwest client cannot be built.
    pub fn new(api_key: String, timeouts: LlmTimeouts) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key })
    }

    /// # Errors
    ///
    /// Returns `ApiRequest`, `ApiResponse` or `ApiParse` on failure.
    pub async fn chat(
        &self,
        model: &str,
        max_tokens: u32,
        system: &str,
        messages: &[Message],
        tools: Option<&[Tool]>,
    ) -> Result<ChatResponse, LlmError> {
        let body = MessagesRequest::new(model, max_tokens, system, messages, tools);

        let response = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::ApiResponse { status: status.as_u16(), body: text });
        }

        parse_response(&text)
    }
}

// =============================================================================
// REQUEST
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ToolChoice<'a> {
    Tool { name: &'a str },
}

impl<'a> MessagesRequest<'a> {
    pub(crate) fn new(
        model: &'a str,
        max_tokens: u32,
        system: &'a str,
        messages: &'a [Message],
        tools: Option<&'a [Tool]>,
    ) -> Self {
        let tools = tools.filter(|t| !t.is_empty());
        let tool_choice = match tools {
            Some([only]) => Some(ToolChoice::Tool { name: &only.name }),
            _ => None,
        };
        Self { model, max_tokens, system, messages, tools, tool_choice }
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Decode a `/v1/messages` body, dropping block types the assistant can't use.
pub(crate) fn parse_response(json: &str) -> Result<ChatResponse, LlmError> {
    let MessagesResponse { content, model, stop_reason, usage } =
        serde_json::from_str(json).map_err(|e| LlmError::ApiParse(e.to_string()))?;

    Ok(ChatResponse {
        content: content
            .into_iter()
            .filter(|block| !matches!(block, ContentBlock::Unknown))
            .collect(),
        model,
        stop_reason: stop_reason.unwrap_or_default(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    })
}

#[cfg(test)]
#[path = "anthropic_test.rs"]
mod tests;
