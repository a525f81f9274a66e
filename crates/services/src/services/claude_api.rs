//! Claude API client used for structured (tool-call) generation.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Error)]
pub enum ClaudeApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("json error: {0}")]
    Serde(String),
    #[error("model did not call tool `{0}`")]
    MissingToolCall(String),
    #[error("missing api key: ANTHROPIC_API_KEY environment variable not set")]
    MissingApiKey,
}

impl ClaudeApiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Tool the model is forced to call; its input schema shapes the output
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Build a tool whose input is the JSON schema of `T`
    pub fn for_type<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut input_schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
        if let Some(obj) = input_schema.as_object_mut() {
            obj.remove("$schema");
        }
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolChoice {
    Tool { name: String },
}

/// Request body for Claude API
#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

/// Content block in response
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Response from Claude API
#[derive(Debug, Deserialize)]
pub struct ClaudeResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl ClaudeResponse {
    /// Input the model passed to the named tool
    pub fn tool_input(&self, tool_name: &str) -> Option<&Value> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } if name == tool_name => Some(input),
            _ => None,
        })
    }
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Claude API client
#[derive(Debug, Clone)]
pub struct ClaudeApiClient {
    http: Client,
    api_key: String,
    model: String,
    max_retries: usize,
    retry_delay: Duration,
}

impl ClaudeApiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Create a new client using the ANTHROPIC_API_KEY environment variable
    pub fn from_env() -> Result<Self, ClaudeApiError> {
        let api_key =
            std::env::var("ANTHROPIC_API_KEY").map_err(|_| ClaudeApiError::MissingApiKey)?;
        Self::new(api_key, std::env::var("ANTHROPIC_MODEL").ok())
    }

    /// Create a new client with the given API key
    pub fn new(api_key: String, model: Option<String>) -> Result<Self, ClaudeApiError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("ad-spy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClaudeApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Limit transient-error retries (0 disables retrying)
    pub fn with_retries(mut self, max_retries: usize, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    async fn complete(&self, request: ClaudeRequest) -> Result<ClaudeResponse, ClaudeApiError> {
        (|| async { self.send_request(&request).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.retry_delay)
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(self.max_retries)
                    .with_jitter(),
            )
            .when(|e: &ClaudeApiError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Claude API call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn send_request(&self, request: &ClaudeRequest) -> Result<ClaudeResponse, ClaudeApiError> {
        let res = self
            .http
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<ClaudeResponse>()
                .await
                .map_err(|e| ClaudeApiError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(ClaudeApiError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(ClaudeApiError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(ClaudeApiError::Http { status, body })
            }
        }
    }

    /// Force the model to answer through `tool` and deserialize the tool input as `T`
    pub async fn ask_tool<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: Option<String>,
        tool: ToolDefinition,
        max_tokens: u32,
    ) -> Result<T, ClaudeApiError> {
        let tool_name = tool.name.clone();
        let request = ClaudeRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![Message::user(prompt)],
            system,
            tool_choice: Some(ToolChoice::Tool {
                name: tool_name.clone(),
            }),
            tools: vec![tool],
        };

        let response = self.complete(request).await?;
        parse_tool_input(&response, &tool_name)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ClaudeApiError {
    if e.is_timeout() {
        ClaudeApiError::Timeout
    } else {
        ClaudeApiError::Transport(e.to_string())
    }
}

fn parse_tool_input<T: DeserializeOwned>(
    response: &ClaudeResponse,
    tool_name: &str,
) -> Result<T, ClaudeApiError> {
    let input = response
        .tool_input(tool_name)
        .ok_or_else(|| ClaudeApiError::MissingToolCall(tool_name.to_string()))?;

    serde_json::from_value(input.clone()).map_err(|e| {
        tracing::error!(
            json_error = %e,
            stop_reason = ?response.stop_reason,
            "Failed to parse tool input from Claude"
        );
        ClaudeApiError::Serde(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, schemars::JsonSchema)]
    struct Answer {
        value: String,
    }

    fn response(json: &str) -> ClaudeResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_tool_input() {
        let res = response(
            r#"{
                "id": "msg_1",
                "model": "claude",
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "content": [
                    {"type": "text", "text": "Sure."},
                    {"type": "tool_use", "id": "tu_1", "name": "answer", "input": {"value": "42"}}
                ]
            }"#,
        );
        let answer: Answer = parse_tool_input(&res, "answer").unwrap();
        assert_eq!(answer.value, "42");
    }

    #[test]
    fn test_missing_tool_call_is_an_error() {
        let res = response(
            r#"{
                "id": "msg_1",
                "model": "claude",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "content": [{"type": "text", "text": "I refuse."}, {"type": "thinking"}]
            }"#,
        );
        let err = parse_tool_input::<Answer>(&res, "answer").unwrap_err();
        assert!(matches!(err, ClaudeApiError::MissingToolCall(_)));
        assert!(!err.should_retry());
    }

    #[test]
    fn test_tool_schema_is_an_object_without_meta_schema() {
        let tool = ToolDefinition::for_type::<Answer>("answer", "Return the answer");
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.input_schema.get("$schema").is_none());
        assert!(tool.input_schema["properties"]["value"].is_object());
    }

    #[test]
    fn test_request_forces_tool_choice() {
        let request = ClaudeRequest {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 10,
            messages: vec![Message::user("hi")],
            system: None,
            tools: vec![ToolDefinition::for_type::<Answer>("answer", "Return the answer")],
            tool_choice: Some(ToolChoice::Tool {
                name: "answer".to_string(),
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tool_choice"]["type"], "tool");
        assert_eq!(json["tool_choice"]["name"], "answer");
        assert!(json.get("system").is_none());
    }

    #[test]
    fn test_transient_errors_retry() {
        assert!(ClaudeApiError::Timeout.should_retry());
        assert!(ClaudeApiError::Http { status: 529, body: String::new() }.should_retry());
        assert!(!ClaudeApiError::Http { status: 400, body: String::new() }.should_retry());
    }
}
