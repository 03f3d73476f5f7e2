use futures_util::future::BoxFuture;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection timeout; the overall deadline is enforced by the invocation task.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A single opaque text-in/text-out request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    pub model: String,
    pub system_instructions: String,
    pub user_text: String,
}

/// The AI transformation call, as seen by the invocation task.
///
/// The returned future is driven on the invocation's background worker, so it
/// must own everything it touches.
pub trait TextTransformer: Send + Sync {
    fn transform(&self, request: TransformRequest) -> BoxFuture<'static, Result<String, String>>;
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Build headers for API requests. Local servers need no key.
fn build_headers(api_key: &str) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("synte/", env!("CARGO_PKG_VERSION"))),
    );

    if !api_key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid authorization header value: {}", e))?,
        );
    }

    Ok(headers)
}

/// Create an HTTP client carrying the auth headers
pub fn create_client(api_key: &str) -> Result<reqwest::Client, String> {
    let headers = build_headers(api_key)?;
    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Send a chat completion with a system and a user message
pub async fn send_chat_completion_with_system(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    system_prompt: String,
    user_prompt: String,
) -> Result<Option<String>, String> {
    let base_url = base_url.trim_end_matches('/');
    let url = format!("{}/chat/completions", base_url);

    debug!("Sending chat completion request to: {}", url);

    let mut messages = Vec::new();
    if !system_prompt.trim().is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system_prompt,
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: user_prompt,
    });

    let request_body = ChatCompletionRequest {
        model: model.to_string(),
        messages,
        stream: false,
    };

    let response = client
        .post(&url)
        .json(&request_body)
        .send()
        .await
        .map_err(|e| format!("HTTP request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        return Err(format!(
            "API request failed with status {}: {}",
            status, error_text
        ));
    }

    let completion: ChatCompletionResponse = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse API response: {}", e))?;

    Ok(completion
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone()))
}

/// Fetch available models from an OpenAI-compatible API.
/// Doubles as the startup reachability check.
pub async fn fetch_models(client: &reqwest::Client, base_url: &str) -> Result<Vec<String>, String> {
    let base_url = base_url.trim_end_matches('/');
    let url = format!("{}/models", base_url);

    debug!("Fetching models from: {}", url);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| format!("Failed to fetch models: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(format!(
            "Model list request failed ({}): {}",
            status, error_text
        ));
    }

    let parsed: serde_json::Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse response: {}", e))?;

    // { data: [ { id: "..." }, ... ] }, which Ollama also serves under /v1
    let models: Vec<String> = parsed
        .get("data")
        .and_then(|d| d.as_array())
        .map(|data| {
            data.iter()
                .filter_map(|entry| entry.get("id").and_then(|i| i.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(models)
}

/// Chat-completions backed transformer.
pub struct LlmTransformer {
    client: reqwest::Client,
    base_url: String,
}

impl LlmTransformer {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, String> {
        Ok(Self {
            client: create_client(api_key)?,
            base_url: base_url.to_string(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl TextTransformer for LlmTransformer {
    fn transform(&self, request: TransformRequest) -> BoxFuture<'static, Result<String, String>> {
        let client = self.client.clone();
        let base_url = self.base_url.clone();

        Box::pin(async move {
            let content = send_chat_completion_with_system(
                &client,
                &base_url,
                &request.model,
                request.system_instructions,
                request.user_text,
            )
            .await?;

            content.ok_or_else(|| "LLM API response has no content".to_string())
        })
    }
}
