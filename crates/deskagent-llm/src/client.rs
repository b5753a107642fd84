use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use deskagent_core::{FunctionCall, Message, ToolCall, ToolSchema};

use crate::error::{classify_api_error, LlmError, Result};
use crate::preprocess::prepare_messages;
use crate::sse::llm_stream_from_response;
use crate::types::{ChatCompletion, ChatOptions, ChatUsage, LlmStream};

/// Hard per-request deadline. A timeout aborts the connection and counts as
/// a retryable failure.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Notified while the buffered path backs off, so the UI can show a retry
/// countdown.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &LlmError);
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Buffered chat completion with retries.
    ///
    /// The caller provides a fresh `system_prompt` per request; any system
    /// messages inside `messages` are stripped.
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ChatOptions,
    ) -> Result<ChatCompletion>;

    /// Streaming chat completion. No retries on stream failures.
    async fn chat_stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ChatOptions,
    ) -> Result<LlmStream>;

    /// Cancel the in-flight request, if any.
    fn abort(&self) {}
}

/// `reqwest`-backed client for any OpenAI-compatible `/chat/completions`
/// endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_attempts: u32,
    retry_observer: Option<Arc<dyn RetryObserver>>,
    inflight: Mutex<CancellationToken>,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_observer: None,
            inflight: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.retry_observer = Some(observer);
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ChatOptions,
        stream: bool,
    ) -> Value {
        let mut wire_messages = vec![json!({
            "role": "system",
            "content": system_prompt,
        })];
        wire_messages.extend(prepare_messages(messages, &options.model));

        let mut body = json!({
            "model": options.model,
            "messages": wire_messages,
            "temperature": options.temperature,
            "stream": stream,
            "parallel_tool_calls": false,
        });

        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !tools.is_empty() {
            body["tools"] = json!(tools);
            if let Some(choice) = options.tool_choice {
                body["tool_choice"] = json!(choice.as_str());
            }
        }

        body
    }

    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let mut request = self.http.post(self.completions_url()).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(REQUEST_TIMEOUT)
            } else {
                LlmError::Http(error)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &text));
        }

        Ok(response)
    }

    async fn send_buffered(&self, body: &Value) -> Result<ChatCompletion> {
        let response = self.send_request(body).await?;

        // A 200 with a body that does not parse is a hard failure, not a
        // retry candidate.
        let text = response.text().await.map_err(LlmError::Http)?;
        let wire: WireResponse = serde_json::from_str(&text).map_err(|error| LlmError::Api {
            status: 200,
            message: format!("invalid response body: {error}"),
        })?;

        Ok(wire.into_completion())
    }

    fn install_inflight(&self, cancel: &CancellationToken) {
        if let Ok(mut guard) = self.inflight.lock() {
            *guard = cancel.clone();
        }
    }
}

#[async_trait]
impl ChatClient for HttpLlmClient {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ChatOptions,
    ) -> Result<ChatCompletion> {
        if options.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.install_inflight(&options.cancel);

        let body = self.build_body(system_prompt, messages, tools, options, false);
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = options.cancel.cancelled() => Err(LlmError::Cancelled),
                result = self.send_buffered(&body) => result,
            };

            match result {
                Ok(completion) => return Ok(completion),
                Err(error) => {
                    attempt += 1;
                    if !error.is_retryable() || attempt >= self.max_attempts {
                        return Err(error);
                    }

                    // 1s, 2s, 4s, ...
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "LLM request failed (attempt {attempt}/{}), retrying in {delay:?}: {error}",
                        self.max_attempts
                    );
                    if let Some(observer) = &self.retry_observer {
                        observer.on_retry(attempt, delay, &error);
                    }

                    tokio::select! {
                        _ = options.cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn chat_stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ChatOptions,
    ) -> Result<LlmStream> {
        if options.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.install_inflight(&options.cancel);

        let body = self.build_body(system_prompt, messages, tools, options, true);
        let response = tokio::select! {
            _ = options.cancel.cancelled() => return Err(LlmError::Cancelled),
            result = self.send_request(&body) => result?,
        };

        Ok(llm_stream_from_response(response))
    }

    fn abort(&self) {
        if let Ok(guard) = self.inflight.lock() {
            guard.cancel();
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize, Default)]
struct WireMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: Option<String>,
    #[serde(rename = "type")]
    tool_type: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl WireResponse {
    fn into_completion(mut self) -> ChatCompletion {
        let message = if self.choices.is_empty() {
            WireMessage::default()
        } else {
            self.choices.remove(0).message
        };

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, call)| ToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{index}")),
                tool_type: call.tool_type.unwrap_or_else(|| "function".to_string()),
                function: FunctionCall {
                    name: call.function.name,
                    arguments: call.function.arguments,
                },
            })
            .collect();

        ChatCompletion {
            content: message.content.unwrap_or_default(),
            reasoning_content: message.reasoning_content,
            tool_calls,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolChoice;
    use deskagent_core::{FunctionSchema, Message};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network_tests_disabled() -> bool {
        std::env::var_os("CODEX_SANDBOX_NETWORK_DISABLED").is_some()
    }

    fn fast_client(base_url: &str) -> HttpLlmClient {
        HttpLlmClient::new(base_url).with_max_attempts(2)
    }

    fn sample_tools() -> Vec<ToolSchema> {
        vec![ToolSchema {
            schema_type: "function".to_string(),
            function: FunctionSchema {
                name: "read_file".to_string(),
                description: "Read a file".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            },
        }]
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "content": content } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16 }
        })
    }

    #[test]
    fn body_includes_required_request_fields() {
        let client = HttpLlmClient::new("http://localhost:9999/v1");
        let options =
            ChatOptions::for_model("qwen3-32b").with_tool_choice(ToolChoice::Required);
        let body = client.build_body(
            "system prompt",
            &[Message::user("hi")],
            &sample_tools(),
            &options,
            false,
        );

        assert_eq!(body["model"], "qwen3-32b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["parallel_tool_calls"], false);
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "system prompt");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn body_omits_tools_when_none_registered() {
        let client = HttpLlmClient::new("http://localhost:9999/v1");
        let options = ChatOptions::for_model("qwen3-32b");
        let body = client.build_body("sys", &[], &[], &options, false);

        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn chat_parses_completion_and_usage() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
            .mount(&server)
            .await;

        let client = fast_client(&server.uri());
        let completion = client
            .chat("sys", &[Message::user("hi")], &[], &ChatOptions::for_model("m"))
            .await
            .expect("chat should succeed");

        assert_eq!(completion.content, "hello");
        assert_eq!(completion.usage.unwrap().total_tokens, 16);
    }

    #[tokio::test]
    async fn chat_retries_transient_server_errors() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
            .mount(&server)
            .await;

        let client = fast_client(&server.uri());
        let completion = client
            .chat("sys", &[Message::user("hi")], &[], &ChatOptions::for_model("m"))
            .await
            .expect("retry should recover");

        assert_eq!(completion.content, "recovered");
    }

    #[tokio::test]
    async fn chat_does_not_retry_client_errors() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(&server.uri());
        let error = client
            .chat("sys", &[Message::user("hi")], &[], &ChatOptions::for_model("m"))
            .await
            .expect_err("400 should fail fast");

        assert!(matches!(error, LlmError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn chat_surfaces_context_length_error() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string("This model's maximum context length is 8192 tokens"),
            )
            .mount(&server)
            .await;

        let client = fast_client(&server.uri());
        let error = client
            .chat("sys", &[Message::user("hi")], &[], &ChatOptions::for_model("m"))
            .await
            .expect_err("should classify context length");

        assert!(matches!(error, LlmError::ContextLength(_)));
    }

    #[tokio::test]
    async fn chat_surfaces_quota_error_without_retry() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("monthly quota exhausted"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(&server.uri());
        let error = client
            .chat("sys", &[Message::user("hi")], &[], &ChatOptions::for_model("m"))
            .await
            .expect_err("quota should fail fast");

        assert!(matches!(error, LlmError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn chat_rejects_invalid_success_body() {
        if network_tests_disabled() {
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(&server.uri());
        let error = client
            .chat("sys", &[Message::user("hi")], &[], &ChatOptions::for_model("m"))
            .await
            .expect_err("invalid body should fail");

        assert!(matches!(error, LlmError::Api { status: 200, .. }));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = HttpLlmClient::new("http://localhost:9999/v1");
        let options = ChatOptions::for_model("m").with_cancel(cancel);
        let error = client
            .chat("sys", &[], &[], &options)
            .await
            .expect_err("cancelled before start");

        assert!(matches!(error, LlmError::Cancelled));
    }

    #[test]
    fn wire_response_tolerates_missing_tool_call_ids() {
        let wire: WireResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":null,"tool_calls":[
                {"function":{"name":"read_file","arguments":"{}"}}
            ]}}]}"#,
        )
        .unwrap();

        let completion = wire.into_completion();
        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].id, "call_0");
        assert_eq!(completion.tool_calls[0].tool_type, "function");
    }
}
