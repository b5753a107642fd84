//! SSE adapter for the streaming chat path.
//!
//! Events arrive as `data: <json>` lines and the stream terminates with
//! `data: [DONE]`. Deltas are mapped onto [`LlmChunk`]s; tool-call deltas are
//! forwarded as partial calls for the consumer's accumulator.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;

use deskagent_core::{FunctionCall, ToolCall};

use crate::error::{LlmError, Result};
use crate::types::{ChatUsage, LlmChunk, LlmStream};

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[allow(dead_code)]
    #[serde(default)]
    index: usize,
    id: Option<String>,
    #[serde(rename = "type")]
    tool_type: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parse one SSE `data:` payload.
pub fn parse_sse_data(data: &str) -> Result<LlmChunk> {
    if data.trim() == "[DONE]" {
        return Ok(LlmChunk::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)?;
    Ok(chunk_to_llm_chunk(chunk))
}

fn chunk_to_llm_chunk(chunk: StreamChunk) -> LlmChunk {
    if let Some(usage) = chunk.usage {
        if chunk.choices.is_empty() {
            return LlmChunk::Usage(usage);
        }
    }

    let Some(choice) = chunk.choices.first() else {
        return LlmChunk::Token(String::new());
    };

    if let Some(tool_calls) = &choice.delta.tool_calls {
        let calls: Vec<ToolCall> = tool_calls
            .iter()
            .map(|delta| ToolCall {
                id: delta.id.clone().unwrap_or_default(),
                tool_type: delta
                    .tool_type
                    .clone()
                    .unwrap_or_else(|| "function".to_string()),
                function: FunctionCall {
                    name: delta
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default(),
                    arguments: delta
                        .function
                        .as_ref()
                        .and_then(|f| f.arguments.clone())
                        .unwrap_or_default(),
                },
            })
            .collect();

        if !calls.is_empty() {
            return LlmChunk::ToolCalls(calls);
        }
    }

    if let Some(reasoning) = &choice.delta.reasoning_content {
        if !reasoning.is_empty() {
            return LlmChunk::Reasoning(reasoning.clone());
        }
    }

    if let Some(content) = &choice.delta.content {
        return LlmChunk::Token(content.clone());
    }

    LlmChunk::Token(String::new())
}

/// Convert an SSE HTTP response into an [`LlmStream`].
pub fn llm_stream_from_response(response: reqwest::Response) -> LlmStream {
    let stream = response
        .bytes_stream()
        .eventsource()
        .map(|event| {
            let event = event.map_err(|error| LlmError::Stream(error.to_string()))?;
            parse_sse_data(&event.data)
        })
        .filter_map(|result| async move {
            match result {
                Ok(LlmChunk::Done) => None,
                Ok(chunk) => Some(Ok(chunk)),
                Err(error) => Some(Err(error)),
            }
        });

    Box::pin(stream)
}
