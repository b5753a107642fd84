use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A tool invocation as emitted by the model.
///
/// `arguments` is text that *should* contain JSON; parsing it can fail and
/// those failures are handled by the agent loop, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4()),
            tool_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// The `tools` array entry handed to the LLM verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub function: FunctionSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result of running a tool handler.
///
/// Handlers never return `Err`: every failure is `success=false` with an
/// `error` string so the loop can feed it back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolOutcome {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            error: None,
            metadata: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the handler tagged this outcome as the terminal response.
    pub fn is_final_response(&self) -> bool {
        self.success
            && self
                .metadata
                .as_ref()
                .and_then(|m| m.get("isFinalResponse"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialToolCall {
    pub id: String,
    pub tool_type: String,
    pub name: String,
    pub arguments: String,
}

/// Merges streamed tool-call deltas into complete calls.
///
/// OpenAI-compatible streams deliver a call as an id/name fragment followed by
/// any number of argument fragments; argument-only deltas extend the most
/// recent partial.
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    parts: Vec<PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: ToolCall) {
        if call.id.is_empty() && call.function.name.is_empty() {
            if call.function.arguments.is_empty() {
                return;
            }
            if let Some(last) = self.parts.last_mut() {
                last.arguments.push_str(&call.function.arguments);
                return;
            }
        }

        let existing = if call.id.is_empty() {
            self.parts
                .iter_mut()
                .find(|part| part.name == call.function.name)
        } else {
            self.parts.iter_mut().find(|part| part.id == call.id)
        };

        match existing {
            Some(part) => {
                part.arguments.push_str(&call.function.arguments);
                if !call.function.name.is_empty() {
                    part.name = call.function.name;
                }
                if !call.tool_type.is_empty() {
                    part.tool_type = call.tool_type;
                }
            }
            None => self.parts.push(PartialToolCall {
                id: call.id,
                tool_type: call.tool_type,
                name: call.function.name,
                arguments: call.function.arguments,
            }),
        }
    }

    pub fn extend<I>(&mut self, calls: I)
    where
        I: IntoIterator<Item = ToolCall>,
    {
        for call in calls {
            self.push(call);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn finalize(self) -> Vec<ToolCall> {
        finalize_tool_calls(self.parts)
    }
}

/// Finalize a set of accumulated partials, skipping nameless fragments.
pub fn finalize_tool_calls(parts: Vec<PartialToolCall>) -> Vec<ToolCall> {
    parts
        .into_iter()
        .filter(|part| !part.name.trim().is_empty())
        .map(|part| ToolCall {
            id: if part.id.is_empty() {
                format!("call_{}", Uuid::new_v4())
            } else {
                part.id
            },
            tool_type: if part.tool_type.is_empty() {
                "function".to_string()
            } else {
                part.tool_type
            },
            function: FunctionCall {
                name: part.name,
                arguments: part.arguments,
            },
        })
        .collect()
}
