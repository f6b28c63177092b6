//! Conversation history and Gemini wire types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::LlmError;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    /// Tool results. Gemini calls this role `function`.
    #[serde(rename = "function")]
    Tool,
}

/// One piece of a turn's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A tool result fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

impl FunctionResponse {
    /// Wrap a tool result as `{name, content}`, the shape the model reads back.
    pub fn new(name: impl Into<String>, result: Value) -> Self {
        let name = name.into();
        Self {
            response: json!({ "name": name, "content": result }),
            name,
        }
    }
}

/// A single turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model_calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            role: Role::Model,
            parts: calls.into_iter().map(Part::FunctionCall).collect(),
        }
    }

    pub fn tool_result(name: impl Into<String>, result: Value) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::FunctionResponse(FunctionResponse::new(name, result))],
        }
    }
}

/// Declaration of a callable tool, in the model's function-calling format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// What one model round produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    /// Concatenated text parts, if any.
    pub text: Option<String>,
    /// Requested tool calls, in the order the model returned them.
    pub function_calls: Vec<FunctionCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_calls: Vec::new(),
        }
    }

    pub fn calls(function_calls: Vec<FunctionCall>) -> Self {
        Self {
            text: None,
            function_calls,
        }
    }
}

/// Normalize tool-call arguments into a plain string-keyed mapping.
///
/// Recognized shapes: a JSON object, `null` (no arguments), a string holding
/// a JSON object, and an array of `[key, value]` pairs. Anything else is an
/// error rather than a guess.
pub fn normalize_args(tool: &str, args: &Value) -> Result<Map<String, Value>, LlmError> {
    let invalid = |reason: String| LlmError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    match args {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(invalid(format!(
                "encoded arguments are {}, expected an object",
                kind_of(&other)
            ))),
            Err(e) => Err(invalid(format!("arguments are not valid JSON: {}", e))),
        },
        Value::Array(items) => {
            let mut map = Map::new();
            for item in items {
                match item.as_array().map(Vec::as_slice) {
                    Some([Value::String(key), value]) => {
                        map.insert(key.clone(), value.clone());
                    }
                    _ => {
                        return Err(invalid(
                            "array arguments must be [key, value] pairs".to_string(),
                        ))
                    }
                }
            }
            Ok(map)
        }
        other => Err(invalid(format!("unsupported argument shape: {}", kind_of(other)))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
