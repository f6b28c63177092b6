//! Tools the model may call, and the registry that dispatches them.
//!
//! Every tool takes a string-keyed argument mapping and returns a JSON value.
//! Failures never escape the registry: they come back as `{"error": "..."}`
//! so the model can read them and carry on.

mod calculator;
mod web;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::llm::FunctionDeclaration;

pub use calculator::{evaluate, CalcError, Calculator, Number};
pub use web::{extract_text, FetchUrl, WebSearch, DDG_API_URL, USER_AGENT};

/// Arguments passed to a tool.
pub type ToolArgs = Map<String, Value>;

/// A capability the model can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Parameter schema in the model's function-calling format.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Errors are reported to the model, not raised.
    async fn execute(&self, args: &ToolArgs) -> anyhow::Result<Value>;
}

/// Static catalog of tools: declarations for the model plus name-based dispatch.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the built-in tools: `web_search`, `fetch_url`, `calculator`.
    pub fn new() -> Self {
        Self::with_tools(vec![
            Arc::new(WebSearch::new()),
            Arc::new(FetchUrl),
            Arc::new(Calculator),
        ])
    }

    /// Registry over an explicit tool list. Order is kept as given.
    pub fn with_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Declarations for every registered tool, in registration order.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Run the named tool. Unknown names and tool failures become
    /// `{"error": ...}` values.
    pub async fn dispatch(&self, name: &str, args: &ToolArgs) -> Value {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == name) else {
            return json!({ "error": format!("Unknown tool: {}", name) });
        };

        match tool.execute(args).await {
            Ok(value) => value,
            Err(e) => json!({ "error": e.to_string() }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert any serializable value into JSON, stringifying whatever serde
/// cannot represent (e.g. maps with non-string keys).
pub fn to_json_safe<T: Serialize + Debug + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{:?}", value)))
}

/// Fetch a required string argument. Only a missing key, a non-string or an
/// empty string count as absent; whitespace is passed through.
fn required_str<'a>(args: &'a ToolArgs, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
