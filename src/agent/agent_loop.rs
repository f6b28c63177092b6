//! Core agent loop implementation.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{normalize_args, Content, FunctionCall, LlmBackend, LlmError};
use crate::tools::{ToolArgs, ToolRegistry};

/// Final text when the model keeps calling tools past the round cap.
pub const STEP_LIMIT_TEXT: &str = "Reached tool-call step limit.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// One executed tool call, as recorded in the trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: ToolArgs,
    pub result: Value,
}

/// Outcome of one prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOutput {
    pub text: String,
    pub tools: Vec<ToolCallRecord>,
    /// Set only when the run should be reported as a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The tool-calling agent.
pub struct Agent {
    backend: Arc<dyn LlmBackend>,
    tools: ToolRegistry,
    max_iterations: usize,
    init_failure_is_error: bool,
}

impl Agent {
    /// Create a new agent over a model backend and tool set.
    pub fn new(backend: Arc<dyn LlmBackend>, tools: ToolRegistry, max_iterations: usize) -> Self {
        Self {
            backend,
            tools,
            max_iterations,
            init_failure_is_error: false,
        }
    }

    /// Report model initialization failures through `AgentOutput::error`
    /// instead of as answer text.
    pub fn with_init_failure_as_error(mut self, enabled: bool) -> Self {
        self.init_failure_is_error = enabled;
        self
    }

    pub fn backend(&self) -> &Arc<dyn LlmBackend> {
        &self.backend
    }

    /// Answer one prompt, letting the model call tools for up to
    /// `max_iterations` rounds.
    ///
    /// # Errors
    ///
    /// Returns `AgentError` when a model round fails or the model sends tool
    /// arguments of an unrecognized shape. Initialization failures are not
    /// errors; they come back as answer text.
    pub async fn run(&self, prompt: &str, model: &str) -> Result<AgentOutput, AgentError> {
        let client = match self.backend.connect(model).await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(
                    mode = self.backend.mode_label(),
                    model = %model,
                    "Model initialization failed: {}",
                    e
                );
                return Ok(AgentOutput {
                    text: format!("Error initializing model: {}", e),
                    tools: Vec::new(),
                    error: self.init_failure_is_error.then(|| e.to_string()),
                });
            }
        };

        let declarations = self.tools.declarations();
        let mut history = vec![Content::user_text(prompt)];
        let mut trace: Vec<ToolCallRecord> = Vec::new();

        for iteration in 0..self.max_iterations {
            tracing::debug!("Agent iteration {}", iteration + 1);

            let response = client.generate_content(&history, &declarations).await?;

            // No tool calls - this is the final response
            if response.function_calls.is_empty() {
                return Ok(AgentOutput {
                    text: response.text.unwrap_or_default(),
                    tools: trace,
                    error: None,
                });
            }

            let calls = response
                .function_calls
                .into_iter()
                .map(|call| -> Result<(String, ToolArgs), LlmError> {
                    let args = normalize_args(&call.name, &call.args)?;
                    Ok((call.name, args))
                })
                .collect::<Result<Vec<_>, _>>()?;

            // Record the model's request so the results below pair up with it
            history.push(Content::model_calls(
                calls
                    .iter()
                    .map(|(name, args)| FunctionCall {
                        name: name.clone(),
                        args: Value::Object(args.clone()),
                    })
                    .collect(),
            ));

            for (name, args) in calls {
                let args_json = Value::Object(args.clone());
                tracing::info!("[TOOL_CALL] Tool: {}, Args: {}", name, args_json);

                let result = self.tools.dispatch(&name, &args).await;

                tracing::info!(
                    "[TOOL_RESULT] Tool: {}, Result: {}",
                    name,
                    truncate_for_log(&result.to_string(), 200)
                );

                history.push(Content::tool_result(name.clone(), result.clone()));
                trace.push(ToolCallRecord { name, args, result });
            }
        }

        Ok(AgentOutput {
            text: STEP_LIMIT_TEXT.to_string(),
            tools: trace,
            error: None,
        })
    }
}

/// Truncate a string for logging purposes.
pub(crate) fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... [truncated]", &s[..cut]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::{FunctionResponse, ModelResponse, Part, Role};
    use crate::testing::ScriptedBackend;

    fn call(name: &str, args: Value) -> FunctionCall {
        FunctionCall {
            name: name.to_string(),
            args,
        }
    }

    fn agent(backend: Arc<ScriptedBackend>) -> Agent {
        Agent::new(backend, ToolRegistry::new(), 6)
    }

    #[tokio::test]
    async fn plain_answer_returns_immediately() {
        let backend = ScriptedBackend::new(vec![Ok(ModelResponse::text("4"))]);

        let output = agent(backend.clone()).run("what is 2+2", "m").await.unwrap();

        assert_eq!(
            output,
            AgentOutput {
                text: "4".to_string(),
                tools: vec![],
                error: None,
            }
        );
        assert_eq!(backend.rounds().len(), 1);
        assert_eq!(backend.rounds()[0], vec![Content::user_text("what is 2+2")]);
    }

    #[tokio::test]
    async fn missing_text_becomes_empty_string() {
        let backend = ScriptedBackend::new(vec![Ok(ModelResponse::default())]);
        let output = agent(backend).run("hi", "m").await.unwrap();
        assert_eq!(output.text, "");
    }

    #[tokio::test]
    async fn tool_error_is_fed_back_to_the_model() {
        let backend = ScriptedBackend::new(vec![
            Ok(ModelResponse::calls(vec![call(
                "calculator",
                json!({ "expression": "10 / 0" }),
            )])),
            Ok(ModelResponse::text("You cannot divide by zero (division by zero).")),
        ]);

        let output = agent(backend.clone()).run("10 / 0?", "m").await.unwrap();

        assert_eq!(output.text, "You cannot divide by zero (division by zero).");
        assert_eq!(output.tools.len(), 1);
        assert_eq!(output.tools[0].name, "calculator");
        assert_eq!(output.tools[0].result, json!({ "error": "division by zero" }));

        let second_round = &backend.rounds()[1];
        assert_eq!(second_round.len(), 3);
        assert_eq!(second_round[1].role, Role::Model);
        assert_eq!(
            second_round[2],
            Content::tool_result("calculator", json!({ "error": "division by zero" }))
        );
    }

    #[tokio::test]
    async fn results_from_round_n_are_visible_in_round_n_plus_one() {
        let backend = ScriptedBackend::new(vec![
            Ok(ModelResponse::calls(vec![
                call("calculator", json!({ "expression": "1 + 1" })),
                call("no_such_tool", json!({})),
            ])),
            Ok(ModelResponse::calls(vec![call(
                "calculator",
                json!("{\"expression\": \"3 * 3\"}"),
            )])),
            Ok(ModelResponse::text("done")),
        ]);

        let output = agent(backend.clone()).run("go", "m").await.unwrap();

        let names: Vec<_> = output.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["calculator", "no_such_tool", "calculator"]);
        assert_eq!(
            output.tools[1].result,
            json!({ "error": "Unknown tool: no_such_tool" })
        );
        assert_eq!(output.tools[2].args.get("expression"), Some(&json!("3 * 3")));

        let rounds = backend.rounds();
        assert_eq!(rounds.len(), 3);
        // user, model calls, two tool results
        assert_eq!(rounds[1].len(), 4);
        assert_eq!(
            rounds[1][2].parts,
            vec![Part::FunctionResponse(FunctionResponse::new(
                "calculator",
                json!({ "expression": "1 + 1", "value": 2 })
            ))]
        );
        // history only grows: earlier rounds are a prefix of later ones
        assert_eq!(&rounds[2][..rounds[1].len()], &rounds[1][..]);
        assert_eq!(
            rounds[2].last().unwrap(),
            &Content::tool_result("calculator", json!({ "expression": "3 * 3", "value": 9 }))
        );
    }

    #[tokio::test]
    async fn stops_after_round_cap() {
        let responses = (0..7)
            .map(|i| {
                Ok(ModelResponse::calls(vec![call(
                    "calculator",
                    json!({ "expression": format!("{} + 1", i) }),
                )]))
            })
            .collect();
        let backend = ScriptedBackend::new(responses);

        let output = agent(backend.clone()).run("loop forever", "m").await.unwrap();

        assert_eq!(output.text, STEP_LIMIT_TEXT);
        assert_eq!(output.tools.len(), 6);
        assert_eq!(output.error, None);
        assert_eq!(backend.rounds().len(), 6);
    }

    #[tokio::test]
    async fn init_failure_is_answer_text_by_default() {
        let backend = ScriptedBackend::failing("Missing GEMINI_API_KEY");

        let output = agent(backend.clone()).run("hi", "m").await.unwrap();

        assert_eq!(output.text, "Error initializing model: Missing GEMINI_API_KEY");
        assert!(output.tools.is_empty());
        assert_eq!(output.error, None);
        assert_eq!(backend.connects(), 1);
    }

    #[tokio::test]
    async fn init_failure_can_be_reported_as_error() {
        let output = agent(ScriptedBackend::failing("Missing GEMINI_API_KEY"))
            .with_init_failure_as_error(true)
            .run("hi", "m")
            .await
            .unwrap();

        assert_eq!(output.error.as_deref(), Some("Missing GEMINI_API_KEY"));
        assert_eq!(output.text, "Error initializing model: Missing GEMINI_API_KEY");
    }

    #[tokio::test]
    async fn model_round_failure_propagates() {
        let backend = ScriptedBackend::new(vec![Err(LlmError::Api {
            status: 503,
            message: "overloaded".to_string(),
        })]);

        let err = agent(backend).run("hi", "m").await.unwrap_err();
        assert_eq!(err.to_string(), "Gemini API error (503): overloaded");
    }

    #[tokio::test]
    async fn unrecognized_argument_shape_fails_loudly() {
        let backend = ScriptedBackend::new(vec![Ok(ModelResponse::calls(vec![call(
            "calculator",
            json!(17),
        )]))]);

        let err = agent(backend.clone()).run("hi", "m").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Llm(LlmError::InvalidArguments { .. })
        ));
        assert_eq!(backend.rounds().len(), 1);
    }

    #[test]
    fn truncate_for_log_is_char_safe() {
        assert_eq!(truncate_for_log("héllo", 2), "hé... [truncated]");
        assert_eq!(truncate_for_log("short", 10), "short");
    }
}
