//! Scripted model doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::{Content, FunctionDeclaration, LlmBackend, LlmClient, LlmError, ModelResponse};

/// Replays canned model responses and records every history it is sent.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    seen: Mutex<Vec<Vec<Content>>>,
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate_content(
        &self,
        contents: &[Content],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelResponse, LlmError> {
        assert!(!tools.is_empty(), "tool declarations must be sent");
        self.seen.lock().unwrap().push(contents.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelResponse::text("script exhausted")))
    }
}

/// Backend handing out one `ScriptedClient`, or failing initialization.
pub struct ScriptedBackend {
    client: Arc<ScriptedClient>,
    init_error: Option<String>,
    connects: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<ModelResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            client: Arc::new(ScriptedClient {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }),
            init_error: None,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            client: Arc::new(ScriptedClient {
                responses: Mutex::new(VecDeque::new()),
                seen: Mutex::new(Vec::new()),
            }),
            init_error: Some(message.to_string()),
            connects: AtomicUsize::new(0),
        })
    }

    /// Histories sent to the model, one per round.
    pub fn rounds(&self) -> Vec<Vec<Content>> {
        self.client.seen.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn mode_label(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&self, _model: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.init_error {
            return Err(LlmError::MissingCredentials(message.clone()));
        }
        Ok(self.client.clone())
    }
}
