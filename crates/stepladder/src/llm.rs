//! Model-backed collaborators over an OpenAI-compatible chat endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{
    decode_code, decode_plan, CollaboratorError, Collaborators, Merger, Plan, Planner, Tier,
    TierWorkers, WorkContext, Worker,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EndpointConfig, ModelConfig};
use crate::prompts;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

/// One chat completion round-trip.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, CollaboratorError>;
}

/// reqwest client for `POST {base_url}/chat/completions`.
pub struct ChatClient {
    http: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    request_timeout_secs: u64,
}

impl ChatClient {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(endpoint.request_timeout_secs))
                .build()?,
            completions_url: format!(
                "{}/chat/completions",
                endpoint.base_url.trim_end_matches('/')
            ),
            api_key: endpoint.api_key.clone().filter(|k| !k.is_empty()),
            temperature: endpoint.temperature,
            max_tokens: endpoint.max_tokens,
            request_timeout_secs: endpoint.request_timeout_secs,
        })
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, CollaboratorError> {
        let request = ChatRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut builder = self.http.post(&self.completions_url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout(self.request_timeout_secs)
            } else {
                CollaboratorError::Unreachable(format!("HTTP request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Unreachable(format!(
                "LLM API error ({}): {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            CollaboratorError::Unreachable(format!("Failed to parse response: {}", e))
        })?;

        // An empty reply is handed to the decoders, which classify it.
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content.or(choice.message.reasoning_content))
            .unwrap_or_default();

        debug!(model, chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

/// Difficulty estimator backed by a chat model.
pub struct LlmPlanner {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl LlmPlanner {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, description: &str, task_id: &str) -> Result<Plan, CollaboratorError> {
        let messages = prompts::planner_messages(task_id, description);
        let raw = self.backend.complete(&self.model, &messages).await?;
        decode_plan(&raw)
    }
}

/// Program author, either a tiered developer or the single-agent baseline.
pub struct LlmWorker {
    backend: Arc<dyn ChatBackend>,
    model: String,
    system_prompt: String,
}

impl LlmWorker {
    pub fn for_tier(backend: Arc<dyn ChatBackend>, model: impl Into<String>, tier: Tier) -> Self {
        Self {
            backend,
            model: model.into(),
            system_prompt: prompts::developer_system_prompt(tier),
        }
    }

    pub fn baseline(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            system_prompt: prompts::SINGLE_AGENT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Worker for LlmWorker {
    async fn propose(
        &self,
        subtask: &str,
        context: &WorkContext,
        failure_history: &[String],
    ) -> Result<String, CollaboratorError> {
        let messages = prompts::developer_messages(
            self.system_prompt.clone(),
            subtask,
            context.prior_candidate.as_deref(),
            failure_history,
        );
        debug!(
            task_id = %context.task_id,
            tier = %context.tier,
            worker = context.worker_index,
            retry = context.is_retry(),
            model = %self.model,
            "Requesting proposal"
        );
        let raw = self.backend.complete(&self.model, &messages).await?;
        decode_code(&raw)
    }
}

/// Integrator combining team proposals.
pub struct LlmMerger {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl LlmMerger {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Merger for LlmMerger {
    async fn merge(
        &self,
        subtask: &str,
        candidates: &[String],
    ) -> Result<String, CollaboratorError> {
        let messages = prompts::merge_messages(subtask, candidates);
        let raw = self.backend.complete(&self.model, &messages).await?;
        decode_code(&raw)
    }
}

/// Wire every role to `backend` using the resolved model line-up.
pub fn build_collaborators(backend: Arc<dyn ChatBackend>, models: &ModelConfig) -> Collaborators {
    let worker = |tier: Tier| -> Arc<dyn Worker> {
        Arc::new(LlmWorker::for_tier(
            backend.clone(),
            models.worker(tier),
            tier,
        ))
    };
    Collaborators {
        planner: Arc::new(LlmPlanner::new(backend.clone(), &models.planner)),
        workers: TierWorkers {
            small: worker(Tier::S),
            medium: worker(Tier::M),
            large: worker(Tier::L),
        },
        merger: Some(Arc::new(LlmMerger::new(backend.clone(), &models.merger))),
        baseline: Arc::new(LlmWorker::baseline(backend.clone(), &models.baseline)),
    }
}
