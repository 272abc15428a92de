//! Individual requests sent to the deployed backend.
//!
//! Smoke tests, pipeline validation and load tests all speak in probes so
//! the timing and error bookkeeping lives in one place.

use api_client::{
    ApiError, BackendProvider, ExecutePromptRequest, ExecutePromptResponse,
    GeneratePromptRequest, GeneratePromptResponse, HealthResponse, PromptList, SourceChunk,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One kind of request against the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Probe {
    Health,
    ListPrompts,
    GeneratePrompt(GeneratePromptRequest),
    ExecutePrompt(ExecutePromptRequest),
}

impl Probe {
    /// Canned generation request used by default suites
    pub fn sample_generate() -> Self {
        Probe::GeneratePrompt(
            GeneratePromptRequest::new("Summarize customer support tickets")
                .with_industry("technology")
                .with_use_case("support")
                .with_variable("ticket_text"),
        )
    }

    /// Canned execution request with retrieval enabled
    pub fn sample_execute() -> Self {
        Probe::ExecutePrompt(
            ExecutePromptRequest::inline(
                "Using the provided documents, explain what the RAG Prompt Library does.",
            )
            .with_rag(true),
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Probe::Health => "health",
            Probe::ListPrompts => "list_prompts",
            Probe::GeneratePrompt(_) => "generate_prompt",
            Probe::ExecutePrompt(_) => "execute_prompt",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Probe::Health => "GET /health",
            Probe::ListPrompts => "GET /api/prompts",
            Probe::GeneratePrompt(_) => "POST /api/generate-prompt",
            Probe::ExecutePrompt(_) => "POST /api/execute-prompt",
        }
    }

    /// Send the request once and time it
    pub async fn run(&self, backend: &dyn BackendProvider) -> ProbeOutcome {
        let start = Instant::now();
        let result = match self {
            Probe::Health => backend.health_check().await.map(ProbeResponse::Health),
            Probe::ListPrompts => backend.list_prompts().await.map(ProbeResponse::Prompts),
            Probe::GeneratePrompt(request) => backend
                .generate_prompt(request.clone())
                .await
                .map(ProbeResponse::Generated),
            Probe::ExecutePrompt(request) => backend
                .execute_prompt(request.clone())
                .await
                .map(ProbeResponse::Executed),
        };

        ProbeOutcome {
            latency: start.elapsed(),
            result,
        }
    }
}

/// Successful response of any probe
#[derive(Debug, Clone)]
pub enum ProbeResponse {
    Health(HealthResponse),
    Prompts(PromptList),
    Generated(GeneratePromptResponse),
    Executed(ExecutePromptResponse),
}

impl ProbeResponse {
    /// Main textual payload, used for content expectations
    pub fn text(&self) -> String {
        match self {
            ProbeResponse::Health(health) => health.status.clone(),
            ProbeResponse::Prompts(list) => list
                .prompts
                .iter()
                .map(|p| p.title.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            ProbeResponse::Generated(generated) => generated.generated_prompt.clone(),
            ProbeResponse::Executed(executed) => executed.output.clone(),
        }
    }

    pub fn sources(&self) -> &[SourceChunk] {
        match self {
            ProbeResponse::Executed(executed) => &executed.sources,
            _ => &[],
        }
    }

    /// Whether the response itself signals a problem despite a 2xx status
    pub fn problem(&self) -> Option<String> {
        match self {
            ProbeResponse::Health(health) if !health.is_ok() => {
                Some(format!("backend reports status '{}'", health.status))
            }
            ProbeResponse::Generated(generated) if generated.generated_prompt.trim().is_empty() => {
                Some("generated prompt is empty".to_string())
            }
            ProbeResponse::Executed(executed) if executed.output.trim().is_empty() => {
                Some("execution output is empty".to_string())
            }
            _ => None,
        }
    }

    pub fn cached(&self) -> Option<bool> {
        match self {
            ProbeResponse::Executed(executed) => Some(executed.cached),
            _ => None,
        }
    }
}

/// Timing and result of one probe
#[derive(Debug)]
pub struct ProbeOutcome {
    pub latency: Duration,
    pub result: Result<ProbeResponse, ApiError>,
}

impl ProbeOutcome {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(response) if response.problem().is_none())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process backend used across the harness unit tests

    use super::*;
    use async_trait::async_trait;
    use api_client::{ApiResult, Prompt};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Behaviour of a `FakeBackend` endpoint
    #[derive(Debug, Clone)]
    pub enum Behaviour {
        Ok,
        Unreachable,
        Status(u16),
        Empty,
    }

    pub struct FakeBackend {
        pub health: Behaviour,
        pub prompts: Behaviour,
        pub generate: Behaviour,
        pub execute: Behaviour,
        pub delay: Duration,
        pub calls: AtomicU64,
        pub with_sources: bool,
    }

    impl Default for FakeBackend {
        fn default() -> Self {
            Self {
                health: Behaviour::Ok,
                prompts: Behaviour::Ok,
                generate: Behaviour::Ok,
                execute: Behaviour::Ok,
                delay: Duration::ZERO,
                calls: AtomicU64::new(0),
                with_sources: true,
            }
        }
    }

    impl FakeBackend {
        pub fn all(behaviour: Behaviour) -> Self {
            Self {
                health: behaviour.clone(),
                prompts: behaviour.clone(),
                generate: behaviour.clone(),
                execute: behaviour,
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn gate(&self, behaviour: &Behaviour) -> ApiResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match behaviour {
                Behaviour::Ok => Ok(true),
                Behaviour::Empty => Ok(false),
                Behaviour::Unreachable => {
                    Err(ApiError::Network("connection refused".to_string()))
                }
                Behaviour::Status(status) => Err(ApiError::Status {
                    status: *status,
                    body: "error".to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl BackendProvider for FakeBackend {
        async fn health_check(&self) -> ApiResult<HealthResponse> {
            let ok = self.gate(&self.health).await?;
            Ok(HealthResponse {
                status: if ok { "ok" } else { "degraded" }.to_string(),
                version: Some("1.4.2".to_string()),
                services: HashMap::new(),
            })
        }

        async fn list_prompts(&self) -> ApiResult<PromptList> {
            let ok = self.gate(&self.prompts).await?;
            let prompts = if ok {
                vec![Prompt {
                    id: "p-1".to_string(),
                    title: "Support ticket summary".to_string(),
                    content: "Summarize {{ticket_text}}".to_string(),
                    tags: vec!["support".to_string()],
                    category: Some("support".to_string()),
                    is_public: true,
                }]
            } else {
                vec![]
            };
            Ok(PromptList {
                total: Some(prompts.len() as u64),
                prompts,
            })
        }

        async fn generate_prompt(
            &self,
            request: GeneratePromptRequest,
        ) -> ApiResult<GeneratePromptResponse> {
            let ok = self.gate(&self.generate).await?;
            Ok(GeneratePromptResponse {
                generated_prompt: if ok {
                    format!(
                        "You are an expert assistant. Task: {}. Input: {{{{ticket_text}}}}",
                        request.purpose
                    )
                } else {
                    String::new()
                },
                title: Some("Generated".to_string()),
                suggestions: vec![],
            })
        }

        async fn execute_prompt(
            &self,
            _request: ExecutePromptRequest,
        ) -> ApiResult<ExecutePromptResponse> {
            let ok = self.gate(&self.execute).await?;
            Ok(ExecutePromptResponse {
                output: if ok {
                    "The RAG Prompt Library stores, generates and executes prompts with document context."
                        .to_string()
                } else {
                    String::new()
                },
                model: Some("test-model".to_string()),
                tokens_used: Some(42),
                sources: if self.with_sources {
                    vec![SourceChunk {
                        document_id: "doc-1".to_string(),
                        score: Some(0.91),
                        excerpt: None,
                    }]
                } else {
                    vec![]
                },
                cached: false,
            })
        }

        fn provider_name(&self) -> &'static str {
            "fake"
        }
    }
}
