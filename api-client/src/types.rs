use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub services: HashMap<String, String>,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "ok" | "healthy" | "up"
        )
    }
}

/// A stored prompt template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptList {
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePromptRequest {
    pub purpose: String,
    pub industry: Option<String>,
    pub use_case: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub input_variables: Vec<String>,
}

impl GeneratePromptRequest {
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            industry: None,
            use_case: None,
            input_variables: Vec::new(),
        }
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    pub fn with_use_case(mut self, use_case: impl Into<String>) -> Self {
        self.use_case = Some(use_case.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.input_variables.push(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePromptResponse {
    pub generated_prompt: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePromptRequest {
    pub prompt_id: Option<String>,
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub inputs: HashMap<String, String>,
    pub use_rag: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub document_ids: Vec<String>,
}

impl ExecutePromptRequest {
    pub fn inline(prompt: impl Into<String>) -> Self {
        Self {
            prompt_id: None,
            prompt: Some(prompt.into()),
            inputs: HashMap::new(),
            use_rag: false,
            document_ids: Vec::new(),
        }
    }

    pub fn stored(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: Some(prompt_id.into()),
            prompt: None,
            inputs: HashMap::new(),
            use_rag: false,
            document_ids: Vec::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_rag(mut self, enabled: bool) -> Self {
        self.use_rag = enabled;
        self
    }
}

/// A retrieved chunk that contributed context to an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceChunk {
    pub document_id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePromptResponse {
    pub output: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub sources: Vec<SourceChunk>,
    #[serde(default)]
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_variants() {
        for status in ["ok", "OK", "healthy", "up"] {
            let health = HealthResponse {
                status: status.to_string(),
                version: None,
                services: HashMap::new(),
            };
            assert!(health.is_ok(), "{status} should count as healthy");
        }

        let degraded: HealthResponse =
            serde_json::from_str(r#"{"status":"degraded"}"#).unwrap();
        assert!(!degraded.is_ok());
    }

    #[test]
    fn test_execute_request_uses_camel_case() {
        let request = ExecutePromptRequest::stored("p-1")
            .with_input("topic", "billing")
            .with_rag(true);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["promptId"], "p-1");
        assert_eq!(json["useRag"], true);
        assert_eq!(json["inputs"]["topic"], "billing");
        assert!(json.get("documentIds").is_none());
    }

    #[test]
    fn test_execute_response_defaults() {
        let response: ExecutePromptResponse =
            serde_json::from_str(r#"{"output":"hello"}"#).unwrap();
        assert_eq!(response.output, "hello");
        assert!(response.sources.is_empty());
        assert!(!response.cached);
    }
}
