use crate::types::{
    ExecutePromptRequest, ExecutePromptResponse, GeneratePromptRequest, GeneratePromptResponse,
    HealthResponse, PromptList,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Authentication failed (status {status})")]
    Authentication { status: u16 },

    #[error("Endpoint not found: {path}")]
    NotFound { path: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl ApiError {
    /// Whether retrying the same request could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::RateLimit => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the backend could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }

    /// Short stable label used when grouping errors in reports
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Network(_) => "network",
            ApiError::Timeout(_) => "timeout",
            ApiError::Status { .. } => "status",
            ApiError::Authentication { .. } => "authentication",
            ApiError::NotFound { .. } => "not_found",
            ApiError::RateLimit => "rate_limit",
            ApiError::Serialization(_) => "serialization",
            ApiError::InvalidConfig { .. } => "config",
        }
    }

    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout(error.to_string())
        } else if error.is_decode() {
            ApiError::Status {
                status: error.status().map(|s| s.as_u16()).unwrap_or(200),
                body: format!("Undecodable body: {}", error),
            }
        } else {
            ApiError::Network(error.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Operations exposed by the deployed RAG Prompt Library backend
#[async_trait]
pub trait BackendProvider: Send + Sync {
    async fn health_check(&self) -> ApiResult<HealthResponse>;

    async fn list_prompts(&self) -> ApiResult<PromptList>;

    async fn generate_prompt(
        &self,
        request: GeneratePromptRequest,
    ) -> ApiResult<GeneratePromptResponse>;

    async fn execute_prompt(&self, request: ExecutePromptRequest)
        -> ApiResult<ExecutePromptResponse>;

    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MockBackend;

    #[async_trait]
    impl BackendProvider for MockBackend {
        async fn health_check(&self) -> ApiResult<HealthResponse> {
            Ok(HealthResponse {
                status: "ok".to_string(),
                version: Some("1.0.0".to_string()),
                services: HashMap::new(),
            })
        }

        async fn list_prompts(&self) -> ApiResult<PromptList> {
            Ok(PromptList {
                prompts: vec![],
                total: Some(0),
            })
        }

        async fn generate_prompt(
            &self,
            request: GeneratePromptRequest,
        ) -> ApiResult<GeneratePromptResponse> {
            Ok(GeneratePromptResponse {
                generated_prompt: format!("You are an assistant for {}", request.purpose),
                title: None,
                suggestions: vec![],
            })
        }

        async fn execute_prompt(
            &self,
            _request: ExecutePromptRequest,
        ) -> ApiResult<ExecutePromptResponse> {
            Err(ApiError::RateLimit)
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_mock_backend() {
        let backend = MockBackend;

        assert!(backend.health_check().await.unwrap().is_ok());
        assert_eq!(backend.list_prompts().await.unwrap().total, Some(0));

        let generated = backend
            .generate_prompt(GeneratePromptRequest::new("support triage"))
            .await
            .unwrap();
        assert!(generated.generated_prompt.contains("support triage"));

        let err = backend
            .execute_prompt(ExecutePromptRequest::inline("hi"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(backend.provider_name(), "mock");
    }

    #[test]
    fn test_trait_object_dispatch() {
        let backend: Box<dyn BackendProvider> = Box::new(MockBackend);
        let health = tokio_test::block_on(backend.health_check()).unwrap();
        assert_eq!(health.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_error_classification() {
        assert!(ApiError::Network("refused".into()).is_transient());
        assert!(ApiError::Network("refused".into()).is_unreachable());
        assert!(ApiError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!ApiError::Status {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!ApiError::Authentication { status: 401 }.is_transient());
        assert!(!ApiError::RateLimit.is_unreachable());
        assert_eq!(
            ApiError::NotFound {
                path: "/x".into()
            }
            .kind(),
            "not_found"
        );
    }
}
