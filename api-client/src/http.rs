use crate::config::ApiConfig;
use crate::provider::{ApiError, ApiResult, BackendProvider};
use crate::types::{
    ExecutePromptRequest, ExecutePromptResponse, GeneratePromptRequest, GeneratePromptResponse,
    HealthResponse, PromptList,
};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

pub const HEALTH_PATH: &str = "health";
pub const PROMPTS_PATH: &str = "api/prompts";
pub const GENERATE_PROMPT_PATH: &str = "api/generate-prompt";
pub const EXECUTE_PROMPT_PATH: &str = "api/execute-prompt";

/// `BackendProvider` over plain HTTP with JSON bodies
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
    config: ApiConfig,
}

impl HttpBackend {
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        config
            .validate()
            .map_err(|message| ApiError::InvalidConfig { message })?;

        let base_url = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::InvalidConfig {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            base_url,
            config,
        })
    }

    pub fn with_default_config() -> ApiResult<Self> {
        Self::new(ApiConfig::default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ApiResult<T> {
        let mut request = self.http_client.request(method.clone(), self.url(path));
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        let text = response.text().await.map_err(ApiError::from_reqwest)?;

        match status {
            s if s.is_success() => Ok(serde_json::from_str(&text)?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Authentication {
                status: status.as_u16(),
            }),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound {
                path: format!("/{}", path.trim_start_matches('/')),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimit),
            _ => Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            }),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ApiResult<T> {
        let mut attempt = 0;
        loop {
            debug!("{} /{} (attempt {})", method, path, attempt + 1);
            match self.send_once(method.clone(), path, body.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        "Transient failure on /{}: {}. Retrying in {:?}",
                        path, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl BackendProvider for HttpBackend {
    async fn health_check(&self) -> ApiResult<HealthResponse> {
        let health: HealthResponse = self.send(Method::GET, HEALTH_PATH, None).await?;
        if health.is_ok() {
            info!("Health check passed");
        } else {
            warn!("Backend reports status '{}'", health.status);
        }
        Ok(health)
    }

    async fn list_prompts(&self) -> ApiResult<PromptList> {
        let list: PromptList = self.send(Method::GET, PROMPTS_PATH, None).await?;
        debug!("Retrieved {} prompts", list.prompts.len());
        Ok(list)
    }

    async fn generate_prompt(
        &self,
        request: GeneratePromptRequest,
    ) -> ApiResult<GeneratePromptResponse> {
        let body = serde_json::to_value(&request)?;
        self.send(Method::POST, GENERATE_PROMPT_PATH, Some(body))
            .await
    }

    async fn execute_prompt(
        &self,
        request: ExecutePromptRequest,
    ) -> ApiResult<ExecutePromptResponse> {
        let body = serde_json::to_value(&request)?;
        self.send(Method::POST, EXECUTE_PROMPT_PATH, Some(body))
            .await
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;

    fn backend_for(server: &mockito::ServerGuard, retry: RetryPolicy) -> HttpBackend {
        let config = ApiConfig::default()
            .with_base_url(server.url())
            .with_retry(retry);
        HttpBackend::new(config).unwrap()
    }

    #[test]
    fn test_base_url_normalization() {
        let backend =
            HttpBackend::new(ApiConfig::default().with_base_url("http://localhost:5001")).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:5001/");
        assert_eq!(backend.url("/health"), "http://localhost:5001/health");

        let backend =
            HttpBackend::new(ApiConfig::default().with_base_url("http://localhost:5001/app/"))
                .unwrap();
        assert_eq!(backend.url("api/prompts"), "http://localhost:5001/app/api/prompts");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = HttpBackend::new(ApiConfig::default().with_base_url("localhost"));
        assert!(matches!(result, Err(ApiError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_health_check_parses_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"ok","version":"2.1.0"}"#)
            .create_async()
            .await;

        let backend = backend_for(&server, RetryPolicy::none());
        let health = backend.health_check().await.unwrap();
        assert!(health.is_ok());
        assert_eq!(health.version.as_deref(), Some("2.1.0"));
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/prompts")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(r#"{"prompts":[]}"#)
            .create_async()
            .await;

        let config = ApiConfig::default()
            .with_base_url(server.url())
            .with_auth_token("test-token")
            .with_retry(RetryPolicy::none());
        let backend = HttpBackend::new(config).unwrap();

        let list = backend.list_prompts().await.unwrap();
        assert!(list.prompts.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("GET", "/api/prompts")
            .with_status(401)
            .create_async()
            .await;
        let _missing = server
            .mock("POST", "/api/generate-prompt")
            .with_status(404)
            .create_async()
            .await;
        let _limited = server
            .mock("POST", "/api/execute-prompt")
            .with_status(429)
            .create_async()
            .await;

        let backend = backend_for(&server, RetryPolicy::none());

        assert!(matches!(
            backend.list_prompts().await,
            Err(ApiError::Authentication { status: 401 })
        ));
        assert!(matches!(
            backend
                .generate_prompt(GeneratePromptRequest::new("x"))
                .await,
            Err(ApiError::NotFound { .. })
        ));
        assert!(matches!(
            backend
                .execute_prompt(ExecutePromptRequest::inline("x"))
                .await,
            Err(ApiError::RateLimit)
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_is_serialization_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body("not valid json")
            .create_async()
            .await;

        let backend = backend_for(&server, RetryPolicy::none());
        assert!(matches!(
            backend.health_check().await,
            Err(ApiError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(503)
            .with_body("unavailable")
            .expect(3)
            .create_async()
            .await;

        let retry = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        };
        let backend = backend_for(&server, retry);

        let result = backend.health_check().await;
        assert!(matches!(result, Err(ApiError::Status { status: 503, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/execute-prompt")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let backend = backend_for(&server, RetryPolicy::with_retries(3, 1));
        let result = backend
            .execute_prompt(ExecutePromptRequest::inline("hello"))
            .await;
        assert!(matches!(result, Err(ApiError::Status { status: 400, .. })));
        mock.assert_async().await;
    }
}
