use api_client::{
    ApiConfig, BackendProvider, ExecutePromptRequest, GeneratePromptRequest, HttpBackend,
};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(60);

fn make_backend() -> HttpBackend {
    let base_url =
        std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:5001".to_string());
    let mut config = ApiConfig::default()
        .with_base_url(base_url)
        .with_timeout(TIMEOUT);
    if let Ok(token) = std::env::var("AUTH_TOKEN") {
        config = config.with_auth_token(token);
    }
    HttpBackend::new(config).expect("backend creation")
}

#[tokio::test]
#[ignore]
async fn test_health_check() {
    let backend = make_backend();

    let health = tokio::time::timeout(TIMEOUT, backend.health_check())
        .await
        .expect("health_check timed out")
        .expect("health_check failed");

    assert!(health.is_ok(), "backend reported status {}", health.status);
}

#[tokio::test]
#[ignore]
async fn test_list_prompts() {
    let backend = make_backend();

    let list = tokio::time::timeout(TIMEOUT, backend.list_prompts())
        .await
        .expect("list_prompts timed out")
        .expect("list_prompts failed");

    for prompt in &list.prompts {
        assert!(!prompt.id.is_empty(), "prompt id must not be empty");
    }
}

#[tokio::test]
#[ignore]
async fn test_generate_then_execute() {
    let backend = make_backend();

    let generated = tokio::time::timeout(
        TIMEOUT,
        backend.generate_prompt(
            GeneratePromptRequest::new("summarize support tickets").with_industry("saas"),
        ),
    )
    .await
    .expect("generate_prompt timed out")
    .expect("generate_prompt failed");
    assert!(
        !generated.generated_prompt.is_empty(),
        "generated prompt must not be empty"
    );

    let executed = tokio::time::timeout(
        TIMEOUT,
        backend.execute_prompt(ExecutePromptRequest::inline(generated.generated_prompt)),
    )
    .await
    .expect("execute_prompt timed out")
    .expect("execute_prompt failed");
    assert!(!executed.output.is_empty(), "output must not be empty");
}
