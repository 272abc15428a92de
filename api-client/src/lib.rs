pub mod config;
pub mod http;
pub mod provider;
pub mod types;

pub use config::{ApiConfig, RetryPolicy};
pub use http::HttpBackend;
pub use provider::{ApiError, ApiResult, BackendProvider};
pub use types::{
    ExecutePromptRequest, ExecutePromptResponse, GeneratePromptRequest, GeneratePromptResponse,
    HealthResponse, Prompt, PromptList, SourceChunk,
};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::http::*;
    pub use crate::provider::*;
    pub use crate::types::*;
}
