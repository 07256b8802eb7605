//! Remote code-generation service boundary
//!
//! Six JSON request/response operations. [`HttpCodeService`] talks to the
//! real service; tests plug in scripted implementations of the trait.

mod http;

pub use http::{HttpCodeService, HttpOptions};

use crate::language::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateCodeRequest {
    pub description: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImproveCodeRequest {
    pub code: String,
    pub feedback: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateTestsRequest {
    pub code: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImproveTestsRequest {
    pub code: String,
    pub test_cases: String,
    pub test_feedback: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTestsRequest {
    pub code: String,
    pub test_cases: String,
    pub language: Language,
}

/// Body of `regenerate_code_based_on_tests`; `feedback` is the failing run output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegenerateCodeRequest {
    pub code: String,
    pub feedback: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeResponse {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestsResponse {
    pub code_tests: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunTestsResponse {
    #[serde(default)]
    pub test_result: String,
    /// `true` means the code failed its tests
    #[serde(default)]
    pub error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegenerateCodeResponse {
    pub new_code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("invalid service URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: &'static str },
    #[error("service rejected the credentials for {endpoint}")]
    Unauthorized { endpoint: &'static str },
    #[error("rate limited by the service after {retries} retries")]
    RateLimited { retries: u32 },
    #[error("{endpoint} failed with status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("could not decode {endpoint} response: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
}

/// The six operations offered by the code-generation service.
#[async_trait]
pub trait RemoteCodeService: Send + Sync {
    async fn generate_code(&self, req: &GenerateCodeRequest) -> Result<CodeResponse, RemoteError>;

    async fn improve_code(&self, req: &ImproveCodeRequest) -> Result<CodeResponse, RemoteError>;

    async fn generate_tests(
        &self,
        req: &GenerateTestsRequest,
    ) -> Result<TestsResponse, RemoteError>;

    async fn improve_tests(&self, req: &ImproveTestsRequest) -> Result<TestsResponse, RemoteError>;

    async fn run_tests(&self, req: &RunTestsRequest) -> Result<RunTestsResponse, RemoteError>;

    async fn regenerate_code(
        &self,
        req: &RegenerateCodeRequest,
    ) -> Result<RegenerateCodeResponse, RemoteError>;
}

/// Endpoint paths, relative to the service base URL.
pub mod endpoints {
    pub const GENERATE_CODE: &str = "generate_code";
    pub const IMPROVE_CODE: &str = "improve_code";
    pub const GENERATE_TESTS: &str = "generate_tests";
    pub const IMPROVE_TESTS: &str = "improve_tests";
    pub const RUN_TESTS: &str = "run_tests";
    pub const REGENERATE_CODE: &str = "regenerate_code_based_on_tests";
}
