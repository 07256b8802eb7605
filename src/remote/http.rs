use super::{
    endpoints, CodeResponse, GenerateCodeRequest, GenerateTestsRequest, ImproveCodeRequest,
    ImproveTestsRequest, RegenerateCodeRequest, RegenerateCodeResponse, RemoteCodeService,
    RemoteError, RunTestsRequest, RunTestsResponse, TestsResponse,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;
const BACKOFF_MULTIPLIER: u32 = 2;
/// Upper bound on any single wait between retries
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Sent as `Authorization: Bearer <token>` when present
    pub api_token: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 3,
            initial_backoff: Duration::from_millis(2000),
            api_token: None,
        }
    }
}

/// JSON-over-HTTP client for the code-generation service.
pub struct HttpCodeService {
    client: reqwest::Client,
    base_url: Url,
    options: HttpOptions,
}

impl HttpCodeService {
    pub fn new(base_url: &str, options: HttpOptions) -> Result<Self, RemoteError> {
        let base_url = parse_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            options,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, endpoint: &'static str, body: &Req) -> Result<Resp, RemoteError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| RemoteError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;

        let mut retry_count = 0;
        loop {
            debug!(endpoint, attempt = retry_count + 1, "calling code service");
            let mut request = self.client.post(url.clone()).json(body);
            if let Some(token) = &self.options.api_token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error(endpoint, e))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| transport_error(endpoint, e))?;

            if status.is_success() {
                debug!(endpoint, status = status.as_u16(), "code service responded");
                return serde_json::from_str(&text).map_err(|e| RemoteError::Decode {
                    endpoint,
                    reason: format!("{} ({})", e, sanitize_api_response(&text)),
                });
            }

            let retryable = matches!(status.as_u16(), 429 | 503);
            if retryable && retry_count < self.options.max_retries {
                retry_count += 1;
                let delay = parse_retry_after(&text)
                    .map(|secs| Duration::from_secs(secs).min(MAX_BACKOFF))
                    .unwrap_or_else(|| backoff_delay(self.options.initial_backoff, retry_count));
                warn!(
                    endpoint,
                    status = status.as_u16(),
                    retry = retry_count,
                    max_retries = self.options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "code service busy, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(match status.as_u16() {
                401 | 403 => RemoteError::Unauthorized { endpoint },
                429 => RemoteError::RateLimited {
                    retries: retry_count,
                },
                502..=504 => RemoteError::Unavailable(format!(
                    "{} returned {} (the service may be temporarily down)",
                    endpoint, status
                )),
                code => RemoteError::Status {
                    endpoint,
                    status: code,
                    body: sanitize_api_response(&text),
                },
            });
        }
    }
}

#[async_trait]
impl RemoteCodeService for HttpCodeService {
    async fn generate_code(&self, req: &GenerateCodeRequest) -> Result<CodeResponse, RemoteError> {
        self.post(endpoints::GENERATE_CODE, req).await
    }

    async fn improve_code(&self, req: &ImproveCodeRequest) -> Result<CodeResponse, RemoteError> {
        self.post(endpoints::IMPROVE_CODE, req).await
    }

    async fn generate_tests(
        &self,
        req: &GenerateTestsRequest,
    ) -> Result<TestsResponse, RemoteError> {
        self.post(endpoints::GENERATE_TESTS, req).await
    }

    async fn improve_tests(&self, req: &ImproveTestsRequest) -> Result<TestsResponse, RemoteError> {
        self.post(endpoints::IMPROVE_TESTS, req).await
    }

    async fn run_tests(&self, req: &RunTestsRequest) -> Result<RunTestsResponse, RemoteError> {
        self.post(endpoints::RUN_TESTS, req).await
    }

    async fn regenerate_code(
        &self,
        req: &RegenerateCodeRequest,
    ) -> Result<RegenerateCodeResponse, RemoteError> {
        self.post(endpoints::REGENERATE_CODE, req).await
    }
}

fn parse_base_url(raw: &str) -> Result<Url, RemoteError> {
    let invalid = |reason: String| RemoteError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let trimmed = raw.trim();
    // Url::join drops the last path segment unless it ends with '/'
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

fn transport_error(endpoint: &'static str, err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout { endpoint }
    } else {
        RemoteError::Unavailable(format!("{}: {}", endpoint, err))
    }
}

/// Exponential wait before retry number `retry` (1-based), capped at [`MAX_BACKOFF`].
fn backoff_delay(initial: Duration, retry: u32) -> Duration {
    BACKOFF_MULTIPLIER
        .checked_pow(retry.saturating_sub(1))
        .and_then(|factor| initial.checked_mul(factor))
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

/// Extract a "retry after N" hint from an error body, if present
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

/// Truncate an error body and drop it entirely if it looks like it carries secrets.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
    ];

    let truncated: String = content.trim().chars().take(MAX_ERROR_CONTENT_LEN).collect();
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}
