//! Pooled, retrying HTTP transport for the remote API
//!
//! Every attempt goes through the shared [`RateLimiter`] and an in-flight
//! semaphore before touching the network. Transient failures are retried
//! with jittered exponential backoff; a 429 drains the shared bucket instead
//! of sleeping locally, so every caller backs off together.

use crate::decode;
use crate::error::{ApiError, ApiResult};
use crate::pagination::{Page, PageCursor};
use crate::rate_limit::RateLimiter;
use crate::token::{Token, TokenSource};
use async_stream::try_stream;
use futures::Stream;
use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Media type used by the remote API for requests and responses
pub const JSON_API: &str = "application/vnd.api+json";

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://app.terraform.io/api/v2";

/// Transport settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root; request paths are appended to it
    pub base_url: String,
    /// Concurrent requests allowed against the host; extra requests queue
    pub max_in_flight: usize,
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub base_backoff: Duration,
    /// Upper bound for any single backoff
    pub max_backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// `page[size]` sent on list requests
    pub page_size: u32,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_in_flight: 10,
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            page_size: 100,
            user_agent: concat!("catscan/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A request relative to the API root
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Decoded JSON body; `Null` when the body was empty
    pub body: Value,
}

/// Client for the remote API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    /// First credential the source handed out; reused for the client's lifetime
    token: OnceLock<Token>,
    limiter: Arc<RateLimiter>,
    in_flight: Semaphore,
    config: ClientConfig,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("limiter", &self.limiter)
            .field("available_slots", &self.in_flight.available_permits())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Build a client sharing `limiter` with any other client given the same `Arc`
    ///
    /// # Errors
    /// Returns `ApiError::Config` for an unusable base URL or settings
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenSource>,
        limiter: Arc<RateLimiter>,
    ) -> ApiResult<Self> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|e| ApiError::Config(format!("invalid base URL {}: {e}", config.base_url)))?;
        if config.max_in_flight == 0 {
            return Err(ApiError::Config("max_in_flight must be at least 1".into()));
        }
        if config.max_attempts == 0 {
            return Err(ApiError::Config("max_attempts must be at least 1".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_in_flight)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            token: OnceLock::new(),
            limiter,
            in_flight: Semaphore::new(config.max_in_flight),
            config,
        })
    }

    /// The shared request budget
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve the credential, failing fast when none is configured
    ///
    /// The source is only consulted until it yields a token; later calls
    /// reuse that token without touching the source again.
    ///
    /// # Errors
    /// Returns `ApiError::Unauthenticated` when the token source has nothing
    pub async fn require_token(&self) -> ApiResult<Token> {
        if let Some(token) = self.token.get() {
            return Ok(token.clone());
        }
        let token = self
            .tokens
            .token()
            .await?
            .ok_or_else(|| ApiError::Unauthenticated("no API token configured".into()))?;
        Ok(self.token.get_or_init(|| token).clone())
    }

    /// Send a request, retrying transient failures
    ///
    /// # Errors
    /// `Unauthenticated` before any network call if no token is available;
    /// `TransientNetwork` once attempts are exhausted; `Client` and
    /// `MalformedResponse` immediately; `Cancelled` if `cancel` fires.
    pub async fn request(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> ApiResult<ApiResponse> {
        let token = self.require_token().await?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            self.limiter.acquire_or_cancel(1, cancel).await?;

            let outcome = {
                let _permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ApiError::Cancelled),
                    permit = self.in_flight.acquire() => permit
                        .map_err(|_| ApiError::Config("client is shut down".into()))?,
                };
                debug!(method = %request.method, path = %request.path, attempt, "sending request");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ApiError::Cancelled),
                    outcome = self.send_once(&url, request, &token, attempt) => outcome,
                }
            };

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.config.max_attempts {
                warn!(path = %request.path, attempts = attempt, error = %err, "giving up after retries");
                return Err(ApiError::TransientNetwork {
                    path: request.path.clone(),
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }

            if let ApiError::RateLimited { retry_after } = err {
                // The bucket enforces the wait for every caller
                let backoff = retry_after.unwrap_or_else(|| self.backoff(attempt));
                self.limiter.penalize(backoff);
                continue;
            }

            let delay = self.backoff(attempt);
            warn!(path = %request.path, attempt, delay_ms = delay.as_millis(), error = %err, "retrying request");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ApiError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Lazily walk a paginated list endpoint
    ///
    /// Pages arrive in server order. The walk ends at the first page without
    /// a next cursor; a cursor the walk has already visited is treated as a
    /// malformed response so the sequence always terminates. Pass `start`
    /// to resume from a previously seen cursor.
    pub fn paginate<'a>(
        &'a self,
        path: impl Into<String>,
        query: Vec<(String, String)>,
        start: Option<PageCursor>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ApiResult<Page>> + 'a {
        let path = path.into();
        try_stream! {
            let mut cursor = start;
            let mut visited: HashSet<PageCursor> = cursor.iter().cloned().collect();

            loop {
                if cancel.is_cancelled() {
                    Err::<(), _>(ApiError::Cancelled)?;
                }

                let mut request = ApiRequest::get(path.clone())
                    .with_query("page[size]", self.config.page_size.to_string());
                request.query.extend(query.iter().cloned());
                if let Some(current) = &cursor {
                    let (key, value) = current.query_pair();
                    request = request.with_query(key, value);
                }

                let response = self.request(&request, &cancel).await?;
                let next = decode::next_cursor(&path, &response.body)?;
                if let Some(next) = &next {
                    if !visited.insert(next.clone()) {
                        Err::<(), _>(ApiError::malformed(
                            path.clone(),
                            format!("pagination revisits {next}"),
                        ))?;
                    }
                }

                debug!(path = %path, cursor = ?cursor, next = ?next, "fetched page");
                let last = next.is_none();
                yield Page {
                    cursor: cursor.clone(),
                    next: next.clone(),
                    body: response.body,
                };

                if last {
                    break;
                }
                cursor = next;
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        request: &ApiRequest,
        token: &Token,
        attempt: u32,
    ) -> ApiResult<ApiResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .bearer_auth(token.expose())
            .header(ACCEPT, JSON_API)
            .query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.header(CONTENT_TYPE, JSON_API).json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&request.path, attempt, &e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers(), self.config.max_backoff);
            warn!(path = %request.path, retry_after = ?retry_after, "server rate limited request");
            return Err(ApiError::RateLimited { retry_after });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&request.path, attempt, &e))?;

        if status.is_success() {
            let body = if bytes.iter().all(u8::is_ascii_whitespace) {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    ApiError::malformed(request.path.clone(), format!("invalid JSON body: {e}"))
                })?
            };
            return Ok(ApiResponse {
                status: status.as_u16(),
                body,
            });
        }

        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            return Err(ApiError::TransientNetwork {
                path: request.path.clone(),
                attempts: attempt,
                reason: format!("server returned {status}"),
            });
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthenticated(format!(
                "server rejected credential for {}",
                request.path
            )));
        }

        Err(ApiError::Client {
            status: status.as_u16(),
            path: request.path.clone(),
            message: error_message(&bytes).unwrap_or_else(|| status.to_string()),
        })
    }

    /// Jittered exponential backoff for the given (1-based) attempt
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .base_backoff
            .saturating_mul(2_u32.saturating_pow(exp))
            .min(self.config.max_backoff);
        let half = delay / 2;
        let half_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        let jitter = if half_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half_ms)
        };
        half + Duration::from_millis(jitter)
    }
}

fn transport_error(path: &str, attempt: u32, err: &reqwest::Error) -> ApiError {
    if err.is_builder() {
        return ApiError::Config(format!("invalid request for {path}: {err}"));
    }
    ApiError::TransientNetwork {
        path: path.to_string(),
        attempts: attempt,
        reason: err.to_string(),
    }
}

/// Seconds, or an HTTP date, per RFC 9110, capped at `max`
///
/// Negative, non-finite and unrepresentable values are ignored.
fn parse_retry_after(headers: &HeaderMap, max: Duration) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let delay = if let Ok(secs) = raw.parse::<f64>() {
        Duration::try_from_secs_f64(secs).ok()?
    } else {
        let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
        (at.with_timezone(&chrono::Utc) - chrono::Utc::now())
            .to_std()
            .ok()?
    };
    Some(delay.min(max))
}

/// First `errors[].detail` or `errors[].title` of a JSON:API error body
fn error_message(bytes: &[u8]) -> Option<String> {
    let body: Value = serde_json::from_slice(bytes).ok()?;
    let first = body.get("errors")?.as_array()?.first()?;
    first
        .get("detail")
        .or_else(|| first.get("title"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
