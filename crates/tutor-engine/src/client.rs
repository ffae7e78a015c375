//! Resilient remote calls to the generation service.
//!
//! `ResilientClient` wraps one logical call with retry and backoff and
//! classifies the outcome. It is the only place in the engine that retries.
//!
//! # Retry rules
//!
//! - Transport failures (connection refused, DNS, timeout) and HTTP 429/503
//!   are transient and retried up to `max_retries` times.
//! - The delay before retry `n` (0-based) is `min(base * 2^n, cap)`.
//! - Any other non-2xx status is permanent and returned immediately.
//!
//! The same `Operation` value is sent on every attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, RetrySettings};
use crate::error::{is_retryable_status, FailureKind, Result, TutorError};

// ============================================================================
// Operation and Response
// ============================================================================

/// HTTP method of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST` with a JSON body.
    Post,
}

/// A pure description of one remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, starting with `/`.
    pub path: String,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
    /// JSON body for `POST`.
    pub body: Option<Value>,
}

impl Operation {
    /// Creates a `GET` operation.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Creates a `POST` operation with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Raw response returned by a `Transport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Creates a new `RawResponse`.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// The transport could not get a response from the server.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// Description of the failure.
    pub message: String,
}

impl TransportError {
    /// Creates a new `TransportError`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================================================
// Seams
// ============================================================================

/// Sends one attempt of an operation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the call once. Any response, including non-2xx, is `Ok`.
    async fn send(&self, operation: &Operation) -> std::result::Result<RawResponse, TransportError>;
}

/// Waits between retries.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleeps for `delay`.
    async fn sleep(&self, delay: Duration);
}

/// `Sleeper` backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// `Transport` backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    /// Creates a transport for the configured service.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                TutorError::config_validation(
                    format!("failed to build HTTP client: {e}"),
                    "Check requestTimeoutSecs and the TLS setup of this machine",
                )
            })?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, operation: &Operation) -> std::result::Result<RawResponse, TransportError> {
        let url = format!("{}{}", self.base_url, operation.path);
        let mut request = match operation.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !operation.query.is_empty() {
            request = request.query(&operation.query);
        }
        if let Some(body) = &operation.body {
            request = request.json(body);
        }
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::new(format!("request to {url} failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(format!("failed to read response body: {e}")))?;
        Ok(RawResponse { status, body })
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(RetrySettings::default())
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-based): `min(base * 2^attempt, cap)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Bookkeeping for one retry of a logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryableCall {
    /// Retry number, starting at 1.
    pub attempt: u32,
    /// Delay waited before this retry.
    pub delay: Duration,
    /// Kind of the failure that caused the retry.
    pub last_error: FailureKind,
}

// ============================================================================
// ResilientClient
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Builds an `ApiError` from a failed response, using `detail` and `error`
/// from the payload when present.
fn api_error(response: &RawResponse) -> TutorError {
    let payload: ErrorPayload = serde_json::from_str(&response.body).unwrap_or_default();
    let message = match payload.detail {
        Some(Value::String(detail)) if !detail.is_empty() => detail,
        Some(Value::Null | Value::String(_)) | None => format!("HTTP {}", response.status),
        Some(other) => other.to_string(),
    };
    TutorError::ApiError {
        status: response.status,
        message,
        code: payload.error,
    }
}

/// Parses a 2xx body. An empty body becomes `Value::Null`.
fn decode_body(operation: &Operation, response: &RawResponse) -> Result<Value> {
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|e| {
        TutorError::protocol(format!("invalid JSON from {}: {e}", operation.path))
    })
}

/// Executes operations with retry, backoff and failure classification.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Creates a client from explicit parts.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, sleeper: Arc<dyn Sleeper>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    /// Creates a reqwest-backed client for the configured service.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(TokioSleeper),
            RetryPolicy::from(config.retry),
        ))
    }

    /// Executes `operation` and returns the decoded JSON body.
    ///
    /// # Errors
    ///
    /// - `NetworkError` if the transport kept failing through every retry
    /// - `ApiError` for a permanent status, or 429/503 after every retry
    /// - `ProtocolError` if a 2xx body is not valid JSON
    pub async fn execute(&self, operation: &Operation) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            debug!(method = ?operation.method, path = %operation.path, attempt = attempt + 1, "Sending request");
            let failure = match self.transport.send(operation).await {
                Ok(response) if response.is_success() => {
                    return decode_body(operation, &response);
                }
                Ok(response) if is_retryable_status(response.status) => api_error(&response),
                Ok(response) => {
                    let err = api_error(&response);
                    debug!(path = %operation.path, status = response.status, "Permanent failure");
                    return Err(err);
                }
                Err(e) => TutorError::network(e.message, attempt + 1),
            };

            if attempt >= self.policy.max_retries {
                warn!(
                    path = %operation.path,
                    attempts = attempt + 1,
                    error = %failure,
                    "Retries exhausted"
                );
                return Err(failure);
            }

            let call = RetryableCall {
                attempt: attempt + 1,
                delay: self.policy.delay_for(attempt),
                last_error: failure.kind(),
            };
            warn!(
                path = %operation.path,
                retry = call.attempt,
                delay_ms = u64::try_from(call.delay.as_millis()).unwrap_or(u64::MAX),
                kind = %call.last_error,
                "Transient failure, retrying"
            );
            self.sleeper.sleep(call.delay).await;
            attempt += 1;
        }
    }
}
