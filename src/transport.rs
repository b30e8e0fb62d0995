//! HTTP transport boundary
//!
//! The dispatcher never talks to reqwest directly. It builds a
//! `TransportRequest`, hands it to a session, and the session eventually
//! calls a `Transport` (async) or `BlockingTransport` to put bytes on the wire.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use reqwest::header::{COOKIE, USER_AGENT};
use serde_json::Value;
use url::Url;

use crate::error::ApiError;
use crate::request::Method;

/// A fully resolved request, ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    /// Query parameters, rendered, in insertion order
    pub params: Vec<(String, String)>,
    pub json: Option<Value>,
    pub cookies: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            params: Vec::new(),
            json: None,
            cookies: BTreeMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Renders the cookie map as a `Cookie` header value
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// What came back from the remote service (or from the cache on its behalf)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Reason phrase, e.g. "Not Found"
    pub reason: String,
    pub body: String,
    /// Whether this response was served from a cache layer
    pub from_cache: bool,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            body: body.into(),
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Canonical reason phrase for a status code, or an empty string
pub fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Sends requests without blocking the caller's thread
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, ApiError>> + Send;
}

/// Sends requests, blocking until the response body has been read
pub trait BlockingTransport: Send + Sync {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, ApiError>;
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Async transport backed by `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), user_agent)
    }

    /// Create a transport with a custom HTTP client
    pub fn with_client(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, ApiError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.clone())
            .header(USER_AGENT, &self.user_agent)
            .query(&request.params)
            .timeout(request.timeout);
        if let Some(ref body) = request.json {
            builder = builder.json(body);
        }
        if let Some(cookie) = request.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body,
            from_cache: false,
        })
    }
}

/// Blocking transport backed by `reqwest::blocking::Client`
///
/// Must not be constructed or used from inside an async runtime.
#[derive(Debug, Clone)]
pub struct BlockingReqwestTransport {
    client: reqwest::blocking::Client,
    user_agent: String,
}

impl BlockingReqwestTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self::with_client(reqwest::blocking::Client::new(), user_agent)
    }

    pub fn with_client(client: reqwest::blocking::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }
}

impl BlockingTransport for BlockingReqwestTransport {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, ApiError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.clone())
            .header(USER_AGENT, &self.user_agent)
            .query(&request.params)
            .timeout(request.timeout);
        if let Some(ref body) = request.json {
            builder = builder.json(body);
        }
        if let Some(cookie) = request.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder.send()?;
        let status = response.status();
        let body = response.text()?;

        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body,
            from_cache: false,
        })
    }
}
