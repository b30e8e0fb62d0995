//! Request descriptors handed to the dispatcher by endpoint functions
//!
//! A `RequestDescriptor` captures everything that identifies one API call:
//! method, target, query parameters, JSON body and the policy flags that
//! decide authentication and caching.

use std::fmt;

use chrono::Duration;
use serde_json::Value;
use url::Url;

use crate::error::ApiError;

/// HTTP methods the API is called with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Parses a method name, case-insensitively
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Method> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar query parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<u32> for ParamValue {
    fn from(i: u32) -> Self {
        ParamValue::Int(i64::from(i))
    }
}

impl From<usize> for ParamValue {
    fn from(i: usize) -> Self {
        ParamValue::Int(i as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Everything needed to perform one API call
///
/// Built once per dispatch with the builder methods below and never
/// mutated after it is handed to a dispatcher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Absolute URL, or a path resolved against the service origin
    pub target: String,
    /// Query parameters in insertion order
    pub params: Vec<(String, ParamValue)>,
    pub json: Option<Value>,
    /// Attach the session cookie
    pub needs_auth: bool,
    /// Skip the cache entirely and force a live fetch
    pub do_not_cache: bool,
    /// Custom time-to-live for the cached response
    pub expiry: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::Post, target)
    }

    /// Adds a query parameter, replacing any earlier value for the same key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn needs_auth(mut self, needs_auth: bool) -> Self {
        self.needs_auth = needs_auth;
        self
    }

    pub fn do_not_cache(mut self, do_not_cache: bool) -> Self {
        self.do_not_cache = do_not_cache;
        self
    }

    /// Resolves the effective cache policy for this request
    pub fn cache_policy(&self) -> CachePolicy {
        if self.do_not_cache {
            CachePolicy::Bypass
        } else if let Some(expiry) = self.expiry {
            CachePolicy::Expires(expiry)
        } else {
            CachePolicy::Default
        }
    }

    /// Query parameters rendered as strings, in insertion order
    pub fn rendered_params(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

/// How a cache layer should treat one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Ignore any cached entry, fetch live and store nothing
    Bypass,
    /// Use the cache layer's default expiry
    Default,
    /// Store the response with this time-to-live
    Expires(Duration),
}

impl CachePolicy {
    pub fn bypasses_cache(&self) -> bool {
        matches!(self, CachePolicy::Bypass)
    }
}

/// Resolves a target against the service origin.
///
/// Targets containing a scheme separator are used as-is; anything else is a
/// path relative to `base`, with any leading `/` dropped.
pub fn resolve_target(base: &str, target: &str) -> Result<Url, ApiError> {
    let resolved = if target.contains("://") {
        Url::parse(target)
    } else {
        Url::parse(base).and_then(|base| base.join(target.trim_start_matches('/')))
    };
    resolved.map_err(|e| ApiError::RequestFailed {
        status: None,
        message: format!("Invalid target '{}': {}", target, e),
    })
}
