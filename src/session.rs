//! Sessions: a transport, optionally fronted by the response cache
//!
//! The dispatcher only needs two things from a session: a cache lookup that
//! either answers a request outright or reports a miss (hits skip the
//! concurrency gate), and a way to send a request under a cache policy.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::cache::{fingerprint, CacheEntry, CacheStore, Fingerprint};
use crate::error::ApiError;
use crate::request::CachePolicy;
use crate::transport::{BlockingTransport, Transport, TransportRequest, TransportResponse};

/// A session for async dispatchers
pub trait Session: Send + Sync {
    /// Whether [`Session::is_cached`] can ever return `true`
    fn supports_cache_lookup(&self) -> bool;

    /// Cheap check for a fresh cached response; never touches the network
    fn is_cached(&self, request: &TransportRequest) -> impl Future<Output = bool> + Send;

    /// The fresh cached response for a request, or `None` on a miss.
    ///
    /// A hit is the final answer for the request. The check and the read are
    /// one step, so an entry expiring in between can only turn into a miss.
    fn lookup(
        &self,
        request: &TransportRequest,
    ) -> impl Future<Output = Option<TransportResponse>> + Send;

    fn send(
        &self,
        request: &TransportRequest,
        policy: CachePolicy,
    ) -> impl Future<Output = Result<TransportResponse, ApiError>> + Send;
}

/// A session for blocking dispatchers
pub trait BlockingSession: Send + Sync {
    fn supports_cache_lookup(&self) -> bool;

    fn is_cached(&self, request: &TransportRequest) -> bool;

    /// Blocking counterpart of [`Session::lookup`]
    fn lookup(&self, request: &TransportRequest) -> Option<TransportResponse>;

    fn send(
        &self,
        request: &TransportRequest,
        policy: CachePolicy,
    ) -> Result<TransportResponse, ApiError>;
}

/// Session that always goes to the network
#[derive(Debug, Clone)]
pub struct PlainSession<T> {
    transport: T,
}

impl<T> PlainSession<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Releases the transport and its connection pool
    pub fn close(self) {
        tracing::debug!("closing plain session");
    }
}

impl<T: Transport> Session for PlainSession<T> {
    fn supports_cache_lookup(&self) -> bool {
        false
    }

    async fn is_cached(&self, _request: &TransportRequest) -> bool {
        false
    }

    async fn lookup(&self, _request: &TransportRequest) -> Option<TransportResponse> {
        None
    }

    async fn send(
        &self,
        request: &TransportRequest,
        _policy: CachePolicy,
    ) -> Result<TransportResponse, ApiError> {
        self.transport.send(request).await
    }
}

impl<T: BlockingTransport> BlockingSession for PlainSession<T> {
    fn supports_cache_lookup(&self) -> bool {
        false
    }

    fn is_cached(&self, _request: &TransportRequest) -> bool {
        false
    }

    fn lookup(&self, _request: &TransportRequest) -> Option<TransportResponse> {
        None
    }

    fn send(
        &self,
        request: &TransportRequest,
        _policy: CachePolicy,
    ) -> Result<TransportResponse, ApiError> {
        self.transport.send(request)
    }
}

/// Session that serves and stores responses through a [`CacheStore`]
///
/// - a fresh entry is returned without a transport call
/// - `CachePolicy::Bypass` always fetches live and stores nothing
/// - successful live responses replace the stored entry
/// - if a refresh fails (transport error or non-success status) and an entry
///   exists, the stale entry is served instead
#[derive(Debug, Clone)]
pub struct CachedSession<T> {
    transport: T,
    store: CacheStore,
    /// Expiry for responses without a custom one; `None` never expires
    default_expiry: Option<chrono::Duration>,
}

impl<T> CachedSession<T> {
    pub fn new(transport: T, store: CacheStore) -> Self {
        Self {
            transport,
            store,
            default_expiry: None,
        }
    }

    pub fn with_default_expiry(mut self, expiry: Option<chrono::Duration>) -> Self {
        self.default_expiry = expiry;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn close(self) {
        tracing::debug!(root = %self.store.root().display(), "closing cached session");
    }

    /// An expiry past the representable range means the entry never expires
    fn expires_at(&self, policy: CachePolicy, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ttl = match policy {
            CachePolicy::Expires(ttl) => ttl,
            CachePolicy::Default | CachePolicy::Bypass => self.default_expiry?,
        };
        now.checked_add_signed(ttl)
    }

    fn entry_for(
        &self,
        key: &Fingerprint,
        response: &TransportResponse,
        policy: CachePolicy,
    ) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            key: key.as_key(),
            status: response.status,
            reason: response.reason.clone(),
            headers: Default::default(),
            body: response.body.clone(),
            cached_at: now,
            expires_at: self.expires_at(policy, now),
        }
    }
}

fn response_from_entry(entry: CacheEntry) -> TransportResponse {
    TransportResponse {
        status: entry.status,
        reason: entry.reason,
        body: entry.body,
        from_cache: true,
    }
}

/// Picks the stale entry over a failed refresh, if there is one
fn fallback(
    key: &Fingerprint,
    stale: Option<CacheEntry>,
    outcome: Result<TransportResponse, ApiError>,
) -> Result<TransportResponse, ApiError> {
    match (stale, outcome) {
        (Some(entry), Err(err)) => {
            tracing::warn!(%key, error = %err, "refresh failed, serving stale cache entry");
            Ok(response_from_entry(entry))
        }
        (Some(entry), Ok(response)) if !response.is_success() => {
            tracing::warn!(%key, status = response.status, "refresh failed, serving stale cache entry");
            Ok(response_from_entry(entry))
        }
        (_, outcome) => outcome,
    }
}

impl<T: BlockingTransport> BlockingSession for CachedSession<T> {
    fn supports_cache_lookup(&self) -> bool {
        true
    }

    fn is_cached(&self, request: &TransportRequest) -> bool {
        self.store.contains_fresh(&fingerprint(request))
    }

    fn lookup(&self, request: &TransportRequest) -> Option<TransportResponse> {
        let key = fingerprint(request);
        let cached = self.store.read(&key).filter(|c| !c.is_expired)?;
        tracing::debug!(%key, "cache hit");
        Some(response_from_entry(cached.data))
    }

    fn send(
        &self,
        request: &TransportRequest,
        policy: CachePolicy,
    ) -> Result<TransportResponse, ApiError> {
        if policy.bypasses_cache() {
            return self.transport.send(request);
        }

        let key = fingerprint(request);
        let cached = self.store.read(&key);
        if let Some(ref cached) = cached {
            if !cached.is_expired {
                tracing::debug!(%key, "cache hit");
                return Ok(response_from_entry(cached.data.clone()));
            }
        }
        tracing::debug!(%key, stale = cached.is_some(), "cache miss");

        let outcome = self.transport.send(request);
        if let Ok(ref response) = outcome {
            if response.is_success() {
                if let Err(e) = self.store.put(&key, &self.entry_for(&key, response, policy)) {
                    tracing::warn!(%key, error = %e, "failed to write cache entry");
                }
                return outcome;
            }
        }
        fallback(&key, cached.map(|c| c.data), outcome)
    }
}

impl<T: Transport> Session for CachedSession<T> {
    fn supports_cache_lookup(&self) -> bool {
        true
    }

    async fn is_cached(&self, request: &TransportRequest) -> bool {
        let store = self.store.clone();
        let key = fingerprint(request);
        tokio::task::spawn_blocking(move || store.contains_fresh(&key))
            .await
            .unwrap_or(false)
    }

    async fn lookup(&self, request: &TransportRequest) -> Option<TransportResponse> {
        let store = self.store.clone();
        let key = fingerprint(request);
        let read_key = key.clone();
        let cached = tokio::task::spawn_blocking(move || store.read(&read_key))
            .await
            .ok()
            .flatten()
            .filter(|c| !c.is_expired)?;
        tracing::debug!(%key, "cache hit");
        Some(response_from_entry(cached.data))
    }

    async fn send(
        &self,
        request: &TransportRequest,
        policy: CachePolicy,
    ) -> Result<TransportResponse, ApiError> {
        if policy.bypasses_cache() {
            return self.transport.send(request).await;
        }

        let key = fingerprint(request);
        let cached = {
            let store = self.store.clone();
            let key = key.clone();
            tokio::task::spawn_blocking(move || store.read(&key))
                .await
                .ok()
                .flatten()
        };
        if let Some(ref cached) = cached {
            if !cached.is_expired {
                tracing::debug!(%key, "cache hit");
                return Ok(response_from_entry(cached.data.clone()));
            }
        }
        tracing::debug!(%key, stale = cached.is_some(), "cache miss");

        let outcome = self.transport.send(request).await;
        if let Ok(ref response) = outcome {
            if response.is_success() {
                let store = self.store.clone();
                let entry = self.entry_for(&key, response, policy);
                let write_key = key.clone();
                let written = tokio::task::spawn_blocking(move || store.put(&write_key, &entry)).await;
                match written {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(%key, error = %e, "failed to write cache entry"),
                    Err(e) => tracing::warn!(%key, error = %e, "cache write task failed"),
                }
                return outcome;
            }
        }
        fallback(&key, cached.map(|c| c.data), outcome)
    }
}
