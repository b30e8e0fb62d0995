//! Request dispatch: one entry point for every API call
//!
//! A dispatcher turns a [`RequestDescriptor`] into a transport request,
//! asks its session for a cached answer, and otherwise sends it through the
//! session while holding a slot in the concurrency gate. The outcome is
//! classified either way. Requests answered from cache never wait on the gate.

use std::sync::Arc;

use crate::cache::CacheStore;
use crate::classify::classify_response;
use crate::config::{Credential, Settings};
use crate::error::ApiError;
use crate::gate::ConcurrencyGate;
use crate::request::{resolve_target, RequestDescriptor};
use crate::session::{BlockingSession, CachedSession, PlainSession, Session};
use crate::transport::{BlockingReqwestTransport, ReqwestTransport, TransportRequest};

/// Builds the transport request for a descriptor
fn prepare(
    settings: &Settings,
    credential: &Credential,
    descriptor: &RequestDescriptor,
) -> Result<TransportRequest, ApiError> {
    let url = resolve_target(&settings.base_url, &descriptor.target)?;
    let mut request = TransportRequest::new(descriptor.method, url);
    request.params = descriptor.rendered_params();
    request.json = descriptor.json.clone();
    request.timeout = settings.timeout;
    if descriptor.needs_auth {
        let (name, value) = credential.cookie();
        request.cookies.insert(name, value);
    }
    Ok(request)
}

/// Async dispatcher over a [`Session`]
#[derive(Debug, Clone)]
pub struct Dispatcher<S> {
    session: S,
    settings: Arc<Settings>,
    credential: Arc<Credential>,
    gate: ConcurrencyGate,
}

impl<S: Session> Dispatcher<S> {
    pub fn new(
        session: S,
        settings: Arc<Settings>,
        credential: Arc<Credential>,
        gate: ConcurrencyGate,
    ) -> Self {
        Self {
            session,
            settings,
            credential,
            gate,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Performs one call and returns the raw success body
    pub async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<String, ApiError> {
        let request = prepare(&self.settings, &self.credential, descriptor)?;
        let policy = descriptor.cache_policy();

        if !policy.bypasses_cache() && self.session.supports_cache_lookup() {
            if let Some(hit) = self.session.lookup(&request).await {
                tracing::debug!(method = %request.method, url = %request.url, "served from cache");
                return classify_response(hit);
            }
        }

        // Anything past the lookup may reach the network, so it holds a permit
        let permit = self.gate.acquire().await;
        tracing::debug!(method = %request.method, url = %request.url, "dispatching request");
        let outcome = self.session.send(&request, policy).await;
        drop(permit);

        classify_response(outcome?)
    }

    /// Releases the session and its connection pool
    pub fn close(self) {
        tracing::debug!("closing dispatcher session");
    }

    pub fn into_session(self) -> S {
        self.session
    }
}

/// Blocking dispatcher over a [`BlockingSession`]
///
/// Must not be used from inside an async task: gate admission blocks the
/// calling thread.
#[derive(Debug, Clone)]
pub struct BlockingDispatcher<S> {
    session: S,
    settings: Arc<Settings>,
    credential: Arc<Credential>,
    gate: ConcurrencyGate,
}

impl<S: BlockingSession> BlockingDispatcher<S> {
    pub fn new(
        session: S,
        settings: Arc<Settings>,
        credential: Arc<Credential>,
        gate: ConcurrencyGate,
    ) -> Self {
        Self {
            session,
            settings,
            credential,
            gate,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<String, ApiError> {
        let request = prepare(&self.settings, &self.credential, descriptor)?;
        let policy = descriptor.cache_policy();

        if !policy.bypasses_cache() && self.session.supports_cache_lookup() {
            if let Some(hit) = self.session.lookup(&request) {
                tracing::debug!(method = %request.method, url = %request.url, "served from cache");
                return classify_response(hit);
            }
        }

        let permit = self.gate.acquire_blocking();
        tracing::debug!(method = %request.method, url = %request.url, "dispatching request");
        let outcome = self.session.send(&request, policy);
        drop(permit);

        classify_response(outcome?)
    }

    pub fn close(self) {
        tracing::debug!("closing dispatcher session");
    }
}

/// Shared state for every dispatcher of one client
///
/// Holds the settings, the credential and the concurrency gate. Dispatchers
/// built from the same context share the gate, so the connection limit holds
/// across all of them.
#[derive(Debug, Clone)]
pub struct ApiContext {
    settings: Arc<Settings>,
    credential: Arc<Credential>,
    gate: ConcurrencyGate,
}

impl ApiContext {
    pub fn new(settings: Settings) -> Self {
        let credential = Credential::from_env(settings.credential_var.clone());
        let gate = ConcurrencyGate::from_limit(settings.max_connections);
        Self {
            settings: Arc::new(settings),
            credential: Arc::new(credential),
            gate,
        }
    }

    /// Context built from [`Settings::from_env`]
    pub fn from_env() -> Self {
        Self::new(Settings::from_env())
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Arc::new(credential);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn dispatcher<S: Session>(&self, session: S) -> Dispatcher<S> {
        Dispatcher::new(
            session,
            Arc::clone(&self.settings),
            Arc::clone(&self.credential),
            self.gate.clone(),
        )
    }

    pub fn blocking_dispatcher<S: BlockingSession>(&self, session: S) -> BlockingDispatcher<S> {
        BlockingDispatcher::new(
            session,
            Arc::clone(&self.settings),
            Arc::clone(&self.credential),
            self.gate.clone(),
        )
    }

    pub fn sync_store(&self) -> CacheStore {
        CacheStore::with_dir(self.settings.sync_cache_dir.clone())
    }

    pub fn async_store(&self) -> CacheStore {
        CacheStore::with_dir(self.settings.async_cache_dir.clone())
    }

    pub fn cached_session(&self) -> CachedSession<ReqwestTransport> {
        CachedSession::new(ReqwestTransport::new(&self.settings.user_agent), self.async_store())
            .with_default_expiry(self.settings.default_expiry)
    }

    pub fn plain_session(&self) -> PlainSession<ReqwestTransport> {
        PlainSession::new(ReqwestTransport::new(&self.settings.user_agent))
    }

    pub fn cached_blocking_session(&self) -> CachedSession<BlockingReqwestTransport> {
        CachedSession::new(
            BlockingReqwestTransport::new(&self.settings.user_agent),
            self.sync_store(),
        )
        .with_default_expiry(self.settings.default_expiry)
    }

    pub fn plain_blocking_session(&self) -> PlainSession<BlockingReqwestTransport> {
        PlainSession::new(BlockingReqwestTransport::new(&self.settings.user_agent))
    }

    /// Async dispatcher over the cached reqwest session
    pub fn default_dispatcher(&self) -> Dispatcher<CachedSession<ReqwestTransport>> {
        self.dispatcher(self.cached_session())
    }

    pub fn default_blocking_dispatcher(
        &self,
    ) -> BlockingDispatcher<CachedSession<BlockingReqwestTransport>> {
        self.blocking_dispatcher(self.cached_blocking_session())
    }

    /// Dispatches once through a session opened for this call alone
    pub async fn dispatch_scoped(&self, descriptor: &RequestDescriptor) -> Result<String, ApiError> {
        let dispatcher = self.default_dispatcher();
        let result = dispatcher.dispatch(descriptor).await;
        dispatcher.close();
        result
    }

    pub fn dispatch_scoped_blocking(&self, descriptor: &RequestDescriptor) -> Result<String, ApiError> {
        let dispatcher = self.default_blocking_dispatcher();
        let result = dispatcher.dispatch(descriptor);
        dispatcher.close();
        result
    }
}
