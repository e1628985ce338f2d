//! HTTP router and shared application state

use std::sync::Arc;

use axum::{Router, routing::get};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::interceptor::gate_handler;
use super::login::{callback_form_handler, callback_handler, logout_handler};
use super::proxy::UpstreamProxy;
use crate::config::Config;
use crate::oidc::{ProviderMetadata, TokenClient};
use crate::session::{MemoryStore, SessionStore};
use crate::Result;

/// Shared application state
pub struct AppState {
    /// Gate configuration
    pub config: Config,
    /// Provider metadata, immutable after startup
    pub metadata: Arc<ProviderMetadata>,
    /// Session store, the single source of truth for per-browser state
    pub sessions: Arc<dyn SessionStore>,
    /// Token endpoint client
    pub tokens: TokenClient,
    /// Upstream forwarder
    pub proxy: UpstreamProxy,
    /// Per-session refresh serialization locks
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    /// Build application state with the in-memory session store.
    pub fn new(config: Config, metadata: ProviderMetadata) -> Result<Self> {
        let store = Arc::new(MemoryStore::new(config.session.ttl));
        Self::with_store(config, metadata, store)
    }

    /// Build application state over a caller-supplied session store.
    pub fn with_store(
        config: Config,
        metadata: ProviderMetadata,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let provider_http = reqwest::Client::builder()
            .timeout(config.provider.timeout)
            .build()?;

        // The proxy relays upstream redirects to the caller instead of
        // following them.
        let upstream_http = reqwest::Client::builder()
            .timeout(config.upstream.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let tokens = TokenClient::new(
            provider_http,
            metadata.token_endpoint.clone(),
            config.provider.client_id.clone(),
            config.provider.resolve_client_secret(),
        );

        let proxy = UpstreamProxy::new(
            upstream_http,
            &config.upstream.url,
            config.session.cookie_name.clone(),
        )?;

        Ok(Self {
            config,
            metadata: Arc::new(metadata),
            sessions,
            tokens,
            proxy,
            refresh_locks: DashMap::new(),
        })
    }

    /// The refresh serialization lock for a session key.
    pub fn refresh_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the refresh lock for a deleted session.
    pub fn forget_refresh_lock(&self, session_id: &str) {
        self.refresh_locks.remove(session_id);
    }

    /// Evict sessions past their TTL and release their refresh locks.
    pub async fn purge_expired_sessions(&self) -> Result<usize> {
        let removed = self.sessions.purge_expired().await?;
        for id in &removed {
            self.forget_refresh_lock(id);
        }
        Ok(removed.len())
    }
}

/// Create the router: the two routes the gate owns, and the interceptor
/// for everything else.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            &state.config.provider.callback_path,
            get(callback_handler).post(callback_form_handler),
        )
        .route(&state.config.provider.logout_path, get(logout_handler))
        .fallback(gate_handler)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
