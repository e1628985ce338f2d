//! Gate server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use super::router::{AppState, create_router};
use crate::config::{Config, UnauthorizedMode};
use crate::oidc::ProviderMetadata;
use crate::{Error, Result};

/// How often expired sessions are swept from the store
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The authentication gate server
pub struct Gate {
    state: Arc<AppState>,
}

impl Gate {
    /// Create a gate from validated configuration and discovered provider
    /// metadata.
    pub fn new(config: Config, metadata: ProviderMetadata) -> Result<Self> {
        let state = Arc::new(AppState::new(config, metadata)?);
        Ok(Self { state })
    }

    /// Run the gate until shutdown.
    pub async fn run(self) -> Result<()> {
        let config = &self.state.config;
        let addr = SocketAddr::new(
            config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!(host = %config.server.host, port = config.server.port, "Listening");
        info!(issuer = %self.state.metadata.issuer, "Provider");
        info!(upstream = %config.upstream.url, "Upstream");
        info!(callback = %config.provider.callback_path, logout = %config.provider.logout_path, "Gate routes");

        match config.unauthorized {
            UnauthorizedMode::Redirect => {
                info!("Unauthenticated requests are redirected into the login flow");
            }
            UnauthorizedMode::Json => {
                info!("Unauthenticated requests receive a 401 JSON body");
            }
        }
        if !config.session.cookie_secure {
            warn!("Session cookie Secure attribute disabled - development use only");
        }

        let sweeper_state = Arc::clone(&self.state);
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match sweeper_state.purge_expired_sessions().await {
                    Ok(0) => {}
                    Ok(count) => debug!(count, "Evicted expired sessions"),
                    Err(e) => warn!(error = %e, "Session sweep failed"),
                }
            }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        sweeper.abort();
        info!("Gate shutdown complete");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
