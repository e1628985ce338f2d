//! OIDC Authentication Gate
//!
//! A reverse proxy that sits in front of an upstream HTTP service and
//! requires every inbound request to carry a valid OIDC access token.
//! Requests without one are routed through the authorization-code login
//! flow against a single configured OpenID Connect provider.
//!
//! # Components
//!
//! - **Discovery** ([`oidc::discovery`]): fetches and validates the
//!   provider's `.well-known/openid-configuration` once at startup.
//! - **Session store** ([`session`]): per-browser session state with
//!   compare-and-swap writes.
//! - **Token validator/refresher** ([`oidc::token`]): expiry checks and
//!   refresh-token exchange.
//! - **Gate** ([`gate`]): the per-request decision state machine, login
//!   flow controller, and upstream forwarder.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod oidc;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
