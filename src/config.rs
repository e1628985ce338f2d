//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// OIDC provider / relying-party configuration
    pub provider: ProviderConfig,
    /// Session cookie and lifetime configuration
    pub session: SessionConfig,
    /// Upstream service configuration
    pub upstream: UpstreamConfig,
    /// How unauthenticated requests are answered
    pub unauthorized: UnauthorizedMode,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// OIDC relying-party configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider issuer URL; discovery fetches
    /// `<issuer>/.well-known/openid-configuration`
    pub issuer: String,
    /// OAuth2 client ID registered with the provider
    pub client_id: String,
    /// OAuth2 client secret (supports `env:VAR_NAME` indirection)
    pub client_secret: String,
    /// Externally reachable callback URL registered as the redirect URI
    pub redirect_url: String,
    /// Requested scopes; `openid` is always added if missing
    pub scopes: Vec<String>,
    /// Path on this gate that receives the provider callback
    pub callback_path: String,
    /// Path on this gate that clears the session
    pub logout_path: String,
    /// Timeout for provider-facing HTTP calls (discovery and token exchanges)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Clock-skew tolerance applied when checking access-token expiry
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            scopes: vec!["openid".to_string()],
            callback_path: "/oauth2/callback".to_string(),
            logout_path: "/oauth2/logout".to_string(),
            timeout: Duration::from_secs(10),
            clock_skew: Duration::ZERO,
        }
    }
}

impl ProviderConfig {
    /// Resolve the client secret (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        if let Some(var_name) = self.client_secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.client_secret.clone())
        } else {
            self.client_secret.clone()
        }
    }

    /// Requested scopes with `openid` guaranteed present, space-joined
    #[must_use]
    pub fn scope_param(&self) -> String {
        let mut scopes = self.scopes.clone();
        if !scopes.iter().any(|s| s == "openid") {
            scopes.insert(0, "openid".to_string());
        }
        scopes.join(" ")
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name carrying the session ID
    pub cookie_name: String,
    /// Set the `Secure` attribute on the session cookie
    pub cookie_secure: bool,
    /// Session time-to-live (cookie `Max-Age`)
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "authgate_session".to_string(),
            cookie_secure: true,
            ttl: Duration::from_secs(8 * 3600),
        }
    }
}

/// Upstream service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the protected upstream service
    pub url: String,
    /// Timeout for upstream requests
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// How the gate answers a request that has no usable token.
///
/// Selected once per deployment; never branched on request content, so the
/// gate's outcomes stay deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnauthorizedMode {
    /// 303 redirect into the provider login flow (browser deployments)
    #[default]
    Redirect,
    /// `{"statusCode":401,"redirectTo":"<login url>"}` body (API deployments)
    Json,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or a required field is missing after merging.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (AUTHGATE_ prefix)
        figment = figment.merge(Env::prefixed("AUTHGATE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Check that the fields without sensible defaults are present.
    pub fn validate(&self) -> Result<()> {
        if self.provider.issuer.is_empty() {
            return Err(Error::Config("provider.issuer is required".to_string()));
        }
        if self.provider.client_id.is_empty() {
            return Err(Error::Config("provider.client_id is required".to_string()));
        }
        if self.provider.redirect_url.is_empty() {
            return Err(Error::Config(
                "provider.redirect_url is required".to_string(),
            ));
        }
        if self.upstream.url.is_empty() {
            return Err(Error::Config("upstream.url is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            provider: ProviderConfig {
                issuer: "https://login.example.com".to_string(),
                client_id: "gate".to_string(),
                client_secret: "secret".to_string(),
                redirect_url: "http://localhost:3000/oauth2/callback".to_string(),
                ..ProviderConfig::default()
            },
            upstream: UpstreamConfig {
                url: "http://localhost:8080".to_string(),
                ..UpstreamConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_issuer() {
        let mut config = valid_config();
        config.provider.issuer = String::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_missing_upstream() {
        let mut config = valid_config();
        config.upstream.url = String::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn scope_param_always_includes_openid() {
        let mut provider = ProviderConfig::default();
        provider.scopes = vec!["profile".to_string(), "email".to_string()];
        assert_eq!(provider.scope_param(), "openid profile email");

        provider.scopes = vec!["openid".to_string(), "profile".to_string()];
        assert_eq!(provider.scope_param(), "openid profile");
    }

    #[test]
    fn client_secret_env_indirection() {
        let mut provider = ProviderConfig::default();

        provider.client_secret = "literal".to_string();
        assert_eq!(provider.resolve_client_secret(), "literal");

        // Unset variable falls back to the raw reference
        provider.client_secret = "env:AUTHGATE_TEST_SECRET_UNSET".to_string();
        assert_eq!(
            provider.resolve_client_secret(),
            "env:AUTHGATE_TEST_SECRET_UNSET"
        );
    }

    #[test]
    fn unauthorized_mode_defaults_to_redirect() {
        assert_eq!(Config::default().unauthorized, UnauthorizedMode::Redirect);
    }
}
