//! OIDC provider metadata discovery
//!
//! Fetches and validates the provider's published
//! `.well-known/openid-configuration` document (OpenID Connect Discovery
//! 1.0). Performed once at startup; the gate refuses to serve traffic if
//! discovery or validation fails.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// OpenID Connect provider metadata.
///
/// Field names follow the discovery specification's provider-metadata set.
/// Only the fields the gate consumes or validates are kept; everything else
/// in the document is ignored on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier, must match the configured issuer
    pub issuer: String,

    /// OAuth 2.0 authorization endpoint
    pub authorization_endpoint: String,

    /// OAuth 2.0 token endpoint (required for the code flow)
    #[serde(default)]
    pub token_endpoint: String,

    /// UserInfo endpoint (optional)
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// JSON Web Key Set document URL
    #[serde(default)]
    pub jwks_uri: String,

    /// Dynamic client registration endpoint (optional)
    #[serde(default)]
    pub registration_endpoint: Option<String>,

    /// RP-initiated logout endpoint (optional)
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// Supported scope values
    #[serde(default)]
    pub scopes_supported: Vec<String>,

    /// Supported `response_type` values
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported `response_mode` values; defaulted when absent
    #[serde(default)]
    pub response_modes_supported: Vec<String>,

    /// Supported grant types; defaulted when absent
    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// Supported subject identifier types
    #[serde(default)]
    pub subject_types_supported: Vec<String>,

    /// JWS algorithms the provider signs ID tokens with
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Token endpoint client authentication methods; defaulted when absent
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Claim names the provider may supply
    #[serde(default)]
    pub claims_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,

    /// Whether the `request_uri` parameter is supported; defaults to true
    #[serde(default)]
    pub request_uri_parameter_supported: Option<bool>,
}

impl ProviderMetadata {
    /// Fetch provider metadata from `<issuer>/.well-known/openid-configuration`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] on transport failure, non-200 status, or
    /// an undecodable body, and [`Error::InvalidConfiguration`] when a
    /// required field is missing from the document.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!(url = %url, "Fetching OIDC provider metadata");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("request to {url} failed: {e}")))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::Discovery(format!(
                "received non-200 status code from {url}: {}",
                response.status()
            )));
        }

        let mut metadata: Self = response
            .json()
            .await
            .map_err(|e| Error::Discovery(format!("couldn't decode metadata document: {e}")))?;

        metadata.fill_defaults();
        metadata.validate()?;

        debug!(issuer = %metadata.issuer, "Discovered OIDC provider");
        Ok(metadata)
    }

    /// Check that all fields the discovery spec marks REQUIRED are present.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.is_empty() {
            return Err(Error::InvalidConfiguration("issuer is empty".to_string()));
        }
        if self.authorization_endpoint.is_empty() {
            return Err(Error::InvalidConfiguration(
                "authorization_endpoint is empty".to_string(),
            ));
        }
        if self.jwks_uri.is_empty() {
            return Err(Error::InvalidConfiguration("jwks_uri is empty".to_string()));
        }
        if self.response_types_supported.is_empty() {
            return Err(Error::InvalidConfiguration(
                "response_types_supported is empty".to_string(),
            ));
        }
        if self.subject_types_supported.is_empty() {
            return Err(Error::InvalidConfiguration(
                "subject_types_supported is empty".to_string(),
            ));
        }
        if self.id_token_signing_alg_values_supported.is_empty() {
            return Err(Error::InvalidConfiguration(
                "id_token_signing_alg_values_supported is empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the spec-defined defaults for optional fields:
    /// - `response_modes_supported`: `["query", "fragment"]`
    /// - `grant_types_supported`: `["authorization_code", "implicit"]`
    /// - `token_endpoint_auth_methods_supported`: `["client_secret_basic"]`
    /// - `request_uri_parameter_supported`: `true`
    pub fn fill_defaults(&mut self) {
        if self.response_modes_supported.is_empty() {
            self.response_modes_supported =
                vec!["query".to_string(), "fragment".to_string()];
        }
        if self.grant_types_supported.is_empty() {
            self.grant_types_supported =
                vec!["authorization_code".to_string(), "implicit".to_string()];
        }
        if self.token_endpoint_auth_methods_supported.is_empty() {
            self.token_endpoint_auth_methods_supported =
                vec!["client_secret_basic".to_string()];
        }
        if self.request_uri_parameter_supported.is_none() {
            self.request_uri_parameter_supported = Some(true);
        }
    }
}
