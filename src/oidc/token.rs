//! Token validation and token-endpoint exchanges
//!
//! The validator is a pure function over a session; the [`TokenClient`]
//! performs the two provider round-trips the gate is allowed to make:
//! refresh-token exchange and authorization-code exchange.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::session::Session;
use crate::{Error, Result};

/// Outcome of checking a session's access token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Access token present and not yet expired
    Valid,
    /// Access token present but past its expiry
    Expired,
    /// No access token. A session holding only a refresh token is also
    /// `Missing`; it stays eligible for a refresh attempt.
    Missing,
}

/// Check a session's access token against the clock.
///
/// `skew` brings the expiry forward: a token within `skew` of expiring is
/// already treated as expired so the refresh happens before the upstream
/// would reject it.
#[must_use]
pub fn status(session: &Session, skew: Duration) -> TokenStatus {
    if session.access_token.is_none() {
        return TokenStatus::Missing;
    }

    match session.access_token_expiry {
        Some(expiry) if Utc::now() + skew < expiry => TokenStatus::Valid,
        // Expiry absent means the token was never validated; treat as expired
        // rather than trusting it indefinitely.
        _ => TokenStatus::Expired,
    }
}

/// Tokens returned from a successful token-endpoint exchange
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Access token authorizing upstream requests
    pub access_token: String,
    /// Rotated refresh token, if the provider issued one
    pub refresh_token: Option<String>,
    /// Absolute expiry computed from the response's `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
}

/// Wire format of a token-endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    #[allow(dead_code)]
    scope: Option<String>,
}

impl From<TokenResponse> for TokenSet {
    fn from(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        }
    }
}

/// Client for the provider's token endpoint.
///
/// Authenticates with `client_secret_basic`, the discovery default. The
/// underlying reqwest client carries the configured provider timeout, so a
/// hung exchange is abandoned and classified as a transport failure.
pub struct TokenClient {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
}

impl TokenClient {
    /// Create a token client for the discovered token endpoint
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        token_endpoint: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            token_endpoint,
            client_id,
            client_secret,
        }
    }

    /// Exchange a refresh token for a new token set.
    ///
    /// Exactly one attempt; every failure mode (transport, provider
    /// rejection, malformed body) is [`Error::RefreshFailed`], which the
    /// gate treats as "no usable token" and answers with a login redirect.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);

        let response = self
            .http
            .post(&self.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::RefreshFailed(format!("token endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::RefreshFailed(format!(
                "provider rejected refresh token: HTTP {}",
                response.status()
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::RefreshFailed(format!("malformed token response: {e}")))?;

        debug!("Refreshed access token");
        Ok(token_response.into())
    }

    /// Exchange an authorization code for a token set.
    ///
    /// Failures are [`Error::ExchangeFailed`]; the login attempt is
    /// abandoned and the user retries from scratch.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", redirect_uri);

        let response = self
            .http
            .post(&self.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::ExchangeFailed(format!("token endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::ExchangeFailed(format!(
                "provider rejected authorization code: HTTP {}",
                response.status()
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::ExchangeFailed(format!("malformed token response: {e}")))?;

        debug!("Exchanged authorization code for tokens");
        Ok(token_response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn session_with_token(expires_in_secs: i64) -> Session {
        let mut session = Session::new();
        session.access_token = Some("token".to_string());
        session.access_token_expiry = Some(Utc::now() + chrono::Duration::seconds(expires_in_secs));
        session
    }

    // =========================================================================
    // status
    // =========================================================================

    #[test]
    fn empty_session_is_missing() {
        assert_eq!(status(&Session::new(), Duration::ZERO), TokenStatus::Missing);
    }

    #[test]
    fn unexpired_token_is_valid() {
        let session = session_with_token(3600);
        assert_eq!(status(&session, Duration::ZERO), TokenStatus::Valid);
    }

    #[test]
    fn past_expiry_is_expired() {
        let session = session_with_token(-10);
        assert_eq!(status(&session, Duration::ZERO), TokenStatus::Expired);
    }

    #[test]
    fn skew_brings_expiry_forward() {
        // Expires in 30s; with 60s skew it already counts as expired
        let session = session_with_token(30);
        assert_eq!(
            status(&session, Duration::from_secs(60)),
            TokenStatus::Expired
        );
        assert_eq!(status(&session, Duration::ZERO), TokenStatus::Valid);
    }

    #[test]
    fn token_without_expiry_is_expired() {
        let mut session = Session::new();
        session.access_token = Some("token".to_string());
        assert_eq!(status(&session, Duration::ZERO), TokenStatus::Expired);
    }

    #[test]
    fn refresh_token_alone_is_missing() {
        let mut session = Session::new();
        session.refresh_token = Some("refresh".to_string());
        assert_eq!(status(&session, Duration::ZERO), TokenStatus::Missing);
    }

    // =========================================================================
    // TokenResponse -> TokenSet
    // =========================================================================

    #[test]
    fn token_set_computes_absolute_expiry() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at","token_type":"Bearer","expires_in":3600,"refresh_token":"rt"}"#,
        )
        .unwrap();
        let set: TokenSet = response.into();

        assert_eq!(set.access_token, "at");
        assert_eq!(set.refresh_token.as_deref(), Some("rt"));
        let expiry = set.expires_at.expect("expiry set");
        let delta = expiry - Utc::now();
        assert!(delta.num_seconds() > 3590 && delta.num_seconds() <= 3600);
    }

    #[test]
    fn token_set_without_expiry_or_refresh() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at"}"#).unwrap();
        let set: TokenSet = response.into();

        assert!(set.refresh_token.is_none());
        assert!(set.expires_at.is_none());
    }
}
