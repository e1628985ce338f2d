//! Login flow controller
//!
//! Two phases per session: **initiate** builds the 303 redirect into the
//! provider's authorization endpoint and records the single-use `state`
//! plus the originally requested URL; **callback** verifies the provider's
//! redirect, exchanges the code, and sends the browser back where it was
//! going. The callback accepts both the query-parameter redirect (GET) and
//! a `form_post` delivery (POST with the same parameters in the body).
//!
//! Every callback failure produces the same generic response. Which check
//! failed (error parameter, missing session, consumed or mismatched state)
//! is logged, never revealed to the caller.

use std::sync::Arc;

use axum::{
    Form,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::Url;

use super::cookie;
use super::router::AppState;
use crate::session::{Session, VersionedSession};
use crate::{Error, Result};

/// Query parameters of the provider's callback redirect
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// Anti-forgery state round-tripped through the provider
    pub state: Option<String>,

    /// Error code, set when the provider declined
    pub error: Option<String>,

    /// Human-readable error detail (logged, never echoed)
    pub error_description: Option<String>,
}

/// Generate a fresh random state value (16 bytes, base64url)
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Constant-time comparison of the stored and returned state values
#[must_use]
pub fn states_match(expected: &str, given: &str) -> bool {
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

/// Begin a login flow: discard any prior session, create a fresh one
/// holding the state value and original URL, and return the authorization
/// redirect target plus the cookie that installs the new session.
///
/// Discarding the prior session wholesale is the cleanup step: stale
/// tokens and any pending state from an abandoned flow never leak into
/// the new one.
pub async fn initiate(
    state: &AppState,
    original_url: Option<String>,
    prior: Option<VersionedSession>,
) -> Result<(String, String)> {
    if let Some(prior) = prior {
        state.sessions.delete(&prior.session.id).await?;
        state.forget_refresh_lock(&prior.session.id);
    }

    let mut session = Session::new();
    let flow_state = generate_state();
    session.state = Some(flow_state.clone());
    session.original_url = original_url;

    let set_cookie = cookie::set_session(&state.config.session, &session.id);
    let session_id = session.id.clone();
    state.sessions.put(session, None).await?;

    let mut auth_url = Url::parse(&state.metadata.authorization_endpoint)
        .map_err(|e| Error::Internal(format!("invalid authorization endpoint: {e}")))?;
    auth_url
        .query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &state.config.provider.client_id)
        .append_pair("redirect_uri", &state.config.provider.redirect_url)
        .append_pair("scope", &state.config.provider.scope_param())
        .append_pair("state", &flow_state);

    debug!(session_id = %session_id, "Initiated login flow");
    Ok((auth_url.to_string(), set_cookie))
}

/// Handle the provider's redirect back to the gate (query parameters).
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Response {
    handle_callback(&state, params, &headers).await
}

/// Handle a `form_post` delivery of the callback: same parameters, carried
/// in the request body instead of the query string.
pub async fn callback_form_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<CallbackParams>,
) -> Response {
    handle_callback(&state, params, &headers).await
}

async fn handle_callback(
    state: &AppState,
    params: CallbackParams,
    headers: &HeaderMap,
) -> Response {
    let Some(session_id) = cookie::session_id(headers, &state.config.session.cookie_name) else {
        warn!("Callback without a session cookie");
        return login_failed();
    };

    let loaded = match state.sessions.get(&session_id).await {
        Ok(Some(loaded)) => loaded,
        Ok(None) => {
            warn!(session_id = %session_id, "Callback for unknown session");
            return login_failed();
        }
        Err(e) => return store_error(&e),
    };

    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        warn!(error = %error, description = %description, "Provider returned an error");
        return login_failed();
    }

    let (Some(code), Some(given_state)) = (params.code, params.state) else {
        warn!(session_id = %session_id, "Callback missing code or state");
        return login_failed();
    };

    // Absence of a stored state covers both a flow that never started and a
    // replay of an already-consumed callback; both fail like a mismatch.
    let Some(expected_state) = loaded.session.state.clone() else {
        warn!(session_id = %session_id, "Callback with no pending login flow");
        return login_failed();
    };

    if !states_match(&expected_state, &given_state) {
        warn!(session_id = %session_id, "Callback state mismatch");
        return login_failed();
    }

    // Consume the state before contacting the provider so a concurrent
    // replay of the same callback loses the CAS race and fails.
    let mut session = loaded.session;
    session.state = None;
    let version = match state.sessions.put(session.clone(), Some(loaded.version)).await {
        Ok(version) => version,
        Err(Error::SessionConflict) => {
            warn!(session_id = %session_id, "Concurrent callback consumed the state first");
            return login_failed();
        }
        Err(e) => return store_error(&e),
    };

    let tokens = match state
        .tokens
        .exchange_code(&code, &state.config.provider.redirect_url)
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Code exchange failed");
            return exchange_failed();
        }
    };

    session.apply_tokens(tokens);
    let redirect_to = sanitize_redirect(session.original_url.take());

    if let Err(e) = state.sessions.put(session, Some(version)).await {
        // Conflict here means another request rewrote the session mid-login;
        // the tokens are discarded and the user retries.
        warn!(session_id = %session_id, error = %e, "Failed to persist tokens");
        return match e {
            Error::SessionConflict => login_failed(),
            other => store_error(&other),
        };
    }

    info!(session_id = %session_id, redirect_to = %redirect_to, "Login complete");
    see_other(&redirect_to, Some(cookie::set_session(&state.config.session, &session_id)))
}

/// Clear the session and send the browser to the root path.
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Some(session_id) = cookie::session_id(&headers, &state.config.session.cookie_name) {
        if let Err(e) = state.sessions.delete(&session_id).await {
            return store_error(&e);
        }
        state.forget_refresh_lock(&session_id);
        info!(session_id = %session_id, "Logged out");
    }

    see_other("/", Some(cookie::clear_session(&state.config.session)))
}

/// Only same-origin absolute paths are acceptable post-login targets;
/// anything else (absolute URLs, protocol-relative `//host`) falls back
/// to the root path.
fn sanitize_redirect(target: Option<String>) -> String {
    match target {
        Some(t) if t.starts_with('/') && !t.starts_with("//") => t,
        _ => "/".to_string(),
    }
}

/// Build a 303 See Other response, optionally setting a cookie.
pub(super) fn see_other(location: &str, set_cookie: Option<String>) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, location);

    if let Some(cookie) = set_cookie {
        builder = builder.header(header::SET_COOKIE, cookie);
    }

    builder.body(Body::empty()).unwrap_or_default()
}

/// The one generic response for every callback verification failure.
fn login_failed() -> Response {
    html_response(StatusCode::BAD_REQUEST, "Login failed. Please try again.")
}

/// Response when the code exchange itself fails; no redirect, so a broken
/// provider cannot put the browser into a loop.
fn exchange_failed() -> Response {
    html_response(
        StatusCode::BAD_GATEWAY,
        "Login could not be completed. Please try again.",
    )
}

pub(super) fn store_error(error: &Error) -> Response {
    tracing::error!(error = %error, "Session store failure");
    html_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn html_response(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>authgate</title></head>\n\
         <body><p>{message}</p></body>\n</html>"
    );
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_default()
}
