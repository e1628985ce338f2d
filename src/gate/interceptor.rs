//! Per-request decision state machine
//!
//! Every request that is not the callback or logout passes through here.
//! The interceptor loads the session named by the cookie, checks the
//! access token, and settles on exactly one of: forward upstream, refresh
//! then re-decide, or route into the login flow.
//!
//! Session lifecycle: `Anonymous -> AwaitingCallback -> Authenticated ->
//! (expiry) -> Refreshing -> Authenticated | Anonymous`. A session in
//! `AwaitingCallback` that sends any non-callback request is handled as
//! `Anonymous`: its pending state is discarded and login re-initiated.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::Response,
};
use serde_json::json;
use tracing::{debug, warn};

use super::cookie;
use super::login;
use super::proxy;
use super::router::AppState;
use crate::config::UnauthorizedMode;
use crate::oidc::token::{self, TokenStatus};
use crate::session::VersionedSession;
use crate::Error;

/// Outcome of inspecting a session. Computed fresh per request, never
/// persisted.
#[derive(Debug)]
pub enum Decision {
    /// Token valid: forward upstream with this access token
    Forward {
        /// The access token to present upstream
        access_token: String,
    },
    /// Token expired, or absent with a refresh token present: attempt a
    /// single refresh before deciding again
    Refresh {
        /// The session as loaded, with its CAS version
        current: VersionedSession,
    },
    /// No usable token: route into the login flow, discarding any stale
    /// session first
    Login {
        /// Prior session to discard, if one existed
        stale: Option<VersionedSession>,
    },
}

/// Decide what to do with a request given its (possibly absent) session.
///
/// An absent or unknown session cookie is equivalent to an all-empty
/// session. A session holding only a refresh token counts as `Missing`
/// for validation but is still refresh-eligible.
#[must_use]
pub fn decide(loaded: Option<VersionedSession>, skew: Duration) -> Decision {
    let Some(loaded) = loaded else {
        return Decision::Login { stale: None };
    };

    match token::status(&loaded.session, skew) {
        TokenStatus::Valid => {
            // Valid implies the token is present
            match loaded.session.access_token.clone() {
                Some(access_token) => Decision::Forward { access_token },
                None => Decision::Login {
                    stale: Some(loaded),
                },
            }
        }
        TokenStatus::Expired => Decision::Refresh { current: loaded },
        TokenStatus::Missing if loaded.session.refresh_token.is_some() => {
            Decision::Refresh { current: loaded }
        }
        TokenStatus::Missing => Decision::Login {
            stale: Some(loaded),
        },
    }
}

/// The gate handler: applied to every route the gate does not own itself.
pub async fn gate_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let session_id = cookie::session_id(request.headers(), &state.config.session.cookie_name);

    let loaded = match session_id {
        Some(ref id) => match state.sessions.get(id).await {
            Ok(loaded) => loaded,
            Err(e) => return login::store_error(&e),
        },
        None => None,
    };

    let original_url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string());

    match decide(loaded, state.config.provider.clock_skew) {
        Decision::Forward { access_token } => forward(&state, request, &access_token).await,
        Decision::Refresh { current } => {
            refresh_then_decide(&state, current, request, original_url).await
        }
        Decision::Login { stale } => unauthorized(&state, original_url, stale).await,
    }
}

/// Forward upstream; transport failure becomes a 502.
async fn forward(state: &AppState, request: Request, access_token: &str) -> Response {
    match state.proxy.forward(request, access_token).await {
        Ok(response) => response,
        Err(_) => proxy::bad_gateway(),
    }
}

/// Attempt exactly one refresh, serialized per session key.
///
/// The per-session lock plus the re-read after acquiring it ensure two
/// concurrent requests (two tabs) never both submit the same refresh token:
/// the second waiter finds the session already refreshed and just forwards.
async fn refresh_then_decide(
    state: &AppState,
    current: VersionedSession,
    request: Request,
    original_url: Option<String>,
) -> Response {
    let session_id = current.session.id.clone();
    let lock = state.refresh_lock(&session_id);
    let _guard = lock.lock().await;

    // Re-read under the lock: a concurrent request may have finished the
    // refresh (or torn the session down) while we waited.
    let loaded = match state.sessions.get(&session_id).await {
        Ok(Some(loaded)) => loaded,
        Ok(None) => return unauthorized(state, original_url, None).await,
        Err(e) => return login::store_error(&e),
    };

    match token::status(&loaded.session, state.config.provider.clock_skew) {
        TokenStatus::Valid => {
            debug!(session_id = %session_id, "Session already refreshed by a concurrent request");
            if let Some(token) = loaded.session.access_token.clone() {
                return forward(state, request, &token).await;
            }
            unauthorized(state, original_url, Some(loaded)).await
        }
        TokenStatus::Expired | TokenStatus::Missing => {
            let Some(refresh_token) = loaded.session.refresh_token.clone() else {
                return unauthorized(state, original_url, Some(loaded)).await;
            };

            match state.tokens.refresh(&refresh_token).await {
                Ok(tokens) => {
                    let mut session = loaded.session.clone();
                    session.apply_tokens(tokens);
                    let Some(token) = session.access_token.clone() else {
                        return unauthorized(state, original_url, Some(loaded)).await;
                    };

                    match state.sessions.put(session, Some(loaded.version)).await {
                        Ok(_) => forward(state, request, &token).await,
                        Err(Error::SessionConflict) => {
                            // Someone else wrote the session despite the
                            // lock (e.g. a racing login). Their tokens win.
                            retry_with_stored_token(state, request, &session_id, original_url)
                                .await
                        }
                        Err(e) => login::store_error(&e),
                    }
                }
                Err(e) => {
                    // Single attempt, no retry: a failed refresh means
                    // re-login, never a loop.
                    warn!(session_id = %session_id, error = %e, "Refresh failed, forcing re-login");
                    unauthorized(state, original_url, Some(loaded)).await
                }
            }
        }
    }
}

/// After losing a CAS race post-refresh, forward with whatever token the
/// winning writer stored, if it is usable.
async fn retry_with_stored_token(
    state: &AppState,
    request: Request,
    session_id: &str,
    original_url: Option<String>,
) -> Response {
    match state.sessions.get(session_id).await {
        Ok(Some(loaded))
            if token::status(&loaded.session, state.config.provider.clock_skew)
                == TokenStatus::Valid =>
        {
            match loaded.session.access_token.clone() {
                Some(token) => forward(state, request, &token).await,
                None => unauthorized(state, original_url, Some(loaded)).await,
            }
        }
        Ok(stale) => unauthorized(state, original_url, stale).await,
        Err(e) => login::store_error(&e),
    }
}

/// Route an unauthenticated request into the login flow.
///
/// Always initiates the flow (fresh session, state, original URL); the
/// configured mode only changes how the answer is rendered: a browser 303
/// or the machine-readable 401 body.
async fn unauthorized(
    state: &AppState,
    original_url: Option<String>,
    stale: Option<VersionedSession>,
) -> Response {
    let (location, set_cookie) = match login::initiate(state, original_url, stale).await {
        Ok(parts) => parts,
        Err(e) => return login::store_error(&e),
    };

    match state.config.unauthorized {
        UnauthorizedMode::Redirect => login::see_other(&location, Some(set_cookie)),
        UnauthorizedMode::Json => {
            let body = json!({
                "statusCode": 401,
                "redirectTo": location,
            });
            Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::SET_COOKIE, set_cookie)
                .body(Body::from(body.to_string()))
                .unwrap_or_default()
        }
    }
}
