//! Session cookie reading and writing
//!
//! The gate owns exactly one cookie: the session ID. Other cookies pass
//! through to the upstream untouched.

use axum::http::HeaderMap;

use crate::config::SessionConfig;

/// Extract the session ID from the request's `Cookie` header, if present.
#[must_use]
pub fn session_id(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;

    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == cookie_name && !value.is_empty()).then(|| value.to_string())
    })
}

/// Build the `Set-Cookie` value that installs a session ID.
#[must_use]
pub fn set_session(config: &SessionConfig, id: &str) -> String {
    let mut cookie = format!(
        "{}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.cookie_name,
        config.ttl.as_secs()
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build the `Set-Cookie` value that expires the session cookie.
#[must_use]
pub fn clear_session(config: &SessionConfig) -> String {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        config.cookie_name
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Strip the gate's own session cookie from a `Cookie` header value,
/// leaving every other cookie intact for the upstream.
#[must_use]
pub fn strip_session(header: &str, cookie_name: &str) -> Option<String> {
    let remaining: Vec<&str> = header
        .split(';')
        .map(str::trim)
        .filter(|pair| {
            pair.split_once('=')
                .is_none_or(|(name, _)| name != cookie_name)
        })
        .collect();

    if remaining.is_empty() {
        None
    } else {
        Some(remaining.join("; "))
    }
}
