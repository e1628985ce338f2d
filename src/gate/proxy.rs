//! Upstream forwarder
//!
//! Once the interceptor has authorized a request, the proxy relays it to
//! the configured upstream verbatim: method, path, query, headers, and a
//! streamed body in both directions. The gate injects the access token for
//! the upstream and strips its own session cookie on the way through.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::Response,
};
use tracing::{debug, warn};
use url::Url;

use super::cookie;
use crate::{Error, Result};

/// Header carrying the access token to the upstream
pub const FORWARDED_TOKEN_HEADER: &str = "x-forwarded-access-token";

/// Hop-by-hop headers that must not be relayed (RFC 7230 §6.1)
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards authorized requests to the upstream service
pub struct UpstreamProxy {
    http: reqwest::Client,
    base: Url,
    session_cookie_name: String,
}

impl UpstreamProxy {
    /// Create a proxy for the given upstream base URL.
    pub fn new(http: reqwest::Client, base_url: &str, session_cookie_name: String) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid upstream URL {base_url}: {e}")))?;

        Ok(Self {
            http,
            base,
            session_cookie_name,
        })
    }

    /// Relay a request to the upstream and stream its response back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] when the upstream is unreachable; an
    /// upstream error *status* is not an error here, it is relayed as-is.
    pub async fn forward(&self, request: Request, access_token: &str) -> Result<Response> {
        let target = self.target_url(request.uri());

        debug!(method = %request.method(), target = %target, "Forwarding upstream");

        let method = request.method().clone();
        let headers = self.outbound_headers(request.headers(), access_token);
        let body = reqwest::Body::wrap_stream(request.into_body().into_data_stream());

        let upstream_response = self
            .http
            .request(method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Upstream request failed");
                Error::Upstream(format!("upstream unreachable: {e}"))
            })?;

        let status = upstream_response.status();
        let mut response = Response::builder().status(status);
        if let Some(response_headers) = response.headers_mut() {
            for (name, value) in upstream_response.headers() {
                // append, not insert: repeated headers (Set-Cookie) must
                // all reach the caller
                if !HOP_BY_HOP.contains(&name.as_str()) {
                    response_headers.append(name.clone(), value.clone());
                }
            }
        }

        response
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| Error::Internal(format!("cannot build relayed response: {e}")))
    }

    /// Build the upstream URL: the base URL's path prefix joined with the
    /// request's path, plus the request's query.
    fn target_url(&self, uri: &Uri) -> Url {
        let mut target = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        target.set_path(&format!("{prefix}{}", uri.path()));
        target.set_query(uri.query());
        target
    }

    /// Headers to send upstream: the inbound set minus hop-by-hop and host,
    /// with the gate's session cookie removed and the access token injected.
    fn outbound_headers(&self, inbound: &HeaderMap, access_token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in inbound {
            if HOP_BY_HOP.contains(&name.as_str()) || name == header::HOST {
                continue;
            }
            if name == header::COOKIE {
                let stripped = value
                    .to_str()
                    .ok()
                    .and_then(|raw| cookie::strip_session(raw, &self.session_cookie_name));
                if let Some(remaining) = stripped {
                    if let Ok(v) = HeaderValue::from_str(&remaining) {
                        headers.append(header::COOKIE, v);
                    }
                }
                continue;
            }
            // append: multi-valued inbound headers pass through intact
            headers.append(name.clone(), value.clone());
        }

        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
            headers.insert(header::AUTHORIZATION, bearer);
        }
        if let Ok(token) = HeaderValue::from_str(access_token) {
            headers.insert(FORWARDED_TOKEN_HEADER, token);
        }

        headers
    }
}

/// 502 response used when the upstream cannot be reached
#[must_use]
pub fn bad_gateway() -> Response {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("upstream unavailable"))
        .unwrap_or_default()
}
