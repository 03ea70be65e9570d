use std::net::SocketAddr;

use gateway_node::UNKNOWN_IP;
use hyper::HeaderMap;
use uuid::Uuid;

/// Per-call state threaded through the middleware chain into handlers.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: Uuid,
    pub remote_addr: Option<SocketAddr>,
    pub headers: HeaderMap,
    /// Caller identity resolved by the middleware chain.
    pub identity: Option<String>,
}

impl CallContext {
    pub fn new(remote_addr: Option<SocketAddr>, headers: HeaderMap) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            remote_addr,
            headers,
            identity: None,
        }
    }

    /// Context without any transport information, used by in-process callers.
    pub fn detached() -> Self {
        Self::new(None, HeaderMap::new())
    }

    /// Caller identity, [`UNKNOWN_IP`] when it could not be determined.
    pub fn identity(&self) -> &str {
        self.identity.as_deref().unwrap_or(UNKNOWN_IP)
    }

    /// Caller IP. Proxy headers are only consulted when `trust_proxy_headers`
    /// is set, otherwise any caller could pick its own identity.
    pub fn client_ip(&self, trust_proxy_headers: bool) -> Option<String> {
        let from_headers = if trust_proxy_headers {
            ip_from_headers(&self.headers)
        } else {
            None
        };
        from_headers.or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
    }
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`.
pub fn ip_from_headers(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
}
