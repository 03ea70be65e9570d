//! Interceptors run around every RPC call.
//!
//! The chain runs before handler dispatch. A middleware rejecting a call stops
//! the chain, so nothing after it (including upstream client acquisition) runs.

use std::sync::Arc;

use gateway_node::{
    ClientProvider,
    Group,
};
use serde_json::Value;
use tracing::{
    debug,
    warn,
};

use crate::{
    context::CallContext,
    error::GatewayError,
    rate_limit::{
        RateLimitKey,
        RateLimitRegistry,
    },
};

pub trait Middleware: Send + Sync {
    /// Runs before the handler. Returning an error rejects the call.
    fn on_call(&self, ctx: &mut CallContext, method: &str) -> Result<(), GatewayError>;

    /// Runs after the handler with its outcome.
    fn on_response(
        &self,
        _ctx: &CallContext,
        _method: &str,
        _outcome: &Result<Value, GatewayError>,
    ) {
    }
}

/// Ordered list of middlewares.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn on_call(&self, ctx: &mut CallContext, method: &str) -> Result<(), GatewayError> {
        for layer in &self.layers {
            layer.on_call(ctx, method)?;
        }
        Ok(())
    }

    /// Runs the response hooks in reverse order.
    pub fn on_response(
        &self,
        ctx: &CallContext,
        method: &str,
        outcome: &Result<Value, GatewayError>,
    ) {
        for layer in self.layers.iter().rev() {
            layer.on_response(ctx, method, outcome);
        }
    }
}

/// Resolves the caller identity from the transport context.
///
/// The socket address is used unless the gateway sits behind a proxy that
/// sets `X-Forwarded-For` or `X-Real-IP`. A missing IP never fails the call,
/// the identity stays unset and resolves to the unknown sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMiddleware {
    trust_proxy_headers: bool,
}

impl IdentityMiddleware {
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self {
            trust_proxy_headers,
        }
    }
}

impl Middleware for IdentityMiddleware {
    fn on_call(&self, ctx: &mut CallContext, method: &str) -> Result<(), GatewayError> {
        if ctx.identity.is_none() {
            ctx.identity = ctx.client_ip(self.trust_proxy_headers);
            if ctx.identity.is_none() {
                debug!(request_id = %ctx.request_id, method, "Caller IP unavailable");
            }
        }
        Ok(())
    }
}

/// Rejects callers over their quota before any upstream work happens.
pub struct RateLimitMiddleware {
    registry: Arc<dyn RateLimitRegistry>,
    group: Group,
}

impl RateLimitMiddleware {
    pub fn new(registry: Arc<dyn RateLimitRegistry>, group: Group) -> Self {
        Self { registry, group }
    }
}

impl Middleware for RateLimitMiddleware {
    fn on_call(&self, ctx: &mut CallContext, method: &str) -> Result<(), GatewayError> {
        let key = RateLimitKey {
            identity: ctx.identity().to_string(),
            group: self.group.clone(),
            method: self.registry.per_method().then(|| method.to_string()),
        };

        self.registry.check(&key).map_err(|throttled| {
            warn!(
                request_id = %ctx.request_id,
                identity = %throttled.key.identity,
                group = %throttled.key.group,
                method,
                retry_after = ?throttled.retry_after,
                "Rate limit exceeded"
            );
            GatewayError::RateLimited {
                identity: throttled.key.identity,
                retry_after: throttled.retry_after,
            }
        })
    }
}

/// Counts and logs call outcomes.
#[derive(Debug, Clone)]
pub struct RequestLogMiddleware {
    server: &'static str,
}

impl RequestLogMiddleware {
    pub fn new(server: &'static str) -> Self {
        Self { server }
    }
}

impl Middleware for RequestLogMiddleware {
    fn on_call(&self, _ctx: &mut CallContext, _method: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    fn on_response(&self, ctx: &CallContext, method: &str, outcome: &Result<Value, GatewayError>) {
        let status = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            "gateway_requests_total",
            "server" => self.server,
            "status" => status
        )
        .increment(1);

        if let Err(err) = outcome {
            debug!(
                server = self.server,
                request_id = %ctx.request_id,
                identity = ctx.identity(),
                method,
                code = err.code(),
                error = %err,
                "RPC call failed"
            );
        }
    }
}

/// Identity extraction and rate limiting keyed to the default group of
/// `provider`.
pub fn http_middleware<C>(
    registry: Arc<dyn RateLimitRegistry>,
    provider: &ClientProvider<C>,
    trust_proxy_headers: bool,
) -> MiddlewareChain
where
    C: Clone + Send + Sync + 'static,
{
    MiddlewareChain::new()
        .with(IdentityMiddleware::new(trust_proxy_headers))
        .with(RateLimitMiddleware::new(
            registry,
            provider.default_group().clone(),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{
        RateLimitConfig,
        TokenBucketRegistry,
    };
    use hyper::{
        HeaderMap,
        header::HeaderValue,
    };
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    struct Reject;

    impl Middleware for Reject {
        fn on_call(&self, _ctx: &mut CallContext, method: &str) -> Result<(), GatewayError> {
            Err(GatewayError::MethodNotFound(method.to_string()))
        }
    }

    #[derive(Default)]
    struct Count(Arc<AtomicUsize>);

    impl Middleware for Count {
        fn on_call(&self, _ctx: &mut CallContext, _method: &str) -> Result<(), GatewayError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx_from(ip: &'static str) -> CallContext {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(ip));
        CallContext::new(None, headers)
    }

    #[test]
    fn rejection_stops_the_chain() {
        let count = Count::default();
        let seen = Arc::clone(&count.0);
        let chain = MiddlewareChain::new().with(Reject).with(count);

        let err = chain
            .on_call(&mut CallContext::detached(), "cfx_epochNumber")
            .unwrap_err();
        assert!(matches!(err, GatewayError::MethodNotFound(_)));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn identity_is_resolved_from_trusted_headers() {
        let trusting = IdentityMiddleware::new(true);
        let mut ctx = ctx_from("203.0.113.9");
        trusting.on_call(&mut ctx, "cfx_epochNumber").unwrap();
        assert_eq!(ctx.identity(), "203.0.113.9");

        let mut ctx = CallContext::detached();
        trusting.on_call(&mut ctx, "cfx_epochNumber").unwrap();
        assert_eq!(ctx.identity(), gateway_node::UNKNOWN_IP);
    }

    #[test]
    fn spoofed_forwarded_for_cannot_escape_quota() {
        let registry = Arc::new(TokenBucketRegistry::new(RateLimitConfig {
            max_tokens: 1,
            refill_tokens_per_second: 0.0,
            ..Default::default()
        }));
        let chain = MiddlewareChain::new()
            .with(IdentityMiddleware::default())
            .with(RateLimitMiddleware::new(registry, Group::CFX_HTTP));

        let from_socket = |forwarded_for: &'static str| {
            let mut ctx = ctx_from(forwarded_for);
            ctx.remote_addr = Some("198.51.100.20:40000".parse().unwrap());
            ctx
        };

        assert!(chain.on_call(&mut from_socket("1.1.1.1"), "cfx_call").is_ok());
        // a fresh header value per call still maps to the socket address
        let err = chain
            .on_call(&mut from_socket("2.2.2.2"), "cfx_call")
            .unwrap_err();
        match err {
            GatewayError::RateLimited { identity, .. } => assert_eq!(identity, "198.51.100.20"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rate_limit_is_per_identity() {
        let registry = Arc::new(TokenBucketRegistry::new(RateLimitConfig {
            max_tokens: 1,
            refill_tokens_per_second: 0.0,
            ..Default::default()
        }));
        let chain = MiddlewareChain::new()
            .with(IdentityMiddleware::new(true))
            .with(RateLimitMiddleware::new(registry, Group::CFX_HTTP));

        assert!(chain.on_call(&mut ctx_from("1.1.1.1"), "cfx_call").is_ok());
        let err = chain
            .on_call(&mut ctx_from("1.1.1.1"), "cfx_call")
            .unwrap_err();
        match err {
            GatewayError::RateLimited { identity, .. } => assert_eq!(identity, "1.1.1.1"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(chain.on_call(&mut ctx_from("2.2.2.2"), "cfx_call").is_ok());
    }

    #[test]
    fn per_method_limits_use_separate_buckets() {
        let registry = Arc::new(TokenBucketRegistry::new(RateLimitConfig {
            max_tokens: 1,
            refill_tokens_per_second: 0.0,
            per_method: true,
            ..Default::default()
        }));
        let chain = MiddlewareChain::new()
            .with(IdentityMiddleware::new(true))
            .with(RateLimitMiddleware::new(registry, Group::ETH_HTTP));

        assert!(chain.on_call(&mut ctx_from("1.1.1.1"), "eth_call").is_ok());
        assert!(chain.on_call(&mut ctx_from("1.1.1.1"), "eth_blockNumber").is_ok());
        assert!(chain.on_call(&mut ctx_from("1.1.1.1"), "eth_call").is_err());
    }
}
