//! Named JSON-RPC server over HTTP.
//!
//! A [`RpcServer`] owns the exposed method table of one space and its
//! middleware chain. Calls go through the chain before dispatch, so a
//! rejected call never reaches a handler or an upstream node.

use core::convert::Infallible;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    net::SocketAddr,
    pin::pin,
    sync::Arc,
};

use futures::future::join_all;
use http_body_util::{
    BodyExt,
    Full,
    LengthLimitError,
    Limited,
};
use hyper::{
    HeaderMap,
    Method,
    Request,
    Response,
    StatusCode,
    body::Bytes,
    header::{
        CONTENT_TYPE,
        HeaderValue,
    },
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use serde_json::{
    Value,
    json,
};
use tokio::net::{
    TcpListener,
    TcpStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    trace,
    warn,
};

use crate::{
    context::CallContext,
    error::{
        AssemblyError,
        GatewayError,
    },
    json_rpc::{
        JsonRpcErrorCode,
        JsonRpcRequest,
        MAX_BATCH_SIZE,
        MAX_JSON_SIZE,
        error_response,
        success_response,
    },
    middleware::MiddlewareChain,
    module::{
        ApiModule,
        SharedHandler,
    },
};

/// Lists the modules exposed by a server.
pub const RPC_MODULES_METHOD: &str = "rpc_modules";

const MODULE_VERSION: &str = "1.0";

pub struct RpcServer {
    name: &'static str,
    modules: Vec<&'static str>,
    methods: HashMap<String, SharedHandler>,
    middleware: MiddlewareChain,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("name", &self.name)
            .field("modules", &self.modules)
            .field("methods", &self.methods.len())
            .field("middleware", &self.middleware)
            .finish()
    }
}

impl RpcServer {
    /// Builds a server exposing every method of `modules`.
    pub fn new(
        name: &'static str,
        modules: Vec<ApiModule>,
        middleware: MiddlewareChain,
    ) -> Result<Self, AssemblyError> {
        let mut methods = HashMap::new();
        let mut namespaces = Vec::with_capacity(modules.len());

        for module in modules {
            namespaces.push(module.namespace());
            for (method, handler) in module.into_methods() {
                if method == RPC_MODULES_METHOD || methods.contains_key(&method) {
                    return Err(AssemblyError::DuplicateMethod {
                        server: name,
                        method,
                    });
                }
                methods.insert(method, handler);
            }
        }

        info!(
            server = name,
            modules = ?namespaces,
            methods = methods.len(),
            middlewares = middleware.len(),
            "Assembled RPC server"
        );

        Ok(Self {
            name,
            modules: namespaces,
            methods,
            middleware,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Exposed module namespaces.
    pub fn modules(&self) -> &[&'static str] {
        &self.modules
    }

    pub fn has_method(&self, method: &str) -> bool {
        method == RPC_MODULES_METHOD || self.methods.contains_key(method)
    }

    fn modules_info(&self) -> Value {
        let modules: BTreeMap<&str, &str> = self
            .modules
            .iter()
            .map(|module| (*module, MODULE_VERSION))
            .chain(std::iter::once(("rpc", MODULE_VERSION)))
            .collect();
        json!(modules)
    }

    /// Runs one validated call and renders its response object.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(server = self.name, request_id = %ctx.request_id, method = %request.method)
    )]
    pub async fn handle_call(&self, mut ctx: CallContext, request: JsonRpcRequest) -> Value {
        let JsonRpcRequest {
            method, params, id, ..
        } = request;

        let outcome = self.dispatch(&mut ctx, &method, params).await;
        self.middleware.on_response(&ctx, &method, &outcome);

        match outcome {
            Ok(result) => success_response(&id, result),
            Err(err) => error_response(&id, err.code(), &err.message(), err.data()),
        }
    }

    async fn dispatch(
        &self,
        ctx: &mut CallContext,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError> {
        self.middleware.on_call(ctx, method)?;

        if method == RPC_MODULES_METHOD {
            return Ok(self.modules_info());
        }

        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| GatewayError::MethodNotFound(method.to_string()))?;

        trace!(identity = ctx.identity(), "Dispatching RPC call");
        handler.call(ctx, params).await
    }

    /// Handles a raw request body, a single call or a batch.
    pub async fn handle_body(
        &self,
        body: &[u8],
        remote_addr: Option<SocketAddr>,
        headers: &HeaderMap,
    ) -> Value {
        let json: Value = match serde_json::from_slice(body) {
            Ok(json) => json,
            Err(err) => {
                debug!(server = self.name, error = %err, "Invalid JSON in request body");
                return error_response(
                    &Value::Null,
                    JsonRpcErrorCode::ParseError.code(),
                    "Parse error",
                    None,
                );
            }
        };

        match json {
            Value::Array(calls) => {
                if calls.is_empty() {
                    return error_response(
                        &Value::Null,
                        JsonRpcErrorCode::InvalidRequest.code(),
                        "Empty batch request",
                        None,
                    );
                }
                if calls.len() > MAX_BATCH_SIZE {
                    warn!(server = self.name, size = calls.len(), "Batch request too large");
                    return error_response(
                        &Value::Null,
                        JsonRpcErrorCode::InvalidRequest.code(),
                        "Batch request too large",
                        None,
                    );
                }

                let responses = join_all(
                    calls
                        .into_iter()
                        .map(|call| self.handle_value(call, remote_addr, headers.clone())),
                )
                .await;
                Value::Array(responses)
            }
            call => self.handle_value(call, remote_addr, headers.clone()).await,
        }
    }

    async fn handle_value(
        &self,
        call: Value,
        remote_addr: Option<SocketAddr>,
        headers: HeaderMap,
    ) -> Value {
        let id = call.get("id").cloned().unwrap_or(Value::Null);
        match JsonRpcRequest::validate(call) {
            Ok(request) => {
                self.handle_call(CallContext::new(remote_addr, headers), request)
                    .await
            }
            Err((code, message)) => error_response(&id, code.code(), message, None),
        }
    }

    /// Accepts connections until `cancel` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        info!(
            server = self.name,
            addr = ?listener.local_addr().ok(),
            "RPC server listening"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(server = self.name, "RPC server received cancellation signal, shutting down...");
                    break;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, remote_addr)) => {
                            serve_connection(Arc::clone(&self), stream, remote_addr, cancel.clone());
                        }
                        Err(err) => {
                            error!(server = self.name, ?err, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

fn serve_connection(
    server: Arc<RpcServer>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    cancel: CancellationToken,
) {
    let name = server.name;
    trace!(server = name, %remote_addr, "Accepted connection");

    // Use an adapter to access something implementing `tokio::io` traits as if they implement
    // `hyper::rt` IO traits.
    let io = TokioIo::new(stream);

    tokio::task::spawn(async move {
        let service = service_fn(move |req| {
            let server = Arc::clone(&server);
            async move { accept_request(req, server, remote_addr).await }
        });

        let mut conn = pin!(http1::Builder::new().serve_connection(io, service));
        let mut cancelled = pin!(cancel.cancelled());
        let mut shutting_down = false;

        loop {
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(err) = res {
                        debug!(server = name, ?err, "Error serving connection");
                    }
                    break;
                }
                () = &mut cancelled, if !shutting_down => {
                    shutting_down = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    });
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn json_response(body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Accepts an incoming HTTP request and answers it.
pub async fn accept_request<B>(
    req: Request<B>,
    server: Arc<RpcServer>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if req.uri().path() == "/health" && req.method() == Method::GET {
        return Ok(text_response(StatusCode::OK, "ok"));
    }

    if req.method() != Method::POST {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }

    let headers = req.headers().clone();
    let body = match Limited::new(req.into_body(), MAX_JSON_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.is::<LengthLimitError>() => {
            warn!(server = server.name, %remote_addr, "Request payload too large");
            return Ok(json_response(&error_response(
                &Value::Null,
                JsonRpcErrorCode::InvalidRequest.code(),
                "Request too large",
                None,
            )));
        }
        Err(err) => {
            debug!(server = server.name, %remote_addr, error = %err, "Failed to read request body");
            return Ok(text_response(StatusCode::BAD_REQUEST, "failed to read body"));
        }
    };

    let response = server.handle_body(&body, Some(remote_addr), &headers).await;
    Ok(json_response(&response))
}
