//! JSON-RPC clients for upstream full nodes.

use std::{
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};

use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};
use url::Url;

use crate::node_name::url_to_node_name;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid node url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("HTTP client error: {0}")]
    Http(reqwest::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON-RPC error code {code}: {message}")]
    JsonRpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("connecting to {node} timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },
    #[error("connection attempt aborted: {0}")]
    Aborted(String),
}

impl From<reqwest::Error> for ClientError {
    /// Drops the request URL, node URLs may embed API keys.
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.without_url())
    }
}

/// Builds a connected client for a full node URL.
///
/// The provider invokes the factory at most once per node at a time, the
/// returned client is cached and shared by every caller routed to that node.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Client: Clone + Send + Sync + 'static;

    async fn connect(&self, url: &str) -> Result<Self::Client, ClientError>;
}

/// Client types that can forward raw JSON-RPC calls.
pub trait UpstreamClient: Clone + Send + Sync + 'static {
    fn rpc(&self) -> &RpcClient;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC 2.0 client over HTTP for a single full node.
///
/// Cloning is cheap and clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct RpcClient {
    inner: Arc<RpcClientInner>,
}

#[derive(Debug)]
struct RpcClientInner {
    http: Client,
    url: Url,
    node: String,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str, request_timeout: Option<Duration>) -> Result<Self, ClientError> {
        let parsed = Url::parse(url)?;
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            inner: Arc::new(RpcClientInner {
                http: builder.build()?,
                node: url_to_node_name(url),
                url: parsed,
                request_id: AtomicU64::new(1),
            }),
        })
    }

    /// Node name of the upstream this client talks to.
    pub fn node(&self) -> &str {
        &self.inner.node
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    fn next_request_id(&self) -> u64 {
        self.inner.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issues a call and returns the raw `result`, `null` when absent.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let request_id = self.next_request_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: request_id,
        };

        let response = self
            .inner
            .http
            .post(self.inner.url.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::InvalidResponse(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse = response.json().await?;

        if body.jsonrpc != "2.0" {
            return Err(ClientError::InvalidResponse(format!(
                "Invalid JSON-RPC version: expected '2.0', got '{}'",
                body.jsonrpc
            )));
        }

        if body.id.as_u64() != Some(request_id) {
            return Err(ClientError::InvalidResponse(format!(
                "Request/response ID mismatch: expected {request_id}, got {}",
                body.id
            )));
        }

        if let Some(error) = body.error {
            return Err(ClientError::JsonRpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }

    /// Issues a call and decodes the result.
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, ClientError> {
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Client of a native space full node.
#[derive(Debug, Clone)]
pub struct CfxClient(RpcClient);

impl CfxClient {
    /// Builds a client and probes the node with `cfx_clientVersion`.
    pub async fn connect(url: &str, request_timeout: Option<Duration>) -> Result<Self, ClientError> {
        let client = RpcClient::new(url, request_timeout)?;
        let version: String = client.request("cfx_clientVersion", json!([])).await?;
        tracing::debug!(node = client.node(), %version, "Probed core space full node");
        Ok(Self(client))
    }

    pub async fn gas_price(&self) -> Result<U256, ClientError> {
        self.0.request("cfx_gasPrice", json!([])).await
    }
}

impl UpstreamClient for CfxClient {
    fn rpc(&self) -> &RpcClient {
        &self.0
    }
}

/// Client of an EVM space full node.
#[derive(Debug, Clone)]
pub struct EthClient(RpcClient);

impl EthClient {
    /// Builds a client and probes the node with `web3_clientVersion`.
    pub async fn connect(url: &str, request_timeout: Option<Duration>) -> Result<Self, ClientError> {
        let client = RpcClient::new(url, request_timeout)?;
        let version: String = client.request("web3_clientVersion", json!([])).await?;
        tracing::debug!(node = client.node(), %version, "Probed evm space full node");
        Ok(Self(client))
    }
}

impl UpstreamClient for EthClient {
    fn rpc(&self) -> &RpcClient {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct CfxClientFactory {
    pub request_timeout: Option<Duration>,
}

#[async_trait]
impl ClientFactory for CfxClientFactory {
    type Client = CfxClient;

    async fn connect(&self, url: &str) -> Result<CfxClient, ClientError> {
        CfxClient::connect(url, self.request_timeout).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct EthClientFactory {
    pub request_timeout: Option<Duration>,
}

#[async_trait]
impl ClientFactory for EthClientFactory {
    type Client = EthClient;

    async fn connect(&self, url: &str) -> Result<EthClient, ClientError> {
        EthClient::connect(url, self.request_timeout).await
    }
}
