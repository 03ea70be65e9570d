use std::time::Duration;

use gateway_node::{
    ClientError,
    ProviderError,
};
use serde_json::Value;
use thiserror::Error;

use crate::json_rpc::JsonRpcErrorCode;

/// Error returned to the caller of a single RPC call.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("too many requests from {identity}; retry after {retry_after:?}")]
    RateLimited {
        identity: String,
        retry_after: Duration,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("upstream error: {0}")]
    Upstream(#[from] ClientError),
    #[error("the method {0} does not exist/is not available")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure to assemble a server. Fatal at startup.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("unknown module {0}")]
    UnknownModule(String),
    #[error("invalid node url {url}: {reason}")]
    InvalidNodeUrl { url: String, reason: String },
    #[error("method {method} registered twice on {server}")]
    DuplicateMethod {
        server: &'static str,
        method: String,
    },
    #[error("failed to build {server} modules: {reason}")]
    Modules {
        server: &'static str,
        reason: String,
    },
}

impl GatewayError {
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::RateLimited { .. } => JsonRpcErrorCode::LimitExceeded.code(),
            GatewayError::Provider(ProviderError::NoUpstreamAvailable(_)) => {
                JsonRpcErrorCode::ResourceUnavailable.code()
            }
            GatewayError::Provider(ProviderError::UpstreamConnectFailed { .. }) => {
                JsonRpcErrorCode::ServerError.code()
            }
            GatewayError::Provider(ProviderError::UnknownGroup(_)) | GatewayError::Internal(_) => {
                JsonRpcErrorCode::InternalError.code()
            }
            GatewayError::Upstream(ClientError::JsonRpc { code, .. }) => *code,
            GatewayError::Upstream(_) => JsonRpcErrorCode::ServerError.code(),
            GatewayError::MethodNotFound(_) => JsonRpcErrorCode::MethodNotFound.code(),
            GatewayError::InvalidParams(_) => JsonRpcErrorCode::InvalidParams.code(),
        }
    }

    /// Message sent to the caller. Node errors are passed through verbatim.
    ///
    /// Node names, URLs and group names stay in the logs.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Upstream(ClientError::JsonRpc { message, .. }) => message.clone(),
            GatewayError::Upstream(_) => "upstream request failed".to_string(),
            GatewayError::Provider(ProviderError::UpstreamConnectFailed { .. }) => {
                "upstream unavailable".to_string()
            }
            GatewayError::Provider(ProviderError::UnknownGroup(_)) => {
                "internal error: unknown node group".to_string()
            }
            _ => self.to_string(),
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            GatewayError::Upstream(ClientError::JsonRpc { data, .. }) => data.clone(),
            GatewayError::RateLimited { retry_after, .. } => {
                Some(serde_json::json!({ "retryAfterMs": retry_after.as_millis() as u64 }))
            }
            _ => None,
        }
    }
}
