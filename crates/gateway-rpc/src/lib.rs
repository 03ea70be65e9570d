//! JSON-RPC gateway servers.
//!
//! Three servers are assembled on top of [`gateway_node`]: the core space
//! server, the EVM space server and the core space bridge. Each one is an
//! [`RpcServer`] holding the exposed [`ApiModule`]s and a [`MiddlewareChain`]
//! that resolves the caller identity and applies rate limits before any
//! upstream client is acquired.

pub mod apis;
pub mod assembly;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod json_rpc;
pub mod middleware;
pub mod module;
pub mod rate_limit;
pub mod server;

pub use assembly::{
    CfxBridgeServerConfig,
    EVM_SPACE_RPC_SERVER_NAME,
    NATIVE_SPACE_BRIDGE_RPC_SERVER_NAME,
    NATIVE_SPACE_RPC_SERVER_NAME,
    ServerSettings,
    new_evm_space_server,
    new_native_space_bridge_server,
    new_native_space_server,
};
pub use config::Config;
pub use context::CallContext;
pub use error::{
    AssemblyError,
    GatewayError,
};
pub use gateway::Gateway;
pub use middleware::{
    Middleware,
    MiddlewareChain,
};
pub use module::{
    ApiModule,
    MethodHandler,
    filter_exposed_apis,
};
pub use rate_limit::{
    RateLimitConfig,
    RateLimitRegistry,
    TokenBucketRegistry,
};
pub use server::RpcServer;
