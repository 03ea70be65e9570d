//! Upstream full node routing and connection provisioning.
//!
//! The gateway serves every RPC call on a full node picked by a [`Router`].
//! A [`ClientProvider`] turns routing decisions into pooled clients: one
//! [`ClientPool`] per node [`Group`], one lazily connected client per node.

pub mod client;
pub mod group;
pub mod node_name;
pub mod pool;
pub mod provider;
pub mod router;
pub mod space;

pub use client::{
    CfxClient,
    ClientError,
    ClientFactory,
    EthClient,
    RpcClient,
    UpstreamClient,
};
pub use group::{
    Group,
    Space,
};
pub use node_name::{
    redact_url,
    url_to_node_name,
};
pub use pool::{
    ClientPool,
    Loaded,
};
pub use provider::{
    ClientProvider,
    ProviderConfig,
    ProviderError,
    UNKNOWN_IP,
};
pub use router::{
    HashRingRouter,
    Router,
    SharedRouter,
    StaticRouter,
};
pub use space::{
    CfxClientProvider,
    EthClientProvider,
    new_cfx_client_provider,
    new_eth_client_provider,
};
