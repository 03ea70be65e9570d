use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use parking_lot::RwLock;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    error,
    info,
    trace,
};

use crate::{
    client::{
        ClientError,
        ClientFactory,
    },
    group::Group,
    node_name::{
        redact_url,
        url_to_node_name,
    },
    pool::{
        ClientPool,
        Loaded,
    },
    router::SharedRouter,
};

/// Routing key used when the caller IP cannot be determined.
pub const UNKNOWN_IP: &str = "unknown_ip";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown node group {0}")]
    UnknownGroup(Group),
    #[error("no full node available for group {0}")]
    NoUpstreamAvailable(Group),
    #[error("bad full node connection to {node}: {source}")]
    UpstreamConnectFailed {
        node: String,
        #[source]
        source: Arc<ClientError>,
    },
}

/// Connection settings of a [`ClientProvider`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Upper bound on establishing a new upstream connection.
    #[serde(default)]
    pub connect_timeout: Option<Duration>,
    /// Timeout applied to every request sent on an upstream connection.
    #[serde(default)]
    pub request_timeout: Option<Duration>,
}

/// Hands out pooled upstream clients based on routing decisions.
///
/// Every group owns one [`ClientPool`], created on registration and kept for
/// the lifetime of the provider. Clients are connected lazily on first use and
/// reused afterwards.
pub struct ClientProvider<C> {
    router: SharedRouter,
    factory: Arc<dyn ClientFactory<Client = C>>,
    default_group: Group,
    connect_timeout: Option<Duration>,
    // group => node name => client
    groups: RwLock<HashMap<Group, Arc<ClientPool<C>>>>,
}

impl<C> std::fmt::Debug for ClientProvider<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProvider")
            .field("default_group", &self.default_group)
            .field("groups", &self.groups.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C> ClientProvider<C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Creates a provider and registers `default_group`.
    pub fn new(
        router: SharedRouter,
        factory: Arc<dyn ClientFactory<Client = C>>,
        default_group: Group,
        config: &ProviderConfig,
    ) -> Self {
        let provider = Self {
            router,
            factory,
            default_group: default_group.clone(),
            connect_timeout: config.connect_timeout,
            groups: RwLock::new(HashMap::new()),
        };
        provider.register_group(default_group);
        provider
    }

    pub fn default_group(&self) -> &Group {
        &self.default_group
    }

    /// Registers a node group, returning its pool. Idempotent.
    pub fn register_group(&self, group: Group) -> Arc<ClientPool<C>> {
        // Read-locked fast path for the common already-registered case.
        if let Some(pool) = self.groups.read().get(&group) {
            return Arc::clone(pool);
        }

        let mut groups = self.groups.write();
        let pool = groups.entry(group.clone()).or_insert_with(|| {
            debug!(%group, "Registered node group");
            Arc::new(ClientPool::new())
        });
        Arc::clone(pool)
    }

    pub fn pool(&self, group: &Group) -> Option<Arc<ClientPool<C>>> {
        self.groups.read().get(group).cloned()
    }

    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.groups.read().keys().cloned().collect();
        groups.sort();
        groups
    }

    /// Gets a client for `key` from the given node group.
    pub async fn get_client(&self, key: &str, group: &Group) -> Result<C, ProviderError> {
        let Some(pool) = self.pool(group) else {
            error!(key, %group, "Unknown node group");
            return Err(ProviderError::UnknownGroup(group.clone()));
        };

        let Some(url) = self
            .router
            .route(group, key.as_bytes())
            .filter(|url| !url.is_empty())
        else {
            metrics::counter!("gateway_no_upstream_total", "group" => group.to_string())
                .increment(1);
            error!(key, %group, "Failed to get full node client from provider: no full node available");
            return Err(ProviderError::NoUpstreamAvailable(group.clone()));
        };

        let node = url_to_node_name(&url);
        let redacted = redact_url(&url);
        trace!(key, %group, %node, url = %redacted, "Route RPC requests");

        let factory = Arc::clone(&self.factory);
        let connect_timeout = self.connect_timeout;
        let timeout_node = node.clone();
        let create = move || {
            async move {
                let connect = factory.connect(&url);
                match connect_timeout {
                    Some(limit) => {
                        match tokio::time::timeout(limit, connect).await {
                            Ok(result) => result,
                            Err(_) => {
                                Err(ClientError::Timeout {
                                    node: timeout_node,
                                    timeout: limit,
                                })
                            }
                        }
                    }
                    None => connect.await,
                }
            }
        };

        match pool.load_or_create(&node, create).await {
            Ok((client, loaded)) => {
                if loaded == Loaded::Created {
                    metrics::counter!("gateway_upstream_connect_total", "group" => group.to_string())
                        .increment(1);
                    info!(key, %group, %node, url = %redacted, "Succeeded to connect to full node");
                }
                Ok(client)
            }
            Err(source) => {
                metrics::counter!("gateway_upstream_connect_errors_total", "group" => group.to_string())
                    .increment(1);
                error!(
                    key,
                    %group,
                    %node,
                    url = %redacted,
                    error = %source,
                    "Failed to get full node client from provider: bad full node connection"
                );
                Err(ProviderError::UpstreamConnectFailed { node, source })
            }
        }
    }

    /// Gets a client from the default group, routed by caller IP.
    pub async fn get_client_by_ip(&self, ip: Option<&str>) -> Result<C, ProviderError> {
        self.get_client(ip.unwrap_or(UNKNOWN_IP), &self.default_group)
            .await
    }

    /// Gets a client from `group`, routed by caller IP.
    pub async fn get_client_by_ip_group(
        &self,
        ip: Option<&str>,
        group: &Group,
    ) -> Result<C, ProviderError> {
        self.get_client(ip.unwrap_or(UNKNOWN_IP), group).await
    }
}
