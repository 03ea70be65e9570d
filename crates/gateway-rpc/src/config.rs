use std::{
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use gateway_node::{
    Group,
    HashRingRouter,
    ProviderConfig,
};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;

use crate::{
    apis::{
        CfxApiOption,
        EthApiOption,
        GasStationHandler,
    },
    assembly::{
        CfxBridgeServerConfig,
        ServerSettings,
        new_evm_space_server,
        new_native_space_bridge_server,
        new_native_space_server,
        validate_node_url,
    },
    error::AssemblyError,
    gateway::Gateway,
    rate_limit::RateLimitConfig,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "JSON-RPC gateway for core space and EVM space full nodes", long_about = None)]
pub struct Config {
    /// Core space RPC server address
    #[arg(long, env = "GATEWAY_CFX_LISTEN_ADDR", default_value = "0.0.0.0:22537")]
    pub cfx_listen_addr: SocketAddr,
    /// EVM space RPC server address
    #[arg(long, env = "GATEWAY_ETH_LISTEN_ADDR", default_value = "0.0.0.0:28545")]
    pub eth_listen_addr: SocketAddr,
    /// Core space bridge RPC server endpoint, `:port` binds all interfaces
    #[arg(long, env = "GATEWAY_BRIDGE_LISTEN_ADDR", default_value = "0.0.0.0:32537")]
    pub bridge_listen_addr: String,

    /// Core space full node URLs. The core space server runs when at least one is set.
    #[arg(long = "cfx-node", env = "GATEWAY_CFX_NODES", value_delimiter = ',')]
    pub cfx_nodes: Vec<String>,
    /// Core space full nodes dedicated to `cfx_getLogs`
    #[arg(long = "cfx-logs-node", env = "GATEWAY_CFX_LOGS_NODES", value_delimiter = ',')]
    pub cfx_logs_nodes: Vec<String>,
    /// Core space archive nodes serving the `trace` module
    #[arg(long = "cfx-archive-node", env = "GATEWAY_CFX_ARCHIVE_NODES", value_delimiter = ',')]
    pub cfx_archive_nodes: Vec<String>,
    /// Core space API modules to expose, all public modules when empty
    #[arg(long, env = "GATEWAY_CFX_EXPOSED_MODULES", value_delimiter = ',')]
    pub cfx_exposed_modules: Vec<String>,

    /// EVM space full node URLs. The EVM space server runs when at least one is set.
    #[arg(long = "eth-node", env = "GATEWAY_ETH_NODES", value_delimiter = ',')]
    pub eth_nodes: Vec<String>,
    /// EVM space full nodes dedicated to `eth_getLogs`
    #[arg(long = "eth-logs-node", env = "GATEWAY_ETH_LOGS_NODES", value_delimiter = ',')]
    pub eth_logs_nodes: Vec<String>,
    /// EVM space API modules to expose, all public modules when empty
    #[arg(long, env = "GATEWAY_ETH_EXPOSED_MODULES", value_delimiter = ',')]
    pub eth_exposed_modules: Vec<String>,
    /// Fixed `web3_clientVersion` answer
    #[arg(long, env = "GATEWAY_ETH_CLIENT_VERSION")]
    pub eth_client_version: Option<String>,

    /// EVM space node backing the core space bridge. The bridge runs when set.
    #[arg(long, env = "GATEWAY_BRIDGE_ETH_NODE")]
    pub bridge_eth_node: Option<String>,
    /// Core space node serving the bridge `txpool` module
    #[arg(long, env = "GATEWAY_BRIDGE_CFX_NODE")]
    pub bridge_cfx_node: Option<String>,
    /// Bridge API modules to expose, all public modules when empty
    #[arg(long, env = "GATEWAY_BRIDGE_EXPOSED_MODULES", value_delimiter = ',')]
    pub bridge_exposed_modules: Vec<String>,

    /// Burst of calls allowed per caller. Zero rejects every call.
    #[arg(long, env = "GATEWAY_RATE_LIMIT_MAX_TOKENS", default_value = "100")]
    pub rate_limit_max_tokens: u32,
    /// Calls per second refilled per caller
    #[arg(long, env = "GATEWAY_RATE_LIMIT_REFILL_PER_SECOND", default_value = "50")]
    pub rate_limit_refill_per_second: f64,
    /// Limit every method separately
    #[arg(long, env = "GATEWAY_RATE_LIMIT_PER_METHOD")]
    pub rate_limit_per_method: bool,
    /// Disable rate limiting
    #[arg(long, env = "GATEWAY_RATE_LIMIT_DISABLED")]
    pub rate_limit_disabled: bool,
    /// Identify callers by X-Forwarded-For/X-Real-IP, only behind a trusted proxy
    #[arg(long, env = "GATEWAY_TRUST_PROXY_HEADERS")]
    pub trust_proxy_headers: bool,

    /// Upper bound on connecting to a full node, in milliseconds
    #[arg(long, env = "GATEWAY_CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub connect_timeout_ms: u64,
    /// Timeout of a forwarded call, in milliseconds
    #[arg(long, env = "GATEWAY_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,
    /// Gas station price cache lifetime, in milliseconds
    #[arg(long, env = "GATEWAY_GAS_PRICE_TTL_MS", default_value = "3000")]
    pub gas_price_ttl_ms: u64,

    /// Log level
    #[arg(long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,
}

impl Config {
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            connect_timeout: Some(Duration::from_millis(self.connect_timeout_ms)),
            request_timeout: Some(Duration::from_millis(self.request_timeout_ms)),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_tokens: self.rate_limit_max_tokens,
            refill_tokens_per_second: self.rate_limit_refill_per_second,
            per_method: self.rate_limit_per_method,
            enabled: !self.rate_limit_disabled,
            ..Default::default()
        }
    }

    pub fn bridge_config(&self) -> Option<CfxBridgeServerConfig> {
        let eth_node = self.bridge_eth_node.clone()?;
        Some(CfxBridgeServerConfig {
            eth_node,
            cfx_node: self.bridge_cfx_node.clone(),
            exposed_modules: self.bridge_exposed_modules.clone(),
            endpoint: self.bridge_listen_addr.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        })
    }

    /// Fresh settings, each space keeps its own rate limit buckets.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings::new(self.provider_config(), self.rate_limit_config())
            .with_trusted_proxy_headers(self.trust_proxy_headers)
    }

    /// Assembles and binds every configured server.
    pub async fn build(self) -> anyhow::Result<Gateway> {
        let mut gateway = Gateway::new();

        if !self.cfx_nodes.is_empty() {
            let router = HashRingRouter::default();
            add_nodes(&router, Group::CFX_HTTP, &self.cfx_nodes)
                .context("Invalid core space full node")?;

            let mut option = CfxApiOption::default();
            if !self.cfx_logs_nodes.is_empty() {
                add_nodes(&router, Group::CFX_LOGS, &self.cfx_logs_nodes)
                    .context("Invalid core space logs node")?;
                option.logs_group = Some(Group::CFX_LOGS);
            }
            if !self.cfx_archive_nodes.is_empty() {
                add_nodes(&router, Group::CFX_ARCHIVES, &self.cfx_archive_nodes)
                    .context("Invalid core space archive node")?;
                option.archive_group = Some(Group::CFX_ARCHIVES);
            }

            let settings = self.server_settings();
            let gas_station = Arc::new(GasStationHandler::new(Duration::from_millis(
                self.gas_price_ttl_ms,
            )));
            let server = new_native_space_server(
                Arc::new(router),
                gas_station,
                &self.cfx_exposed_modules,
                &settings,
                &option,
            )
            .context("Failed to new native space RPC server")?;
            gateway.add(server, bind(self.cfx_listen_addr).await?);
        }

        if !self.eth_nodes.is_empty() {
            let router = HashRingRouter::default();
            add_nodes(&router, Group::ETH_HTTP, &self.eth_nodes)
                .context("Invalid EVM space full node")?;

            let mut option = EthApiOption {
                client_version: self.eth_client_version.clone(),
                ..Default::default()
            };
            if !self.eth_logs_nodes.is_empty() {
                add_nodes(&router, Group::ETH_LOGS, &self.eth_logs_nodes)
                    .context("Invalid EVM space logs node")?;
                option.logs_group = Some(Group::ETH_LOGS);
            }

            let settings = self.server_settings();
            let server = new_evm_space_server(
                Arc::new(router),
                &self.eth_exposed_modules,
                &settings,
                &option,
            )
            .context("Failed to new EVM space RPC server")?;
            gateway.add(server, bind(self.eth_listen_addr).await?);
        }

        if let Some(bridge) = self.bridge_config() {
            let server = new_native_space_bridge_server(&bridge, &self.provider_config())
                .context("Failed to new CFX bridge RPC server")?;
            let addr: SocketAddr = bridge
                .listen_addr()
                .parse()
                .with_context(|| format!("Invalid bridge endpoint {}", bridge.endpoint))?;
            gateway.add(server, bind(addr).await?);
        }

        anyhow::ensure!(
            !gateway.is_empty(),
            "No RPC server configured, set --cfx-node, --eth-node or --bridge-eth-node"
        );
        Ok(gateway)
    }
}

fn add_nodes(router: &HashRingRouter, group: Group, nodes: &[String]) -> Result<(), AssemblyError> {
    for node in nodes {
        validate_node_url(node)?;
        router.add_node(group.clone(), node.clone());
    }
    Ok(())
}

async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(listen_addr = ?addr, "Listening on address");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["rpc-gateway"]).unwrap();
        assert_eq!(config.cfx_listen_addr, "0.0.0.0:22537".parse().unwrap());
        assert_eq!(config.eth_listen_addr, "0.0.0.0:28545".parse().unwrap());
        assert!(config.cfx_nodes.is_empty());
        assert!(config.bridge_config().is_none());
        assert_eq!(config.log_level, LevelFilter::INFO);

        let limits = config.rate_limit_config();
        assert_eq!(limits.max_tokens, 100);
        assert!(limits.enabled);
        assert!(!config.server_settings().trust_proxy_headers);
    }

    #[test]
    fn lists_are_comma_separated() {
        let config = Config::try_parse_from([
            "rpc-gateway",
            "--cfx-node",
            "http://10.0.0.1:12537,http://10.0.0.2:12537",
            "--cfx-exposed-modules",
            "cfx,txpool",
            "--bridge-eth-node",
            "http://10.0.0.3:8545",
            "--bridge-listen-addr",
            ":4000",
        ])
        .unwrap();

        assert_eq!(config.cfx_nodes.len(), 2);
        assert_eq!(config.cfx_exposed_modules, ["cfx", "txpool"]);

        let bridge = config.bridge_config().unwrap();
        assert_eq!(bridge.eth_node, "http://10.0.0.3:8545");
        assert_eq!(bridge.listen_addr(), "0.0.0.0:4000");
    }

    #[tokio::test]
    async fn build_binds_configured_servers() {
        let config = Config::try_parse_from([
            "rpc-gateway",
            "--cfx-node",
            "http://10.0.0.1:12537",
            "--cfx-listen-addr",
            "127.0.0.1:0",
            "--eth-node",
            "http://10.0.0.2:8545",
            "--eth-listen-addr",
            "127.0.0.1:0",
        ])
        .unwrap();

        let gateway = config.build().await.unwrap();
        let names: Vec<_> = gateway.local_addrs().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["core_space_rpc", "evm_space_rpc"]);
        assert!(gateway.local_addrs().iter().all(|(_, addr)| addr.port() != 0));
    }

    #[tokio::test]
    async fn build_fails_on_unknown_module() {
        let config = Config::try_parse_from([
            "rpc-gateway",
            "--eth-node",
            "http://10.0.0.2:8545",
            "--eth-listen-addr",
            "127.0.0.1:0",
            "--eth-exposed-modules",
            "eth,nonexistent",
        ])
        .unwrap();

        let err = config.build().await.unwrap_err();
        assert!(format!("{err:#}").contains("unknown module nonexistent"));
    }

    #[tokio::test]
    async fn build_rejects_malformed_node_urls() {
        let config = Config::try_parse_from([
            "rpc-gateway",
            "--cfx-node",
            "http://10.0.0.1:12537,not a url",
            "--cfx-listen-addr",
            "127.0.0.1:0",
        ])
        .unwrap();
        let err = config.build().await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid node url"));

        let config = Config::try_parse_from([
            "rpc-gateway",
            "--eth-node",
            "http://10.0.0.2:8545",
            "--eth-logs-node",
            "10.0.0.3:8545",
            "--eth-listen-addr",
            "127.0.0.1:0",
        ])
        .unwrap();
        let err = config.build().await.unwrap_err();
        assert!(format!("{err:#}").contains("Invalid EVM space logs node"));
    }

    #[tokio::test]
    async fn build_requires_a_server() {
        let config = Config::try_parse_from(["rpc-gateway"]).unwrap();
        assert!(config.build().await.is_err());
    }
}
