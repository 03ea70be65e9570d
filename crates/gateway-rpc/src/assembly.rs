//! Assembly of the per-space RPC servers.
//!
//! Each constructor builds the space's client provider, enumerates its API
//! modules, applies the exposed-module filter and attaches the middleware
//! chain. Any error here means the configuration is unusable, callers are
//! expected to treat it as fatal at startup.

use std::sync::Arc;

use gateway_node::{
    Group,
    ProviderConfig,
    SharedRouter,
    StaticRouter,
    new_cfx_client_provider,
    new_eth_client_provider,
    redact_url,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;
use url::Url;

use crate::{
    apis::{
        CfxApiOption,
        EthApiOption,
        GasStationHandler,
        evm_space_apis,
        native_space_apis,
        native_space_bridge_apis,
    },
    error::AssemblyError,
    middleware::{
        IdentityMiddleware,
        MiddlewareChain,
        RequestLogMiddleware,
        http_middleware,
    },
    module::filter_exposed_apis,
    rate_limit::{
        RateLimitConfig,
        RateLimitRegistry,
        TokenBucketRegistry,
    },
    server::RpcServer,
};

pub const NATIVE_SPACE_RPC_SERVER_NAME: &str = "core_space_rpc";
pub const EVM_SPACE_RPC_SERVER_NAME: &str = "evm_space_rpc";
pub const NATIVE_SPACE_BRIDGE_RPC_SERVER_NAME: &str = "core_space_bridge_rpc";

/// Shared settings of a space server.
#[derive(Clone)]
pub struct ServerSettings {
    pub provider: ProviderConfig,
    pub rate_limits: Arc<dyn RateLimitRegistry>,
    /// Take the caller IP from `X-Forwarded-For`/`X-Real-IP`. Only safe behind
    /// a proxy that overwrites these headers.
    pub trust_proxy_headers: bool,
}

impl std::fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSettings")
            .field("provider", &self.provider)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish_non_exhaustive()
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::new(ProviderConfig::default(), RateLimitConfig::default())
    }
}

impl ServerSettings {
    pub fn new(provider: ProviderConfig, rate_limits: RateLimitConfig) -> Self {
        Self {
            provider,
            rate_limits: Arc::new(TokenBucketRegistry::new(rate_limits)),
            trust_proxy_headers: false,
        }
    }

    pub fn with_trusted_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn RateLimitRegistry>) -> Self {
        self.rate_limits = registry;
        self
    }
}

/// Native space server backed by `router`.
///
/// `exposed_modules` lists the API modules to expose, all public modules are
/// exposed when it is empty.
pub fn new_native_space_server(
    router: SharedRouter,
    gas_station: Arc<GasStationHandler>,
    exposed_modules: &[String],
    settings: &ServerSettings,
    option: &CfxApiOption,
) -> Result<RpcServer, AssemblyError> {
    let provider = Arc::new(new_cfx_client_provider(router, &settings.provider));
    let all_apis = native_space_apis(&provider, gas_station, option);
    let exposed_apis = filter_exposed_apis(all_apis, exposed_modules)?;

    let middleware = http_middleware(
        Arc::clone(&settings.rate_limits),
        &provider,
        settings.trust_proxy_headers,
    )
    .with(RequestLogMiddleware::new(NATIVE_SPACE_RPC_SERVER_NAME));

    RpcServer::new(NATIVE_SPACE_RPC_SERVER_NAME, exposed_apis, middleware)
}

/// EVM space server backed by `router`.
pub fn new_evm_space_server(
    router: SharedRouter,
    exposed_modules: &[String],
    settings: &ServerSettings,
    option: &EthApiOption,
) -> Result<RpcServer, AssemblyError> {
    let provider = Arc::new(new_eth_client_provider(router, &settings.provider));
    let all_apis = evm_space_apis(&provider, option)?;
    let exposed_apis = filter_exposed_apis(all_apis, exposed_modules)?;

    let middleware = http_middleware(
        Arc::clone(&settings.rate_limits),
        &provider,
        settings.trust_proxy_headers,
    )
    .with(RequestLogMiddleware::new(EVM_SPACE_RPC_SERVER_NAME));

    RpcServer::new(EVM_SPACE_RPC_SERVER_NAME, exposed_apis, middleware)
}

/// Settings of the native space bridge server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CfxBridgeServerConfig {
    /// EVM space node serving the translated native space calls.
    pub eth_node: String,
    /// Native space node serving `txpool`.
    #[serde(default)]
    pub cfx_node: Option<String>,
    #[serde(default)]
    pub exposed_modules: Vec<String>,
    #[serde(default = "default_bridge_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

pub fn default_bridge_endpoint() -> String {
    ":32537".to_string()
}

impl CfxBridgeServerConfig {
    pub fn new(eth_node: impl Into<String>) -> Self {
        Self {
            eth_node: eth_node.into(),
            cfx_node: None,
            exposed_modules: Vec::new(),
            endpoint: default_bridge_endpoint(),
            trust_proxy_headers: false,
        }
    }

    /// Socket address to bind, a bare `:port` endpoint binds all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.endpoint.starts_with(':') {
            format!("0.0.0.0{}", self.endpoint)
        } else {
            self.endpoint.clone()
        }
    }
}

/// Checks that `url` is an HTTP(S) URL with a host.
pub fn validate_node_url(url: &str) -> Result<(), AssemblyError> {
    let invalid = |reason: String| {
        AssemblyError::InvalidNodeUrl {
            url: redact_url(url),
            reason,
        }
    };

    let parsed = Url::parse(url.trim()).map_err(|err| invalid(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if !parsed.has_host() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Native space server translating calls to a fixed EVM space node.
///
/// The bridge serves a fixed pair of nodes and applies no rate limiting.
pub fn new_native_space_bridge_server(
    config: &CfxBridgeServerConfig,
    provider_config: &ProviderConfig,
) -> Result<RpcServer, AssemblyError> {
    validate_node_url(&config.eth_node)?;
    let eth_router: SharedRouter =
        Arc::new(StaticRouter::new().with_group(Group::ETH_HTTP, config.eth_node.clone()));
    let eth = Arc::new(new_eth_client_provider(eth_router, provider_config));

    let cfx = match &config.cfx_node {
        Some(cfx_node) => {
            validate_node_url(cfx_node)?;
            let cfx_router: SharedRouter =
                Arc::new(StaticRouter::new().with_group(Group::CFX_HTTP, cfx_node.clone()));
            Some(Arc::new(new_cfx_client_provider(cfx_router, provider_config)))
        }
        None => None,
    };

    let all_apis = native_space_bridge_apis(&eth, cfx.as_ref());
    let exposed_apis = filter_exposed_apis(all_apis, &config.exposed_modules)?;

    info!(
        eth_node = %redact_url(&config.eth_node),
        cfx_node = ?config.cfx_node.as_deref().map(redact_url),
        "Assembling core space bridge"
    );

    let middleware = MiddlewareChain::new()
        .with(IdentityMiddleware::new(config.trust_proxy_headers))
        .with(RequestLogMiddleware::new(NATIVE_SPACE_BRIDGE_RPC_SERVER_NAME));

    RpcServer::new(NATIVE_SPACE_BRIDGE_RPC_SERVER_NAME, exposed_apis, middleware)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_node::HashRingRouter;

    fn router() -> SharedRouter {
        Arc::new(HashRingRouter::default())
    }

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn native_server_exposes_public_modules_by_default() {
        let server = new_native_space_server(
            router(),
            Arc::new(GasStationHandler::default()),
            &[],
            &ServerSettings::default(),
            &CfxApiOption::default(),
        )
        .unwrap();

        assert_eq!(server.name(), "core_space_rpc");
        assert_eq!(server.modules(), ["cfx", "txpool", "trace", "gasstation"]);
        assert!(server.has_method("cfx_getLogs"));
        assert!(!server.has_method("debug_getTransactionsByEpoch"));
    }

    #[test]
    fn native_server_exposes_listed_modules_only() {
        let server = new_native_space_server(
            router(),
            Arc::new(GasStationHandler::default()),
            &modules(&["cfx"]),
            &ServerSettings::default(),
            &CfxApiOption::default(),
        )
        .unwrap();
        assert_eq!(server.modules(), ["cfx"]);
        assert!(!server.has_method("txpool_status"));

        let server = new_native_space_server(
            router(),
            Arc::new(GasStationHandler::default()),
            &modules(&["cfx", "debug"]),
            &ServerSettings::default(),
            &CfxApiOption::default(),
        )
        .unwrap();
        assert!(server.has_method("debug_getTransactionsByEpoch"));
    }

    #[test]
    fn unknown_module_fails_assembly() {
        let err = new_evm_space_server(
            router(),
            &modules(&["eth", "nonexistent"]),
            &ServerSettings::default(),
            &EthApiOption::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::UnknownModule(ref name) if name == "nonexistent"));
    }

    #[test]
    fn evm_server_modules() {
        let server = new_evm_space_server(
            router(),
            &[],
            &ServerSettings::default(),
            &EthApiOption::default(),
        )
        .unwrap();
        assert_eq!(server.name(), "evm_space_rpc");
        assert_eq!(
            server.modules(),
            ["eth", "net", "web3", "trace", "txpool", "parity"]
        );
    }

    #[test]
    fn bridge_server_modules() {
        let mut config = CfxBridgeServerConfig::new("http://127.0.0.1:8545");
        let server =
            new_native_space_bridge_server(&config, &ProviderConfig::default()).unwrap();
        assert_eq!(server.name(), "core_space_bridge_rpc");
        assert_eq!(server.modules(), ["cfx"]);
        assert!(server.has_method("cfx_getBalance"));

        config.cfx_node = Some("http://127.0.0.1:12537".to_string());
        config.exposed_modules = modules(&["cfx", "txpool", "trace"]);
        let server =
            new_native_space_bridge_server(&config, &ProviderConfig::default()).unwrap();
        assert_eq!(server.modules(), ["cfx", "txpool", "trace"]);

        config.exposed_modules = modules(&["parity"]);
        assert!(matches!(
            new_native_space_bridge_server(&config, &ProviderConfig::default()),
            Err(AssemblyError::UnknownModule(_))
        ));
    }

    #[test]
    fn bridge_rejects_bad_node_url() {
        let config = CfxBridgeServerConfig::new("not a url");
        assert!(matches!(
            new_native_space_bridge_server(&config, &ProviderConfig::default()),
            Err(AssemblyError::InvalidNodeUrl { .. })
        ));
    }

    #[test]
    fn node_urls_need_http_scheme_and_host() {
        assert!(validate_node_url("http://10.0.0.1:12537").is_ok());
        assert!(validate_node_url("https://rpc.example.com/v1/key").is_ok());

        for url in ["", "not a url", "localhost:8545", "ftp://10.0.0.1", "unix:/tmp/node.sock"] {
            assert!(
                matches!(validate_node_url(url), Err(AssemblyError::InvalidNodeUrl { .. })),
                "{url:?} accepted"
            );
        }

        let err = validate_node_url("wss://rpc.example.com/SECRETKEY").unwrap_err();
        assert!(!err.to_string().contains("SECRETKEY"));
    }

    #[test]
    fn bridge_endpoint_defaults_to_all_interfaces() {
        let mut config = CfxBridgeServerConfig::new("http://127.0.0.1:8545");
        assert_eq!(config.listen_addr(), "0.0.0.0:32537");

        config.endpoint = "127.0.0.1:4000".to_string();
        assert_eq!(config.listen_addr(), "127.0.0.1:4000");

        let config: CfxBridgeServerConfig =
            serde_json::from_str(r#"{"ethNode": "http://127.0.0.1:8545"}"#).unwrap();
        assert_eq!(config.endpoint, ":32537");
    }
}
