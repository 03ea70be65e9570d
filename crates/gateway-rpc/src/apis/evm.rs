use std::sync::Arc;

use alloy_primitives::{
    Bytes,
    keccak256,
};
use gateway_node::{
    EthClientProvider,
    Group,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Value,
    json,
};

use crate::{
    context::CallContext,
    error::{
        AssemblyError,
        GatewayError,
    },
    module::ApiModule,
};

/// Extra settings of the EVM space modules.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EthApiOption {
    /// Node group serving `eth_getLogs`, the default group when unset.
    #[serde(default)]
    pub logs_group: Option<Group>,
    /// Served by `web3_clientVersion` instead of asking the upstream.
    #[serde(default)]
    pub client_version: Option<String>,
}

pub const ETH_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_chainId",
    "eth_gasPrice",
    "eth_maxPriorityFeePerGas",
    "eth_feeHistory",
    "eth_getBalance",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_getTransactionCount",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getTransactionByHash",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionReceipt",
    "eth_getBlockReceipts",
    "eth_getUncleByBlockHashAndIndex",
    "eth_getUncleByBlockNumberAndIndex",
    "eth_getUncleCountByBlockHash",
    "eth_getUncleCountByBlockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_sendRawTransaction",
    "eth_syncing",
    "eth_accounts",
    "eth_protocolVersion",
    "eth_mining",
    "eth_hashrate",
];

pub const ETH_LOG_METHODS: &[&str] = &["eth_getLogs"];

pub const NET_METHODS: &[&str] = &["net_version", "net_listening", "net_peerCount"];

pub const ETH_TRACE_METHODS: &[&str] = &["trace_block", "trace_filter", "trace_transaction"];

pub const ETH_TXPOOL_METHODS: &[&str] = &[
    "txpool_status",
    "txpool_content",
    "txpool_contentFrom",
    "txpool_inspect",
];

pub const PARITY_METHODS: &[&str] = &["parity_getBlockReceipts"];

pub const ETH_DEBUG_METHODS: &[&str] = &[
    "debug_traceTransaction",
    "debug_traceBlockByHash",
    "debug_traceBlockByNumber",
    "debug_traceCall",
];

/// Every EVM space module, public or not.
pub fn evm_space_apis(
    provider: &Arc<EthClientProvider>,
    option: &EthApiOption,
) -> Result<Vec<ApiModule>, AssemblyError> {
    let web3 = ApiModule::public("web3").method("web3_sha3", web3_sha3);
    let web3 = match &option.client_version {
        Some(version) if version.trim().is_empty() => {
            return Err(AssemblyError::Modules {
                server: "evm",
                reason: "client version override is empty".to_string(),
            });
        }
        Some(version) => {
            let version = version.clone();
            web3.method("web3_clientVersion", move |_ctx: CallContext, _params: Value| {
                let version = version.clone();
                async move { Ok::<_, GatewayError>(json!(version)) }
            })
        }
        None => web3.forward(provider, None, &["web3_clientVersion"]),
    };

    Ok(vec![
        ApiModule::public("eth")
            .forward(provider, None, ETH_METHODS)
            .forward(provider, option.logs_group.clone(), ETH_LOG_METHODS),
        ApiModule::public("net").forward(provider, None, NET_METHODS),
        web3,
        ApiModule::public("trace").forward(provider, None, ETH_TRACE_METHODS),
        ApiModule::public("txpool").forward(provider, None, ETH_TXPOOL_METHODS),
        ApiModule::public("parity").forward(provider, None, PARITY_METHODS),
        ApiModule::private("debug").forward(provider, None, ETH_DEBUG_METHODS),
    ])
}

/// `web3_sha3`, answered locally.
async fn web3_sha3(_ctx: CallContext, params: Value) -> Result<Value, GatewayError> {
    let (data,): (Bytes,) =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;
    Ok(json!(keccak256(&data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_node::{
        ProviderConfig,
        StaticRouter,
        new_eth_client_provider,
    };

    fn provider() -> Arc<EthClientProvider> {
        Arc::new(new_eth_client_provider(
            Arc::new(StaticRouter::new()),
            &ProviderConfig::default(),
        ))
    }

    fn module<'a>(modules: &'a [ApiModule], namespace: &str) -> &'a ApiModule {
        modules
            .iter()
            .find(|module| module.namespace() == namespace)
            .unwrap()
    }

    #[test]
    fn debug_is_private() {
        let modules = evm_space_apis(&provider(), &EthApiOption::default()).unwrap();
        assert!(!module(&modules, "debug").is_public());
        assert!(module(&modules, "eth").is_public());
        assert!(module(&modules, "eth").handler("eth_getLogs").is_some());
    }

    #[tokio::test]
    async fn web3_sha3_is_local() {
        let result = web3_sha3(CallContext::detached(), json!(["0x68656c6c6f20776f726c64"]))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!("0x47173285a8d7341e5e972fc677286384f802f8ef42a5ec5f03bbfa254cb01fad")
        );

        let err = web3_sha3(CallContext::detached(), json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn client_version_override() {
        let option = EthApiOption {
            client_version: Some("rpc-gateway/v0.2.1".to_string()),
            ..Default::default()
        };
        let modules = evm_space_apis(&provider(), &option).unwrap();
        let result = module(&modules, "web3")
            .handler("web3_clientVersion")
            .unwrap()
            .call(&CallContext::detached(), json!([]))
            .await
            .unwrap();
        assert_eq!(result, json!("rpc-gateway/v0.2.1"));

        let option = EthApiOption {
            client_version: Some(" ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            evm_space_apis(&provider(), &option),
            Err(AssemblyError::Modules { .. })
        ));
    }
}
