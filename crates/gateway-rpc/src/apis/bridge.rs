//! Native space API served by an EVM space node.
//!
//! The bridge exposes a fixed subset of `cfx_*` methods, each renamed to its
//! `eth_*` counterpart with epoch tags translated to block tags. Only the
//! envelope is translated, addresses and payloads pass through as is.

use std::sync::Arc;

use async_trait::async_trait;
use gateway_node::{
    CfxClientProvider,
    EthClientProvider,
    UpstreamClient,
};
use serde_json::{
    Map,
    Value,
    json,
};

use crate::{
    context::CallContext,
    error::GatewayError,
    module::{
        ApiModule,
        MethodHandler,
    },
};

/// How the upstream result is turned into the native space result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Raw,
    /// `eth_estimateGas` quantity into a `cfx_estimateGasAndCollateral` object.
    GasAndCollateral,
}

/// One row of the translation table.
#[derive(Debug, Clone, Copy)]
pub struct Translation {
    pub cfx: &'static str,
    pub eth: &'static str,
    /// Positions of epoch number params.
    pub epoch_params: &'static [usize],
    /// Position of a log filter param.
    pub filter_param: Option<usize>,
    pub shape: ResultShape,
}

const fn translate(cfx: &'static str, eth: &'static str, epoch_params: &'static [usize]) -> Translation {
    Translation {
        cfx,
        eth,
        epoch_params,
        filter_param: None,
        shape: ResultShape::Raw,
    }
}

pub const CFX_BRIDGE_TRANSLATIONS: &[Translation] = &[
    translate("cfx_clientVersion", "web3_clientVersion", &[]),
    translate("cfx_gasPrice", "eth_gasPrice", &[]),
    translate("cfx_maxPriorityFeePerGas", "eth_maxPriorityFeePerGas", &[]),
    translate("cfx_epochNumber", "eth_blockNumber", &[]),
    translate("cfx_getBalance", "eth_getBalance", &[1]),
    translate("cfx_getCode", "eth_getCode", &[1]),
    translate("cfx_getStorageAt", "eth_getStorageAt", &[2]),
    translate("cfx_getNextNonce", "eth_getTransactionCount", &[1]),
    translate("cfx_call", "eth_call", &[1]),
    translate("cfx_sendRawTransaction", "eth_sendRawTransaction", &[]),
    translate("cfx_getBlockByHash", "eth_getBlockByHash", &[]),
    translate("cfx_getBlockByEpochNumber", "eth_getBlockByNumber", &[0]),
    translate("cfx_getBlockByBlockNumber", "eth_getBlockByNumber", &[]),
    translate("cfx_getTransactionByHash", "eth_getTransactionByHash", &[]),
    translate("cfx_getTransactionReceipt", "eth_getTransactionReceipt", &[]),
    translate("cfx_getEpochReceipts", "eth_getBlockReceipts", &[0]),
    Translation {
        filter_param: Some(0),
        ..translate("cfx_getLogs", "eth_getLogs", &[])
    },
    Translation {
        shape: ResultShape::GasAndCollateral,
        ..translate("cfx_estimateGasAndCollateral", "eth_estimateGas", &[1])
    },
];

pub const BRIDGE_TXPOOL_METHODS: &[&str] = &["txpool_status", "txpool_nextNonce"];

pub const BRIDGE_TRACE_TRANSLATIONS: &[Translation] = &[
    translate("trace_block", "trace_block", &[]),
    translate("trace_transaction", "trace_transaction", &[]),
];

/// Block tag for a native space epoch tag, other values pass through.
pub fn epoch_to_block_tag(epoch: &str) -> &str {
    match epoch {
        "latest_mined" | "latest_state" => "latest",
        "latest_confirmed" => "safe",
        "latest_finalized" => "finalized",
        "latest_checkpoint" => "earliest",
        other => other,
    }
}

fn translate_epoch(value: &mut Value) {
    if let Value::String(epoch) = value {
        let tag = epoch_to_block_tag(epoch);
        if tag != epoch.as_str() {
            *epoch = tag.to_string();
        }
    }
}

fn translate_filter(filter: &mut Value) {
    let Value::Object(fields) = filter else {
        return;
    };

    let mut translated = Map::with_capacity(fields.len());
    for (key, mut value) in std::mem::take(fields) {
        let key = match key.as_str() {
            "fromEpoch" | "fromBlock" => {
                translate_epoch(&mut value);
                "fromBlock".to_string()
            }
            "toEpoch" | "toBlock" => {
                translate_epoch(&mut value);
                "toBlock".to_string()
            }
            _ => key,
        };
        translated.insert(key, value);
    }
    *fields = translated;
}

impl Translation {
    pub fn params(&self, mut params: Value) -> Value {
        if let Value::Array(items) = &mut params {
            for index in self.epoch_params {
                if let Some(value) = items.get_mut(*index) {
                    translate_epoch(value);
                }
            }
            if let Some(index) = self.filter_param {
                if let Some(filter) = items.get_mut(index) {
                    translate_filter(filter);
                }
            }
        }
        params
    }

    pub fn result(&self, result: Value) -> Value {
        match self.shape {
            ResultShape::Raw => result,
            ResultShape::GasAndCollateral => {
                json!({
                    "gasLimit": result,
                    "gasUsed": result,
                    "storageCollateralized": "0x0",
                })
            }
        }
    }
}

struct Translate {
    provider: Arc<EthClientProvider>,
    translation: Translation,
}

#[async_trait]
impl MethodHandler for Translate {
    async fn call(&self, ctx: &CallContext, params: Value) -> Result<Value, GatewayError> {
        let client = self
            .provider
            .get_client_by_ip(ctx.identity.as_deref())
            .await?;
        let result = client
            .rpc()
            .call(self.translation.eth, self.translation.params(params))
            .await?;
        Ok(self.translation.result(result))
    }
}

fn translated_module(
    module: ApiModule,
    provider: &Arc<EthClientProvider>,
    translations: &[Translation],
) -> ApiModule {
    translations.iter().fold(module, |module, translation| {
        module.method(
            translation.cfx,
            Translate {
                provider: Arc::clone(provider),
                translation: *translation,
            },
        )
    })
}

/// Every bridge module. `txpool` is only served with a native space node.
pub fn native_space_bridge_apis(
    eth: &Arc<EthClientProvider>,
    cfx: Option<&Arc<CfxClientProvider>>,
) -> Vec<ApiModule> {
    let mut modules = vec![translated_module(
        ApiModule::public("cfx"),
        eth,
        CFX_BRIDGE_TRANSLATIONS,
    )];
    if let Some(cfx) = cfx {
        modules.push(ApiModule::public("txpool").forward(cfx, None, BRIDGE_TXPOOL_METHODS));
    }
    modules.push(translated_module(
        ApiModule::private("trace"),
        eth,
        BRIDGE_TRACE_TRANSLATIONS,
    ));
    modules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translation(cfx: &str) -> Translation {
        *CFX_BRIDGE_TRANSLATIONS
            .iter()
            .find(|translation| translation.cfx == cfx)
            .unwrap()
    }

    #[test]
    fn epoch_tags_become_block_tags() {
        let params = translation("cfx_getBalance").params(json!(["0xabc", "latest_state"]));
        assert_eq!(params, json!(["0xabc", "latest"]));

        let params = translation("cfx_getBlockByEpochNumber").params(json!(["0x10", false]));
        assert_eq!(params, json!(["0x10", false]));

        let params = translation("cfx_call").params(json!([{"to": "0xabc"}, "latest_finalized"]));
        assert_eq!(params, json!([{"to": "0xabc"}, "finalized"]));
    }

    #[test]
    fn log_filter_keys_are_renamed() {
        let params = translation("cfx_getLogs").params(json!([{
            "fromEpoch": "latest_checkpoint",
            "toEpoch": "0x20",
            "address": ["0xabc"],
        }]));
        assert_eq!(
            params,
            json!([{"fromBlock": "earliest", "toBlock": "0x20", "address": ["0xabc"]}])
        );
    }

    #[test]
    fn estimate_gas_is_reshaped() {
        let result = translation("cfx_estimateGasAndCollateral").result(json!("0x5208"));
        assert_eq!(
            result,
            json!({"gasLimit": "0x5208", "gasUsed": "0x5208", "storageCollateralized": "0x0"})
        );
    }

    #[test]
    fn cfx_methods_are_unique() {
        let mut names: Vec<_> = CFX_BRIDGE_TRANSLATIONS.iter().map(|t| t.cfx).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CFX_BRIDGE_TRANSLATIONS.len());
    }
}
