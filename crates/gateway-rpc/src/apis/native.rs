use std::sync::Arc;

use gateway_node::{
    CfxClientProvider,
    Group,
};
use serde::{
    Deserialize,
    Serialize,
};

use super::gas_station::{
    GasStationHandler,
    GasStationPriceMethod,
};
use crate::module::ApiModule;

/// Extra settings of the native space modules.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CfxApiOption {
    /// Node group serving `cfx_getLogs`, the default group when unset.
    #[serde(default)]
    pub logs_group: Option<Group>,
    /// Node group serving the `trace` module, the default group when unset.
    #[serde(default)]
    pub archive_group: Option<Group>,
}

pub const CFX_METHODS: &[&str] = &[
    "cfx_gasPrice",
    "cfx_maxPriorityFeePerGas",
    "cfx_feeHistory",
    "cfx_epochNumber",
    "cfx_getBalance",
    "cfx_getAdmin",
    "cfx_getSponsorInfo",
    "cfx_getStakingBalance",
    "cfx_getDepositList",
    "cfx_getVoteList",
    "cfx_getCollateralForStorage",
    "cfx_getCollateralInfo",
    "cfx_getCode",
    "cfx_getStorageAt",
    "cfx_getStorageRoot",
    "cfx_getBlockByHash",
    "cfx_getBlockByHashWithPivotAssumption",
    "cfx_getBlockByEpochNumber",
    "cfx_getBlockByBlockNumber",
    "cfx_getBestBlockHash",
    "cfx_getNextNonce",
    "cfx_sendRawTransaction",
    "cfx_call",
    "cfx_getTransactionByHash",
    "cfx_estimateGasAndCollateral",
    "cfx_getBlocksByEpoch",
    "cfx_getSkippedBlocksByEpoch",
    "cfx_getTransactionReceipt",
    "cfx_getEpochReceipts",
    "cfx_getAccount",
    "cfx_getInterestRate",
    "cfx_getAccumulateInterestRate",
    "cfx_checkBalanceAgainstTransaction",
    "cfx_getConfirmationRiskByHash",
    "cfx_getStatus",
    "cfx_clientVersion",
    "cfx_getBlockRewardInfo",
    "cfx_getSupplyInfo",
    "cfx_getAccountPendingInfo",
    "cfx_getAccountPendingTransactions",
    "cfx_getPoSEconomics",
    "cfx_getParamsFromVote",
    "cfx_getFeeBurnt",
];

pub const CFX_LOG_METHODS: &[&str] = &["cfx_getLogs"];

pub const CFX_TXPOOL_METHODS: &[&str] = &[
    "txpool_status",
    "txpool_nextNonce",
    "txpool_transactionByAddressAndNonce",
    "txpool_pendingNonceRange",
    "txpool_txWithPoolInfo",
    "txpool_accountPendingInfo",
    "txpool_accountPendingTransactions",
];

pub const CFX_TRACE_METHODS: &[&str] = &[
    "trace_block",
    "trace_filter",
    "trace_transaction",
    "trace_epoch",
];

pub const CFX_DEBUG_METHODS: &[&str] = &[
    "debug_getTransactionsByEpoch",
    "debug_getTransactionsByBlock",
    "debug_getEpochReceiptProofByTransaction",
];

/// Every native space module, public or not.
pub fn native_space_apis(
    provider: &Arc<CfxClientProvider>,
    gas_station: Arc<GasStationHandler>,
    option: &CfxApiOption,
) -> Vec<ApiModule> {
    vec![
        ApiModule::public("cfx")
            .forward(provider, None, CFX_METHODS)
            .forward(provider, option.logs_group.clone(), CFX_LOG_METHODS),
        ApiModule::public("txpool").forward(provider, None, CFX_TXPOOL_METHODS),
        ApiModule::public("trace").forward(provider, option.archive_group.clone(), CFX_TRACE_METHODS),
        ApiModule::public("gasstation").method(
            "gasstation_price",
            GasStationPriceMethod::new(Arc::clone(provider), gas_station),
        ),
        ApiModule::private("debug").forward(provider, None, CFX_DEBUG_METHODS),
    ]
}
