use std::sync::Arc;

use crate::{
    client::{
        CfxClient,
        CfxClientFactory,
        EthClient,
        EthClientFactory,
    },
    group::Space,
    provider::{
        ClientProvider,
        ProviderConfig,
    },
    router::SharedRouter,
};

pub type CfxClientProvider = ClientProvider<CfxClient>;
pub type EthClientProvider = ClientProvider<EthClient>;

/// Provider of native space clients with every native group registered.
pub fn new_cfx_client_provider(router: SharedRouter, config: &ProviderConfig) -> CfxClientProvider {
    let factory = Arc::new(CfxClientFactory {
        request_timeout: config.request_timeout,
    });
    let provider: CfxClientProvider =
        ClientProvider::new(router, factory, Space::Native.default_group(), config);
    for group in Space::Native.groups() {
        provider.register_group(group.clone());
    }
    provider
}

/// Provider of EVM space clients with every EVM group registered.
pub fn new_eth_client_provider(router: SharedRouter, config: &ProviderConfig) -> EthClientProvider {
    let factory = Arc::new(EthClientFactory {
        request_timeout: config.request_timeout,
    });
    let provider: EthClientProvider =
        ClientProvider::new(router, factory, Space::Evm.default_group(), config);
    for group in Space::Evm.groups() {
        provider.register_group(group.clone());
    }
    provider
}
