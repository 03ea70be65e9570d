//! Module tables of the three servers.

pub mod bridge;
pub mod evm;
pub mod gas_station;
pub mod native;

pub use bridge::native_space_bridge_apis;
pub use evm::{
    EthApiOption,
    evm_space_apis,
};
pub use gas_station::{
    GasStationHandler,
    GasStationPrice,
};
pub use native::{
    CfxApiOption,
    native_space_apis,
};
