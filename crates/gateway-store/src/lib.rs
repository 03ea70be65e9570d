//! Durable store collaborator of the gateway.
//!
//! Stores the epoch to block-range mapping and describes the partitioning of
//! the logs table. The routing core never queries it directly.

mod config;
mod error;
pub mod partition;
mod store;
mod types;

pub use config::StoreConfig;
pub use error::StoreError;
pub use partition::{
    LogPartitionPlan,
    Partition,
};
pub use store::{
    EpochBlockMapStore,
    SledEpochBlockMapStore,
};
pub use types::{
    BlockSummary,
    EpochBlockMap,
    EpochData,
    RangeU64,
};
