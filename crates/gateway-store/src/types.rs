use alloy_primitives::B256;
use serde::{
    Deserialize,
    Serialize,
};

/// Inclusive range of block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeU64 {
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: B256,
}

/// Blocks executed in one epoch, the pivot block last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochData {
    pub number: u64,
    pub blocks: Vec<BlockSummary>,
}

impl EpochData {
    pub fn pivot_block(&self) -> Option<&BlockSummary> {
        self.blocks.last()
    }
}

/// Mapping from an epoch to the block range it spans and its pivot hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochBlockMap {
    pub epoch: u64,
    pub bn_min: u64,
    pub bn_max: u64,
    /// Pivot block hash, used for parent hash checking.
    pub pivot_hash: B256,
}

impl EpochBlockMap {
    pub fn block_range(&self) -> RangeU64 {
        RangeU64 {
            from: self.bn_min,
            to: self.bn_max,
        }
    }
}

impl TryFrom<&EpochData> for EpochBlockMap {
    type Error = crate::StoreError;

    fn try_from(data: &EpochData) -> Result<Self, Self::Error> {
        let (Some(first), Some(pivot)) = (data.blocks.first(), data.pivot_block()) else {
            return Err(crate::StoreError::EmptyEpoch(data.number));
        };

        Ok(Self {
            epoch: data.number,
            bn_min: first.number,
            bn_max: pivot.number,
            pivot_hash: pivot.hash,
        })
    }
}
