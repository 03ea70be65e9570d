use std::collections::HashSet;

use alloy_primitives::B256;
use async_trait::async_trait;
use sled::{
    Batch,
    Db,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    StoreError,
    types::{
        EpochBlockMap,
        EpochData,
        RangeU64,
    },
};

/// Durable epoch to block-range mapping, unique by epoch.
#[async_trait]
pub trait EpochBlockMapStore: Send + Sync {
    /// Saves the mappings of a batch of epochs. Either every mapping is saved
    /// or none is.
    async fn push_n(&self, data: &[EpochData]) -> Result<(), StoreError>;

    /// Largest stored epoch, `None` when the store is empty.
    async fn max_epoch(&self) -> Result<Option<u64>, StoreError>;

    /// Block range spanned by `epoch`.
    async fn block_range(&self, epoch: u64) -> Result<Option<RangeU64>, StoreError>;

    /// Pivot block hash of `epoch`.
    async fn pivot_hash(&self, epoch: u64) -> Result<Option<B256>, StoreError>;
}

#[derive(Debug)]
enum StoreOperation {
    PushN(Vec<EpochBlockMap>),
    MaxEpoch,
    Mapping(u64),
}

#[derive(Debug)]
enum StoreResponse {
    Pushed,
    MaxEpoch(Option<u64>),
    Mapping(Option<EpochBlockMap>),
}

#[derive(Debug)]
struct StoreRequest {
    operation: StoreOperation,
    response: oneshot::Sender<Result<StoreResponse, StoreError>>,
}

/// [`EpochBlockMapStore`] backed by a sled database.
///
/// The database is owned by a single listener task, every handle sends its
/// operations there. Writes are therefore serialized, which keeps the
/// duplicate check and the batch insert of `push_n` in one step.
///
/// Keys are big-endian epochs so the last key is the max epoch.
#[derive(Clone, Debug)]
pub struct SledEpochBlockMapStore {
    requests: mpsc::UnboundedSender<StoreRequest>,
}

impl SledEpochBlockMapStore {
    /// Spawns the listener owning `db`. It stops when `cancel_token` fires or
    /// when every handle is dropped.
    pub fn spawn(db: Db, cancel_token: CancellationToken) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(listen_for_store(rx, db, cancel_token));
        Self { requests }
    }

    async fn request(&self, operation: StoreOperation) -> Result<StoreResponse, StoreError> {
        let (response, rx) = oneshot::channel();
        self.requests
            .send(StoreRequest {
                operation,
                response,
            })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    async fn mapping(&self, epoch: u64) -> Result<Option<EpochBlockMap>, StoreError> {
        match self.request(StoreOperation::Mapping(epoch)).await? {
            StoreResponse::Mapping(mapping) => Ok(mapping),
            other => Err(StoreError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

#[async_trait]
impl EpochBlockMapStore for SledEpochBlockMapStore {
    async fn push_n(&self, data: &[EpochData]) -> Result<(), StoreError> {
        let mappings = data
            .iter()
            .map(EpochBlockMap::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if mappings.is_empty() {
            return Ok(());
        }

        match self.request(StoreOperation::PushN(mappings)).await? {
            StoreResponse::Pushed => Ok(()),
            other => Err(StoreError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn max_epoch(&self) -> Result<Option<u64>, StoreError> {
        match self.request(StoreOperation::MaxEpoch).await? {
            StoreResponse::MaxEpoch(epoch) => Ok(epoch),
            other => Err(StoreError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn block_range(&self, epoch: u64) -> Result<Option<RangeU64>, StoreError> {
        Ok(self.mapping(epoch).await?.map(|mapping| mapping.block_range()))
    }

    async fn pivot_hash(&self, epoch: u64) -> Result<Option<B256>, StoreError> {
        Ok(self.mapping(epoch).await?.map(|mapping| mapping.pivot_hash))
    }
}

/// Serves store requests against `db` until cancelled or until the last
/// handle is dropped.
async fn listen_for_store(
    mut rx: mpsc::UnboundedReceiver<StoreRequest>,
    db: Db,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                tracing::info!("Store listener received cancellation signal, shutting down...");
                break;
            }
            req = rx.recv() => {
                let Some(req) = req else {
                    debug!("Every store handle dropped, stopping listener");
                    break;
                };
                let res = apply(&db, req.operation);
                let _ = req.response.send(res);
            }
        }
    }
}

fn apply(db: &Db, operation: StoreOperation) -> Result<StoreResponse, StoreError> {
    match operation {
        StoreOperation::PushN(mappings) => {
            push_mappings(db, &mappings)?;
            Ok(StoreResponse::Pushed)
        }
        StoreOperation::MaxEpoch => Ok(StoreResponse::MaxEpoch(max_epoch(db)?)),
        StoreOperation::Mapping(epoch) => {
            let mapping = match db.get(epoch.to_be_bytes())? {
                Some(value) => Some(bincode::deserialize(&value)?),
                None => None,
            };
            Ok(StoreResponse::Mapping(mapping))
        }
    }
}

fn push_mappings(db: &Db, mappings: &[EpochBlockMap]) -> Result<(), StoreError> {
    let mut batch = Batch::default();
    let mut epochs = HashSet::with_capacity(mappings.len());
    for mapping in mappings {
        let key = mapping.epoch.to_be_bytes();
        if !epochs.insert(mapping.epoch) || db.contains_key(key)? {
            return Err(StoreError::DuplicateEpoch(mapping.epoch));
        }
        batch.insert(key, bincode::serialize(mapping)?);
    }

    db.apply_batch(batch)?;
    db.flush()?;
    debug!(records = mappings.len(), "Saved epoch to block mappings");
    Ok(())
}

fn max_epoch(db: &Db) -> Result<Option<u64>, StoreError> {
    let Some((key, _)) = db.last()? else {
        return Ok(None);
    };

    let epoch: [u8; 8] = key
        .as_ref()
        .try_into()
        .map_err(|_| StoreError::InvalidKey(key.len()))?;
    Ok(Some(u64::from_be_bytes(epoch)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockSummary;

    fn store() -> SledEpochBlockMapStore {
        SledEpochBlockMapStore::spawn(
            sled::Config::tmp().unwrap().open().unwrap(),
            CancellationToken::new(),
        )
    }

    fn epoch(number: u64, first_block: u64, blocks: u64) -> EpochData {
        EpochData {
            number,
            blocks: (0..blocks)
                .map(|i| BlockSummary {
                    number: first_block + i,
                    hash: B256::repeat_byte((first_block + i) as u8),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn empty_store_has_no_max_epoch() {
        assert_eq!(store().max_epoch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_and_query() {
        let store = store();
        store
            .push_n(&[epoch(1, 10, 2), epoch(2, 12, 3), epoch(300, 15, 1)])
            .await
            .unwrap();

        assert_eq!(store.max_epoch().await.unwrap(), Some(300));
        assert_eq!(
            store.block_range(2).await.unwrap(),
            Some(RangeU64 { from: 12, to: 14 })
        );
        assert_eq!(
            store.pivot_hash(2).await.unwrap(),
            Some(B256::repeat_byte(14))
        );
        assert_eq!(store.block_range(3).await.unwrap(), None);
        assert_eq!(store.pivot_hash(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_epoch_is_rejected() {
        let store = store();
        store.push_n(&[epoch(1, 10, 1)]).await.unwrap();

        assert!(matches!(
            store.push_n(&[epoch(2, 11, 1), epoch(1, 12, 1)]).await,
            Err(StoreError::DuplicateEpoch(1))
        ));
        assert!(matches!(
            store.push_n(&[epoch(5, 11, 1), epoch(5, 12, 1)]).await,
            Err(StoreError::DuplicateEpoch(5))
        ));
        // nothing of a rejected batch is written
        assert_eq!(store.max_epoch().await.unwrap(), Some(1));
        assert_eq!(store.block_range(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let store = store();
        store.push_n(&[]).await.unwrap();
        assert_eq!(store.max_epoch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn large_batch_is_all_or_nothing() {
        let store = store();
        store.push_n(&[epoch(2000, 0, 1)]).await.unwrap();

        let batch: Vec<EpochData> = (0..2500).map(|n| epoch(n, n * 2, 2)).collect();
        assert!(matches!(
            store.push_n(&batch).await,
            Err(StoreError::DuplicateEpoch(2000))
        ));
        assert_eq!(store.block_range(0).await.unwrap(), None);
        assert_eq!(store.max_epoch().await.unwrap(), Some(2000));

        let batch: Vec<EpochData> = (0..2000).map(|n| epoch(n, n * 2, 2)).collect();
        store.push_n(&batch).await.unwrap();
        assert_eq!(
            store.block_range(1234).await.unwrap(),
            Some(RangeU64 { from: 2468, to: 2469 })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pushes_of_one_epoch_store_it_once() {
        let store = store();

        let pushes = (0..16u64).map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.push_n(&[epoch(7, 100 + i, 1)]).await })
        });
        let results: Vec<_> = futures::future::join_all(pushes)
            .await
            .into_iter()
            .map(|res| res.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|res| res.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|res| res.as_ref().err())
                .all(|err| matches!(err, StoreError::DuplicateEpoch(7)))
        );
        assert_eq!(store.max_epoch().await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn cancelled_store_reports_closed() {
        let cancel_token = CancellationToken::new();
        let store = SledEpochBlockMapStore::spawn(
            sled::Config::tmp().unwrap().open().unwrap(),
            cancel_token.clone(),
        );
        store.push_n(&[epoch(1, 1, 1)]).await.unwrap();

        cancel_token.cancel();
        // the listener drops its receiver once it observes the cancellation
        let mut result = store.max_epoch().await;
        for _ in 0..50 {
            if matches!(result, Err(StoreError::Closed)) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            result = store.max_epoch().await;
        }
        assert!(matches!(result, Err(StoreError::Closed)));
    }
}
