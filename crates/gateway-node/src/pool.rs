//! Connection pool of a node group.
//!
//! A [`ClientPool`] maps node names to connected clients. The first caller for
//! a node starts the connection attempt on a background task, every caller
//! arriving while the attempt is in flight awaits the same shared outcome.
//! A failed attempt clears the slot so the next caller retries.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
};

use dashmap::{
    DashMap,
    mapref::entry::Entry,
};
use futures::future::{
    BoxFuture,
    FutureExt,
    Shared,
};

use crate::client::ClientError;

/// Outcome of a connection attempt, shared by all of its waiters.
pub type CreateOutcome<C> = Result<C, Arc<ClientError>>;

type PendingCreate<C> = Shared<BoxFuture<'static, CreateOutcome<C>>>;

enum Slot<C> {
    Ready(C),
    Creating {
        attempt: u64,
        outcome: PendingCreate<C>,
    },
}

/// How a client was obtained from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loaded {
    /// The client was already connected.
    Cached,
    /// The caller waited on an attempt started by another caller.
    Joined,
    /// The caller started the connection attempt.
    Created,
}

pub struct ClientPool<C> {
    slots: Arc<DashMap<String, Slot<C>>>,
    attempts: AtomicU64,
}

impl<C> Default for ClientPool<C> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            attempts: AtomicU64::new(0),
        }
    }
}

impl<C> std::fmt::Debug for ClientPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("nodes", &self.slots.len())
            .finish()
    }
}

impl<C> ClientPool<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Connected client of `node`, if any.
    pub fn get(&self, node: &str) -> Option<C> {
        match self.slots.get(node)?.value() {
            Slot::Ready(client) => Some(client.clone()),
            Slot::Creating { .. } => None,
        }
    }

    /// Number of connected nodes.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the client of `node`, connecting it with `create` if absent.
    ///
    /// At most one `create` runs per node at a time. The attempt runs on its
    /// own task, so a caller that stops waiting does not cancel it and the
    /// result still lands in the pool for later callers.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn load_or_create<F, Fut>(
        &self,
        node: &str,
        create: F,
    ) -> Result<(C, Loaded), Arc<ClientError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, ClientError>> + Send + 'static,
    {
        let (pending, loaded) = match self.slots.entry(node.to_string()) {
            Entry::Occupied(slot) => {
                match slot.get() {
                    Slot::Ready(client) => return Ok((client.clone(), Loaded::Cached)),
                    Slot::Creating { outcome, .. } => (outcome.clone(), Loaded::Joined),
                }
            }
            Entry::Vacant(slot) => {
                let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
                let pending = self.spawn_create(node.to_string(), attempt, create());
                slot.insert(Slot::Creating {
                    attempt,
                    outcome: pending.clone(),
                });
                (pending, Loaded::Created)
            }
        };

        pending.await.map(|client| (client, loaded))
    }

    fn spawn_create<Fut>(&self, node: String, attempt: u64, create: Fut) -> PendingCreate<C>
    where
        Fut: Future<Output = Result<C, ClientError>> + Send + 'static,
    {
        let task_slots = Arc::clone(&self.slots);
        let task_node = node.clone();
        let task = tokio::spawn(async move {
            let outcome = create.await.map_err(Arc::new);
            settle(&task_slots, &task_node, attempt, &outcome);
            outcome
        });

        let slots = Arc::clone(&self.slots);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let outcome = Err(Arc::new(ClientError::Aborted(err.to_string())));
                    settle(&slots, &node, attempt, &outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Publishes the outcome of `attempt` unless the slot moved on since.
fn settle<C: Clone>(
    slots: &DashMap<String, Slot<C>>,
    node: &str,
    attempt: u64,
    outcome: &CreateOutcome<C>,
) {
    let is_current =
        |slot: &Slot<C>| matches!(slot, Slot::Creating { attempt: current, .. } if *current == attempt);

    match outcome {
        Ok(client) => {
            if let Some(mut slot) = slots.get_mut(node) {
                if is_current(slot.value()) {
                    *slot.value_mut() = Slot::Ready(client.clone());
                }
            }
        }
        Err(_) => {
            slots.remove_if(node, |_, slot| is_current(slot));
        }
    }
}
