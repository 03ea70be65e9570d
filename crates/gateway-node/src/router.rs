//! Routing of requests to upstream full nodes.
//!
//! A [`Router`] maps a node [`Group`] and a routing key (usually the caller IP)
//! to the URL of the full node that should serve the request. Routers own no
//! connections, the [`crate::ClientProvider`] turns their decisions into
//! pooled clients.

use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::Arc,
};

use alloy_primitives::keccak256;
use parking_lot::RwLock;

use crate::group::Group;

/// Number of points every node occupies on a [`HashRingRouter`] ring.
pub const DEFAULT_RING_REPLICAS: usize = 160;

/// Decides which full node serves a `(group, key)` pair.
///
/// Implementations must be safe to call concurrently. `None` (or an empty URL)
/// means that no full node is available for the group, which callers treat as
/// a hard failure for the current call.
pub trait Router: Send + Sync {
    fn route(&self, group: &Group, key: &[u8]) -> Option<String>;
}

pub type SharedRouter = Arc<dyn Router>;

impl<R: Router + ?Sized> Router for Arc<R> {
    fn route(&self, group: &Group, key: &[u8]) -> Option<String> {
        (**self).route(group, key)
    }
}

/// Routes every key of a group to one fixed URL.
#[derive(Debug, Clone, Default)]
pub struct StaticRouter {
    urls: HashMap<Group, String>,
}

impl StaticRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: Group, url: impl Into<String>) -> Self {
        self.urls.insert(group, url.into());
        self
    }
}

impl Router for StaticRouter {
    fn route(&self, group: &Group, _key: &[u8]) -> Option<String> {
        self.urls.get(group).filter(|url| !url.is_empty()).cloned()
    }
}

/// Consistent-hash router over a mutable set of nodes per group.
///
/// Nodes can be added and removed at runtime, changes are visible to the next
/// [`Router::route`] call. Removing a node only remaps the keys it served.
#[derive(Debug)]
pub struct HashRingRouter {
    replicas: usize,
    rings: RwLock<HashMap<Group, BTreeMap<u64, String>>>,
}

impl Default for HashRingRouter {
    fn default() -> Self {
        Self::new(DEFAULT_RING_REPLICAS)
    }
}

impl HashRingRouter {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            rings: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_node(&self, group: Group, url: impl Into<String>) {
        let url = url.into();
        if url.is_empty() {
            return;
        }

        let mut rings = self.rings.write();
        let ring = rings.entry(group).or_default();
        for replica in 0..self.replicas {
            ring.insert(ring_point(&url, replica), url.clone());
        }
    }

    /// Removes a node from the group, returns whether it was present.
    pub fn remove_node(&self, group: &Group, url: &str) -> bool {
        let mut rings = self.rings.write();
        let Some(ring) = rings.get_mut(group) else {
            return false;
        };

        let before = ring.len();
        ring.retain(|_, node| node != url);
        let removed = ring.len() != before;
        if ring.is_empty() {
            rings.remove(group);
        }
        removed
    }

    /// Distinct node URLs currently serving the group.
    pub fn nodes(&self, group: &Group) -> Vec<String> {
        let rings = self.rings.read();
        let mut nodes: Vec<String> = rings
            .get(group)
            .map(|ring| ring.values().cloned().collect())
            .unwrap_or_default();
        nodes.sort();
        nodes.dedup();
        nodes
    }
}

impl Router for HashRingRouter {
    fn route(&self, group: &Group, key: &[u8]) -> Option<String> {
        let rings = self.rings.read();
        let ring = rings.get(group)?;
        let point = hash64(key);

        ring.range(point..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, url)| url.clone())
    }
}

fn ring_point(url: &str, replica: usize) -> u64 {
    hash64(format!("{url}#{replica}").as_bytes())
}

fn hash64(data: &[u8]) -> u64 {
    let digest = keccak256(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_slice()[..8]);
    u64::from_be_bytes(prefix)
}
