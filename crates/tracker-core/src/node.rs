//! Placement of sealed partitions on ring nodes.
//!
//! Routing and membership live outside this crate. The tracker only needs a
//! [`NodeDirectory`] that hands out candidate nodes and stores or fetches
//! opaque bytes under a key.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::SealedPartition;
use crate::engine::DispersalEngine;
use crate::error::{NodeError, TrackerError};
use crate::format::{JsonFormat, ResourceFormat};
use crate::keyspace::{KeyDeriver, ResourceKey};

/// Key a sealed partition is stored under on its node.
///
/// `resource` is the ring position and is shared by every id hashing into the
/// same bucket. `locator` is a 128-bit BLAKE3 prefix of the resource id and
/// keeps colliding ids apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    pub resource: ResourceKey,
    pub locator: [u8; 16],
    pub partition: u8,
}

impl StorageKey {
    pub fn new(resource_id: &str, resource: ResourceKey, partition: u8) -> Self {
        let digest = blake3::hash(resource_id.as_bytes());
        let mut locator = [0u8; 16];
        locator.copy_from_slice(&digest.as_bytes()[..16]);
        Self {
            resource,
            locator,
            partition,
        }
    }
}

/// Source of candidate nodes plus the storage effects on them.
pub trait NodeDirectory {
    type Node: Clone + PartialEq + fmt::Display;

    /// Pop a currently known peer, if any.
    fn select_node(&mut self) -> Option<Self::Node>;

    fn store(&mut self, node: &Self::Node, key: StorageKey, payload: Vec<u8>)
        -> Result<(), NodeError>;

    /// `Ok(None)` when the node is reachable but holds nothing under `key`.
    fn fetch(&mut self, node: &Self::Node, key: StorageKey) -> Result<Option<Vec<u8>>, NodeError>;

    /// Drop whatever `node` holds under `key`. Removing an absent key is not an error.
    fn remove(&mut self, node: &Self::Node, key: StorageKey) -> Result<(), NodeError>;
}

/// A peer on the in-memory ring.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RingNode {
    pub name: String,
    pub id: ResourceKey,
}

impl fmt::Display for RingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.id)
    }
}

/// In-process node directory.
///
/// Node ids come from the same key deriver as resource keys. Candidates are
/// handed out round-robin in ring order, whether or not they are reachable.
#[derive(Debug, Default)]
pub struct MemoryRing {
    candidates: VecDeque<RingNode>,
    stores: HashMap<String, HashMap<StorageKey, Vec<u8>>>,
    offline: HashSet<String>,
}

impl MemoryRing {
    pub fn new<I, S>(names: I, deriver: &KeyDeriver) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut nodes: Vec<RingNode> = names
            .into_iter()
            .map(Into::into)
            .map(|name| RingNode {
                id: deriver.derive(&name),
                name,
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
        Self {
            candidates: nodes.into(),
            ..Self::default()
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RingNode> {
        self.candidates.iter()
    }

    pub fn take_offline(&mut self, name: &str) {
        self.offline.insert(name.to_string());
    }

    pub fn bring_online(&mut self, name: &str) {
        self.offline.remove(name);
    }

    /// Number of payloads held by `name`.
    pub fn stored(&self, name: &str) -> usize {
        self.stores.get(name).map_or(0, HashMap::len)
    }

    /// Direct access to a stored payload, bypassing reachability.
    pub fn payload_mut(&mut self, name: &str, key: StorageKey) -> Option<&mut Vec<u8>> {
        self.stores.get_mut(name)?.get_mut(&key)
    }

    fn reachable(&self, node: &RingNode) -> Result<(), NodeError> {
        if self.offline.contains(&node.name) {
            return Err(NodeError::Unreachable {
                node: node.to_string(),
            });
        }
        Ok(())
    }
}

impl NodeDirectory for MemoryRing {
    type Node = RingNode;

    fn select_node(&mut self) -> Option<RingNode> {
        let node = self.candidates.pop_front()?;
        self.candidates.push_back(node.clone());
        Some(node)
    }

    fn store(&mut self, node: &RingNode, key: StorageKey, payload: Vec<u8>) -> Result<(), NodeError> {
        self.reachable(node)?;
        self.stores
            .entry(node.name.clone())
            .or_default()
            .insert(key, payload);
        Ok(())
    }

    fn fetch(&mut self, node: &RingNode, key: StorageKey) -> Result<Option<Vec<u8>>, NodeError> {
        self.reachable(node)?;
        Ok(self
            .stores
            .get(&node.name)
            .and_then(|store| store.get(&key))
            .cloned())
    }

    fn remove(&mut self, node: &RingNode, key: StorageKey) -> Result<(), NodeError> {
        self.reachable(node)?;
        if let Some(store) = self.stores.get_mut(&node.name) {
            store.remove(&key);
        }
        Ok(())
    }
}

/// Where one sealed partition of a resource was sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement<N> {
    pub node: N,
    pub key: StorageKey,
}

/// Key map entry for a tracked resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceEntry<N> {
    pub key: ResourceKey,
    pub placements: Vec<Placement<N>>,
}

/// Disperses resources onto ring nodes and looks them up again.
pub struct Tracker<D: NodeDirectory, F = JsonFormat> {
    engine: DispersalEngine<F>,
    deriver: KeyDeriver,
    directory: D,
    keymap: HashMap<String, ResourceEntry<D::Node>>,
}

impl<D: NodeDirectory, F: ResourceFormat> Tracker<D, F> {
    pub fn new(engine: DispersalEngine<F>, deriver: KeyDeriver, directory: D) -> Self {
        Self {
            engine,
            deriver,
            directory,
            keymap: HashMap::new(),
        }
    }

    /// Ring id for a node name, on the same keyspace as resources.
    pub fn assign_id(&self, node_name: &str) -> ResourceKey {
        self.deriver.derive(node_name)
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut D {
        &mut self.directory
    }

    pub fn entry(&self, resource_id: &str) -> Option<&ResourceEntry<D::Node>> {
        self.keymap.get(resource_id)
    }

    /// Disperse `resource` and store one sealed partition per selected node.
    ///
    /// Placements are recorded only once every partition has been stored. On
    /// failure the partitions already stored are removed again. Re-inserting
    /// an id replaces its previous placements.
    pub fn insert<T: Serialize>(
        &mut self,
        resource_id: &str,
        resource: &T,
    ) -> Result<ResourceKey, TrackerError> {
        let key = self.deriver.derive(resource_id);
        let sealed = self.engine.disperse(resource)?;

        let mut placements = Vec::with_capacity(sealed.len());
        for partition in &sealed {
            let storage_key = StorageKey::new(resource_id, key, partition.index);
            let stored = self
                .directory
                .select_node()
                .ok_or(NodeError::NoNodesAvailable)
                .and_then(|node| {
                    self.directory
                        .store(&node, storage_key, partition.to_wire())
                        .map(|()| node)
                });
            match stored {
                Ok(node) => {
                    debug!(resource = resource_id, index = partition.index, node = %node, "partition stored");
                    placements.push(Placement {
                        node,
                        key: storage_key,
                    });
                }
                Err(err) => {
                    self.discard(&placements);
                    return Err(err.into());
                }
            }
        }

        let previous = self.keymap.insert(
            resource_id.to_string(),
            ResourceEntry {
                key,
                placements: placements.clone(),
            },
        );
        if let Some(previous) = previous {
            let stale: Vec<_> = previous
                .placements
                .into_iter()
                .filter(|old| !placements.contains(old))
                .collect();
            self.discard(&stale);
        }
        Ok(key)
    }

    // Best effort: an unreachable node keeps its copy until it is overwritten.
    fn discard(&mut self, placements: &[Placement<D::Node>]) {
        for placement in placements {
            if let Err(err) = self.directory.remove(&placement.node, placement.key) {
                warn!(node = %placement.node, index = placement.key.partition, error = %err, "could not remove partition");
            }
        }
    }

    /// Fetch whatever partitions are reachable and reassemble the resource.
    ///
    /// Unreachable nodes and missing payloads are skipped, not retried; the
    /// engine decides whether the survivors meet the threshold.
    pub fn lookup<T: DeserializeOwned>(&mut self, resource_id: &str) -> Result<T, TrackerError> {
        let entry = self
            .keymap
            .get(resource_id)
            .ok_or_else(|| NodeError::UnknownResource(resource_id.to_string()))?;

        let mut fetched = Vec::with_capacity(entry.placements.len());
        for placement in &entry.placements {
            let payload = match self.directory.fetch(&placement.node, placement.key) {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    warn!(node = %placement.node, index = placement.key.partition, "partition missing");
                    continue;
                }
                Err(err) => {
                    warn!(index = placement.key.partition, error = %err, "fetch failed");
                    continue;
                }
            };
            match SealedPartition::from_wire(&payload) {
                Ok(sealed) if sealed.index == placement.key.partition => fetched.push(sealed),
                Ok(sealed) => {
                    warn!(
                        node = %placement.node,
                        expected = placement.key.partition,
                        found = sealed.index,
                        "partition index mismatch"
                    );
                }
                Err(err) => {
                    warn!(node = %placement.node, error = %err, "unreadable partition");
                }
            }
        }
        debug!(resource = resource_id, fetched = fetched.len(), "partitions fetched");

        self.engine.reassemble(&fetched)
    }
}
