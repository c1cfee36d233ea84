//! Core of the Chord resource tracker.
//!
//! A resource is serialized, padded, split into `n` threshold-coded
//! partitions of which any `k` reconstruct it, and each partition is sealed
//! before it leaves the process. The building blocks:
//!
//! * [`keyspace`]: SHA-1 hash-and-reduce placement keys for resources and
//!   nodes.
//! * [`ida`]: Rabin information dispersal over GF(2^8).
//! * [`crypto`]: XChaCha20-Poly1305 partition sealing with synthetic nonces.
//! * [`format`]: resource encoding and the trailing padding block.
//! * [`engine`]: the disperse/reassemble pipeline.
//! * [`node`]: the node directory seam and the insert/lookup tracker.
//!
//! Ring routing, transport and node-side persistence are collaborators and
//! are only modelled at the [`node::NodeDirectory`] boundary.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod format;
pub mod ida;
pub mod keyspace;
pub mod node;

mod error;

pub use config::{DispersalConfig, TrackerConfig};
pub use crypto::{NonceBase, PartitionSealer, SealedPartition, SymmetricKey};
pub use engine::{DispersalEngine, Reassembled};
pub use error::{
    CodecError, ConfigError, CryptoError, NodeError, SerializationError, Stage, TrackerError,
};
pub use format::{JsonFormat, ResourceFormat};
pub use ida::{Ida, Partition};
pub use keyspace::{derive_key, KeyDeriver, KeyDigest, ResourceKey, KEYSPACE_SIZE};
pub use node::{MemoryRing, NodeDirectory, Tracker};
