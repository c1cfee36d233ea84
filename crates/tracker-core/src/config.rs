use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::{NonceBase, PartitionSealer, SymmetricKey};
use crate::engine::DispersalEngine;
use crate::error::ConfigError;
use crate::ida::Ida;
use crate::keyspace::{KeyDeriver, KeyDigest, KEYSPACE_SIZE};

pub const DEFAULT_MAX_PARTITIONS: usize = 5;
pub const DEFAULT_MIN_PARTITIONS: usize = 3;
pub const DEFAULT_PADDING: usize = 10;

/// Immutable codec shape: `n` partitions, any `k` of which reconstruct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DispersalConfig {
    max_partitions: usize,
    min_partitions: usize,
    padding: usize,
}

impl DispersalConfig {
    pub fn new(
        max_partitions: usize,
        min_partitions: usize,
        padding: usize,
    ) -> Result<Self, ConfigError> {
        Ida::new(max_partitions, min_partitions)?;
        Ok(Self {
            max_partitions,
            min_partitions,
            padding,
        })
    }

    pub fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    pub fn min_partitions(&self) -> usize {
        self.min_partitions
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub(crate) fn codec(&self) -> Result<Ida, ConfigError> {
        Ida::new(self.max_partitions, self.min_partitions)
    }
}

impl Default for DispersalConfig {
    fn default() -> Self {
        Self {
            max_partitions: DEFAULT_MAX_PARTITIONS,
            min_partitions: DEFAULT_MIN_PARTITIONS,
            padding: DEFAULT_PADDING,
        }
    }
}

/// File-loadable tracker settings.
///
/// The key and IV must be provisioned identically to every participant; they
/// are never transmitted alongside partitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,
    #[serde(default = "default_min_partitions")]
    pub min_partitions: usize,
    #[serde(default = "default_padding")]
    pub padding: usize,
    pub key_hex: String,
    pub iv_hex: String,
    #[serde(default = "default_keyspace")]
    pub keyspace: u32,
    #[serde(default)]
    pub key_digest: KeyDigest,
}

fn default_max_partitions() -> usize {
    DEFAULT_MAX_PARTITIONS
}

fn default_min_partitions() -> usize {
    DEFAULT_MIN_PARTITIONS
}

fn default_padding() -> usize {
    DEFAULT_PADDING
}

fn default_keyspace() -> u32 {
    KEYSPACE_SIZE
}

impl TrackerConfig {
    /// Settings with the reference shape and the given key material.
    pub fn new(key_hex: impl Into<String>, iv_hex: impl Into<String>) -> Self {
        Self {
            max_partitions: DEFAULT_MAX_PARTITIONS,
            min_partitions: DEFAULT_MIN_PARTITIONS,
            padding: DEFAULT_PADDING,
            key_hex: key_hex.into(),
            iv_hex: iv_hex.into(),
            keyspace: KEYSPACE_SIZE,
            key_digest: KeyDigest::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn dispersal(&self) -> Result<DispersalConfig, ConfigError> {
        DispersalConfig::new(self.max_partitions, self.min_partitions, self.padding)
    }

    pub fn sealer(&self) -> Result<PartitionSealer, ConfigError> {
        let key = SymmetricKey::from_hex(&self.key_hex)?;
        let iv = NonceBase::from_hex(&self.iv_hex)?;
        Ok(PartitionSealer::new(key, iv))
    }

    pub fn key_deriver(&self) -> Result<KeyDeriver, ConfigError> {
        KeyDeriver::new(self.key_digest, self.keyspace)
    }

    /// Validate everything and build an engine with the JSON resource format.
    pub fn engine(&self) -> Result<DispersalEngine, ConfigError> {
        DispersalEngine::new(self.dispersal()?, self.sealer()?)
    }
}
