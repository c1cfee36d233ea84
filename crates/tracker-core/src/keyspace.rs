//! Deterministic placement keys for the ring.
//!
//! Resource identifiers and node identifiers are hashed with the same
//! function so that both land uniformly in one keyspace. The mapping depends
//! only on the input string, never on process state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Number of buckets on the reference ring.
pub const KEYSPACE_SIZE: u32 = 256;

/// Integer ring position of a resource or node.
pub type ResourceKey = u32;

/// Digest used to place strings on the ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyDigest {
    /// 160-bit SHA-1, the reference placement digest.
    #[default]
    Sha1,
    Sha256,
}

impl KeyDigest {
    pub fn name(&self) -> &'static str {
        match self {
            KeyDigest::Sha1 => "sha1",
            KeyDigest::Sha256 => "sha256",
        }
    }

    fn digest(&self, input: &[u8]) -> Vec<u8> {
        match self {
            KeyDigest::Sha1 => Sha1::digest(input).to_vec(),
            KeyDigest::Sha256 => Sha256::digest(input).to_vec(),
        }
    }
}

impl FromStr for KeyDigest {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(KeyDigest::Sha1),
            "sha256" | "sha-256" => Ok(KeyDigest::Sha256),
            _ => Err(ConfigError::HashUnavailable(s.to_string())),
        }
    }
}

impl TryFrom<String> for KeyDigest {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyDigest> for String {
    fn from(value: KeyDigest) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hash-and-reduce mapping from strings to `[0, keyspace)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyDeriver {
    digest: KeyDigest,
    keyspace: u32,
}

impl KeyDeriver {
    pub fn new(digest: KeyDigest, keyspace: u32) -> Result<Self, ConfigError> {
        if keyspace == 0 {
            return Err(ConfigError::InvalidKeyspace);
        }
        Ok(Self { digest, keyspace })
    }

    pub fn keyspace(&self) -> u32 {
        self.keyspace
    }

    pub fn digest(&self) -> KeyDigest {
        self.digest
    }

    /// Reduce the big-endian digest of `input` modulo the keyspace.
    pub fn derive(&self, input: &str) -> ResourceKey {
        let digest = self.digest.digest(input.as_bytes());
        let modulus = u64::from(self.keyspace);
        let rem = digest
            .iter()
            .fold(0u64, |acc, &byte| ((acc << 8) | u64::from(byte)) % modulus);
        rem as ResourceKey
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self {
            digest: KeyDigest::Sha1,
            keyspace: KEYSPACE_SIZE,
        }
    }
}

/// Ring key of `input` on the reference ring (SHA-1, 256 buckets).
pub fn derive_key(input: &str) -> ResourceKey {
    KeyDeriver::default().derive(input)
}
