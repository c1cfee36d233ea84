use std::fmt;

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CodecError, ConfigError, CryptoError};
use crate::ida::Partition;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;

const NONCE_CONTEXT: &str = "tracker-core partition nonce v1";
const PARTITION_AAD: &[u8] = b"tracker/partition/v1";

/// Shared sealing key. Wiped from memory when dropped.
#[derive(Clone)]
pub struct SymmetricKey {
    inner: Zeroizing<[u8; KEY_SIZE]>,
}

impl SymmetricKey {
    /// Fresh key from the OS RNG, as printed by `tracker keygen`.
    pub fn generate() -> Self {
        let mut key = Self::from_bytes([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut key.inner[..]);
        key
    }

    pub fn from_bytes(material: [u8; KEY_SIZE]) -> Self {
        Self {
            inner: Zeroizing::new(material),
        }
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(decode_fixed::<KEY_SIZE>("key", hex_str)?);
        Ok(Self::from_bytes(*bytes))
    }

    /// Raw key bytes, for export and nonce-key derivation.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.inner
    }

    // A fresh cipher per call; nothing mutable is shared between operations.
    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.inner.as_ref()))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// 192-bit initialization vector shared by every participant.
///
/// Used as the base from which per-partition nonces are derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceBase {
    inner: [u8; NONCE_SIZE],
}

impl NonceBase {
    pub fn random() -> Self {
        let mut inner = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut inner);
        Self { inner }
    }

    pub fn from_bytes(inner: [u8; NONCE_SIZE]) -> Self {
        Self { inner }
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: decode_fixed::<NONCE_SIZE>("iv", hex_str)?,
        })
    }

    /// Borrow the inner bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.inner
    }
}

fn decode_fixed<const N: usize>(name: &'static str, hex_str: &str) -> Result<[u8; N], ConfigError> {
    let bytes = Zeroizing::new(hex::decode(hex_str.trim()).map_err(|err| {
        ConfigError::InvalidKeyMaterial {
            name,
            reason: err.to_string(),
        }
    })?);
    if bytes.len() != N {
        return Err(ConfigError::InvalidKeyMaterial {
            name,
            reason: format!("expected {N} bytes, got {}", bytes.len()),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// A partition whose payload has been encrypted.
///
/// The index stays in the clear: it is routing metadata and is bound to the
/// ciphertext as associated data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPartition {
    pub index: u8,
    /// `nonce ‖ aead(partition bytes)`.
    pub ciphertext: Vec<u8>,
}

impl SealedPartition {
    /// `index ‖ ciphertext`, the only form ever sent to a storage node.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.ciphertext.len());
        out.push(self.index);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, CodecError> {
        match bytes.split_first() {
            Some((&index, ciphertext)) => Ok(Self {
                index,
                ciphertext: ciphertext.to_vec(),
            }),
            None => Err(CodecError::MalformedPartition {
                index: 0,
                reason: "empty wire frame",
            }),
        }
    }
}

/// Seals and unseals partitions under one key and IV.
///
/// Each seal derives a synthetic nonce from the IV, the partition index and
/// the plaintext, so a fixed key/IV pair never reuses a nonce for different
/// plaintexts. Holds only immutable material and is safe to share across
/// threads.
#[derive(Clone)]
pub struct PartitionSealer {
    key: SymmetricKey,
    iv: NonceBase,
    nonce_key: Zeroizing<[u8; 32]>,
}

impl PartitionSealer {
    pub fn new(key: SymmetricKey, iv: NonceBase) -> Self {
        let nonce_key = Zeroizing::new(blake3::derive_key(NONCE_CONTEXT, key.as_bytes()));
        Self { key, iv, nonce_key }
    }

    pub fn iv(&self) -> &NonceBase {
        &self.iv
    }

    pub fn seal(&self, partition: &Partition) -> Result<SealedPartition, CryptoError> {
        let index = partition.index;
        let plaintext = Zeroizing::new(partition.to_bytes());
        let nonce = self.synthetic_nonce(index, &plaintext);
        let sealed = self
            .key
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &associated_data(index),
                },
            )
            .map_err(|_| CryptoError::SealFailure { index })?;

        let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);
        Ok(SealedPartition { index, ciphertext })
    }

    pub fn unseal(&self, sealed: &SealedPartition) -> Result<Partition, CryptoError> {
        let index = sealed.index;
        if sealed.ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::UnsealFailure {
                index,
                reason: "truncated ciphertext",
            });
        }
        let (nonce, body) = sealed.ciphertext.split_at(NONCE_SIZE);
        let plaintext = Zeroizing::new(
            self.key
                .cipher()
                .decrypt(
                    XNonce::from_slice(nonce),
                    Payload {
                        msg: body,
                        aad: &associated_data(index),
                    },
                )
                .map_err(|_| CryptoError::UnsealFailure {
                    index,
                    reason: "authentication failed",
                })?,
        );
        Partition::from_bytes(index, &plaintext).map_err(|_| CryptoError::UnsealFailure {
            index,
            reason: "malformed plaintext",
        })
    }

    fn synthetic_nonce(&self, index: u8, plaintext: &[u8]) -> [u8; NONCE_SIZE] {
        let digest = blake3::Hasher::new_keyed(&self.nonce_key)
            .update(self.iv.as_bytes())
            .update(&[index])
            .update(plaintext)
            .finalize();
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest.as_bytes()[..NONCE_SIZE]);
        nonce
    }
}

impl fmt::Debug for PartitionSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionSealer")
            .field("key", &self.key)
            .field("iv", &hex::encode(self.iv.as_bytes()))
            .finish_non_exhaustive()
    }
}

fn associated_data(index: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(PARTITION_AAD.len() + 1);
    aad.extend_from_slice(PARTITION_AAD);
    aad.push(index);
    aad
}
