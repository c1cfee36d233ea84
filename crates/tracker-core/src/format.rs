//! Canonical resource encoding and the trailing padding block.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializationError;

/// Byte encoding for resources. Any serde type can be dispersed.
pub trait ResourceFormat {
    fn serialize<T: Serialize>(&self, resource: &T) -> Result<Vec<u8>, SerializationError>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// JSON encoding via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFormat;

impl ResourceFormat for JsonFormat {
    fn serialize<T: Serialize>(&self, resource: &T) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(resource).map_err(SerializationError::Encode)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(SerializationError::Decode)
    }
}

/// Append `padding` random filler bytes.
///
/// The filler content is irrelevant to decoding. Random filler keeps the
/// stream digest (the partition generation tag) unpredictable.
pub fn pad(mut bytes: Vec<u8>, padding: usize) -> Vec<u8> {
    let start = bytes.len();
    bytes.resize(start + padding, 0);
    OsRng.fill_bytes(&mut bytes[start..]);
    bytes
}

/// Drop the trailing `padding` bytes added by [`pad`].
pub fn unpad(mut stream: Vec<u8>, padding: usize) -> Result<Vec<u8>, SerializationError> {
    if stream.len() < padding {
        return Err(SerializationError::TruncatedStream {
            len: stream.len(),
            padding,
        });
    }
    stream.truncate(stream.len() - padding);
    Ok(stream)
}
