//! Serialize → pad → encode → seal, and back.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::DispersalConfig;
use crate::crypto::{PartitionSealer, SealedPartition};
use crate::error::{ConfigError, CryptoError, TrackerError};
use crate::format::{self, JsonFormat, ResourceFormat};
use crate::ida::Ida;

/// A reassembled resource plus the partitions that had to be discarded.
#[derive(Debug)]
pub struct Reassembled<T> {
    pub resource: T,
    pub rejected: Vec<CryptoError>,
}

/// Disperses resources into sealed partitions and reassembles them.
///
/// Holds only immutable configuration. Every call is independent, so one
/// engine can be shared by any number of threads.
#[derive(Clone, Debug)]
pub struct DispersalEngine<F = JsonFormat> {
    config: DispersalConfig,
    codec: Ida,
    sealer: PartitionSealer,
    format: F,
}

impl DispersalEngine<JsonFormat> {
    pub fn new(config: DispersalConfig, sealer: PartitionSealer) -> Result<Self, ConfigError> {
        Self::with_format(config, sealer, JsonFormat)
    }
}

impl<F: ResourceFormat> DispersalEngine<F> {
    pub fn with_format(
        config: DispersalConfig,
        sealer: PartitionSealer,
        format: F,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            codec: config.codec()?,
            config,
            sealer,
            format,
        })
    }

    pub fn config(&self) -> &DispersalConfig {
        &self.config
    }

    /// Produce all `n` sealed partitions of `resource`, ordered by index.
    pub fn disperse<T: Serialize>(&self, resource: &T) -> Result<Vec<SealedPartition>, TrackerError> {
        let serialized = self.format.serialize(resource)?;
        let stream = format::pad(serialized, self.config.padding());
        debug!(stream_len = stream.len(), "resource serialized");

        let partitions = self.codec.encode(&stream);
        debug!(
            partitions = partitions.len(),
            threshold = self.config.min_partitions(),
            "stream encoded"
        );

        let sealed = partitions
            .iter()
            .map(|partition| self.sealer.seal(partition))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(partitions = sealed.len(), "partitions sealed");
        Ok(sealed)
    }

    /// Rebuild a resource from at least `k` sealed partitions of one dispersal.
    pub fn reassemble<T: DeserializeOwned>(
        &self,
        sealed: &[SealedPartition],
    ) -> Result<T, TrackerError> {
        self.reassemble_with_report(sealed)
            .map(|reassembled| reassembled.resource)
    }

    /// Like [`reassemble`](Self::reassemble), also reporting rejected partitions.
    ///
    /// A partition that fails to unseal does not abort the attempt: decoding
    /// proceeds with the survivors as long as they still meet the threshold.
    pub fn reassemble_with_report<T: DeserializeOwned>(
        &self,
        sealed: &[SealedPartition],
    ) -> Result<Reassembled<T>, TrackerError> {
        let mut partitions = Vec::with_capacity(sealed.len());
        let mut rejected = Vec::new();
        for candidate in sealed {
            match self.sealer.unseal(candidate) {
                Ok(partition) => partitions.push(partition),
                Err(err) => {
                    warn!(index = candidate.index, error = %err, "rejecting partition");
                    rejected.push(err);
                }
            }
        }
        debug!(
            unsealed = partitions.len(),
            rejected = rejected.len(),
            "partitions unsealed"
        );

        let stream = match self.codec.decode(&partitions) {
            Ok(stream) => stream,
            Err(cause) if rejected.is_empty() => return Err(cause.into()),
            Err(cause) => return Err(TrackerError::Reassembly { rejected, cause }),
        };
        debug!(stream_len = stream.len(), "stream decoded");

        let serialized = format::unpad(stream, self.config.padding())?;
        let resource = self.format.deserialize(&serialized)?;
        Ok(Reassembled { resource, rejected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{NonceBase, SymmetricKey, KEY_SIZE, NONCE_SIZE};
    use crate::error::{CodecError, SerializationError};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct People {
        firstname: String,
        lastname: String,
        password: String,
    }

    fn engine() -> DispersalEngine {
        let sealer = PartitionSealer::new(
            SymmetricKey::from_bytes([0x5a; KEY_SIZE]),
            NonceBase::from_bytes([0xa5; NONCE_SIZE]),
        );
        DispersalEngine::new(DispersalConfig::default(), sealer).expect("engine")
    }

    fn pick(sealed: &[SealedPartition], indices: &[u8]) -> Vec<SealedPartition> {
        sealed
            .iter()
            .filter(|p| indices.contains(&p.index))
            .cloned()
            .collect()
    }

    #[test]
    fn thirty_seven_byte_resource_scenario() {
        let engine = engine();
        let resource = "x".repeat(35);
        assert_eq!(JsonFormat.serialize(&resource).expect("json").len(), 37);

        let sealed = engine.disperse(&resource).expect("disperse");
        assert_eq!(
            sealed.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        let a: String = engine.reassemble(&pick(&sealed, &[1, 3, 5])).expect("1,3,5");
        let b: String = engine.reassemble(&pick(&sealed, &[2, 4, 5])).expect("2,4,5");
        assert_eq!(a, resource);
        assert_eq!(b, resource);
    }

    #[test]
    fn struct_resources_round_trip() {
        let engine = engine();
        let roy = People {
            firstname: "Roy".into(),
            lastname: "Shadmon".into(),
            password: "12345".into(),
        };
        let sealed = engine.disperse(&roy).expect("disperse");
        let back: People = engine.reassemble(&sealed).expect("reassemble");
        assert_eq!(back, roy);
    }

    #[test]
    fn below_threshold_never_fabricates() {
        let engine = engine();
        let sealed = engine.disperse(&"secret".to_string()).expect("disperse");
        let err = engine
            .reassemble::<String>(&pick(&sealed, &[2, 5]))
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Codec(CodecError::InsufficientFragments { have: 2, need: 3 })
        ));
    }

    #[test]
    fn corrupt_partition_is_skipped_when_enough_remain() {
        let engine = engine();
        let mut sealed = engine.disperse(&vec![1u32, 2, 3, 4]).expect("disperse");
        let last = sealed[1].ciphertext.len() - 1;
        sealed[1].ciphertext[last] ^= 0xff;

        let report = engine
            .reassemble_with_report::<Vec<u32>>(&sealed)
            .expect("reassemble");
        assert_eq!(report.resource, vec![1, 2, 3, 4]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index(), 2);
    }

    #[test]
    fn corrupt_partition_below_threshold_reports_both_causes() {
        let engine = engine();
        let mut sealed = engine.disperse(&42u64).expect("disperse");
        sealed[0].ciphertext[30] ^= 0x01;

        let err = engine
            .reassemble::<u64>(&pick(&sealed, &[1, 2, 3]))
            .unwrap_err();
        match err {
            TrackerError::Reassembly { rejected, cause } => {
                assert_eq!(rejected[0].index(), 1);
                assert_eq!(cause, CodecError::InsufficientFragments { have: 2, need: 3 });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cross_mixed_dispersals_fail_closed() {
        let engine = engine();
        let a = engine.disperse(&"alpha resource".to_string()).expect("a");
        let b = engine.disperse(&"bravo resource".to_string()).expect("b");

        let mixed = vec![a[0].clone(), a[1].clone(), b[2].clone(), b[3].clone(), a[4].clone()];
        let got: String = engine.reassemble(&mixed).expect("a wins with three");
        assert_eq!(got, "alpha resource");

        let mixed = vec![a[0].clone(), b[1].clone(), a[2].clone(), b[3].clone()];
        assert!(engine.reassemble::<String>(&mixed).is_err());
    }

    #[test]
    fn wrong_type_is_a_deserialization_error() {
        let engine = engine();
        let sealed = engine.disperse(&"not a number".to_string()).expect("disperse");
        let err = engine.reassemble::<u64>(&sealed).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Serialization(SerializationError::Decode(_))
        ));
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DispersalEngine>();

        let engine = engine();
        std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4u32)
                .map(|worker| {
                    let engine = &engine;
                    scope.spawn(move || {
                        let resource = format!("resource from worker {worker}");
                        let sealed = engine.disperse(&resource).expect("disperse");
                        let back: String = engine.reassemble(&sealed[2..]).expect("reassemble");
                        assert_eq!(back, resource);
                    })
                })
                .collect();
            for worker in workers {
                worker.join().expect("worker");
            }
        });
    }
}
