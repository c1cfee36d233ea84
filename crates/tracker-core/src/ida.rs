//! Rabin-style information dispersal over GF(2^8).
//!
//! The stream is cut into groups of `k` bytes. Each group is read as the
//! coefficients of a polynomial of degree `k - 1`, and partition `i` stores
//! the evaluation of every group polynomial at `x = i`. The resulting
//! `n × k` Vandermonde matrix is fixed and public; any `k` rows are
//! invertible because the evaluation points are distinct and nonzero.

use std::collections::BTreeMap;

use reed_solomon_erasure::galois_8::{add, div, mul};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, ConfigError};

/// Largest `n`: every partition needs its own nonzero field element.
pub const MAX_PARTITIONS: usize = 255;

/// BLAKE3 digest of the stream a partition set was encoded from.
pub type Generation = [u8; 32];

const HEADER_LEN: usize = 32 + 8;

/// One coded fragment of a byte stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Evaluation point, `1..=n`. Identifies provenance, not position.
    pub index: u8,
    pub generation: Generation,
    /// Length of the stream before it was extended to a multiple of `k`.
    pub stream_len: u64,
    pub data: Vec<u8>,
}

impl Partition {
    /// `generation ‖ stream_len (LE) ‖ data`. The index travels beside it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        out.extend_from_slice(&self.generation);
        out.extend_from_slice(&self.stream_len.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(index: u8, bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::MalformedPartition {
                index,
                reason: "truncated header",
            });
        }
        let (generation, rest) = bytes.split_at(32);
        let (len, data) = rest.split_at(8);
        let mut gen = [0u8; 32];
        gen.copy_from_slice(generation);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(len);
        Ok(Self {
            index,
            generation: gen,
            stream_len: u64::from_le_bytes(len_bytes),
            data: data.to_vec(),
        })
    }
}

/// `(n, k)` threshold codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ida {
    max_partitions: usize,
    min_partitions: usize,
}

impl Ida {
    pub fn new(max_partitions: usize, min_partitions: usize) -> Result<Self, ConfigError> {
        if min_partitions == 0 || min_partitions > max_partitions {
            return Err(ConfigError::InvalidThreshold {
                max_partitions,
                min_partitions,
            });
        }
        if max_partitions > MAX_PARTITIONS {
            return Err(ConfigError::TooManyPartitions {
                requested: max_partitions,
                max: MAX_PARTITIONS,
            });
        }
        Ok(Self {
            max_partitions,
            min_partitions,
        })
    }

    pub fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    pub fn min_partitions(&self) -> usize {
        self.min_partitions
    }

    /// Split `stream` into `n` partitions indexed `1..=n`.
    pub fn encode(&self, stream: &[u8]) -> Vec<Partition> {
        let k = self.min_partitions;
        let generation: Generation = blake3::hash(stream).into();
        let width = stream.len().div_ceil(k);

        let mut partitions: Vec<Partition> = (1..=self.max_partitions)
            .map(|index| Partition {
                index: index as u8,
                generation,
                stream_len: stream.len() as u64,
                data: Vec::with_capacity(width),
            })
            .collect();

        let mut group = vec![0u8; k];
        for chunk in stream.chunks(k) {
            group.fill(0);
            group[..chunk.len()].copy_from_slice(chunk);
            for partition in partitions.iter_mut() {
                partition.data.push(evaluate(&group, partition.index));
            }
        }
        partitions
    }

    /// Rebuild the stream from any `k` distinct partitions of one encoding.
    ///
    /// Partitions are grouped by generation and duplicate indices are
    /// ignored. Exactly one generation must reach the threshold.
    pub fn decode(&self, partitions: &[Partition]) -> Result<Vec<u8>, CodecError> {
        let k = self.min_partitions;

        let mut generations: BTreeMap<Generation, BTreeMap<u8, &Partition>> = BTreeMap::new();
        for partition in partitions {
            if partition.index == 0 || usize::from(partition.index) > self.max_partitions {
                return Err(CodecError::CorruptFragment {
                    index: partition.index,
                    max: self.max_partitions,
                });
            }
            generations
                .entry(partition.generation)
                .or_default()
                .entry(partition.index)
                .or_insert(partition);
        }

        let complete: Vec<_> = generations
            .iter()
            .filter(|(_, members)| members.len() >= k)
            .collect();
        let (generation, members) = match complete.as_slice() {
            [] => {
                let have = generations.values().map(BTreeMap::len).max().unwrap_or(0);
                return Err(CodecError::InsufficientFragments { have, need: k });
            }
            [only] => *only,
            many => {
                return Err(CodecError::MixedGenerations {
                    generations: many.len(),
                })
            }
        };

        let rows: Vec<&Partition> = members.values().take(k).copied().collect();
        let stream_len = rows[0].stream_len;
        let stream_len = usize::try_from(stream_len).map_err(|_| CodecError::MalformedPartition {
            index: rows[0].index,
            reason: "stream length overflows",
        })?;
        let width = stream_len.div_ceil(k);
        for row in &rows {
            if row.stream_len as usize != stream_len || row.data.len() != width {
                return Err(CodecError::MalformedPartition {
                    index: row.index,
                    reason: "shape disagrees with its generation",
                });
            }
        }

        let matrix = rows.iter().map(|row| powers(row.index, k)).collect();
        let inverse = invert(matrix).ok_or(CodecError::IntegrityMismatch)?;

        let mut stream = Vec::with_capacity(width * k);
        for column in 0..width {
            for coefficients in &inverse {
                let byte = coefficients
                    .iter()
                    .zip(&rows)
                    .fold(0u8, |acc, (&c, row)| add(acc, mul(c, row.data[column])));
                stream.push(byte);
            }
        }
        stream.truncate(stream_len);

        if *blake3::hash(&stream).as_bytes() != *generation {
            return Err(CodecError::IntegrityMismatch);
        }
        Ok(stream)
    }
}

/// Horner evaluation of the polynomial with `coefficients` (lowest first) at `x`.
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &c| add(mul(acc, x), c))
}

/// Vandermonde row `[1, x, x^2, .., x^(k-1)]`.
fn powers(x: u8, k: usize) -> Vec<u8> {
    let mut row = Vec::with_capacity(k);
    let mut term = 1u8;
    for _ in 0..k {
        row.push(term);
        term = mul(term, x);
    }
    row
}

/// Gauss-Jordan inversion over GF(2^8). `None` if the matrix is singular.
fn invert(mut matrix: Vec<Vec<u8>>) -> Option<Vec<Vec<u8>>> {
    let size = matrix.len();
    let mut inverse: Vec<Vec<u8>> = (0..size)
        .map(|row| (0..size).map(|col| u8::from(row == col)).collect())
        .collect();

    for col in 0..size {
        let pivot = (col..size).find(|&row| matrix[row][col] != 0)?;
        matrix.swap(col, pivot);
        inverse.swap(col, pivot);

        let scale = div(1, matrix[col][col]);
        for c in 0..size {
            matrix[col][c] = mul(matrix[col][c], scale);
            inverse[col][c] = mul(inverse[col][c], scale);
        }

        for row in 0..size {
            let factor = matrix[row][col];
            if row == col || factor == 0 {
                continue;
            }
            for c in 0..size {
                matrix[row][c] = add(matrix[row][c], mul(factor, matrix[col][c]));
                inverse[row][c] = add(inverse[row][c], mul(factor, inverse[col][c]));
            }
        }
    }
    Some(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subsets(n: usize, k: usize) -> Vec<Vec<usize>> {
        (0u32..(1 << n))
            .filter(|mask| mask.count_ones() as usize == k)
            .map(|mask| (0..n).filter(|i| mask & (1 << i) != 0).collect())
            .collect()
    }

    #[test]
    fn any_threshold_subset_reconstructs() {
        let ida = Ida::new(5, 3).expect("ida");
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let partitions = ida.encode(&data);
        assert_eq!(partitions.len(), 5);
        assert_eq!(
            partitions.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        for p in &partitions {
            assert_eq!(p.data.len(), data.len().div_ceil(3));
        }

        for k in 3..=5 {
            for subset in subsets(5, k) {
                let picked: Vec<Partition> =
                    subset.iter().map(|&i| partitions[i].clone()).collect();
                assert_eq!(ida.decode(&picked).expect("decode"), data, "{subset:?}");
            }
        }
    }

    #[test]
    fn order_and_duplicates_do_not_matter() {
        let ida = Ida::new(5, 3).expect("ida");
        let data: Vec<u8> = (0..=255u8).collect();
        let partitions = ida.encode(&data);
        let picked = vec![
            partitions[4].clone(),
            partitions[4].clone(),
            partitions[0].clone(),
            partitions[2].clone(),
        ];
        assert_eq!(ida.decode(&picked).expect("decode"), data);
    }

    #[test]
    fn below_threshold_fails() {
        let ida = Ida::new(5, 3).expect("ida");
        let partitions = ida.encode(b"short payload");
        let err = ida
            .decode(&[partitions[1].clone(), partitions[1].clone(), partitions[3].clone()])
            .unwrap_err();
        assert_eq!(err, CodecError::InsufficientFragments { have: 2, need: 3 });
        assert_eq!(
            ida.decode(&[]).unwrap_err(),
            CodecError::InsufficientFragments { have: 0, need: 3 }
        );
    }

    #[test]
    fn degenerate_thresholds() {
        let data = b"degenerate".to_vec();

        let replicate = Ida::new(4, 1).expect("ida");
        let partitions = replicate.encode(&data);
        for p in &partitions {
            assert_eq!(replicate.decode(std::slice::from_ref(p)).expect("decode"), data);
        }

        let all = Ida::new(4, 4).expect("ida");
        let partitions = all.encode(&data);
        assert_eq!(all.decode(&partitions).expect("decode"), data);
        assert!(matches!(
            all.decode(&partitions[..3]),
            Err(CodecError::InsufficientFragments { have: 3, need: 4 })
        ));
    }

    #[test]
    fn no_partition_is_a_plain_stripe() {
        let ida = Ida::new(5, 3).expect("ida");
        let data = b"ABCDEFGHI";
        let partitions = ida.encode(data);
        let stripes: Vec<Vec<u8>> = (0..3)
            .map(|offset| data.iter().skip(offset).step_by(3).copied().collect())
            .collect();
        for p in &partitions {
            assert!(!stripes.contains(&p.data), "partition {} leaks", p.index);
        }
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(
            Ida::new(3, 4),
            Err(ConfigError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            Ida::new(3, 0),
            Err(ConfigError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            Ida::new(256, 3),
            Err(ConfigError::TooManyPartitions { requested: 256, .. })
        ));
    }

    #[test]
    fn out_of_range_index_is_corrupt() {
        let ida = Ida::new(5, 3).expect("ida");
        let mut partitions = ida.encode(b"payload");
        partitions[0].index = 9;
        assert_eq!(
            ida.decode(&partitions).unwrap_err(),
            CodecError::CorruptFragment { index: 9, max: 5 }
        );
    }

    #[test]
    fn mixed_generations_fail_closed() {
        let ida = Ida::new(5, 3).expect("ida");
        let a = ida.encode(b"first resource payload");
        let b = ida.encode(b"other resource payload");

        // Two from each side: neither reaches the threshold.
        let mixed = vec![a[0].clone(), a[1].clone(), b[2].clone(), b[3].clone()];
        assert!(matches!(
            ida.decode(&mixed),
            Err(CodecError::InsufficientFragments { have: 2, need: 3 })
        ));

        // A stray partition is ignored when one generation is complete.
        let stray = vec![a[0].clone(), b[1].clone(), a[2].clone(), a[4].clone()];
        assert_eq!(ida.decode(&stray).expect("decode"), b"first resource payload");

        let both = [&a[..3], &b[2..]].concat();
        assert_eq!(
            ida.decode(&both).unwrap_err(),
            CodecError::MixedGenerations { generations: 2 }
        );

        // Relabelled generation: shapes line up but the digest does not.
        let mut forged = b[..3].to_vec();
        for p in forged.iter_mut() {
            p.generation = a[0].generation;
        }
        assert_eq!(ida.decode(&forged).unwrap_err(), CodecError::IntegrityMismatch);
    }

    #[test]
    fn tampered_data_is_detected() {
        let ida = Ida::new(5, 3).expect("ida");
        let mut partitions = ida.encode(b"integrity matters");
        partitions[1].data[0] ^= 0x01;
        assert_eq!(
            ida.decode(&partitions[..3]).unwrap_err(),
            CodecError::IntegrityMismatch
        );
    }

    #[test]
    fn partition_bytes_round_trip() {
        let ida = Ida::new(3, 2).expect("ida");
        let partition = ida.encode(b"bytes").remove(1);
        let bytes = partition.to_bytes();
        assert_eq!(Partition::from_bytes(2, &bytes).expect("parse"), partition);
        assert!(matches!(
            Partition::from_bytes(2, &bytes[..10]),
            Err(CodecError::MalformedPartition { index: 2, .. })
        ));
    }
}
