use proptest::prelude::*;
use tracker_core::crypto::{KEY_SIZE, NONCE_SIZE};
use tracker_core::{
    derive_key, CodecError, DispersalConfig, DispersalEngine, Ida, NonceBase, PartitionSealer,
    SealedPartition, SymmetricKey, TrackerError,
};

fn engine(n: usize, k: usize) -> DispersalEngine {
    let sealer = PartitionSealer::new(
        SymmetricKey::from_bytes([0x11; KEY_SIZE]),
        NonceBase::from_bytes([0x22; NONCE_SIZE]),
    );
    let config = DispersalConfig::new(n, k, 10).expect("config");
    DispersalEngine::new(config, sealer).expect("engine")
}

fn subset(sealed: &[SealedPartition], mask: u32) -> Vec<SealedPartition> {
    sealed
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, p)| p.clone())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_threshold_subset_round_trips(
        resource in proptest::collection::vec(any::<u8>(), 0..512),
        mask in 0u32..32,
    ) {
        let engine = engine(5, 3);
        let sealed = engine.disperse(&resource).expect("disperse");
        prop_assert_eq!(sealed.len(), 5);

        let picked = subset(&sealed, mask);
        let result = engine.reassemble::<Vec<u8>>(&picked);
        if mask.count_ones() >= 3 {
            prop_assert_eq!(result.expect("reassemble"), resource);
        } else {
            let is_insufficient = matches!(
                result,
                Err(TrackerError::Codec(CodecError::InsufficientFragments { need: 3, .. }))
            );
            prop_assert!(is_insufficient);
        }
    }

    #[test]
    fn shapes_honour_their_threshold(
        resource in "\\PC{0,64}",
        n in 1usize..=8,
        k_seed in 0usize..8,
    ) {
        let k = k_seed % n + 1;
        let engine = engine(n, k);
        let sealed = engine.disperse(&resource).expect("disperse");
        prop_assert_eq!(sealed.len(), n);

        let tail = &sealed[n - k..];
        prop_assert_eq!(engine.reassemble::<String>(tail).expect("reassemble"), resource.clone());
        if k > 1 {
            prop_assert!(engine.reassemble::<String>(&tail[1..]).is_err());
        }
    }

    #[test]
    fn codec_partitions_are_ceil_sized(
        stream in proptest::collection::vec(any::<u8>(), 1..300),
        k in 1usize..=6,
    ) {
        let ida = Ida::new(6, k).expect("ida");
        let partitions = ida.encode(&stream);
        for partition in &partitions {
            prop_assert_eq!(partition.data.len(), stream.len().div_ceil(k));
        }
        prop_assert_eq!(ida.decode(&partitions[6 - k..]).expect("decode"), stream);
    }

    #[test]
    fn flipped_ciphertext_bytes_never_decode(
        resource in proptest::collection::vec(any::<u8>(), 1..128),
        victim in 0usize..5,
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let engine = engine(5, 3);
        let sealer = PartitionSealer::new(
            SymmetricKey::from_bytes([0x11; KEY_SIZE]),
            NonceBase::from_bytes([0x22; NONCE_SIZE]),
        );
        let mut sealed = engine.disperse(&resource).expect("disperse");
        let pos = position.index(sealed[victim].ciphertext.len());
        sealed[victim].ciphertext[pos] ^= flip;

        prop_assert!(sealer.unseal(&sealed[victim]).is_err());
        let report = engine
            .reassemble_with_report::<Vec<u8>>(&sealed)
            .expect("four partitions survive");
        prop_assert_eq!(report.resource, resource);
        prop_assert_eq!(report.rejected.len(), 1);
        prop_assert_eq!(usize::from(report.rejected[0].index()), victim + 1);
    }

    #[test]
    fn ring_keys_are_stable_and_bounded(input in "\\PC*") {
        let key = derive_key(&input);
        prop_assert!(key < 256);
        prop_assert_eq!(key, derive_key(&input));
    }
}

#[test]
fn distinct_names_spread_over_the_ring() {
    let keys: std::collections::HashSet<_> = (0..64)
        .map(|i| derive_key(&format!("resource-{i}")))
        .collect();
    // 64 uniform draws from 256 buckets collide a little, never this much.
    assert!(keys.len() > 40, "only {} distinct keys", keys.len());
    assert_ne!(derive_key("alpha"), derive_key("bravo"));
}

#[test]
fn wire_frames_reassemble_after_transport() {
    let engine = engine(5, 3);
    let resource = vec!["alpha".to_string(), "bravo".to_string()];
    let frames: Vec<Vec<u8>> = engine
        .disperse(&resource)
        .expect("disperse")
        .iter()
        .map(SealedPartition::to_wire)
        .collect();

    let received: Vec<SealedPartition> = frames[1..4]
        .iter()
        .map(|frame| SealedPartition::from_wire(frame).expect("frame"))
        .collect();
    let back: Vec<String> = engine.reassemble(&received).expect("reassemble");
    assert_eq!(back, resource);
}
