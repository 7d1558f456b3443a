//! Property-based test generators using proptest.

use crate::fixtures::JournalMode;
use ringlog_core::JournalId;
use proptest::prelude::*;

/// Strategy for journal identities.
pub fn journal_id_strategy() -> impl Strategy<Value = JournalId> {
    prop::array::uniform16(any::<u8>()).prop_map(JournalId::from_bytes)
}

/// Strategy for I/O modes.
pub fn mode_strategy() -> impl Strategy<Value = JournalMode> {
    prop_oneof![
        Just(JournalMode::Buffered),
        Just(JournalMode::Direct),
        Just(JournalMode::DirectAsync),
    ]
}

/// Strategy for payloads up to `max_len` bytes.
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Strategy for a run of payload sizes, mostly small with the occasional
/// large one.
pub fn payload_sizes_strategy(count: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(
        prop_oneof![
            8 => 0usize..256,
            2 => 256usize..4096,
            1 => 4096usize..20_000,
        ],
        1..=count,
    )
}

/// Strategy for strictly increasing sequences starting above zero.
pub fn sequence_strategy(count: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..5, 1..=count).prop_map(|steps| {
        steps
            .into_iter()
            .scan(0u64, |last, step| {
                *last += step;
                Some(*last)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn sequences_increase(seqs in sequence_strategy(50)) {
            prop_assert!(seqs[0] >= 1);
            prop_assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn payloads_respect_bound(payload in payload_strategy(100)) {
            prop_assert!(payload.len() <= 100);
        }
    }
}
