//! Crash recovery and replay tests across every I/O mode and store.

use proptest::prelude::*;
use ringlog_core::{JournalError, OpenError, Phase, ReplayStop, SequenceNumber};
use ringlog_testkit::prelude::*;

const CAPACITY: u64 = 1 << 20;

fn harnesses(capacity: u64) -> Vec<JournalHarness> {
    JournalMode::ALL
        .into_iter()
        .flat_map(|mode| {
            [
                JournalHarness::memory(mode, capacity),
                JournalHarness::file(mode, capacity),
            ]
        })
        .collect()
}

fn needle(sequence: u64) -> Vec<u8> {
    format!("needle-{sequence}:payload").into_bytes()
}

#[test]
fn replays_in_order_in_every_mode() {
    for harness in harnesses(CAPACITY) {
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=20, |seq| {
            payload(seq, 100 + seq as usize * 37)
        }));
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        let entries = replay_all(&journal);
        assert_eq!(sequences(&entries), (1..=20).collect::<Vec<_>>(), "{:?}", harness.mode);
        for entry in &entries {
            let seq = entry.sequence.as_u64();
            assert_eq!(entry.payload.as_ref(), payload(seq, 100 + seq as usize * 37).as_slice());
        }
        assert!(journal.replay_stop().unwrap().is_clean());
        assert_eq!(journal.stats().entries_replayed, 20);
    }
}

#[test]
fn replay_skips_entries_through_hint() {
    for harness in harnesses(CAPACITY) {
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=3, |seq| payload(seq, 16)));
        drop(journal);

        let journal = harness.open(1);
        assert_eq!(sequences(&replay_all(&journal)), vec![2, 3]);
    }
}

#[test]
fn corrupt_record_ends_replay() {
    for harness in harnesses(CAPACITY) {
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=4, needle));
        drop(journal);

        assert_eq!(replace_needle(&harness, b"needle-3", b"NEEDLE-3"), 1);
        assert_eq!(replace_needle(&harness, b"needle-4", b"NEEDLE-4"), 1);

        let journal = harness.open(0);
        assert_eq!(sequences(&replay_all(&journal)), vec![1, 2]);
        assert!(matches!(
            journal.replay_stop(),
            Some(ReplayStop::Corrupt { .. })
        ));
        assert!(journal.read_entry().unwrap().is_none());
    }
}

#[test]
fn rewritten_sequence_hides_older_records() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::memory(mode, CAPACITY);
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=4, needle));
        drop(journal);

        // Only record 3 is damaged; record 4 is intact but must never
        // resurface once 3 has been rewritten.
        assert_eq!(replace_needle(&harness, b"needle-3", b"NEEDLE-3"), 1);

        let journal = harness.open(0);
        assert_eq!(sequences(&replay_all(&journal)), vec![1, 2]);
        journal.make_writeable().unwrap();
        assert_eq!(journal.last_submitted(), SequenceNumber::new(2));
        wait_durable(submit_range(&journal, 3..=3, |_| b"needle-3:rewrite".to_vec()));
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        let entries = replay_all(&journal);
        assert_eq!(sequences(&entries), vec![1, 2, 3]);
        assert_eq!(entries[2].payload.as_ref(), b"needle-3:rewrite");
        assert!(matches!(
            journal.replay_stop(),
            Some(ReplayStop::OlderEpoch { epoch: 1, .. })
        ));
    }
}

#[test]
fn torn_tail_is_dropped() {
    let harness = JournalHarness::memory(JournalMode::Buffered, CAPACITY);
    let journal = harness.create_writeable();
    wait_durable(submit_range(&journal, 1..=5, |seq| payload(seq, 100)));
    drop(journal);

    // 100 byte payloads frame to 152 bytes; tear the footer of the fifth.
    let fifth = u64::from(TEST_BLOCK_SIZE) + 4 * 152;
    zero_range(&harness, fifth + 136, 16);

    let journal = harness.open(0);
    assert_eq!(sequences(&replay_all(&journal)), vec![1, 2, 3, 4]);
    assert!(!journal.replay_stop().unwrap().is_clean());
}

#[test]
fn reopen_and_append() {
    for harness in harnesses(CAPACITY) {
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=5, |seq| payload(seq, 64)));
        drop(journal);

        let journal = harness.open(0);
        assert_eq!(replay_all(&journal).len(), 5);
        journal.make_writeable().unwrap();
        wait_durable(submit_range(&journal, 6..=10, |seq| payload(seq, 64)));
        drop(journal);

        let journal = harness.open(0);
        assert_eq!(sequences(&replay_all(&journal)), (1..=10).collect::<Vec<_>>());
        assert_eq!(journal.header().unwrap().epoch, 2);
    }
}

#[test]
fn make_writeable_mid_replay_keeps_unread_entries() {
    let harness = JournalHarness::memory(JournalMode::Buffered, CAPACITY);
    let journal = harness.create_writeable();
    wait_durable(submit_range(&journal, 1..=6, |seq| payload(seq, 32)));
    drop(journal);

    let journal = harness.open(0);
    assert!(journal.read_entry().unwrap().is_some());
    journal.make_writeable().unwrap();
    assert_eq!(journal.live_records(), 6);
    assert_eq!(journal.last_submitted(), SequenceNumber::new(6));
    wait_durable(submit_range(&journal, 7..=7, |seq| payload(seq, 32)));
    drop(journal);

    let journal = harness.open(0);
    assert_eq!(sequences(&replay_all(&journal)), (1..=7).collect::<Vec<_>>());
}

#[test]
fn replay_after_wraparound() {
    for mode in JournalMode::ALL {
        let capacity = match mode {
            JournalMode::Buffered => 64 * 1024,
            _ => 16 * u64::from(TEST_BLOCK_SIZE),
        };
        let harness = JournalHarness::memory(mode, capacity);
        let journal = harness.create_writeable();

        for seq in 1..=120u64 {
            wait_durable(submit_range(&journal, seq..=seq, |s| payload(s, 1000)));
            if seq > 6 {
                journal.committed_thru(SequenceNumber::new(seq - 6)).unwrap();
            }
        }
        assert!(journal.stats().records_reclaimed >= 100);
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        assert_eq!(journal.committed_seq(), SequenceNumber::new(114));
        let entries = replay_all(&journal);
        assert_eq!(sequences(&entries), (115..=120).collect::<Vec<_>>(), "{mode:?}");
        assert_eq!(entries[0].payload.as_ref(), payload(115, 1000).as_slice());
    }
}

/// Submits one entry per size, waiting for each and trimming everything but
/// the newest `keep`. Returns the last sequence written.
fn churn(journal: &ringlog_core::Journal, sizes: impl Iterator<Item = usize>, keep: u64) -> u64 {
    let mut last = 0;
    for (seq, len) in (1u64..).zip(sizes) {
        wait_durable(submit_range(journal, seq..=seq, |s| payload(s, len)));
        if seq > keep {
            journal.committed_thru(SequenceNumber::new(seq - keep)).unwrap();
        }
        last = seq;
    }
    last
}

#[test]
fn wraparound_with_mixed_sizes_ends_cleanly() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::memory(mode, 64 * 1024);
        let journal = harness.create_writeable();
        let size = |seq: u64| 300 + (seq * 7919 % 1700) as usize;
        let last = churn(&journal, (1..=200).map(size), 4);
        assert_eq!(last, 200);
        assert!(journal.stats().records_reclaimed >= 100);
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        let entries = replay_all(&journal);
        assert_eq!(sequences(&entries), vec![197, 198, 199, 200], "{mode:?}");
        for entry in &entries {
            let seq = entry.sequence.as_u64();
            assert_eq!(entry.payload.as_ref(), payload(seq, size(seq)).as_slice());
        }
        let stop = journal.replay_stop().unwrap();
        assert!(stop.is_clean(), "{mode:?}: {stop}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn replay_returns_untrimmed_suffix(
        mode in mode_strategy(),
        sizes in payload_sizes_strategy(40),
    ) {
        const RING: u64 = 128 * 1024;
        const KEEP: u64 = 2;

        // Cycle the sizes until the ring has been lapped twice.
        let config = mode.config(RING);
        let alignment = config.frame_alignment() as usize;
        let mut written = 0u64;
        let run: Vec<usize> = sizes
            .iter()
            .copied()
            .cycle()
            .take_while(|&len| {
                let more = written < 2 * RING;
                written += ringlog_core::frame::frame_len(len, alignment) as u64;
                more
            })
            .collect();

        let harness = JournalHarness::memory(mode, RING);
        let journal = harness.create_writeable();
        let last = churn(&journal, run.iter().copied(), KEEP);
        prop_assert!(last > KEEP);
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        let entries = replay_all(&journal);
        let expected: Vec<u64> = (last - KEEP + 1..=last).collect();
        prop_assert_eq!(sequences(&entries), expected);
        for entry in &entries {
            let seq = entry.sequence.as_u64();
            let len = run[(seq - 1) as usize];
            let expected_payload = payload(seq, len);
            prop_assert_eq!(entry.payload.as_ref(), expected_payload.as_slice());
        }
        let stop = journal.replay_stop().unwrap();
        prop_assert!(stop.is_clean(), "{:?}: {}", mode, stop);
    }

    #[test]
    fn arbitrary_entries_round_trip(
        id in journal_id_strategy(),
        mode in mode_strategy(),
        seqs in sequence_strategy(30),
        payloads in prop::collection::vec(payload_strategy(2000), 30),
    ) {
        let mut harness = JournalHarness::memory(mode, CAPACITY);
        harness.id = id;
        let journal = harness.create_writeable();
        let receivers: Vec<Durability> = seqs
            .iter()
            .zip(&payloads)
            .map(|(&seq, bytes)| {
                let (completion, durable) = ringlog_core::Completion::channel();
                journal
                    .submit_entry(SequenceNumber::new(seq), bytes.clone(), 7, completion)
                    .unwrap();
                durable
            })
            .collect();
        wait_durable(receivers);
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        let entries = replay_all(&journal);
        prop_assert_eq!(sequences(&entries), seqs.clone());
        for (entry, bytes) in entries.iter().zip(&payloads) {
            prop_assert_eq!(entry.payload.as_ref(), bytes.as_slice());
            prop_assert_eq!(entry.flags, 7);
        }
        prop_assert!(journal.replay_stop().unwrap().is_clean());
    }
}

#[test]
fn open_rejects_another_journal() {
    let harness = JournalHarness::memory(JournalMode::Buffered, CAPACITY);
    drop(harness.create_writeable());

    let other = JournalHarness::memory(JournalMode::Buffered, CAPACITY);
    assert_ne!(other.id, harness.id);
    let journal = other.journal_over(harness.backend());
    assert!(matches!(
        journal.open(SequenceNumber::ZERO),
        Err(JournalError::Open(OpenError::IdMismatch { .. }))
    ));
    assert_eq!(journal.phase(), Phase::Unopened);
}

#[test]
fn open_rejects_damaged_header() {
    let harness = JournalHarness::memory(JournalMode::Buffered, CAPACITY);
    drop(harness.create_writeable());
    flip_byte(&harness, 40);

    let journal = harness.journal();
    assert!(matches!(
        journal.open(SequenceNumber::ZERO),
        Err(JournalError::Open(OpenError::BadChecksum { .. }))
    ));
}

#[test]
fn open_rejects_blank_store() {
    let harness = JournalHarness::memory(JournalMode::Buffered, CAPACITY);
    let journal = harness.journal();
    assert!(matches!(
        journal.open(SequenceNumber::ZERO),
        Err(JournalError::Open(OpenError::BadMagic))
    ));
}

#[test]
fn create_discards_previous_contents() {
    for harness in harnesses(CAPACITY) {
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=5, |seq| payload(seq, 200)));
        drop(journal);

        drop(harness.create_writeable());

        let journal = harness.open(0);
        assert!(replay_all(&journal).is_empty());
        assert!(matches!(
            journal.replay_stop(),
            Some(ReplayStop::Unwritten { .. })
        ));
    }
}

#[test]
fn closed_journal_can_be_reopened_in_place() {
    let harness = JournalHarness::memory(JournalMode::Direct, CAPACITY);
    let journal = harness.create_writeable();
    wait_durable(submit_range(&journal, 1..=3, |seq| payload(seq, 10)));
    journal.close().unwrap();

    journal.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(sequences(&replay_all(&journal)), vec![1, 2, 3]);
    journal.close().unwrap();
    assert_eq!(journal.phase(), Phase::Closed);
}
