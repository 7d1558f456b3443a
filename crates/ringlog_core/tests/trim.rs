//! Space reclamation, backpressure and batching tests.

use ringlog_core::{Completion, Dispatcher, GatherBuilder, JournalFailure, SequenceNumber};
use ringlog_testkit::prelude::*;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn small_capacity(mode: JournalMode) -> u64 {
    match mode {
        JournalMode::Buffered => 64 * 1024,
        _ => 16 * u64::from(TEST_BLOCK_SIZE),
    }
}

#[test]
fn completions_trim_a_full_ring() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::memory(mode, small_capacity(mode));
        let journal = Arc::new(harness.create_writeable());
        let (outcomes, results) = mpsc::channel();

        for seq in 1..=300u64 {
            let trimmer = Arc::clone(&journal);
            let outcomes = outcomes.clone();
            let completion = move |result: Result<(), JournalFailure>| {
                if result.is_ok() {
                    trimmer
                        .committed_thru(SequenceNumber::new(seq))
                        .expect("trim from completion");
                }
                outcomes.send((seq, result)).expect("test receiver alive");
            };
            journal
                .submit_entry(SequenceNumber::new(seq), payload(seq, 1000), 0, completion)
                .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 1..=300 {
            let (seq, result) = results.recv_timeout(COMPLETION_TIMEOUT).unwrap();
            assert!(result.is_ok(), "{mode:?} entry {seq}: {result:?}");
            seen.push(seq);
        }
        assert_eq!(seen, (1..=300).collect::<Vec<_>>(), "completions out of order");

        let stats = journal.stats();
        assert_eq!(stats.entries_durable, 300);
        assert_eq!(stats.records_reclaimed, 300);
        journal.close().unwrap();
    }
}

#[test]
fn trimming_thread_unblocks_submitter() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::memory(mode, small_capacity(mode));
        let journal = Arc::new(harness.create_writeable());
        const LAST: u64 = 200;

        let trimmer = {
            let journal = Arc::clone(&journal);
            thread::spawn(move || {
                let deadline = Instant::now() + COMPLETION_TIMEOUT;
                loop {
                    let durable = journal.last_durable();
                    if durable.as_u64() > 0 {
                        journal.committed_thru(durable).unwrap();
                    }
                    if durable.as_u64() == LAST {
                        return;
                    }
                    assert!(Instant::now() < deadline, "trimmer timed out");
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        for seq in 1..=LAST {
            journal
                .submit_entry(
                    SequenceNumber::new(seq),
                    payload(seq, 3000),
                    0,
                    Completion::noop(),
                )
                .unwrap();
        }
        trimmer.join().unwrap();

        assert_eq!(journal.committed_seq(), SequenceNumber::new(LAST));
        assert_eq!(journal.live_records(), 0);
        journal.close().unwrap();
    }
}

#[test]
fn repeated_watermark_is_a_no_op() {
    let harness = JournalHarness::memory(JournalMode::Buffered, 1 << 20);
    let journal = harness.create_writeable();
    wait_durable(submit_range(&journal, 1..=10, |seq| payload(seq, 50)));

    journal.committed_thru(SequenceNumber::new(5)).unwrap();
    let reclaimed = journal.stats().records_reclaimed;
    let free = journal.free_bytes();

    journal.committed_thru(SequenceNumber::new(5)).unwrap();
    journal.committed_thru(SequenceNumber::new(3)).unwrap();
    assert_eq!(journal.stats().records_reclaimed, reclaimed);
    assert_eq!(journal.free_bytes(), free);
    assert_eq!(journal.committed_seq(), SequenceNumber::new(5));

    // Moving the watermark on releases only the records at or below it.
    journal.committed_thru(SequenceNumber::new(7)).unwrap();
    assert_eq!(journal.live_records(), 3);
    journal.close().unwrap();
}

#[test]
fn trimmed_entries_are_not_replayed() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::file(mode, 1 << 20);
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=10, |seq| payload(seq, 300)));
        journal.committed_thru(SequenceNumber::new(6)).unwrap();
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        assert_eq!(journal.committed_seq(), SequenceNumber::new(6));
        assert_eq!(sequences(&replay_all(&journal)), vec![7, 8, 9, 10]);
    }
}

#[test]
fn full_trim_restarts_the_ring() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::memory(mode, small_capacity(mode));
        let journal = harness.create_writeable();
        let usable = journal.free_bytes();

        wait_durable(submit_range(&journal, 1..=8, |seq| payload(seq, 2000)));
        journal.committed_thru(SequenceNumber::new(8)).unwrap();
        assert_eq!(journal.free_bytes(), usable);

        // Bigger than the space left behind the write offset, so the ring
        // has to restart at the front.
        let big = usize::try_from(usable).unwrap() - 2 * TEST_BLOCK_SIZE as usize;
        wait_durable(submit_range(&journal, 9..=9, |seq| payload(seq, big)));
        wait_durable(submit_range(&journal, 10..=10, |seq| payload(seq, 10)));
        journal.close().unwrap();
        drop(journal);

        let journal = harness.open(0);
        let entries = replay_all(&journal);
        assert_eq!(sequences(&entries), vec![9, 10], "{mode:?}");
        assert_eq!(entries[0].payload.len(), big);
    }
}

#[test]
fn gathered_completion_covers_many_entries() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::memory(mode, 4 << 20);
        let dispatcher = Dispatcher::start("gather-finisher").unwrap();
        let journal = harness.create_writeable();

        let (done, outcome) = Completion::channel();
        let gather = GatherBuilder::new(&dispatcher, done);
        for seq in 1..=100u64 {
            journal
                .submit_entry(SequenceNumber::new(seq), payload(seq, 500), 0, gather.new_sub())
                .unwrap();
        }
        gather.activate();

        outcome.recv_timeout(COMPLETION_TIMEOUT).unwrap().unwrap();
        assert_eq!(journal.last_durable(), SequenceNumber::new(100));
        journal.close().unwrap();
    }
}

#[test]
fn large_entries_round_trip() {
    for mode in JournalMode::ALL {
        let harness = JournalHarness::file(mode, 8 << 20);
        let journal = harness.create_writeable();
        wait_durable(submit_range(&journal, 1..=10, |seq| {
            payload(seq, 200 * 1024 + seq as usize)
        }));
        drop(journal);

        let journal = harness.open(0);
        let entries = replay_all(&journal);
        assert_eq!(entries.len(), 10);
        for entry in entries {
            let seq = entry.sequence.as_u64();
            assert_eq!(entry.payload.as_ref(), payload(seq, 200 * 1024 + seq as usize).as_slice());
        }
    }
}

#[test]
fn batches_respect_entry_limit() {
    let harness = JournalHarness::memory(JournalMode::Buffered, 1 << 20);
    let harness = {
        let config = harness.config.max_batch_entries(4);
        harness.with_config(config)
    };
    let journal = harness.create_writeable();
    wait_durable(submit_range(&journal, 1..=40, |seq| payload(seq, 20)));
    journal.close().unwrap();

    let stats = journal.stats();
    assert!(stats.batches_written >= 10);
    assert_eq!(stats.entries_durable, 40);
}
