//! Lifecycle tests for the buffer store: cap-driven purge, reconciliation
//! from bare chunk files, and strict FIFO consumption.

use lofistream::{BufferManager, Ledger, StreamConfig};
use std::fs;
use std::path::{Path, PathBuf};

fn store_config(dir: &Path, max_chunks: usize, chunks_per_prompt: usize) -> StreamConfig {
    StreamConfig {
        buffer_dir: dir.join("store"),
        max_chunks,
        chunks_per_prompt,
        prompts: vec!["calm morning".to_string(), "rainy evening".to_string()],
        ..StreamConfig::default()
    }
}

fn finished_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"RIFF....WAVEdata").unwrap();
    path
}

#[test]
fn purge_removes_oldest_consumed_down_to_cap() {
    // cap 5, two prompts, two chunks per prompt. Fill with the pattern
    // P0,P0,P1,P1,P0, consume the first two, then push the store over cap.
    let dir = tempfile::tempdir().unwrap();
    let manager = BufferManager::open(store_config(dir.path(), 5, 2)).unwrap();

    for (i, prompt) in [0usize, 0, 1, 1, 0].iter().enumerate() {
        let src = finished_file(dir.path(), &format!("{i}.wav"));
        manager.add(&src, *prompt).unwrap();
    }
    manager.mark_consumed(1).unwrap();
    manager.mark_consumed(2).unwrap();

    // Still exactly at cap: nothing was purged yet.
    assert_eq!(manager.status().unwrap().total, 5);

    // The 6th chunk pushes the count to 6; purge removes count - cap = 1
    // chunk, and it must be the oldest consumed one.
    let src = finished_file(dir.path(), "5.wav");
    manager.add(&src, 0).unwrap();

    let status = manager.status().unwrap();
    assert_eq!(status.total, 5);
    // Id 1 is gone, id 2 is still present (consumed), FIFO head is 3.
    assert_eq!(manager.next_chunk().unwrap().unwrap().id, 3);

    // A 7th chunk evicts the remaining consumed chunk the same way.
    let src = finished_file(dir.path(), "6.wav");
    manager.add(&src, 0).unwrap();
    let status = manager.status().unwrap();
    assert_eq!(status.total, 5);
    assert_eq!(status.unconsumed, 5, "only consumed chunks were purged");
    assert_eq!(manager.next_chunk().unwrap().unwrap().id, 3);
}

#[test]
fn purge_backs_off_without_consumed_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let manager = BufferManager::open(store_config(dir.path(), 3, 2)).unwrap();

    for i in 0..6 {
        let src = finished_file(dir.path(), &format!("{i}.wav"));
        manager.add(&src, 0).unwrap();
    }

    // Nothing is consumed, so the cap is allowed to be exceeded.
    let status = manager.status().unwrap();
    assert_eq!(status.total, 6);
    assert_eq!(status.unconsumed, 6);
    assert!(status.buffer_full);
}

#[test]
fn deleted_ledger_is_rebuilt_from_chunk_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = store_config(dir.path(), 10, 2);
    let manager = BufferManager::open(config.clone()).unwrap();

    for (i, prompt) in [0usize, 0, 1].iter().enumerate() {
        let src = finished_file(dir.path(), &format!("{i}.wav"));
        manager.add(&src, *prompt).unwrap();
    }
    manager.mark_consumed(1).unwrap();

    fs::remove_file(Ledger::path(&config.buffer_dir)).unwrap();

    // A fresh manager reconciles from filenames alone. Consumption history
    // is not recoverable, so id 1 is back in line.
    let reopened = BufferManager::open(config).unwrap();
    let status = reopened.status().unwrap();
    assert_eq!(status.total, 3);
    assert_eq!(status.unconsumed, 3);
    assert_eq!(reopened.next_chunk().unwrap().unwrap().id, 1);

    // And id assignment continues above the recovered maximum.
    let src = finished_file(dir.path(), "next.wav");
    assert_eq!(reopened.add(&src, 1).unwrap().id, 4);
}

#[test]
fn consumption_is_strict_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let manager = BufferManager::open(store_config(dir.path(), 10, 2)).unwrap();

    assert!(manager.next_chunk().unwrap().is_none());

    for i in 0..3 {
        let src = finished_file(dir.path(), &format!("{i}.wav"));
        manager.add(&src, 0).unwrap();
    }

    let mut streamed = Vec::new();
    while let Some(chunk) = manager.next_chunk().unwrap() {
        streamed.push(chunk.id);
        manager.mark_consumed(chunk.id).unwrap();
    }
    assert_eq!(streamed, vec![1, 2, 3]);
    assert!(manager.next_chunk().unwrap().is_none());
}

#[test]
fn two_handles_share_one_store() {
    // The producer and consumer each open their own manager over the same
    // directory; everything they see flows through the persisted ledger.
    let dir = tempfile::tempdir().unwrap();
    let config = store_config(dir.path(), 10, 2);
    let producer_side = BufferManager::open(config.clone()).unwrap();
    let consumer_side = BufferManager::open(config).unwrap();

    let src = finished_file(dir.path(), "a.wav");
    let added = producer_side.add(&src, 0).unwrap();

    let seen = consumer_side.next_chunk().unwrap().unwrap();
    assert_eq!(seen.id, added.id);
    consumer_side.mark_consumed(seen.id).unwrap();

    assert!(producer_side.next_chunk().unwrap().is_none());
    assert_eq!(producer_side.status().unwrap().unconsumed, 0);
}
