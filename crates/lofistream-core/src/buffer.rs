//! Buffer manager: the single entry point for all store mutations.
//!
//! A [`BufferManager`] composes the store directory, the metadata ledger and
//! the cross-process lock. Every operation (status included) is one
//! `acquire lock → load ledger → mutate → save → release` cycle; nothing is
//! cached in memory between operations, because the producer and consumer
//! processes share only what is on disk. Lock holds stay short; the slow
//! generation call always happens outside.

use crate::chunk::{chunk_filename, Chunk};
use crate::config::StreamConfig;
use crate::health::BufferHealth;
use crate::ledger::{remove_chunk_file, Ledger, StoreWarning};
use crate::lock::StoreLock;
use crate::util::now_epoch_secs;
use crate::{BufferError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Snapshot of buffer state returned by [`BufferManager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct BufferStatus {
    /// Total chunks recorded in the ledger
    pub total: usize,
    /// Chunks not yet consumed whose files still exist
    pub unconsumed: usize,
    /// Unconsumed backlog expressed as hours of playback
    pub hours_remaining: f64,
    /// Health tier for the current backlog depth
    pub health: BufferHealth,
    /// Producer backpressure delay for that tier, in seconds
    pub backpressure_delay_secs: u64,
    /// Prompt index new content currently targets
    pub rotation_cursor: usize,
    /// Whether the store is at or above its hard cap
    pub buffer_full: bool,
}

/// Durable, bounded, strictly ordered chunk buffer shared by the producer
/// and consumer processes.
pub struct BufferManager {
    config: StreamConfig,
    dir: PathBuf,
    lock: StoreLock,
}

impl BufferManager {
    /// Open (creating if necessary) the buffer store described by `config`.
    ///
    /// An uncreatable or unwritable store directory is the one fatal
    /// startup condition; everything later is recoverable.
    pub fn open(config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.buffer_dir.clone();
        std::fs::create_dir_all(&dir)?;

        let lock = StoreLock::new(&dir);
        // Creating the lock file doubles as the writability probe.
        drop(lock.acquire()?);

        Ok(Self { config, dir, lock })
    }

    /// The configuration this manager was opened with.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Prompt text for a prompt index, if in range.
    pub fn prompt_text(&self, index: usize) -> Option<&str> {
        self.config.prompts.get(index).map(|s| s.as_str())
    }

    fn load_ledger(&self) -> Result<Ledger> {
        let (ledger, warnings) = Ledger::load(&self.dir, &self.config)?;
        log_warnings(&warnings);
        Ok(ledger)
    }

    /// Ingest a finished audio file as the next chunk.
    ///
    /// The file is moved into the store under a temporary name, fsynced,
    /// then atomically renamed to its canonical filename, so a crash
    /// mid-ingest never leaves a half-written chunk visible to
    /// reconciliation. The ledger entry is appended and persisted under the
    /// lock, and purge runs before the save.
    pub fn add(&self, finished_file: &Path, prompt_index: usize) -> Result<Chunk> {
        if prompt_index >= self.config.prompt_count() {
            return Err(BufferError::Config(format!(
                "prompt index {prompt_index} out of range (have {})",
                self.config.prompt_count()
            )));
        }
        if !finished_file.is_file() {
            return Err(BufferError::Ingest(format!(
                "source file missing: {}",
                finished_file.display()
            )));
        }

        let _guard = self.lock.acquire()?;
        let mut ledger = self.load_ledger()?;

        let id = ledger.next_id;
        let filename = chunk_filename(id, prompt_index, self.config.chunk_duration_secs);
        self.ingest_file(finished_file, id, &filename)?;

        let chunk = Chunk {
            id,
            filename,
            prompt_index,
            prompt: self.config.prompts[prompt_index].clone(),
            duration_secs: self.config.chunk_duration_secs,
            created_at: now_epoch_secs(),
            consumed: false,
        };
        ledger.chunks.push(chunk.clone());
        ledger.next_id += 1;

        let purged = self.purge(&mut ledger);
        ledger.save(&self.dir)?;

        info!(
            id,
            prompt_index,
            purged,
            total = ledger.chunks.len(),
            "chunk added to buffer"
        );
        Ok(chunk)
    }

    /// Move `source` into the store as `filename` via a temp name + rename.
    fn ingest_file(&self, source: &Path, id: u64, filename: &str) -> Result<()> {
        let staging = self.dir.join(format!(".chunk_{id:06}.tmp"));
        let target = self.dir.join(filename);

        // Same-filesystem sources rename directly; anything else is copied.
        if std::fs::rename(source, &staging).is_err() {
            std::fs::copy(source, &staging).map_err(|e| {
                BufferError::Ingest(format!("cannot stage {}: {e}", source.display()))
            })?;
            let _ = std::fs::remove_file(source);
        }

        let finalize = (|| -> std::io::Result<()> {
            let file = std::fs::File::open(&staging)?;
            file.sync_all()?;
            std::fs::rename(&staging, &target)
        })();

        if let Err(e) = finalize {
            let _ = std::fs::remove_file(&staging);
            return Err(BufferError::Ingest(format!(
                "cannot finalize {filename}: {e}"
            )));
        }
        Ok(())
    }

    /// Next chunk to stream: the minimum-id entry among those unconsumed
    /// and still present on disk. `None` means the backlog is empty, not
    /// an error.
    pub fn next_chunk(&self) -> Result<Option<Chunk>> {
        let _guard = self.lock.acquire()?;
        let ledger = self.load_ledger()?;
        Ok(ledger
            .chunks
            .iter()
            .filter(|c| !c.consumed && c.file_exists(&self.dir))
            .min_by_key(|c| c.id)
            .cloned())
    }

    /// Flip a chunk to consumed. One-way and idempotent; an absent id is a
    /// no-op (the chunk may have raced with purge). Purge runs afterwards
    /// either way.
    pub fn mark_consumed(&self, id: u64) -> Result<()> {
        let _guard = self.lock.acquire()?;
        let mut ledger = self.load_ledger()?;

        let mut dirty = false;
        match ledger.chunks.iter_mut().find(|c| c.id == id) {
            Some(chunk) => {
                if !chunk.consumed {
                    chunk.consumed = true;
                    dirty = true;
                }
            }
            None => debug!(id, "mark_consumed for unknown chunk (already purged?)"),
        }

        if self.purge(&mut ledger) > 0 {
            dirty = true;
        }
        if dirty {
            ledger.save(&self.dir)?;
        }
        Ok(())
    }

    /// Current buffer status: counts, backlog depth, health tier and the
    /// backpressure delay the producer should apply.
    pub fn status(&self) -> Result<BufferStatus> {
        let _guard = self.lock.acquire()?;
        let ledger = self.load_ledger()?;

        let total = ledger.chunks.len();
        let unconsumed = ledger
            .chunks
            .iter()
            .filter(|c| !c.consumed && c.file_exists(&self.dir))
            .count();
        let hours_remaining = unconsumed as f64 / self.config.chunks_per_hour();
        let health = self.config.health.classify(hours_remaining);

        Ok(BufferStatus {
            total,
            unconsumed,
            hours_remaining,
            health,
            backpressure_delay_secs: self.config.health.break_secs(health),
            rotation_cursor: ledger.rotation_cursor,
            buffer_full: total >= self.config.max_chunks,
        })
    }

    /// Prompt index the next chunk should be generated from.
    ///
    /// The rotation cursor advances to `(cursor + 1) % P` once the trailing
    /// run of chunks tagged with the current cursor reaches
    /// `chunks_per_prompt`. Rotation is driven by that persisted evidence,
    /// not a per-call counter, so repeated calls without new chunks return
    /// the same index and a restart resumes exactly where generation left
    /// off.
    pub fn next_prompt_index(&self) -> Result<usize> {
        let _guard = self.lock.acquire()?;
        let mut ledger = self.load_ledger()?;

        let cursor = ledger.rotation_cursor;
        let run = ledger
            .chunks
            .iter()
            .rev()
            .take_while(|c| c.prompt_index == cursor)
            .count();

        if run >= self.config.chunks_per_prompt {
            ledger.rotation_cursor = (cursor + 1) % self.config.prompt_count();
            ledger.save(&self.dir)?;
            debug!(
                from = cursor,
                to = ledger.rotation_cursor,
                "prompt rotation advanced"
            );
        }
        Ok(ledger.rotation_cursor)
    }

    /// Remove consumed chunks while the store exceeds its cap.
    ///
    /// Only consumed chunks are eligible, oldest `created_at` first, and at
    /// most `count - cap` are removed. With too few consumed chunks the
    /// store is allowed to exceed the cap temporarily; unconsumed content
    /// is never deleted here. Returns the number of chunks removed.
    fn purge(&self, ledger: &mut Ledger) -> usize {
        let cap = self.config.max_chunks;
        if ledger.chunks.len() <= cap {
            return 0;
        }
        let excess = ledger.chunks.len() - cap;

        let mut consumed: Vec<(f64, u64)> = ledger
            .chunks
            .iter()
            .filter(|c| c.consumed)
            .map(|c| (c.created_at, c.id))
            .collect();
        consumed.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let victims: Vec<u64> = consumed.iter().take(excess).map(|&(_, id)| id).collect();
        for id in &victims {
            if let Some(pos) = ledger.chunks.iter().position(|c| c.id == *id) {
                let chunk = ledger.chunks.remove(pos);
                remove_chunk_file(&self.dir, &chunk);
            }
        }

        if victims.len() < excess {
            warn!(
                total = ledger.chunks.len(),
                cap,
                "buffer exceeds cap but lacks consumed chunks to purge"
            );
        }
        victims.len()
    }
}

fn log_warnings(warnings: &[StoreWarning]) {
    for warning in warnings {
        warn!("{warning}");
    }
}
