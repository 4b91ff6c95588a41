//! Durable metadata ledger for the chunk store.
//!
//! The ledger records every known chunk plus the two cursors that must
//! survive restarts: the next id to assign and the prompt rotation cursor.
//! It is persisted as human-inspectable JSON next to the chunk files and is
//! always replaced atomically (temp file + fsync + rename), so a crash can
//! never expose a half-written ledger.
//!
//! The ledger is a cache of facts about files. When it is missing or
//! damaged, [`Ledger::reconcile`] rebuilds it from the directory listing:
//! chunk filenames alone carry `(id, prompt_index, duration)`. Consumption
//! history is not recoverable from disk, so rebuilt entries always restart
//! unconsumed.

use crate::chunk::{is_chunk_filename, parse_chunk_filename, Chunk};
use crate::config::StreamConfig;
use crate::util::mtime_epoch_secs;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the ledger file inside the store directory.
pub const LEDGER_FILENAME: &str = "buffer_metadata.json";

/// Non-fatal observation surfaced from a load or reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWarning {
    /// A chunk filename's embedded prompt index disagrees with the index
    /// derived from its position in the id-ordered listing. The filename
    /// wins; the derived value is reported for the operator.
    PromptMismatch {
        /// Offending chunk filename
        filename: String,
        /// Prompt index parsed from the filename (kept)
        actual: usize,
        /// Prompt index derived from listing position (discarded)
        expected: usize,
    },
    /// A `chunk_*.wav` file whose name does not parse; the file is left in
    /// place and skipped.
    UnparsableFilename {
        /// Offending filename
        filename: String,
    },
}

impl fmt::Display for StoreWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreWarning::PromptMismatch {
                filename,
                actual,
                expected,
            } => write!(
                f,
                "{filename}: prompt index {actual} disagrees with position-derived {expected} (keeping {actual})"
            ),
            StoreWarning::UnparsableFilename { filename } => {
                write!(f, "{filename}: unparsable chunk filename, skipping")
            }
        }
    }
}

/// Durable record of all known chunks plus the id and rotation cursors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ledger {
    /// Known chunks, id-ordered by construction
    pub chunks: Vec<Chunk>,
    /// Next id to assign; always exceeds every id ever assigned
    pub next_id: u64,
    /// Index into the fixed prompt list new content currently targets
    pub rotation_cursor: usize,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            next_id: 1,
            rotation_cursor: 0,
        }
    }
}

impl Ledger {
    /// Path of the ledger file inside `dir`.
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(LEDGER_FILENAME)
    }

    /// Highest id currently recorded, if any.
    pub fn max_id(&self) -> Option<u64> {
        self.chunks.iter().map(|c| c.id).max()
    }

    /// Load the ledger for the store at `dir`.
    ///
    /// A missing or malformed ledger file falls back to [`Ledger::reconcile`].
    /// Either way the result is normalized: `next_id` is forced above the
    /// highest recorded id, the rotation cursor is wrapped into the prompt
    /// list, and the one-time load trim enforces the hard cap (evicting
    /// strictly oldest entries, consumed or not; the only place unconsumed
    /// content may ever be deleted).
    pub fn load(dir: &Path, config: &StreamConfig) -> Result<(Self, Vec<StoreWarning>)> {
        let path = Self::path(dir);
        let (mut ledger, warnings) = if path.is_file() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| serde_json::from_str::<Ledger>(&data).map_err(|e| e.to_string()))
            {
                Ok(ledger) => (ledger, Vec::new()),
                Err(e) => {
                    warn!(error = %e, "ledger unreadable, reconciling from chunk files");
                    Self::reconcile(dir, config)?
                }
            }
        } else {
            Self::reconcile(dir, config)?
        };

        let mut dirty = false;

        // next_id must exceed every id ever assigned, even across reloads.
        let floor = ledger.max_id().map(|id| id + 1).unwrap_or(1);
        if ledger.next_id < floor {
            ledger.next_id = floor;
            dirty = true;
        }

        let prompt_count = config.prompt_count();
        if ledger.rotation_cursor >= prompt_count {
            ledger.rotation_cursor %= prompt_count;
            dirty = true;
        }

        dirty |= ledger.trim_to_cap(dir, config.max_chunks);

        if dirty {
            // Best effort: a failed save leaves the previous ledger intact
            // and the same normalization reapplies on the next load.
            if let Err(e) = ledger.save(dir) {
                warn!(error = %e, "failed to persist normalized ledger");
            }
        }

        Ok((ledger, warnings))
    }

    /// Rebuild the ledger from the chunk files present in `dir`.
    ///
    /// Filenames are the ground truth: each parsed `(id, prompt_index,
    /// duration)` is taken as-is. A prompt index disagreeing with the value
    /// derived from listing position is reported as a warning but never
    /// overwritten. Unparsable `chunk_*.wav` names are skipped with a
    /// warning and do not abort the scan.
    pub fn reconcile(dir: &Path, config: &StreamConfig) -> Result<(Self, Vec<StoreWarning>)> {
        let mut names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_chunk_filename(name) {
                    names.push(name.to_string());
                }
            }
        }
        // Zero-padded ids make the lexicographic sort an id sort.
        names.sort();

        let mut warnings = Vec::new();
        let mut chunks = Vec::new();
        let prompt_count = config.prompt_count();

        for name in &names {
            let (id, prompt_index, duration_secs) = match parse_chunk_filename(name) {
                Ok(parts) => parts,
                Err(_) => {
                    warnings.push(StoreWarning::UnparsableFilename {
                        filename: name.clone(),
                    });
                    continue;
                }
            };

            // Validation only: derive the prompt index this position would
            // have under perfect rotation and compare. The filename's value
            // is kept either way.
            let position = chunks.len();
            let expected = (position / config.chunks_per_prompt) % prompt_count;
            if expected != prompt_index {
                warnings.push(StoreWarning::PromptMismatch {
                    filename: name.clone(),
                    actual: prompt_index,
                    expected,
                });
            }

            let path = dir.join(name);
            chunks.push(Chunk {
                id,
                filename: name.clone(),
                prompt_index,
                prompt: config
                    .prompts
                    .get(prompt_index)
                    .cloned()
                    .unwrap_or_default(),
                duration_secs,
                created_at: mtime_epoch_secs(&path),
                consumed: false,
            });
        }

        let next_id = chunks.iter().map(|c| c.id).max().map(|id| id + 1).unwrap_or(1);
        let ledger = Ledger {
            chunks,
            next_id,
            rotation_cursor: 0,
        };

        debug!(
            chunks = ledger.chunks.len(),
            next_id = ledger.next_id,
            warnings = warnings.len(),
            "ledger reconciled from chunk files"
        );

        if let Err(e) = ledger.save(dir) {
            warn!(error = %e, "failed to persist reconciled ledger");
        }

        Ok((ledger, warnings))
    }

    /// Atomically replace the persisted ledger.
    ///
    /// Writes to a temp file in the store directory, fsyncs, then renames
    /// over the ledger path. On failure the previous on-disk ledger stays
    /// intact.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(Self::path(dir)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Evict strictly oldest entries until the chunk count is within `cap`.
    ///
    /// This is the load-time trim: unlike steady-state purge it may delete
    /// unconsumed content, which is the documented asymmetry of the eviction
    /// policy. Returns whether anything was evicted.
    fn trim_to_cap(&mut self, dir: &Path, cap: usize) -> bool {
        if self.chunks.len() <= cap {
            return false;
        }
        let excess = self.chunks.len() - cap;

        let mut order: Vec<usize> = (0..self.chunks.len()).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb) = (&self.chunks[a], &self.chunks[b]);
            ca.created_at
                .partial_cmp(&cb.created_at)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ca.id.cmp(&cb.id))
        });

        let evict: Vec<u64> = order[..excess].iter().map(|&i| self.chunks[i].id).collect();
        for id in &evict {
            if let Some(pos) = self.chunks.iter().position(|c| c.id == *id) {
                let chunk = self.chunks.remove(pos);
                remove_chunk_file(dir, &chunk);
            }
        }
        warn!(
            evicted = excess,
            cap, "load-time trim forced the hard cap (oldest entries evicted)"
        );
        true
    }
}

/// Idempotent chunk file removal; a file already gone is not an error.
pub(crate) fn remove_chunk_file(dir: &Path, chunk: &Chunk) {
    match std::fs::remove_file(chunk.path(dir)) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %chunk.filename, error = %e, "failed to delete chunk file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_filename;

    fn test_config(dir: &Path) -> StreamConfig {
        StreamConfig {
            buffer_dir: dir.to_path_buf(),
            chunk_duration_secs: 60,
            chunks_per_prompt: 2,
            prompts: vec!["prompt zero".to_string(), "prompt one".to_string()],
            max_chunks: 100,
            ..StreamConfig::default()
        }
    }

    fn write_chunk_file(dir: &Path, id: u64, prompt_index: usize) -> String {
        let name = chunk_filename(id, prompt_index, 60);
        std::fs::write(dir.join(&name), b"RIFF").unwrap();
        name
    }

    fn make_chunk(id: u64, prompt_index: usize, created_at: f64, consumed: bool) -> Chunk {
        Chunk {
            id,
            filename: chunk_filename(id, prompt_index, 60),
            prompt_index,
            prompt: String::new(),
            duration_secs: 60,
            created_at,
            consumed,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let ledger = Ledger {
            chunks: vec![make_chunk(1, 0, 10.0, true), make_chunk(2, 0, 11.0, false)],
            next_id: 3,
            rotation_cursor: 1,
        };
        ledger.save(dir.path()).unwrap();

        let (loaded, warnings) = Ledger::load(dir.path(), &config).unwrap();
        assert_eq!(loaded, ledger);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_load_of_empty_store_yields_fresh_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let (ledger, warnings) = Ledger::load(dir.path(), &config).unwrap();
        assert!(ledger.chunks.is_empty());
        assert_eq!(ledger.next_id, 1);
        assert_eq!(ledger.rotation_cursor, 0);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_malformed_ledger_falls_back_to_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_chunk_file(dir.path(), 1, 0);
        write_chunk_file(dir.path(), 2, 0);
        std::fs::write(Ledger::path(dir.path()), "{ truncated").unwrap();

        let (ledger, _) = Ledger::load(dir.path(), &config).unwrap();
        assert_eq!(ledger.chunks.len(), 2);
        assert_eq!(ledger.next_id, 3);
        assert!(ledger.chunks.iter().all(|c| !c.consumed));
    }

    #[test]
    fn test_reconcile_restores_deleted_ledger() {
        // Scenario: ledger file deleted, three well-formed chunk files with
        // prompts matching their positions remain.
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // chunks_per_prompt=2, two prompts: positions 0,1 -> prompt 0,
        // position 2 -> prompt 1.
        write_chunk_file(dir.path(), 1, 0);
        write_chunk_file(dir.path(), 2, 0);
        write_chunk_file(dir.path(), 3, 1);

        let (ledger, warnings) = Ledger::reconcile(dir.path(), &config).unwrap();
        assert_eq!(ledger.next_id, 4);
        assert_eq!(ledger.chunks.len(), 3);
        assert!(ledger.chunks.iter().all(|c| !c.consumed));
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert!(
            Ledger::path(dir.path()).is_file(),
            "reconcile should persist the rebuilt ledger"
        );
    }

    #[test]
    fn test_reconcile_keeps_filename_prompt_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_chunk_file(dir.path(), 1, 0);
        // Position 1 should also be prompt 0; the filename claims prompt 1.
        write_chunk_file(dir.path(), 2, 1);
        write_chunk_file(dir.path(), 3, 1);

        let (ledger, warnings) = Ledger::reconcile(dir.path(), &config).unwrap();
        assert_eq!(warnings.len(), 1, "exactly one mismatch expected: {warnings:?}");
        match &warnings[0] {
            StoreWarning::PromptMismatch {
                filename,
                actual,
                expected,
            } => {
                assert_eq!(filename, &chunk_filename(2, 1, 60));
                assert_eq!((*actual, *expected), (1, 0));
            }
            other => panic!("unexpected warning: {other:?}"),
        }
        // The filename's value is the one recorded.
        assert_eq!(ledger.chunks[1].prompt_index, 1);
    }

    #[test]
    fn test_reconcile_skips_unparsable_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_chunk_file(dir.path(), 1, 0);
        std::fs::write(dir.path().join("chunk_garbage.wav"), b"x").unwrap();
        // Non-chunk files are ignored without a warning.
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let (ledger, warnings) = Ledger::reconcile(dir.path(), &config).unwrap();
        assert_eq!(ledger.chunks.len(), 1);
        assert_eq!(
            warnings,
            vec![StoreWarning::UnparsableFilename {
                filename: "chunk_garbage.wav".to_string()
            }]
        );
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_chunk_file(dir.path(), 5, 0);
        write_chunk_file(dir.path(), 9, 1);

        let (first, _) = Ledger::reconcile(dir.path(), &config).unwrap();
        let (second, _) = Ledger::reconcile(dir.path(), &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_forces_next_id_above_max() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ledger = Ledger {
            chunks: vec![make_chunk(7, 0, 1.0, false)],
            next_id: 3, // stale cursor from a damaged save
            rotation_cursor: 0,
        };
        ledger.save(dir.path()).unwrap();

        let (loaded, _) = Ledger::load(dir.path(), &config).unwrap();
        assert_eq!(loaded.next_id, 8);
    }

    #[test]
    fn test_load_wraps_out_of_range_rotation_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path()); // two prompts
        let ledger = Ledger {
            chunks: Vec::new(),
            next_id: 1,
            rotation_cursor: 5,
        };
        ledger.save(dir.path()).unwrap();

        let (loaded, _) = Ledger::load(dir.path(), &config).unwrap();
        assert_eq!(loaded.rotation_cursor, 1);
    }

    #[test]
    fn test_load_trim_evicts_oldest_even_unconsumed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.max_chunks = 2;

        for id in 1..=4 {
            write_chunk_file(dir.path(), id, 0);
        }
        let ledger = Ledger {
            chunks: vec![
                make_chunk(1, 0, 10.0, false),
                make_chunk(2, 0, 11.0, true),
                make_chunk(3, 0, 12.0, false),
                make_chunk(4, 0, 13.0, false),
            ],
            next_id: 5,
            rotation_cursor: 0,
        };
        ledger.save(dir.path()).unwrap();

        let (loaded, _) = Ledger::load(dir.path(), &config).unwrap();
        let ids: Vec<u64> = loaded.chunks.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 4], "strictly oldest first, consumed or not");
        assert!(!dir.path().join(chunk_filename(1, 0, 60)).exists());
        assert!(!dir.path().join(chunk_filename(2, 0, 60)).exists());
        assert!(dir.path().join(chunk_filename(3, 0, 60)).exists());
    }

    #[test]
    fn test_save_failure_leaves_previous_ledger_intact() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ledger = Ledger::default();
        ledger.save(dir.path()).unwrap();

        let missing = dir.path().join("gone");
        assert!(ledger.save(&missing).is_err());

        let (loaded, _) = Ledger::load(dir.path(), &config).unwrap();
        assert_eq!(loaded, ledger);
    }
}
