//! Stream and buffer configuration.
//!
//! All knobs for a deployment live in one [`StreamConfig`] that both the
//! producer and consumer processes load, typically from a shared JSON file.
//! Defaults reproduce the reference deployment: one-minute chunks, a one-week
//! hard cap, hourly prompt rotation over ten lofi prompts.

use crate::health::HealthPolicy;
use crate::{BufferError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Consumer behavior when a chunk's audio cannot be read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFailurePolicy {
    /// Mark the chunk consumed and move on. One corrupt file can never
    /// wedge the feed, at the cost of dropping that chunk forever.
    #[default]
    Skip,
    /// Leave the chunk unconsumed and retry on the next iteration. The
    /// consumer will not advance past a persistently unreadable chunk.
    Retry,
}

/// Configuration shared by the producer and consumer processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Directory holding chunk files, the ledger and the lock file
    pub buffer_dir: PathBuf,
    /// Length of each generated chunk, in seconds
    pub chunk_duration_secs: u32,
    /// Sample rate of generated chunks, in Hz
    pub sample_rate: u32,
    /// Hard cap on the number of chunks kept in the store
    pub max_chunks: usize,
    /// Chunks generated per prompt before the rotation cursor advances
    pub chunks_per_prompt: usize,
    /// Fixed rotating prompt list fed to the generator
    pub prompts: Vec<String>,
    /// Backlog health thresholds and backpressure delays
    pub health: HealthPolicy,
    /// Consumer poll interval when the backlog is empty, in seconds
    pub poll_interval_secs: u64,
    /// Length of the silence break inserted on prompt changes, in seconds
    pub prompt_break_secs: f64,
    /// Minimum producer backoff after a failed generation, in seconds
    pub retry_backoff_secs: u64,
    /// Consumer behavior on unreadable chunk files
    pub read_failure_policy: ReadFailurePolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_dir: PathBuf::from("audio_buffer"),
            chunk_duration_secs: 60,
            sample_rate: 32_000,
            // One week of one-minute chunks
            max_chunks: 10_080,
            // One hour per prompt
            chunks_per_prompt: 60,
            prompts: default_prompts(),
            health: HealthPolicy::default(),
            poll_interval_secs: 5,
            prompt_break_secs: 3.0,
            retry_backoff_secs: 30,
            read_failure_policy: ReadFailurePolicy::default(),
        }
    }
}

fn default_prompts() -> Vec<String> {
    [
        "gentle indian lofi hip hop with smooth sarod, subdued drums, and warm room tone",
        "low-key indian lofi hip hop with muted sitar, soft percussion, and subtle breeze textures",
        "quiet indian lofi hip hop with distant sarangi, hushed drums, and misty ambience",
        "downtempo indian lofi hip hop with delicate santoor, minimal beats, and calm water sounds",
        "tranquil indian lofi hip hop with soft esraj melody, gentle rhythm, and evening atmosphere",
        "understated indian lofi hip hop with ambient veena, whispered percussion, and twilight textures",
        "chill indian classical fusion lofi hip hop with harmonium, soft tabla, and vinyl crackle",
        "dreamy indian lofi hip hop with flute melody, tabla beats, and monsoon rain ambience",
        "smooth indian lofi hip hop with electric sitar, mellow drums, and ambient texture",
        "nostalgic indian lofi hip hop with santoor, gentle drums, and street sounds",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl StreamConfig {
    /// Load configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults, so a config file only
    /// needs to name what it overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: StreamConfig = serde_json::from_str(&data)
            .map_err(|e| BufferError::Config(format!("{}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the buffer directory (builder style).
    pub fn with_buffer_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.buffer_dir = dir.into();
        self
    }

    /// Number of chunks that make up one hour of playback.
    pub fn chunks_per_hour(&self) -> f64 {
        3600.0 / self.chunk_duration_secs as f64
    }

    /// Number of prompts in the rotation.
    pub fn prompt_count(&self) -> usize {
        self.prompts.len()
    }

    /// Check the configuration for values the buffer cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.prompts.is_empty() {
            return Err(BufferError::Config("prompt list is empty".to_string()));
        }
        if self.chunk_duration_secs == 0 {
            return Err(BufferError::Config(
                "chunk_duration_secs must be positive".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(BufferError::Config("sample_rate must be positive".to_string()));
        }
        if self.max_chunks == 0 {
            return Err(BufferError::Config("max_chunks must be positive".to_string()));
        }
        if self.chunks_per_prompt == 0 {
            return Err(BufferError::Config(
                "chunks_per_prompt must be positive".to_string(),
            ));
        }
        if !(self.prompt_break_secs.is_finite() && self.prompt_break_secs >= 0.0) {
            return Err(BufferError::Config(
                "prompt_break_secs must be non-negative".to_string(),
            ));
        }
        self.health.validate()
    }
}
