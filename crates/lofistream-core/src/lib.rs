//! Rolling content buffer for a continuous generative-audio feed
//!
//! A generative model produces audio chunks far slower (and less predictably)
//! than they are streamed out. This crate keeps a durable, bounded, strictly
//! ordered backlog of chunks on disk so the producer and the streaming
//! consumer can run as independent processes, coordinating only through a
//! persisted ledger guarded by an OS advisory lock.
//!
//! # Features
//! - Crash-tolerant metadata ledger with full reconciliation from on-disk
//!   chunk files
//! - Atomic chunk ingest and ledger replacement (temp file + fsync + rename)
//! - Cap-driven purge that only ever deletes already-streamed chunks
//! - Backlog health classification driving producer backpressure
//! - Evidence-driven prompt rotation that survives restarts
//! - Producer and consumer control loops generic over the generation and
//!   output stages
//!
//! # Crate feature flags
//! - `playback` (optional): Local speaker sink via rodio for the consumer loop
//!
//! # Quick start
//! ```no_run
//! use lofistream::{BufferManager, StreamConfig};
//!
//! # fn main() -> lofistream::Result<()> {
//! let config = StreamConfig::default().with_buffer_dir("./audio_buffer");
//! let buffer = BufferManager::open(config)?;
//!
//! let status = buffer.status()?;
//! println!("{:.1}h of audio buffered ({})", status.hours_remaining, status.health);
//! # Ok(())
//! # }
//! ```
//!
//! The producer and consumer halves of a deployment each build their own
//! [`BufferManager`] over the same directory; see [`ProducerLoop`] and
//! [`ConsumerLoop`].

#![warn(missing_docs)]

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod consumer;
pub mod health;
pub mod ledger;
pub mod lock;
pub mod producer;
pub mod util;

/// Error types for buffer store operations
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    /// IO error from the filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunk ingest failed (missing source, unwritable store)
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// Chunk filename does not follow the store naming scheme
    #[error("Filename parse error: {0}")]
    FilenameParse(String),

    /// External generator reported failure
    #[error("Generation error: {0}")]
    Generation(String),

    /// Downstream sink rejected audio data
    #[error("Sink error: {0}")]
    Sink(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for BufferError {
    fn from(msg: String) -> Self {
        BufferError::Other(msg)
    }
}

impl From<&str> for BufferError {
    fn from(msg: &str) -> Self {
        BufferError::Other(msg.to_string())
    }
}

/// Result type for buffer store operations
pub type Result<T> = std::result::Result<T, BufferError>;

// Public API exports
pub use buffer::{BufferManager, BufferStatus};
pub use chunk::Chunk;
pub use config::{ReadFailurePolicy, StreamConfig};
pub use consumer::{AudioSink, ConsumerLoop, RawStdoutSink};
pub use health::{BufferHealth, HealthPolicy};
pub use ledger::{Ledger, StoreWarning};
pub use lock::{StoreLock, StoreLockGuard};
pub use producer::{ChunkGenerator, ProducerLoop};

#[cfg(feature = "playback")]
pub use consumer::PlaybackSink;
