//! Consumer control loop: streams the backlog, in strict order, into an
//! audio sink.
//!
//! The consumer polls the buffer, feeds each chunk's samples to the sink,
//! and reports consumption back. When the prompt changes between two
//! consecutive chunks, a fixed-length silence break is written first so the
//! downstream feed gets a clean seam. Its length is a deterministic
//! constant, independent of chunk duration or buffer health.

use crate::buffer::BufferManager;
use crate::chunk::Chunk;
use crate::config::ReadFailurePolicy;
use crate::util::sleep_with_stop;
use crate::{BufferError, Result};
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Downstream output stage accepting raw audio frames.
///
/// The sink owns its own buffering and transport; the consumer only
/// guarantees strict chunk order.
pub trait AudioSink {
    /// Write a block of signed 16-bit mono samples.
    fn write(&mut self, samples: &[i16]) -> Result<()>;
}

/// Sink writing raw little-endian i16 frames to stdout, for piping into an
/// external encoder process.
#[derive(Default)]
pub struct RawStdoutSink;

impl RawStdoutSink {
    /// Create a stdout sink.
    pub fn new() -> Self {
        Self
    }
}

impl AudioSink for RawStdoutSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        out.write_all(&bytes)
            .and_then(|_| out.flush())
            .map_err(|e| BufferError::Sink(format!("stdout: {e}")))
    }
}

/// Local speaker sink backed by rodio.
#[cfg(feature = "playback")]
pub struct PlaybackSink {
    _stream: rodio::OutputStream,
    sink: rodio::Sink,
    sample_rate: u32,
}

#[cfg(feature = "playback")]
impl PlaybackSink {
    /// Open the default audio device for mono playback at `sample_rate`.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let (stream, handle) = rodio::OutputStream::try_default()
            .map_err(|e| BufferError::Sink(format!("failed to create audio stream: {e}")))?;
        let sink = rodio::Sink::try_new(&handle)
            .map_err(|e| BufferError::Sink(format!("failed to create audio sink: {e}")))?;
        Ok(Self {
            _stream: stream,
            sink,
            sample_rate,
        })
    }
}

#[cfg(feature = "playback")]
impl AudioSink for PlaybackSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let source = rodio::buffer::SamplesBuffer::new(1, self.sample_rate, samples.to_vec());
        self.sink.append(source);
        Ok(())
    }
}

/// Counters exposed by a running consumer loop.
#[derive(Debug, Clone, Default)]
pub struct ConsumerStats {
    /// Chunks fully streamed and marked consumed
    pub chunks_streamed: u64,
    /// Chunk files that could not be read
    pub read_failures: u64,
    /// Sink write failures
    pub sink_failures: u64,
    /// Silence breaks inserted on prompt changes
    pub breaks_inserted: u64,
}

/// Control loop draining the buffer into an [`AudioSink`].
pub struct ConsumerLoop<S: AudioSink> {
    buffer: BufferManager,
    sink: S,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<ConsumerStats>>,
    last_prompt: Option<usize>,
}

impl<S: AudioSink> ConsumerLoop<S> {
    /// Build a consumer loop over an open buffer and a sink.
    pub fn new(buffer: BufferManager, sink: S) -> Self {
        Self {
            buffer,
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(ConsumerStats::default())),
            last_prompt: None,
        }
    }

    /// Shared stop flag; raise it to make the loop exit after its current
    /// iteration.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Shared counters for monitoring.
    pub fn stats(&self) -> Arc<Mutex<ConsumerStats>> {
        Arc::clone(&self.stats)
    }

    /// Run until the stop flag is raised.
    pub fn run(&mut self) -> Result<()> {
        info!("consumer loop started");
        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.step() {
                warn!(error = %e, "consumer iteration failed");
                self.poll_sleep();
            }
        }
        info!("consumer loop stopped");
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        let Some(chunk) = self.buffer.next_chunk()? else {
            debug!("backlog empty, waiting for chunks");
            self.poll_sleep();
            return Ok(());
        };

        if let Some(last) = self.last_prompt {
            if last != chunk.prompt_index {
                info!(
                    from = last,
                    to = chunk.prompt_index,
                    "prompt change, inserting silence break"
                );
                let config = self.buffer.config();
                let silence = silence_samples(config.sample_rate, config.prompt_break_secs);
                if let Err(e) = self.sink.write(&silence) {
                    warn!(error = %e, "sink rejected silence break");
                    self.stats.lock().sink_failures += 1;
                    self.poll_sleep();
                    return Ok(());
                }
                self.stats.lock().breaks_inserted += 1;
            }
        }

        let samples = match read_chunk_samples(&chunk, self.buffer.dir()) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(id = chunk.id, error = %e, "chunk unreadable");
                self.stats.lock().read_failures += 1;
                match self.buffer.config().read_failure_policy {
                    ReadFailurePolicy::Skip => self.buffer.mark_consumed(chunk.id)?,
                    ReadFailurePolicy::Retry => self.poll_sleep(),
                }
                return Ok(());
            }
        };

        info!(id = chunk.id, samples = samples.len(), "streaming chunk");
        if let Err(e) = self.sink.write(&samples) {
            warn!(id = chunk.id, error = %e, "sink rejected chunk, will retry");
            self.stats.lock().sink_failures += 1;
            self.poll_sleep();
            return Ok(());
        }

        self.buffer.mark_consumed(chunk.id)?;
        self.last_prompt = Some(chunk.prompt_index);
        self.stats.lock().chunks_streamed += 1;
        Ok(())
    }

    fn poll_sleep(&self) {
        let interval = Duration::from_secs(self.buffer.config().poll_interval_secs);
        sleep_with_stop(&self.stop, interval);
    }
}

/// Fixed-length mono silence for the inter-prompt break.
pub(crate) fn silence_samples(sample_rate: u32, seconds: f64) -> Vec<i16> {
    vec![0i16; (sample_rate as f64 * seconds) as usize]
}

/// Read all samples of a chunk's WAV file as i16 frames.
fn read_chunk_samples(chunk: &Chunk, dir: &Path) -> Result<Vec<i16>> {
    let path = chunk.path(dir);
    let mut reader = hound::WavReader::open(&path)
        .map_err(|e| BufferError::Other(format!("cannot open {}: {e}", path.display())))?;
    reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<i16>, _>>()
        .map_err(|e| BufferError::Other(format!("cannot decode {}: {e}", path.display())))
}
