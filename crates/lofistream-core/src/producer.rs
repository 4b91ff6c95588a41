//! Producer control loop: drives the external generator and ingests its
//! output, throttled by backlog health.
//!
//! The generator call can take minutes; it always happens outside the store
//! lock. The loop never busy-loops: every failure path sleeps at least the
//! configured retry backoff, and every success sleeps the backpressure delay
//! of the health tier observed at the start of the iteration.

use crate::buffer::BufferManager;
use crate::health::BufferHealth;
use crate::util::sleep_with_stop;
use crate::Result;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// External generative stage: prompt + duration in, finished audio file out.
///
/// Implementations must return either a complete, valid file or a clean
/// error, never a partial file reported as success.
pub trait ChunkGenerator {
    /// Generate one chunk of audio for `prompt`, `duration_secs` long, and
    /// return the path of the finished file.
    fn generate(&mut self, prompt: &str, duration_secs: u32) -> Result<PathBuf>;
}

/// Counters exposed by a running producer loop.
#[derive(Debug, Clone, Default)]
pub struct ProducerStats {
    /// Chunks generated and ingested since the loop started
    pub chunks_produced: u64,
    /// Failed generation or ingest attempts
    pub failures: u64,
    /// Health tier observed at the start of the last iteration
    pub last_health: Option<BufferHealth>,
}

enum StepOutcome {
    Continue,
    Shutdown,
}

/// Control loop feeding the buffer from a [`ChunkGenerator`].
pub struct ProducerLoop<G: ChunkGenerator> {
    buffer: BufferManager,
    generator: G,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<ProducerStats>>,
    produced_any: bool,
}

impl<G: ChunkGenerator> ProducerLoop<G> {
    /// Build a producer loop over an open buffer and a generator.
    pub fn new(buffer: BufferManager, generator: G) -> Self {
        Self {
            buffer,
            generator,
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(ProducerStats::default())),
            produced_any: false,
        }
    }

    /// Shared stop flag; raise it to make the loop exit after its current
    /// iteration (the current critical section always completes).
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Shared counters for monitoring.
    pub fn stats(&self) -> Arc<Mutex<ProducerStats>> {
        Arc::clone(&self.stats)
    }

    /// Run until the stop flag is raised or the buffer runs dry after
    /// having produced (depleted-and-empty means the feed is already dead;
    /// a cold start with an empty store must still be allowed to fill it).
    pub fn run(&mut self) -> Result<()> {
        info!("producer loop started");
        while !self.stop.load(Ordering::Relaxed) {
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Shutdown) => break,
                Err(e) => {
                    warn!(error = %e, "producer iteration failed");
                    self.stats.lock().failures += 1;
                    self.backoff();
                }
            }
        }
        info!("producer loop stopped");
        Ok(())
    }

    fn step(&mut self) -> Result<StepOutcome> {
        let status = self.buffer.status()?;
        self.stats.lock().last_health = Some(status.health);

        if status.health == BufferHealth::Depleted
            && status.unconsumed == 0
            && self.produced_any
        {
            warn!("buffer depleted and empty, producer shutting down");
            return Ok(StepOutcome::Shutdown);
        }

        let prompt_index = self.buffer.next_prompt_index()?;
        let prompt = self
            .buffer
            .prompt_text(prompt_index)
            .unwrap_or_default()
            .to_string();
        let duration = self.buffer.config().chunk_duration_secs;

        info!(prompt_index, health = %status.health, "generating chunk");
        // The slow part: always outside the store lock.
        match self.generator.generate(&prompt, duration) {
            Ok(finished) => {
                let chunk = self.buffer.add(&finished, prompt_index)?;
                self.produced_any = true;
                self.stats.lock().chunks_produced += 1;

                let delay = Duration::from_secs(status.backpressure_delay_secs);
                if !delay.is_zero() {
                    info!(id = chunk.id, delay_secs = delay.as_secs(), "backpressure pause");
                    sleep_with_stop(&self.stop, delay);
                }
            }
            Err(e) => {
                warn!(error = %e, prompt_index, "generation failed, backing off");
                self.stats.lock().failures += 1;
                self.backoff();
            }
        }
        Ok(StepOutcome::Continue)
    }

    fn backoff(&self) {
        let backoff = Duration::from_secs(self.buffer.config().retry_backoff_secs);
        sleep_with_stop(&self.stop, backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::health::HealthPolicy;
    use crate::BufferError;
    use std::path::Path;

    fn fast_config(dir: &Path) -> StreamConfig {
        StreamConfig {
            buffer_dir: dir.join("store"),
            chunks_per_prompt: 2,
            prompts: vec!["first".to_string(), "second".to_string()],
            retry_backoff_secs: 0,
            health: HealthPolicy {
                healthy_break_secs: 0,
                warning_break_secs: 0,
                ..HealthPolicy::default()
            },
            ..StreamConfig::default()
        }
    }

    /// Writes a dummy finished file per call; fails on request.
    struct ScriptedGenerator {
        dir: PathBuf,
        calls: u32,
        fail_on: Vec<u32>,
        prompts_seen: Vec<String>,
    }

    impl ScriptedGenerator {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                calls: 0,
                fail_on: Vec::new(),
                prompts_seen: Vec::new(),
            }
        }
    }

    impl ChunkGenerator for ScriptedGenerator {
        fn generate(&mut self, prompt: &str, _duration_secs: u32) -> Result<PathBuf> {
            self.calls += 1;
            if self.fail_on.contains(&self.calls) {
                return Err(BufferError::Generation("scripted failure".to_string()));
            }
            self.prompts_seen.push(prompt.to_string());
            let path = self.dir.join(format!("generated_{}.wav", self.calls));
            std::fs::write(&path, b"RIFF....WAVE")?;
            Ok(path)
        }
    }

    #[test]
    fn test_step_generates_and_ingests() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = BufferManager::open(fast_config(dir.path())).unwrap();
        let mut producer = ProducerLoop::new(buffer, ScriptedGenerator::new(dir.path()));

        for _ in 0..3 {
            assert!(matches!(producer.step(), Ok(StepOutcome::Continue)));
        }
        assert_eq!(producer.stats.lock().chunks_produced, 3);

        let status = producer.buffer.status().unwrap();
        assert_eq!(status.total, 3);
        assert_eq!(status.unconsumed, 3);
    }

    #[test]
    fn test_prompts_follow_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = BufferManager::open(fast_config(dir.path())).unwrap();
        let mut producer = ProducerLoop::new(buffer, ScriptedGenerator::new(dir.path()));

        for _ in 0..4 {
            producer.step().unwrap();
        }
        assert_eq!(
            producer.generator.prompts_seen,
            vec!["first", "first", "second", "second"]
        );
    }

    #[test]
    fn test_generation_failure_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = BufferManager::open(fast_config(dir.path())).unwrap();
        let mut generator = ScriptedGenerator::new(dir.path());
        generator.fail_on = vec![1];
        let mut producer = ProducerLoop::new(buffer, generator);

        assert!(matches!(producer.step(), Ok(StepOutcome::Continue)));
        assert_eq!(producer.stats.lock().failures, 1);
        assert_eq!(producer.stats.lock().chunks_produced, 0);

        producer.step().unwrap();
        assert_eq!(producer.stats.lock().chunks_produced, 1);
    }

    #[test]
    fn test_cold_start_does_not_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = BufferManager::open(fast_config(dir.path())).unwrap();
        let mut producer = ProducerLoop::new(buffer, ScriptedGenerator::new(dir.path()));

        // Empty store is DEPLETED, but a producer that has not yet produced
        // must fill it rather than shut down.
        assert!(matches!(producer.step(), Ok(StepOutcome::Continue)));
    }

    #[test]
    fn test_depleted_after_producing_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = BufferManager::open(fast_config(dir.path())).unwrap();
        let mut producer = ProducerLoop::new(buffer, ScriptedGenerator::new(dir.path()));

        producer.step().unwrap();
        let chunk = producer.buffer.next_chunk().unwrap().unwrap();
        producer.buffer.mark_consumed(chunk.id).unwrap();

        assert!(matches!(producer.step(), Ok(StepOutcome::Shutdown)));
    }

    #[test]
    fn test_run_honors_stop_flag() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = BufferManager::open(fast_config(dir.path())).unwrap();
        let mut producer = ProducerLoop::new(buffer, ScriptedGenerator::new(dir.path()));
        producer.stop_flag().store(true, Ordering::Relaxed);

        producer.run().unwrap();
        assert_eq!(producer.stats.lock().chunks_produced, 0);
    }
}
