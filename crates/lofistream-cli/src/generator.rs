//! External generator invocation for the producer subcommand.
//!
//! The generative model lives outside this process (the reference
//! deployment shells out to a MusicGen script). The contract is a fixed
//! argument order: `cmd <prompt> <duration_secs> <output.wav>`, exit code
//! zero, and a complete file at the output path.

use lofistream::{BufferError, ChunkGenerator, Result};
use std::path::PathBuf;
use std::process::Command;

/// [`ChunkGenerator`] that shells out to a configured command line.
pub struct CommandGenerator {
    program: String,
    leading_args: Vec<String>,
    scratch: tempfile::TempDir,
    counter: u64,
}

impl CommandGenerator {
    /// Build a generator from a command line such as
    /// `python3 musicgen_chunk.py`.
    pub fn new(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| BufferError::Config("empty generator command".to_string()))?;
        Ok(Self {
            program,
            leading_args: parts.collect(),
            scratch: tempfile::tempdir()?,
            counter: 0,
        })
    }
}

impl ChunkGenerator for CommandGenerator {
    fn generate(&mut self, prompt: &str, duration_secs: u32) -> Result<PathBuf> {
        self.counter += 1;
        let output = self
            .scratch
            .path()
            .join(format!("generated_{:06}.wav", self.counter));

        let status = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(prompt)
            .arg(duration_secs.to_string())
            .arg(&output)
            .status()
            .map_err(|e| BufferError::Generation(format!("cannot run {}: {e}", self.program)))?;

        if !status.success() {
            return Err(BufferError::Generation(format!(
                "generator exited with {status}"
            )));
        }
        if !output.is_file() {
            return Err(BufferError::Generation(
                "generator reported success but produced no file".to_string(),
            ));
        }
        Ok(output)
    }
}
