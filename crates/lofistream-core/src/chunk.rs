//! Chunk records and the on-disk filename scheme.
//!
//! Every chunk file is named `chunk_{id:06}_prompt_{p}_{d}s.wav`. The name
//! alone carries the chunk id, the prompt it was generated from, and its
//! duration, which is what makes full ledger reconciliation from a bare
//! directory listing possible. The file on disk is ground truth; the ledger
//! is a cache of facts about files, never the reverse.

use crate::{BufferError, Result};
use nom::bytes::complete::tag;
use nom::character::complete::digit1;
use nom::combinator::{all_consuming, map_res};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Width of the zero-padded id field. Zero-padding keeps a lexicographic
/// directory sort identical to id order during reconciliation.
const ID_PAD: usize = 6;

/// One immutable unit of produced audio content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique, strictly increasing id assigned at ingest
    pub id: u64,
    /// Canonical filename inside the store directory
    pub filename: String,
    /// Index into the fixed prompt list this chunk was generated from
    pub prompt_index: usize,
    /// Full prompt text at generation time
    pub prompt: String,
    /// Playback length in seconds
    pub duration_secs: u32,
    /// Ingest time, fractional seconds since the Unix epoch
    pub created_at: f64,
    /// Whether the consumer has already streamed this chunk
    pub consumed: bool,
}

impl Chunk {
    /// Absolute path of this chunk's file inside `dir`.
    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.filename)
    }

    /// Whether this chunk's file still exists inside `dir`.
    pub fn file_exists(&self, dir: &Path) -> bool {
        self.path(dir).is_file()
    }
}

/// Build the canonical filename for `(id, prompt_index, duration)`.
pub fn chunk_filename(id: u64, prompt_index: usize, duration_secs: u32) -> String {
    format!(
        "chunk_{:0pad$}_prompt_{}_{}s.wav",
        id,
        prompt_index,
        duration_secs,
        pad = ID_PAD
    )
}

fn filename_parts(input: &str) -> IResult<&str, (u64, usize, u32)> {
    let (input, (_, id, _, prompt_index, _, duration_secs, _)) = tuple((
        tag("chunk_"),
        map_res(digit1, str::parse::<u64>),
        tag("_prompt_"),
        map_res(digit1, str::parse::<usize>),
        tag("_"),
        map_res(digit1, str::parse::<u32>),
        tag("s.wav"),
    ))(input)?;
    Ok((input, (id, prompt_index, duration_secs)))
}

/// Parse `(id, prompt_index, duration)` back out of a chunk filename.
///
/// Fails on anything that does not match the scheme exactly; reconciliation
/// treats such files as foreign and skips them with a warning.
pub fn parse_chunk_filename(name: &str) -> Result<(u64, usize, u32)> {
    all_consuming(filename_parts)(name)
        .map(|(_, parts)| parts)
        .map_err(|_| BufferError::FilenameParse(format!("not a chunk filename: {name}")))
}

/// Whether a filename looks like a chunk file at all (used to pre-filter
/// directory scans before attempting a full parse).
pub fn is_chunk_filename(name: &str) -> bool {
    name.starts_with("chunk_") && name.ends_with(".wav")
}
