use anyhow::{Result, anyhow};
use std::{fmt::Display, fs, num::NonZero, path::Path};

/// Half-open byte range `[start, end)` of the logical stream, assigned to one reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Split {
    start: u64,
    end: u64,
}

impl Split {
    /// Create a split. Error if `start > end`.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            Err(anyhow!("Invalid split: start {start} is past end {end}"))
        } else {
            Ok(Split { start, end })
        }
    }

    /// A single split covering a whole stream of `stream_length` bytes.
    pub fn whole(stream_length: u64) -> Self {
        Split {
            start: 0,
            end: stream_length,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Given a chunk index and number of chunks, return the split for that chunk of a stream with
    /// `stream_length` bytes. Chunks are contiguous and differ in length by at most one byte.
    pub fn chunk(stream_length: u64, chunk_index: usize, num_chunks: NonZero<usize>) -> Result<Self> {
        let num_chunks: usize = num_chunks.into();
        if chunk_index < num_chunks {
            Ok(Split {
                start: chunk_offset(stream_length, chunk_index, num_chunks),
                end: chunk_offset(stream_length, chunk_index + 1, num_chunks),
            })
        } else {
            Err(anyhow!(
                "Invalid chunk index {chunk_index} for {num_chunks} chunks"
            ))
        }
    }

    /// Divide a stream into `num_chunks` contiguous splits.
    pub fn plan(stream_length: u64, num_chunks: NonZero<usize>) -> Vec<Self> {
        let num_chunks: usize = num_chunks.into();
        (0..num_chunks)
            .map(|chunk_index| Split {
                start: chunk_offset(stream_length, chunk_index, num_chunks),
                end: chunk_offset(stream_length, chunk_index + 1, num_chunks),
            })
            .collect()
    }

    /// Divide the file at `path` into `num_chunks` contiguous splits of its raw bytes.
    pub fn plan_file<P: AsRef<Path>>(path: P, num_chunks: NonZero<usize>) -> Result<Vec<Self>> {
        Ok(Self::plan(file_length(path)?, num_chunks))
    }
}

impl Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Length in bytes of the file at `path`.
pub fn file_length<P: AsRef<Path>>(path: P) -> Result<u64> {
    let metadata = fs::metadata(path.as_ref()).map_err(|err| {
        let path = path.as_ref();
        anyhow!("Reading metadata of {path:?}: {err}")
    })?;
    Ok(metadata.len())
}

/// Offset where chunk `chunk_index` starts: chunk_index * stream_length / num_chunks, without
/// rounding error or overflow.
fn chunk_offset(stream_length: u64, chunk_index: usize, num_chunks: usize) -> u64 {
    let num_chunks = num_chunks as u64;
    let chunk_index = chunk_index as u64;
    let div_mod: (u64, u64) = (stream_length / num_chunks, stream_length % num_chunks);
    let remainder = (u128::from(chunk_index) * u128::from(div_mod.1)) / u128::from(num_chunks);
    chunk_index * div_mod.0 + remainder as u64
}
