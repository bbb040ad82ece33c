use crate::commands::command::Command;
use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use split_records::{decompressor::Codec, maybe_compressed_io::open_file, split::Split};
use std::{
    io::{BufWriter, Write},
    num::NonZero,
    path::PathBuf,
};

/// Print the byte ranges that divide an input file into chunks, one "start<TAB>end" line per chunk.
/// Chunk i of this plan is what get-chunk reads for the same input and number of chunks.
#[derive(Parser, Debug)]
#[command(version, verbatim_doc_comment)]
pub(crate) struct Plan {
    /// Input file to divide. Cannot be stdin, because its length is not known in advance.
    #[clap(long, short = 'i', required = true)]
    input: PathBuf,

    /// Number of chunks to divide the input into.
    #[clap(long, short = 'n', required = true)]
    num_chunks: NonZero<usize>,

    /// Output path for the plan. Use "-" (or omit) for stdout.
    #[clap(long, short = 'o', required = false, default_value = "-")]
    output: PathBuf,
}

impl Plan {
    /// Compute the chunk byte ranges.
    fn plan(&self) -> Result<Vec<Split>> {
        if let Some(codec) = Codec::from_path(&self.input)
            && self.num_chunks.get() > 1
        {
            warn!(
                "Input is {codec} compressed: only a single chunk starting at 0 can be read from it"
            );
        }
        Split::plan_file(&self.input, self.num_chunks)
    }

    fn write_plan(&self, splits: &[Split]) -> Result<()> {
        let mut writer = BufWriter::new(open_file(&self.output, true)?);
        for split in splits {
            writeln!(writer, "{}\t{}", split.start(), split.end())?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Implement the Command trait for `Plan` struct.
impl Command for Plan {
    /// Execute the plan command to print chunk byte ranges.
    fn execute(&self) -> Result<()> {
        let splits = self.plan()?;
        info!("Planned {} chunk(s) of {:?}", splits.len(), self.input);
        self.write_plan(&splits)
    }
}
