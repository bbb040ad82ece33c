use crate::commands::command::Command;
use anyhow::{Result, anyhow};
use clap::{Parser, value_parser};
use log::{info, warn};
use split_records::{
    config::ReaderConfig,
    decompressor::{Codec, DecompressorPool},
    delimiter::Delimiter,
    diagnostics::LogSink,
    maybe_compressed_io::MaybeCompressedWriter,
    record_reader::{RecordReader, SplitRecordReader},
    split::{Split, file_length},
};
use std::{io::Write, num::NonZero, path::PathBuf, sync::Arc};

/// Extract the records owned by one chunk of a delimited text file. Running get-chunk for every
/// chunk index and concatenating the outputs reproduces every record of the input exactly once.
#[derive(Parser, Debug)]
#[command(version, verbatim_doc_comment)]
pub(crate) struct GetChunk {
    /// Input file to extract from. Cannot read from stdin, because it is not seekable. Inputs ending
    /// in ".gz", ".bgz", ".deflate" or ".zz" are decompressed, and can only be read as one chunk.
    #[clap(long, short = 'i', required = true)]
    input: PathBuf,

    /// Output path for chunk records. Use "-" (or omit) for stdout. Paths ending in ".gz" or ".bgz"
    /// are BGZF-compressed.
    #[clap(long, short = 'o', required = false, default_value = "-")]
    output: PathBuf,

    /// Compression level for output when writing to stdout: compressed if greater than 0.
    #[clap(long, short = 'C', required = false, value_parser = value_parser!(u32).range(..=9))]
    compression: Option<u32>,

    /// Index of chunk to take (0, 1, ..., num_chunks - 1)
    #[clap(long, short = 'c', required = true)]
    chunk_index: usize,

    /// Number of chunks in total input file.
    #[clap(long, short = 'n', required = true)]
    num_chunks: NonZero<usize>,

    /// Record delimiter. Escapes \n, \r, \t, \0, \\ and \xHH are recognized. Defaults to any of
    /// "\n", "\r" or "\r\n".
    #[clap(long, short = 'd', required = false, default_value = None)]
    delimiter: Option<Delimiter>,

    /// Skip records whose length, including delimiter, is at least this many bytes.
    #[clap(long, short = 'm', required = false, default_value = None)]
    max_record_length: Option<usize>,

    /// Prefix each output record with its byte offset in the input and a tab.
    #[clap(long, required = false, default_value_t = false)]
    offsets: bool,

    /// Number of threads to use for writing compressed output
    #[clap(long, short = 't', default_value_t = NonZero::new(num_cpus::get()).unwrap_or(NonZero::new(1usize).unwrap()))]
    threads: NonZero<usize>,
}

impl GetChunk {
    fn reader_config(&self) -> ReaderConfig {
        let mut config = ReaderConfig::new();
        config.overrides(self.max_record_length, self.delimiter.clone());
        config
    }

    /// Byte range of the requested chunk.
    fn chunk_split(&self) -> Result<Split> {
        if let Some(codec) = Codec::from_path(&self.input)
            && self.num_chunks.get() > 1
        {
            return Err(anyhow!(
                "Input {:?} is {codec} compressed and can only be read as a single chunk",
                self.input
            ));
        }
        Split::chunk(file_length(&self.input)?, self.chunk_index, self.num_chunks)
    }

    /// Read the chunk's records and write them to the desired output. Returns the number of records
    /// written.
    fn write_chunk(&self) -> Result<usize> {
        let split = self.chunk_split()?;
        let config = self.reader_config();
        info!(
            "Reading chunk {} of {} from {:?}: bytes {split}, {} delimiter",
            self.chunk_index,
            self.num_chunks,
            self.input,
            config.get_delimiter()
        );
        let pool = DecompressorPool::new();
        let mut reader =
            SplitRecordReader::open(&self.input, split, &config, &pool, Arc::new(LogSink))?;

        let compressed = self.compression.is_some_and(|level| level > 0);
        let mut writer = MaybeCompressedWriter::new(&self.output, compressed, self.threads)?;
        let terminator = config.get_delimiter().terminator();
        let mut offset = reader.create_key();
        let mut record = reader.create_value();
        let mut num_records: usize = 0;
        while reader.next(&mut offset, &mut record)? {
            writer.write_record(self.offsets.then_some(offset), &record, terminator)?;
            num_records += 1;
        }
        reader.close()?;
        writer.flush()?;
        if num_records == 0 {
            warn!("Chunk {} is empty.", self.chunk_index)
        } else {
            info!("Wrote {num_records} record(s)");
        }
        Ok(num_records)
    }
}

/// Implement the Command trait for `GetChunk` struct.
impl Command for GetChunk {
    /// Execute the get-chunk command to extract a specific chunk from the input file.
    fn execute(&self) -> Result<()> {
        self.write_chunk().map(|_| ())
    }
}
