use crate::commands::command::Command;
use anyhow::{Result, anyhow};
use clap::Parser;
use log::info;
use split_records::{
    config::ReaderConfig,
    decompressor::{Codec, DecompressorPool},
    delimiter::Delimiter,
    diagnostics::{DiagnosticSink, MemorySink},
    record_reader::{Record, RecordReader, SplitRecordReader},
    split::{Split, file_length},
};
use std::{
    num::NonZero,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Check that reading an input in chunks, in parallel, yields exactly the records of a single
/// whole-file read: none lost, none duplicated, same order.
#[derive(Parser, Debug)]
#[command(version, verbatim_doc_comment)]
pub(crate) struct Check {
    /// Input file to check. Cannot read from stdin, because it is not seekable.
    #[clap(long, short = 'i', required = true)]
    input: PathBuf,

    /// Number of chunks to read the input as.
    #[clap(long, short = 'n', required = true)]
    num_chunks: NonZero<usize>,

    /// Record delimiter. Escapes \n, \r, \t, \0, \\ and \xHH are recognized. Defaults to any of
    /// "\n", "\r" or "\r\n".
    #[clap(long, short = 'd', required = false, default_value = None)]
    delimiter: Option<Delimiter>,

    /// Skip records whose length, including delimiter, is at least this many bytes.
    #[clap(long, short = 'm', required = false, default_value = None)]
    max_record_length: Option<usize>,

    /// Number of threads to read chunks with
    #[clap(long, short = 't', default_value_t = NonZero::new(num_cpus::get()).unwrap_or(NonZero::new(1usize).unwrap()))]
    threads: NonZero<usize>,
}

/// Totals from a successful check
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct CheckSummary {
    pub num_records: usize,
    pub num_chunks: usize,
    pub num_oversized: usize,
}

/// Read all records of one split.
fn read_split_records(
    input: &Path,
    split: Split,
    config: &ReaderConfig,
    pool: &Arc<DecompressorPool>,
    sink: Arc<dyn DiagnosticSink>,
) -> Result<Vec<Record>> {
    let mut reader = SplitRecordReader::open(input, split, config, pool, sink)?;
    let records = reader.records().collect::<Result<Vec<Record>>>()?;
    reader.close()?;
    Ok(records)
}

impl Check {
    fn reader_config(&self) -> ReaderConfig {
        let mut config = ReaderConfig::new();
        config.overrides(self.max_record_length, self.delimiter.clone());
        config
    }

    /// Read chunks in parallel worker threads. Worker w reads chunks w, w + threads, ...; results
    /// come back in chunk order.
    fn read_chunks(
        &self,
        splits: &[Split],
        config: &ReaderConfig,
        pool: &Arc<DecompressorPool>,
        sink: &Arc<MemorySink>,
    ) -> Result<Vec<Vec<Record>>> {
        let num_workers = self.threads.get().min(splits.len()).max(1);
        let mut chunks: Vec<Option<Vec<Record>>> = vec![None; splits.len()];
        std::thread::scope(|scope| -> Result<()> {
            let workers: Vec<_> = (0..num_workers)
                .map(|worker| {
                    scope.spawn(move || -> Result<Vec<(usize, Vec<Record>)>> {
                        splits
                            .iter()
                            .enumerate()
                            .skip(worker)
                            .step_by(num_workers)
                            .map(|(chunk_index, split)| {
                                let records = read_split_records(
                                    &self.input,
                                    *split,
                                    config,
                                    pool,
                                    sink.clone(),
                                )?;
                                Ok((chunk_index, records))
                            })
                            .collect()
                    })
                })
                .collect();
            for worker in workers {
                let results = worker
                    .join()
                    .map_err(|_| anyhow!("Chunk reading thread panicked"))??;
                for (chunk_index, records) in results {
                    chunks[chunk_index] = Some(records);
                }
            }
            Ok(())
        })?;
        chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, records)| {
                records.ok_or_else(|| anyhow!("Chunk {chunk_index} was never read"))
            })
            .collect()
    }

    /// Compare the chunked read with the whole-file read.
    fn check(&self) -> Result<CheckSummary> {
        if let Some(codec) = Codec::from_path(&self.input)
            && self.num_chunks.get() > 1
        {
            return Err(anyhow!(
                "Input {:?} is {codec} compressed and can only be read as a single chunk",
                self.input
            ));
        }
        let length = file_length(&self.input)?;
        let splits = Split::plan(length, self.num_chunks);
        let config = self.reader_config();
        let pool = DecompressorPool::new();

        let whole_sink = Arc::new(MemorySink::new());
        let whole = read_split_records(
            &self.input,
            Split::whole(length),
            &config,
            &pool,
            whole_sink.clone(),
        )?;

        let chunk_sink = Arc::new(MemorySink::new());
        let chunks = self.read_chunks(&splits, &config, &pool, &chunk_sink)?;
        let mut chunked = chunks.into_iter().flatten();
        for (idx, expected) in whole.iter().enumerate() {
            match chunked.next() {
                Some(found) if found == *expected => {}
                Some(found) => {
                    return Err(anyhow!(
                        "Record {idx} differs: whole-file read has {:?} at {}, chunked read has {:?} at {}",
                        String::from_utf8_lossy(&expected.value),
                        expected.offset,
                        String::from_utf8_lossy(&found.value),
                        found.offset
                    ));
                }
                None => {
                    return Err(anyhow!(
                        "Chunked read ended after {idx} records, whole-file read has {}",
                        whole.len()
                    ));
                }
            }
        }
        let extra = chunked.count();
        if extra > 0 {
            return Err(anyhow!(
                "Chunked read has {extra} more records than whole-file read ({})",
                whole.len()
            ));
        }
        Ok(CheckSummary {
            num_records: whole.len(),
            num_chunks: splits.len(),
            num_oversized: whole_sink.num_oversized(),
        })
    }
}

/// Implement the Command trait for `Check` struct.
impl Command for Check {
    /// Execute the check command and report totals.
    fn execute(&self) -> Result<()> {
        info!("Using {} thread(s)", self.threads);
        let summary = self.check()?;
        info!(
            "{} record(s) in {} chunk(s) match the whole-file read; {} oversized record(s) skipped",
            summary.num_records, summary.num_chunks, summary.num_oversized
        );
        Ok(())
    }
}
