use crate::{
    config::ReaderConfig,
    delimiter::Delimiter,
    diagnostics::MemorySink,
    record_reader::{Record, RecordReader, SplitRecordReader},
    split::Split,
};
use anyhow::Result;
use rand::Rng;
use std::{
    io::{BufReader, Cursor, Seek, SeekFrom},
    sync::Arc,
};

/// Letters used for record bodies. No delimiter used in tests contains any of them.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
/// Newline variants recognized by the default delimiter
const NEWLINES: [&[u8]; 3] = [b"\n", b"\r", b"\r\n"];

/// Generate a random stream of `num_records` records with the given delimiter, returning the stream
/// bytes and the records that a whole-stream read must produce.
///
/// With the default delimiter, records are non-empty (an empty record after "\r" would merge with a
/// following "\n") and each is terminated by a randomly chosen newline variant. With an explicit
/// delimiter, records may be empty. The last record is left unterminated half the time when it is
/// non-empty.
pub fn random_stream<R: Rng>(
    rng: &mut R,
    delimiter: &Delimiter,
    num_records: usize,
    max_record_length: usize,
) -> (Vec<u8>, Vec<Record>) {
    let min_length = match delimiter {
        Delimiter::DefaultNewline => 1,
        Delimiter::Bytes(_) => 0,
    };
    let mut stream: Vec<u8> = Vec::new();
    let mut records: Vec<Record> = Vec::with_capacity(num_records);
    for record_index in 0..num_records {
        let length = rng.random_range(min_length..=max_record_length.max(min_length));
        let value: Vec<u8> = (0..length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())])
            .collect();
        let offset = stream.len() as u64;
        stream.extend_from_slice(&value);
        let is_last = record_index + 1 == num_records;
        if !(is_last && !value.is_empty() && rng.random_bool(0.5)) {
            match delimiter {
                Delimiter::DefaultNewline => {
                    stream.extend_from_slice(NEWLINES[rng.random_range(0..NEWLINES.len())])
                }
                Delimiter::Bytes(bytes) => stream.extend_from_slice(bytes),
            }
        }
        records.push(Record { offset, value });
    }
    (stream, records)
}

/// Generate about `length` random bytes drawn from a few letters and the bytes of `delimiter`, with
/// whole delimiters mixed in. Delimiter fragments, runs of delimiters and long records all occur,
/// so the records of such a stream are only known by reading it.
pub fn random_bytes<R: Rng>(rng: &mut R, delimiter: &Delimiter, length: usize) -> Vec<u8> {
    let terminator: &[u8] = match delimiter {
        Delimiter::DefaultNewline => b"\r\n",
        Delimiter::Bytes(bytes) => bytes,
    };
    let mut symbols = b"xyz".to_vec();
    symbols.extend_from_slice(terminator);
    let mut stream: Vec<u8> = Vec::with_capacity(length + terminator.len());
    while stream.len() < length {
        if rng.random_bool(0.1) {
            stream.extend_from_slice(terminator);
        } else {
            stream.push(symbols[rng.random_range(0..symbols.len())]);
        }
    }
    stream
}

/// Cut a stream of `stream_length` bytes at `num_cuts` random points (duplicates allowed), giving
/// adjacent splits that cover the stream.
pub fn random_partition<R: Rng>(rng: &mut R, stream_length: u64, num_cuts: usize) -> Vec<Split> {
    let mut cuts: Vec<u64> = (0..num_cuts)
        .map(|_| rng.random_range(0..=stream_length))
        .collect();
    cuts.push(0);
    cuts.push(stream_length);
    cuts.sort_unstable();
    cuts.windows(2)
        .map(|pair| Split::new(pair[0], pair[1]))
        .collect::<Result<Vec<Split>>>()
        .unwrap()
}

/// Read every record of one split of an in-memory stream, through a buffer of `capacity` bytes.
pub fn read_split(
    stream: &[u8],
    split: Split,
    config: &ReaderConfig,
    capacity: usize,
) -> Result<(Vec<Record>, Arc<MemorySink>)> {
    let mut source = BufReader::with_capacity(capacity, Cursor::new(stream.to_vec()));
    source.seek(SeekFrom::Start(split.start()))?;
    let sink = Arc::new(MemorySink::new());
    let mut reader = SplitRecordReader::from_source(source, split, config, sink.clone())?;
    let records = reader.records().collect::<Result<Vec<Record>>>()?;
    reader.close()?;
    Ok((records, sink))
}

/// Read all splits in order and concatenate their records.
pub fn read_partition(
    stream: &[u8],
    splits: &[Split],
    config: &ReaderConfig,
    capacity: usize,
) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for split in splits {
        records.extend(read_split(stream, *split, config, capacity)?.0);
    }
    Ok(records)
}
