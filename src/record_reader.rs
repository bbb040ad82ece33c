use crate::{
    config::ReaderConfig,
    decompressor::DecompressorPool,
    delimited_scanner::{DelimitedScanner, ScanResult},
    diagnostics::{Diagnostic, DiagnosticSink},
    maybe_compressed_io::{MaybeCompressedReader, SplitSource},
    split::Split,
};
use anyhow::{Result, anyhow};
use log::debug;
use std::{path::Path, sync::Arc};

/// Byte order mark that UTF-8 text may start with
pub const UTF8_BYTE_ORDER_MARK: [u8; 3] = [0xefu8, 0xbbu8, 0xbfu8];

/// One record and the logical offset of its first byte.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub value: Vec<u8>,
}

/// Pull-style iteration contract of a batch host: the host creates a key and a value once, then
/// repeatedly asks the reader to fill them.
pub trait RecordReader {
    type Key;
    type Value;

    fn create_key(&self) -> Self::Key;

    fn create_value(&self) -> Self::Value;

    /// Fill `key` and `value` with the next record. Returns false once the reader is exhausted.
    fn next(&mut self, key: &mut Self::Key, value: &mut Self::Value) -> Result<bool>;

    /// Logical offset of the next unread byte.
    fn pos(&self) -> u64;

    /// Fraction of the split consumed so far, in [0, 1].
    fn progress(&mut self) -> Result<f32>;

    /// Release the source and any pooled resources. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Reads the delimited records owned by one split of a stream.
///
/// A record starting at logical offset `p` is owned by the split with `start < p <= end`, or by the
/// split starting at 0 when `p == 0`. A reader whose split starts elsewhere than 0 first discards
/// the partial record at its start, since the previous split reads through it. Records keep being
/// read while the position is at most `end`, plus one more whenever the delimiter ending a record
/// straddles `end`.
pub struct SplitRecordReader<S> {
    /// None once closed
    scanner: Option<DelimitedScanner<S>>,
    split: Split,
    /// Logical offset of the next unread byte
    pos: u64,
    max_record_length: usize,
    compressed: bool,
    /// Last read ended with a delimiter that straddles the split end
    pending_overrun: bool,
    exhausted: bool,
    sink: Arc<dyn DiagnosticSink>,
}

impl SplitRecordReader<MaybeCompressedReader> {
    /// Open `path` and prepare to read the records owned by `split`. Compressed inputs (chosen by
    /// extension) borrow a decompressor from `pool`, and can only be read as a split starting at 0.
    pub fn open<P: AsRef<Path>>(
        path: P,
        split: Split,
        config: &ReaderConfig,
        pool: &Arc<DecompressorPool>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        debug!("Opening split {split} of {:?}", path.as_ref());
        let source = MaybeCompressedReader::open(path, split.start(), pool)?;
        Self::from_source(source, split, config, sink)
    }
}

impl<S: SplitSource> SplitRecordReader<S> {
    /// Read the records owned by `split` from `source`, which must already be positioned at the
    /// split start.
    pub fn from_source(
        source: S,
        split: Split,
        config: &ReaderConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let compressed = source.is_compressed();
        if compressed && split.start() != 0 {
            return Err(anyhow!("Split {split} of a compressed source must start at 0"));
        }
        if split.start() != 0 && config.get_delimiter().overlaps_itself() {
            return Err(anyhow!(
                "Delimiter {} can overlap itself, so record starts depend on everything before \
                split {split}: only splits starting at 0 can be read",
                config.get_delimiter()
            ));
        }
        let mut scanner = DelimitedScanner::new(source, config.get_delimiter());
        if !compressed {
            scanner = scanner.with_split_length(split.len());
        }
        let mut reader = SplitRecordReader {
            scanner: Some(scanner),
            split,
            pos: split.start(),
            max_record_length: config.get_max_record_length(),
            compressed,
            pending_overrun: false,
            exhausted: false,
            sink,
        };
        if split.start() != 0 && !split.is_empty() {
            reader.discard_leading_record()?;
        }
        Ok(reader)
    }

    /// Read the next owned record into `record`. Returns its offset, or None once the split is
    /// exhausted.
    pub fn next_record(&mut self, record: &mut Vec<u8>) -> Result<Option<u64>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.split.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        while self.current_position()? <= self.split.end() || self.pending_overrun {
            let offset = self.pos;
            let max_bytes_to_consume = self.max_bytes_to_consume(offset);
            let (mut result, mut size) = if offset == 0 {
                self.read_first_record(record, max_bytes_to_consume)?
            } else {
                let max_record_length = self.max_record_length;
                let result = self.scanner_mut()?.read_record(
                    record,
                    max_record_length,
                    max_bytes_to_consume,
                )?;
                (result, result.bytes_consumed)
            };
            let cut_short = result.incomplete;
            if cut_short {
                let rest = self.skip_rest_of_record(&mut result)?;
                size += rest;
            }
            self.pending_overrun = result.boundary.is_overrun();
            self.pos += result.bytes_consumed as u64;
            if size == 0 {
                break;
            }
            if size < self.max_record_length && !cut_short {
                return Ok(Some(offset));
            }
            self.sink.emit(Diagnostic::OversizedRecordSkipped { offset, size });
        }
        self.exhausted = true;
        Ok(None)
    }

    /// Read the first record of the stream, dropping a leading byte order mark. The mark's bytes
    /// still advance the position but do not count towards the record size.
    fn read_first_record(
        &mut self,
        record: &mut Vec<u8>,
        max_bytes_to_consume: usize,
    ) -> Result<(ScanResult, usize)> {
        let max_record_length = self
            .max_record_length
            .saturating_add(UTF8_BYTE_ORDER_MARK.len());
        let result = self.scanner_mut()?.read_record(
            record,
            max_record_length,
            max_bytes_to_consume.saturating_add(UTF8_BYTE_ORDER_MARK.len()),
        )?;
        let mut size = result.bytes_consumed;
        if record.starts_with(&UTF8_BYTE_ORDER_MARK) {
            record.drain(..UTF8_BYTE_ORDER_MARK.len());
            size -= UTF8_BYTE_ORDER_MARK.len();
            self.sink.emit(Diagnostic::ByteOrderMarkSkipped);
        }
        Ok((result, size))
    }

    /// Skip the partial record at the start of the split. It belongs to the previous split.
    fn discard_leading_record(&mut self) -> Result<()> {
        let max_bytes_to_consume = self.max_bytes_to_consume(self.pos);
        let mut discarded = Vec::new();
        let mut result = self
            .scanner_mut()?
            .read_record(&mut discarded, 0, max_bytes_to_consume)?;
        if result.incomplete {
            self.skip_rest_of_record(&mut result)?;
        }
        self.pending_overrun = result.boundary.is_overrun();
        self.pos += result.bytes_consumed as u64;
        self.sink.emit(Diagnostic::LeadingRecordDiscarded {
            split: self.split,
            bytes: result.bytes_consumed,
        });
        Ok(())
    }

    /// Consume the rest of a record whose read in `result` gave up before its delimiter, folding
    /// the rest into `result`. Returns the number of extra bytes consumed.
    fn skip_rest_of_record(&mut self, result: &mut ScanResult) -> Result<usize> {
        let mut discarded = Vec::new();
        let rest = self
            .scanner_mut()?
            .read_record(&mut discarded, 0, usize::MAX)?;
        result.bytes_consumed += rest.bytes_consumed;
        result.boundary = rest.boundary;
        result.incomplete = rest.incomplete;
        Ok(rest.bytes_consumed)
    }

    /// How far one read starting at `pos` may advance. Always allows a full maximum-length record,
    /// so the last record of a split is read whole even when it crosses the split end. Unbounded for
    /// compressed sources, where logical offsets can't be compared with the split end.
    fn max_bytes_to_consume(&self, pos: u64) -> usize {
        if self.compressed {
            usize::MAX
        } else {
            let remaining = self.split.end().saturating_sub(pos);
            usize::try_from(remaining)
                .unwrap_or(usize::MAX)
                .max(self.max_record_length)
        }
    }

    /// Position compared against the split end: the raw input position when compressed, otherwise
    /// the logical position.
    fn current_position(&mut self) -> Result<u64> {
        match self.scanner.as_mut() {
            Some(scanner) if self.compressed => Ok(scanner.get_mut().raw_position()?),
            _ => Ok(self.pos),
        }
    }

    fn scanner_mut(&mut self) -> Result<&mut DelimitedScanner<S>> {
        let split = self.split;
        self.scanner
            .as_mut()
            .ok_or_else(|| anyhow!("Reader for split {split} is closed"))
    }

    /// Iterate over the remaining owned records.
    pub fn records(&mut self) -> Records<'_, S> {
        Records {
            reader: self,
            failed: false,
        }
    }
}

impl<S: SplitSource> RecordReader for SplitRecordReader<S> {
    type Key = u64;
    type Value = Vec<u8>;

    fn create_key(&self) -> u64 {
        0
    }

    fn create_value(&self) -> Vec<u8> {
        Vec::new()
    }

    fn next(&mut self, key: &mut u64, value: &mut Vec<u8>) -> Result<bool> {
        match self.next_record(value)? {
            Some(offset) => {
                *key = offset;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn progress(&mut self) -> Result<f32> {
        if self.split.is_empty() {
            return Ok(0.0);
        }
        if self.exhausted {
            return Ok(1.0);
        }
        let consumed = self
            .current_position()?
            .saturating_sub(self.split.start());
        let fraction = consumed as f64 / self.split.len() as f64;
        Ok(fraction.clamp(0.0, 1.0) as f32)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(scanner) = self.scanner.take() {
            let mut source = scanner.into_inner();
            if source.release() {
                debug!("Returned decompressor for split {}", self.split);
            }
        }
        self.exhausted = true;
        Ok(())
    }
}

/// Iterator over the records of a [`SplitRecordReader`]. Stops after the first error.
pub struct Records<'a, S> {
    reader: &'a mut SplitRecordReader<S>,
    failed: bool,
}

impl<S: SplitSource> Iterator for Records<'_, S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut value = Vec::new();
        match self.reader.next_record(&mut value) {
            Ok(Some(offset)) => Some(Ok(Record { offset, value })),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
