use crate::delimiter::{Delimiter, DelimiterMatcher, Step};
use std::io::{BufRead, ErrorKind, Result};

/// Whether the delimiter that ended a record hid the split end inside itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Boundary {
    /// Nothing special: the split end, if reached, fell between records.
    #[default]
    Complete,
    /// The split end fell strictly inside the delimiter that terminated this record. The reader
    /// owning the split must emit one more record, because the next split cannot recognize the
    /// partial delimiter at its start.
    Overrun,
}

impl Boundary {
    pub fn is_overrun(&self) -> bool {
        *self == Boundary::Overrun
    }
}

/// Result of one [`DelimitedScanner::read_record`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Bytes advanced past in the source: record, delimiter, and any discarded overflow.
    pub bytes_consumed: usize,
    pub boundary: Boundary,
    /// Scanning stopped at `max_bytes_to_consume` with no delimiter in sight. The rest of the record
    /// is still unread.
    pub incomplete: bool,
}

impl ScanResult {
    /// Zero bytes consumed means the source is exhausted.
    pub fn is_end_of_stream(&self) -> bool {
        self.bytes_consumed == 0
    }
}

/// Struct for splitting a buffered reader into delimited records, with caps on record length and
/// on how far a single read may advance.
#[derive(Debug)]
pub struct DelimitedScanner<B> {
    buf: B,
    matcher: DelimiterMatcher,
    /// Number of source bytes that belong to the split, counted from where the scanner started.
    split_length: Option<u64>,
    /// Total bytes consumed from `buf` by this scanner.
    bytes_read: u64,
}

impl<B: BufRead> DelimitedScanner<B> {
    /// Create a new scanner that yields records terminated by `delimiter`.
    ///
    /// # Arguments
    /// * `buf` - The buffered reader to scan, positioned at the first byte to read
    /// * `delimiter` - How records are terminated
    pub fn new(buf: B, delimiter: &Delimiter) -> Self {
        Self {
            buf,
            matcher: delimiter.matcher(),
            split_length: None,
            bytes_read: 0,
        }
    }

    /// Tell the scanner how many bytes, from its current position, belong to the split. Used only
    /// to report [`Boundary::Overrun`].
    pub fn with_split_length(mut self, split_length: u64) -> Self {
        self.split_length = Some(split_length);
        self
    }

    /// Total bytes consumed from the underlying reader.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn get_mut(&mut self) -> &mut B {
        &mut self.buf
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Read the next record into `record`, without its delimiter.
    ///
    /// At most `max_record_length` bytes are stored; the rest of an oversized record is consumed
    /// and dropped so the stream stays in sync. Scanning gives up once `max_bytes_to_consume`
    /// bytes have been consumed without finding a delimiter, unless a delimiter is partially
    /// matched, in which case it is resolved first. A scan that gives up is flagged
    /// [`ScanResult::incomplete`]. At least one byte is always consumed if the source has any.
    ///
    /// # Errors
    /// Any I/O error from the underlying reader other than `Interrupted`.
    pub fn read_record(
        &mut self,
        record: &mut Vec<u8>,
        max_record_length: usize,
        max_bytes_to_consume: usize,
    ) -> Result<ScanResult> {
        record.clear();
        self.matcher.reset();
        let max_bytes_to_consume = max_bytes_to_consume.max(1);
        let mut consumed: usize = 0;
        let mut incomplete = false;
        let delimiter_length: usize = loop {
            let available = match self.buf.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                break self.matcher.finish();
            }
            let mut used: usize = 0;
            let mut found: Option<usize> = None;
            for &byte in available {
                if consumed + used >= max_bytes_to_consume && !self.matcher.in_delimiter() {
                    break;
                }
                match self.matcher.push(byte) {
                    Step::Continue => used += 1,
                    Step::Complete(len) => {
                        used += 1;
                        found = Some(len);
                        break;
                    }
                    Step::CompleteBefore(len) => {
                        found = Some(len);
                        break;
                    }
                }
            }
            let room = max_record_length.saturating_sub(record.len());
            record.extend_from_slice(&available[..used.min(room)]);
            let gave_up = found.is_none() && used < available.len();
            self.buf.consume(used);
            consumed += used;
            if let Some(len) = found {
                break len;
            }
            if gave_up {
                incomplete = true;
                break 0;
            }
        };
        // stored bytes are a prefix of everything consumed, so this drops the delimiter
        record.truncate((consumed - delimiter_length).min(max_record_length));

        let boundary = match self.split_length {
            Some(split_length) if delimiter_length > 1 && self.matcher.can_straddle() => {
                let delimiter_end = self.bytes_read + consumed as u64;
                let delimiter_start = delimiter_end - delimiter_length as u64;
                if delimiter_start < split_length && split_length < delimiter_end {
                    Boundary::Overrun
                } else {
                    Boundary::Complete
                }
            }
            _ => Boundary::Complete,
        };
        self.bytes_read += consumed as u64;
        Ok(ScanResult {
            bytes_consumed: consumed,
            boundary,
            incomplete,
        })
    }
}
