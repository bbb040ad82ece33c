use anyhow::{Result, anyhow};
use std::{fmt::Display, str::FromStr};

/// How records are terminated in the byte stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Delimiter {
    /// Any of "\n", "\r" or "\r\n".
    #[default]
    DefaultNewline,
    /// A fixed, non-empty byte sequence supplied by the caller.
    Bytes(Vec<u8>),
}

impl Delimiter {
    /// Create an explicit delimiter. Error if `bytes` is empty.
    pub fn bytes<B: Into<Vec<u8>>>(bytes: B) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            Err(anyhow!("Record delimiter cannot be empty"))
        } else {
            Ok(Delimiter::Bytes(bytes))
        }
    }

    /// Parse delimiter text as given on the command line. Recognizes the escapes `\n`, `\r`, `\t`,
    /// `\0`, `\\` and `\xHH`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut bytes: Vec<u8> = Vec::with_capacity(text.len());
        let mut chars = text.bytes();
        while let Some(c) = chars.next() {
            if c != b'\\' {
                bytes.push(c);
                continue;
            }
            match chars.next() {
                Some(b'n') => bytes.push(b'\n'),
                Some(b'r') => bytes.push(b'\r'),
                Some(b't') => bytes.push(b'\t'),
                Some(b'0') => bytes.push(0u8),
                Some(b'\\') => bytes.push(b'\\'),
                Some(b'x') => {
                    let hex: Vec<u8> = chars.by_ref().take(2).collect();
                    let hex = std::str::from_utf8(&hex)?;
                    let value = u8::from_str_radix(hex, 16)
                        .map_err(|err| anyhow!("Bad hex escape \\x{hex} in {text:?}: {err}"))?;
                    bytes.push(value);
                }
                Some(other) => {
                    return Err(anyhow!(
                        "Unknown escape \\{} in delimiter {text:?}",
                        other as char
                    ));
                }
                None => return Err(anyhow!("Dangling backslash in delimiter {text:?}")),
            }
        }
        Self::bytes(bytes)
    }

    /// Bytes written after each record when records are re-serialized.
    pub fn terminator(&self) -> &[u8] {
        match self {
            Delimiter::DefaultNewline => b"\n",
            Delimiter::Bytes(bytes) => bytes,
        }
    }

    /// Whether two occurrences of the delimiter can overlap, as in "aa" or "\r\n\r\n". Where such a
    /// delimiter matches depends on every byte before it, not just on nearby bytes.
    pub fn overlaps_itself(&self) -> bool {
        match self {
            Delimiter::DefaultNewline => false,
            Delimiter::Bytes(pattern) => failure_table(pattern).last().is_some_and(|&k| k > 0),
        }
    }

    /// Get a fresh matcher for this delimiter.
    pub fn matcher(&self) -> DelimiterMatcher {
        match self {
            Delimiter::DefaultNewline => DelimiterMatcher::Newline { after_cr: false },
            Delimiter::Bytes(pattern) => DelimiterMatcher::Sequence {
                failure: failure_table(pattern),
                pattern: pattern.clone(),
                matched: 0,
            },
        }
    }
}

impl FromStr for Delimiter {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

impl Display for Delimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delimiter::DefaultNewline => write!(f, "newline"),
            Delimiter::Bytes(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// Outcome of feeding one byte to a [`DelimiterMatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// The byte belongs to the record, or to a delimiter that is not complete yet.
    Continue,
    /// The byte completed a delimiter of the given total length.
    Complete(usize),
    /// A delimiter of the given length was already complete before this byte. The byte starts the
    /// next record and must not be consumed.
    CompleteBefore(usize),
}

/// Incremental delimiter matcher. State carries over between calls, so a delimiter split across
/// two buffer fills is still found.
#[derive(Clone, Debug)]
pub enum DelimiterMatcher {
    Newline {
        after_cr: bool,
    },
    Sequence {
        pattern: Vec<u8>,
        failure: Vec<usize>,
        matched: usize,
    },
}

impl DelimiterMatcher {
    /// Feed the next byte of the stream.
    pub fn push(&mut self, byte: u8) -> Step {
        match self {
            DelimiterMatcher::Newline { after_cr } => {
                if *after_cr {
                    *after_cr = false;
                    if byte == b'\n' {
                        Step::Complete(2)
                    } else {
                        Step::CompleteBefore(1)
                    }
                } else if byte == b'\n' {
                    Step::Complete(1)
                } else {
                    *after_cr = byte == b'\r';
                    Step::Continue
                }
            }
            DelimiterMatcher::Sequence {
                pattern,
                failure,
                matched,
            } => loop {
                if pattern[*matched] == byte {
                    *matched += 1;
                    if *matched == pattern.len() {
                        *matched = 0;
                        return Step::Complete(pattern.len());
                    }
                    return Step::Continue;
                }
                if *matched == 0 {
                    return Step::Continue;
                }
                *matched = failure[*matched - 1];
            },
        }
    }

    /// Signal end of input. Returns the length of a delimiter completed by the end of the stream (a
    /// trailing "\r"), or 0. A partially matched explicit delimiter is record data, not a delimiter.
    pub fn finish(&mut self) -> usize {
        let pending_cr = matches!(self, DelimiterMatcher::Newline { after_cr: true });
        self.reset();
        if pending_cr { 1 } else { 0 }
    }

    /// True while the bytes seen so far end in a possible (incomplete) delimiter.
    pub fn in_delimiter(&self) -> bool {
        match self {
            DelimiterMatcher::Newline { after_cr } => *after_cr,
            DelimiterMatcher::Sequence { matched, .. } => *matched > 0,
        }
    }

    /// Forget any partial match.
    pub fn reset(&mut self) {
        match self {
            DelimiterMatcher::Newline { after_cr } => *after_cr = false,
            DelimiterMatcher::Sequence { matched, .. } => *matched = 0,
        }
    }

    /// Whether a split end falling inside this delimiter hides it from the next split. A lone "\n"
    /// left over from "\r\n" is still a delimiter on its own, so only explicit multi-byte
    /// sequences qualify.
    pub fn can_straddle(&self) -> bool {
        matches!(self, DelimiterMatcher::Sequence { pattern, .. } if pattern.len() > 1)
    }
}

/// Knuth-Morris-Pratt failure table: entry i is the length of the longest proper prefix of
/// pattern[..=i] that is also its suffix.
fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut failure = vec![0usize; pattern.len()];
    let mut k = 0usize;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = failure[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        failure[i] = k;
    }
    failure
}
