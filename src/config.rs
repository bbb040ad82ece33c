use crate::delimiter::Delimiter;

/// Records whose consumed size reaches this many bytes are skipped. Unbounded by default.
pub const DEFAULT_MAX_RECORD_LENGTH: usize = usize::MAX;

/// Options shared by every reader of a stream.
///
/// Builder-style: start from [`ReaderConfig::new`] and chain setters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Records (including delimiter) of at least this many bytes are skipped
    max_record_length: usize,
    /// How records are terminated
    delimiter: Delimiter,
}

impl ReaderConfig {
    /// Unbounded record length, default newline delimiters.
    pub fn new() -> Self {
        Self {
            max_record_length: DEFAULT_MAX_RECORD_LENGTH,
            delimiter: Delimiter::DefaultNewline,
        }
    }

    /// Set the length at which records are considered pathological and skipped.
    pub fn max_record_length(&mut self, max_record_length: usize) -> &mut Self {
        self.max_record_length = max_record_length;
        self
    }

    /// Set the record delimiter.
    pub fn delimiter(&mut self, delimiter: Delimiter) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    /// Apply optional command-line overrides, keeping current values for `None`.
    pub fn overrides(
        &mut self,
        max_record_length: Option<usize>,
        delimiter: Option<Delimiter>,
    ) -> &mut Self {
        if let Some(max_record_length) = max_record_length {
            self.max_record_length(max_record_length);
        }
        if let Some(delimiter) = delimiter {
            self.delimiter(delimiter);
        }
        self
    }

    pub fn get_max_record_length(&self) -> usize {
        self.max_record_length
    }

    pub fn get_delimiter(&self) -> &Delimiter {
        &self.delimiter
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new()
    }
}
