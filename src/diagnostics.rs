use crate::split::Split;
use log::{debug, info};
use std::{
    fmt::Display,
    sync::{Mutex, PoisonError},
};

/// Notable but non-fatal events seen while reading a split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// A UTF-8 byte order mark at the start of the stream was removed from the first record.
    ByteOrderMarkSkipped,
    /// A record at `offset` consumed `size` bytes, reaching the record length cap, and was dropped.
    OversizedRecordSkipped { offset: u64, size: usize },
    /// A split not starting at 0 threw away the `bytes` of the record owned by the previous split.
    LeadingRecordDiscarded { split: Split, bytes: usize },
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::ByteOrderMarkSkipped => write!(f, "Found UTF-8 BOM and skipped it"),
            Diagnostic::OversizedRecordSkipped { offset, size } => {
                write!(f, "Skipped record of size {size} at pos {offset}")
            }
            Diagnostic::LeadingRecordDiscarded { split, bytes } => {
                write!(f, "Discarded {bytes} leading bytes of split {split}")
            }
        }
    }
}

/// Receiver for [`Diagnostic`] events. Readers hold one behind an `Arc`, so implementations must
/// be shareable between threads.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Forward diagnostics to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::LeadingRecordDiscarded { .. } => debug!("{diagnostic}"),
            _ => info!("{diagnostic}"),
        }
    }
}

/// Keep every diagnostic in memory, for inspection after reading.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events so far, in emission order.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records dropped for reaching the record length cap.
    pub fn num_oversized(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| matches!(event, Diagnostic::OversizedRecordSkipped { .. }))
            .count()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, diagnostic: Diagnostic) {
        debug!("{diagnostic}");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
