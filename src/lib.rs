#![deny(unsafe_code)]

pub mod config;
pub mod decompressor;
pub mod delimited_scanner;
pub mod delimiter;
pub mod diagnostics;
pub mod maybe_compressed_io;
pub mod record_reader;
pub mod split;

#[cfg(test)]
mod test_utils;
