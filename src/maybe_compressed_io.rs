use crate::decompressor::{Codec, DecompressingReader, DecompressorPool, GZIP_MAGIC_NUMBER};
use anyhow::{Result, anyhow};
use noodles_bgzf::io::MultithreadedWriter;
use std::{
    fs::{File, OpenOptions, create_dir_all},
    io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
    num::NonZero,
    path::Path,
    sync::Arc,
};

/// Helper function to get a File object that can be read from or written to, given the supplied
/// path. The path may be "-", in which case we will read from stdin or write to stdout
pub fn open_file<P: AsRef<Path>>(path: P, for_writing: bool) -> Result<File> {
    if path.as_ref().to_str() == Some("-") {
        let default = if for_writing {
            "/dev/stdout"
        } else {
            "/dev/stdin"
        };
        OpenOptions::new()
            .write(for_writing)
            .read(!for_writing)
            .open(default)
            .map_err(|err| anyhow!("Opening {default}: {err}"))
    } else {
        if for_writing && let Some(parent_dir) = path.as_ref().parent() {
            create_dir_all(parent_dir)?
        }
        OpenOptions::new()
            .write(for_writing)
            .read(!for_writing)
            .create(for_writing)
            .truncate(for_writing)
            .open(path.as_ref())
            .map_err(|err| {
                let path = path.as_ref();
                anyhow!("Opening {path:?}: {err}")
            })
    }
}

/// Byte input that a split reader can scan. Besides buffered reading, a source reports its position
/// in the raw (possibly compressed) input, which is all that progress estimation can rely on when
/// the logical stream is decompressed.
pub trait SplitSource: BufRead {
    /// Bytes of the raw input consumed so far, measured from the start of the raw input.
    fn raw_position(&mut self) -> io::Result<u64>;

    /// Whether logical offsets differ from raw offsets.
    fn is_compressed(&self) -> bool {
        false
    }

    /// Give back any pooled resource held by the source. Returns true if one was returned by this
    /// call. Dropping the source has the same effect.
    fn release(&mut self) -> bool {
        false
    }
}

impl<T: AsRef<[u8]>> SplitSource for Cursor<T> {
    fn raw_position(&mut self) -> io::Result<u64> {
        Ok(self.position())
    }
}

impl<R: Read + Seek> SplitSource for BufReader<R> {
    fn raw_position(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

/// Enum for a file that may or may not be compressed.
pub enum MaybeCompressedReader {
    Compressed(DecompressingReader<BufReader<File>>),
    Uncompressed(BufReader<File>),
}

impl MaybeCompressedReader {
    /// Open a possibly compressed input path, positioned at logical `offset`. Compression is
    /// determined by the path extension (see [`Codec::from_path`]). A compressed input can only be
    /// opened at offset 0, and borrows a decompressor from `pool` until the reader is dropped or
    /// [`SplitSource::release`] is called. input_path can be set to "-" to read
    /// uncompressed stdin from the start.
    pub fn open<P: AsRef<Path>>(
        input_path: P,
        offset: u64,
        pool: &Arc<DecompressorPool>,
    ) -> Result<MaybeCompressedReader> {
        let input_path = input_path.as_ref();
        let mut input_file = open_file(input_path, false)?;
        match Codec::from_path(input_path) {
            Some(codec) => {
                if offset != 0 {
                    return Err(anyhow!(
                        "Cannot start reading {codec} input {input_path:?} at offset {offset}: \
                        compressed input can only be read from the start"
                    ));
                }
                let decompressor = pool.acquire(codec);
                let mut raw = BufReader::new(input_file);
                if codec == Codec::Gzip {
                    let first_bytes = raw.fill_buf()?;
                    let prefix = &first_bytes[..first_bytes.len().min(GZIP_MAGIC_NUMBER.len())];
                    if !GZIP_MAGIC_NUMBER.starts_with(prefix) {
                        return Err(anyhow!(
                            "{input_path:?} has a gzip extension but does not start with the gzip \
                            magic number"
                        ));
                    }
                }
                Ok(MaybeCompressedReader::Compressed(
                    DecompressingReader::new(raw, decompressor)?,
                ))
            }
            None => {
                if offset != 0 {
                    input_file
                        .seek(SeekFrom::Start(offset))
                        .map_err(|err| anyhow!("Seeking {input_path:?} to {offset}: {err}"))?;
                }
                Ok(MaybeCompressedReader::Uncompressed(BufReader::new(
                    input_file,
                )))
            }
        }
    }

    pub fn codec(&self) -> Option<Codec> {
        match self {
            MaybeCompressedReader::Compressed(inner) => Some(inner.codec()),
            MaybeCompressedReader::Uncompressed(_) => None,
        }
    }
}

impl SplitSource for MaybeCompressedReader {
    fn raw_position(&mut self) -> io::Result<u64> {
        match self {
            MaybeCompressedReader::Compressed(inner) => inner.get_mut().stream_position(),
            MaybeCompressedReader::Uncompressed(inner) => inner.stream_position(),
        }
    }

    fn is_compressed(&self) -> bool {
        matches!(self, MaybeCompressedReader::Compressed(_))
    }

    fn release(&mut self) -> bool {
        match self {
            MaybeCompressedReader::Compressed(inner) => inner.release(),
            MaybeCompressedReader::Uncompressed(_) => false,
        }
    }
}

/// impl Read trait for MaybeCompressedReader
impl Read for MaybeCompressedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MaybeCompressedReader::Compressed(inner) => inner.read(buf),
            MaybeCompressedReader::Uncompressed(inner) => inner.read(buf),
        }
    }
}

/// impl BufRead for MaybeCompressedReader
impl BufRead for MaybeCompressedReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            MaybeCompressedReader::Compressed(inner) => inner.fill_buf(),
            MaybeCompressedReader::Uncompressed(inner) => inner.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            MaybeCompressedReader::Compressed(inner) => inner.consume(amt),
            MaybeCompressedReader::Uncompressed(inner) => inner.consume(amt),
        }
    }
}

/// Enum for writing records, either BGZF-compressed or not
pub enum MaybeCompressedWriter {
    Compressed(BufWriter<MultithreadedWriter<File>>),
    Uncompressed(BufWriter<File>),
}

impl MaybeCompressedWriter {
    /// Create new writer. Compression is primarily determined by the output path (compressed if it
    /// ends in ".gz" or ".bgz", uncompressed otherwise), but when writing to stdout, the bool
    /// `compressed` will determine if output is compressed or not. Threads will only be used for
    /// compressed output.
    pub fn new<P: AsRef<Path>>(
        output_path: P,
        compressed: bool,
        threads: NonZero<usize>,
    ) -> Result<MaybeCompressedWriter> {
        let output_file = open_file(output_path.as_ref(), true)?;
        if MaybeCompressedWriter::is_compressed(output_path, compressed) {
            Ok(MaybeCompressedWriter::Compressed(BufWriter::new(
                MultithreadedWriter::with_worker_count(threads, output_file),
            )))
        } else {
            Ok(MaybeCompressedWriter::Uncompressed(BufWriter::new(
                output_file,
            )))
        }
    }

    /// Determine if output is compressed. When writing to a real path, make compressed if the path
    /// ends in ".gz" or ".bgz", uncompressed otherwise. When writing to stdout, obey `compressed`
    /// boolean.
    fn is_compressed<P: AsRef<Path>>(output_path: P, compressed: bool) -> bool {
        if output_path.as_ref().to_str() == Some("-") {
            return compressed;
        }
        Codec::from_path(output_path) == Some(Codec::Gzip)
    }

    /// Write one record followed by `terminator`, prefixed by "offset\t" if an offset is given.
    pub fn write_record(
        &mut self,
        offset: Option<u64>,
        record: &[u8],
        terminator: &[u8],
    ) -> io::Result<()> {
        if let Some(offset) = offset {
            write!(self, "{offset}\t")?;
        }
        self.write_all(record)?;
        self.write_all(terminator)
    }
}

/// impl Write trait for MaybeCompressedWriter
impl Write for MaybeCompressedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MaybeCompressedWriter::Compressed(inner) => inner.write(buf),
            MaybeCompressedWriter::Uncompressed(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            MaybeCompressedWriter::Compressed(inner) => inner.flush(),
            MaybeCompressedWriter::Uncompressed(inner) => inner.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MaybeCompressedReader, MaybeCompressedWriter, SplitSource};
    use crate::decompressor::{Codec, DecompressorPool};
    use anyhow::Result;
    use flate2::{Compression, write::ZlibEncoder};
    use rstest::rstest;
    use std::{
        fs,
        io::{BufRead, Cursor, Read, Write},
        num::NonZero,
    };
    use tempfile::TempDir;

    #[rstest(file_name => ["records.txt", "records.txt.gz", "records.bgz"])]
    fn test_writer_output_reads_back(file_name: &str) -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(file_name);
        {
            let mut writer = MaybeCompressedWriter::new(&path, false, NonZero::new(2).unwrap())?;
            writer.write_record(Some(0), b"first", b"\n")?;
            writer.write_record(None, b"second", b"<>")?;
            writer.flush()?;
        }
        let pool = DecompressorPool::new();
        let mut reader = MaybeCompressedReader::open(&path, 0, &pool)?;
        assert_eq!(reader.is_compressed(), file_name != "records.txt");
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        assert_eq!(text, "0\tfirst\nsecond<>");
        Ok(())
    }

    #[test]
    fn test_uncompressed_open_at_offset() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("plain.txt");
        fs::write(&path, b"0123456789")?;
        let pool = DecompressorPool::new();
        let mut reader = MaybeCompressedReader::open(&path, 4, &pool)?;
        assert_eq!(reader.raw_position()?, 4);
        assert_eq!(reader.fill_buf()?, b"456789");
        reader.consume(2);
        assert_eq!(reader.raw_position()?, 6);
        assert_eq!(reader.codec(), None);
        assert_eq!(pool.created(), 0);
        Ok(())
    }

    #[test]
    fn test_zlib_raw_position_advances() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("table.zz");
        let plain: Vec<u8> = (0..50_000u32).flat_map(|n| (n % 251).to_le_bytes()).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&plain)?;
        let compressed = encoder.finish()?;
        fs::write(&path, &compressed)?;

        let pool = DecompressorPool::new();
        let mut reader = MaybeCompressedReader::open(&path, 0, &pool)?;
        assert_eq!(reader.codec(), Some(Codec::Zlib));
        let mut decompressed = Vec::new();
        reader.read_to_end(&mut decompressed)?;
        assert_eq!(decompressed, plain);
        assert_eq!(reader.raw_position()?, compressed.len() as u64);
        assert!(reader.release());
        assert!(!reader.release());
        assert_eq!(pool.idle(Codec::Zlib), 1);
        Ok(())
    }

    #[test]
    fn test_compressed_open_requires_zero_offset() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("empty.gz");
        fs::write(&path, b"")?;
        let pool = DecompressorPool::new();
        assert!(MaybeCompressedReader::open(&path, 3, &pool).is_err());
        let mut reader = MaybeCompressedReader::open(&path, 0, &pool)?;
        assert_eq!(reader.fill_buf()?, b"");
        Ok(())
    }

    #[test]
    fn test_bad_gzip_magic_returns_decompressor() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("not_really.gz");
        fs::write(&path, b"plain text\n")?;
        let pool = DecompressorPool::new();
        assert!(MaybeCompressedReader::open(&path, 0, &pool).is_err());
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle(Codec::Gzip), 1);
        Ok(())
    }

    #[test]
    fn test_cursor_source() -> Result<()> {
        let mut cursor = Cursor::new(b"abc".to_vec());
        cursor.consume(2);
        assert_eq!(cursor.raw_position()?, 2);
        assert!(!cursor.is_compressed());
        Ok(())
    }
}
