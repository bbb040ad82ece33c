use flate2::bufread::{MultiGzDecoder, ZlibDecoder};
use log::debug;
use std::{
    fmt::Display,
    io::{self, BufRead, Read},
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

/// First bytes of a gzipped file
pub const GZIP_MAGIC_NUMBER: [u8; 2] = [0x1fu8, 0x8bu8];
/// Size of the decompressed-data buffer each decompressor carries
const DECOMPRESSED_BUFFER_SIZE: usize = 64 * 1024;

/// Supported compression formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    /// gzip, including multi-member files such as BGZF
    Gzip,
    /// zlib-wrapped deflate
    Zlib,
}

impl Codec {
    /// Determine codec from the file extension: ".gz" or ".bgz" is gzip, ".deflate" or ".zz" is
    /// zlib, anything else is uncompressed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Codec> {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some("gz") | Some("bgz") => Some(Codec::Gzip),
            Some("deflate") | Some("zz") => Some(Codec::Zlib),
            _ => None,
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Gzip => write!(f, "gzip"),
            Codec::Zlib => write!(f, "zlib"),
        }
    }
}

/// Reusable resources for decompressing one codec: the buffer that decompressed bytes are served
/// from.
pub struct Decompressor {
    codec: Codec,
    buffer: Box<[u8]>,
}

impl Decompressor {
    pub fn new(codec: Codec) -> Self {
        Decompressor {
            codec,
            buffer: vec![0u8; DECOMPRESSED_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }
}

/// Shared pool of [`Decompressor`]s. A process reading many splits would otherwise allocate
/// buffers for every split.
#[derive(Default)]
pub struct DecompressorPool {
    idle: Mutex<Vec<Decompressor>>,
    created: AtomicUsize,
}

impl DecompressorPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Borrow a decompressor for `codec`, creating one if none is idle. It returns to the pool when
    /// the guard is released or dropped.
    pub fn acquire(self: &Arc<Self>, codec: Codec) -> PooledDecompressor {
        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            idle.iter()
                .position(|decompressor| decompressor.codec == codec)
                .map(|idx| idle.swap_remove(idx))
        };
        let decompressor = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            debug!("Creating new {codec} decompressor");
            Decompressor::new(codec)
        });
        PooledDecompressor {
            pool: Arc::clone(self),
            decompressor: Some(decompressor),
        }
    }

    fn release(&self, decompressor: Decompressor) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decompressor);
    }

    /// Number of idle decompressors for `codec`.
    pub fn idle(&self, codec: Codec) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|decompressor| decompressor.codec == codec)
            .count()
    }

    /// Number of decompressors ever created by this pool.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

/// A [`Decompressor`] on loan from a [`DecompressorPool`]. Returned exactly once, by
/// [`PooledDecompressor::release`] or on drop.
pub struct PooledDecompressor {
    pool: Arc<DecompressorPool>,
    decompressor: Option<Decompressor>,
}

impl PooledDecompressor {
    /// Get the decompressor. Error if it has already been returned to the pool.
    pub fn get_mut(&mut self) -> io::Result<&mut Decompressor> {
        self.decompressor
            .as_mut()
            .ok_or_else(|| io::Error::other("Decompressor was already returned to the pool"))
    }

    /// Return the decompressor to the pool. Returns false if it was already returned.
    pub fn release(&mut self) -> bool {
        match self.decompressor.take() {
            Some(decompressor) => {
                self.pool.release(decompressor);
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.decompressor.is_none()
    }
}

impl Drop for PooledDecompressor {
    fn drop(&mut self) {
        self.release();
    }
}

enum Decoder<R> {
    Gzip(MultiGzDecoder<R>),
    Zlib(ZlibDecoder<R>),
    /// Empty input holds no stream at all
    Empty(R),
}

impl<R: BufRead> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Gzip(inner) => inner.read(buf),
            Decoder::Zlib(inner) => inner.read(buf),
            Decoder::Empty(_) => Ok(0),
        }
    }
}

/// Streaming decompressor over a buffered source. Gzip input may hold any number of concatenated
/// members, each checked against its CRC32 and length. Decompressed bytes are buffered in the
/// pooled [`Decompressor`].
pub struct DecompressingReader<R> {
    decoder: Decoder<R>,
    decompressor: PooledDecompressor,
    codec: Codec,
    /// Next unread byte of the decompressed buffer
    pos: usize,
    filled: usize,
}

impl<R: BufRead> DecompressingReader<R> {
    /// Wrap `inner`, which must be positioned at the start of the compressed stream.
    pub fn new(mut inner: R, mut decompressor: PooledDecompressor) -> io::Result<Self> {
        let codec = decompressor.get_mut()?.codec();
        let decoder = if inner.fill_buf()?.is_empty() {
            Decoder::Empty(inner)
        } else {
            match codec {
                Codec::Gzip => Decoder::Gzip(MultiGzDecoder::new(inner)),
                Codec::Zlib => Decoder::Zlib(ZlibDecoder::new(inner)),
            }
        };
        Ok(DecompressingReader {
            decoder,
            decompressor,
            codec,
            pos: 0,
            filled: 0,
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Get the compressed source.
    pub fn get_mut(&mut self) -> &mut R {
        match &mut self.decoder {
            Decoder::Gzip(inner) => inner.get_mut(),
            Decoder::Zlib(inner) => inner.get_mut(),
            Decoder::Empty(inner) => inner,
        }
    }

    /// Return the decompressor to its pool. Further reads report end of stream.
    pub fn release(&mut self) -> bool {
        self.pos = 0;
        self.filled = 0;
        self.decompressor.release()
    }
}

impl<R: BufRead> Read for DecompressingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let num_bytes = available.len().min(buf.len());
        buf[..num_bytes].copy_from_slice(&available[..num_bytes]);
        self.consume(num_bytes);
        Ok(num_bytes)
    }
}

impl<R: BufRead> BufRead for DecompressingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.decompressor.is_released() {
            return Ok(&[]);
        }
        let buffer = &mut self.decompressor.get_mut()?.buffer;
        if self.pos >= self.filled {
            self.filled = self.decoder.read(buffer)?;
            self.pos = 0;
        }
        Ok(&buffer[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.filled);
    }
}

#[cfg(test)]
mod tests {
    use super::{Codec, DecompressingReader, DecompressorPool};
    use flate2::{
        Compression, GzBuilder,
        write::{GzEncoder, ZlibEncoder},
    };
    use rstest::rstest;
    use std::io::{BufRead, BufReader, Cursor, ErrorKind, Read, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decompress_all(compressed: Vec<u8>, codec: Codec, capacity: usize) -> std::io::Result<Vec<u8>> {
        let pool = DecompressorPool::new();
        let mut reader = DecompressingReader::new(
            BufReader::with_capacity(capacity, Cursor::new(compressed)),
            pool.acquire(codec),
        )?;
        let mut plain = Vec::new();
        reader.read_to_end(&mut plain)?;
        Ok(plain)
    }

    #[rstest]
    #[case("reads.txt.gz", Some(Codec::Gzip))]
    #[case("reads.bgz", Some(Codec::Gzip))]
    #[case("table.deflate", Some(Codec::Zlib))]
    #[case("table.zz", Some(Codec::Zlib))]
    #[case("table.txt", None)]
    #[case("-", None)]
    fn test_codec_from_path(#[case] path: &str, #[case] expected: Option<Codec>) {
        assert_eq!(Codec::from_path(path), expected);
    }

    #[rstest(capacity => [1, 7, 8192])]
    fn test_multi_member_gzip(capacity: usize) {
        let mut compressed = gzip(b"first member\n");
        compressed.extend(gzip(b""));
        compressed.extend(gzip(b"second member\n"));
        let plain = decompress_all(compressed, Codec::Gzip, capacity).unwrap();
        assert_eq!(plain, b"first member\nsecond member\n");
    }

    #[test]
    fn test_gzip_optional_header_fields() {
        let mut encoder = GzBuilder::new()
            .filename("records.txt")
            .comment("made for a test")
            .extra(vec![1u8, 2, 3])
            .write(Vec::new(), Compression::best());
        encoder.write_all(b"a\nb\n").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decompress_all(compressed, Codec::Gzip, 3).unwrap(), b"a\nb\n");
    }

    #[test]
    fn test_zlib() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|n| n.to_le_bytes()).collect();
        assert_eq!(decompress_all(zlib(&data), Codec::Zlib, 512).unwrap(), data);
    }

    #[test]
    fn test_empty_input_is_empty_stream() {
        assert!(decompress_all(Vec::new(), Codec::Gzip, 64).unwrap().is_empty());
        assert!(decompress_all(Vec::new(), Codec::Zlib, 64).unwrap().is_empty());
    }

    #[test]
    fn test_crc_mismatch_is_an_error() {
        let mut compressed = gzip(b"checksummed\n");
        let crc_idx = compressed.len() - 8;
        compressed[crc_idx] ^= 0xff;
        assert!(decompress_all(compressed, Codec::Gzip, 8192).is_err());
    }

    #[test]
    fn test_truncated_gzip_is_an_error() {
        let compressed = gzip(b"this stream gets cut short before its trailer\n");
        let truncated = compressed[..compressed.len() - 4].to_vec();
        let err = decompress_all(truncated, Codec::Gzip, 8192).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_bad_magic() {
        assert!(decompress_all(b"plain text\n".to_vec(), Codec::Gzip, 8192).is_err());
    }

    #[test]
    fn test_pool_reuses_decompressors() {
        let pool = DecompressorPool::new();
        {
            let _first = pool.acquire(Codec::Gzip);
            let _second = pool.acquire(Codec::Gzip);
            assert_eq!(pool.created(), 2);
        }
        assert_eq!(pool.idle(Codec::Gzip), 2);
        let mut again = pool.acquire(Codec::Gzip);
        assert_eq!(pool.created(), 2);
        assert_eq!(pool.idle(Codec::Gzip), 1);
        assert!(again.release());
        assert!(!again.release());
        assert!(again.get_mut().is_err());
        drop(again);
        assert_eq!(pool.idle(Codec::Gzip), 2);

        let _zlib = pool.acquire(Codec::Zlib);
        assert_eq!(pool.created(), 3);
        assert_eq!(pool.idle(Codec::Zlib), 0);
    }

    #[test]
    fn test_reused_decompressor_starts_fresh() {
        let pool = DecompressorPool::new();
        let compressed = gzip(b"half read");
        let mut reader = DecompressingReader::new(
            BufReader::new(Cursor::new(compressed)),
            pool.acquire(Codec::Gzip),
        )
        .unwrap();
        let mut partial = [0u8; 4];
        reader.read_exact(&mut partial).unwrap();
        drop(reader);

        let mut reader = DecompressingReader::new(
            BufReader::new(Cursor::new(gzip(b"whole"))),
            pool.acquire(Codec::Gzip),
        )
        .unwrap();
        let mut plain = String::new();
        reader.read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "whole");
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_release_ends_stream() {
        let pool = DecompressorPool::new();
        let mut reader = DecompressingReader::new(
            BufReader::new(Cursor::new(zlib(b"never read"))),
            pool.acquire(Codec::Zlib),
        )
        .unwrap();
        assert_eq!(reader.fill_buf().unwrap(), b"never read");
        assert!(reader.release());
        assert!(reader.fill_buf().unwrap().is_empty());
        assert!(!reader.release());
        assert_eq!(pool.idle(Codec::Zlib), 1);
    }
}
