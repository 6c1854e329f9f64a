//! Streaming reads of one archive entry.
//!
//! A [`ZipFileReader`] is created by
//! [`ZipArchive::open_read`](super::ZipArchive::open_read) after the entry
//! has been resolved, and owns everything it needs: a shared handle on the
//! byte source, the entry's data window, and (for DEFLATE entries) a fixed
//! compressed-input buffer plus a raw inflater. Stored entries are plain
//! positioned reads.
//!
//! DEFLATE is a forward-only stream, so seeking backward restarts the
//! inflater at the beginning of the entry and decompresses up to the
//! target; seeking forward decompresses and discards. Periodic
//! checkpointing could avoid the restart but has not been needed.

use std::sync::Arc;

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::ZipError;
use crate::io::ReadAt;

use super::entry::ZipEntry;
use super::structures::CompressionMethod;

/// Size of the compressed-input buffer allocated per open DEFLATE entry.
/// Stored entries read straight into the caller's buffer and skip it.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Scratch granularity for seeks that decompress and discard.
const SEEK_SCRATCH_SIZE: usize = 512;

struct Inflater {
    stream: Decompress,
    buffer: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("buf_pos", &self.buf_pos)
            .field("buf_len", &self.buf_len)
            .finish()
    }
}

impl Inflater {
    fn new() -> Self {
        Inflater {
            // Raw DEFLATE: ZIP entries carry no zlib framing.
            stream: Decompress::new(false),
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buf_pos: 0,
            buf_len: 0,
        }
    }
}

/// An archive entry opened for streaming, sequential or random-access
/// reading.
pub struct ZipFileReader<R: ReadAt> {
    reader: Arc<R>,
    /// Offset of the first byte of this entry's data in the archive.
    data_offset: u64,
    method: CompressionMethod,
    compressed_size: u32,
    uncompressed_size: u32,
    /// Current position in the decompressed stream; this is `tell`.
    uncompressed_position: u64,
    /// How much of the compressed stream has been fed to the inflater.
    compressed_position: u64,
    inflater: Option<Inflater>,
}

impl<R: ReadAt> std::fmt::Debug for ZipFileReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipFileReader")
            .field("data_offset", &self.data_offset)
            .field("method", &self.method)
            .field("compressed_size", &self.compressed_size)
            .field("uncompressed_size", &self.uncompressed_size)
            .field("uncompressed_position", &self.uncompressed_position)
            .field("compressed_position", &self.compressed_position)
            .field("inflater", &self.inflater)
            .finish()
    }
}

impl<R: ReadAt> ZipFileReader<R> {
    /// Build a handle over a resolved entry. The entry's offset must
    /// already point at its first data byte.
    pub(crate) fn new(reader: Arc<R>, entry: &ZipEntry) -> Self {
        let inflater = match entry.method {
            CompressionMethod::Deflate => Some(Inflater::new()),
            _ => None,
        };
        ZipFileReader {
            reader,
            data_offset: entry.offset,
            method: entry.method,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            uncompressed_position: 0,
            compressed_position: 0,
            inflater,
        }
    }

    /// Decompressed length of the entry.
    pub fn len(&self) -> u64 {
        self.uncompressed_size as u64
    }

    pub fn is_empty(&self) -> bool {
        self.uncompressed_size == 0
    }

    /// Current read position in the decompressed stream.
    pub fn tell(&self) -> u64 {
        self.uncompressed_position
    }

    /// Whether the read position has reached the end of the entry.
    pub fn eof(&self) -> bool {
        self.uncompressed_position >= self.uncompressed_size as u64
    }

    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// Returns the number of bytes read; 0 once the end of the entry is
    /// reached. Reading at EOF does not invalidate the handle.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ZipError> {
        match self.read_objects(buf, 1, buf.len()).await {
            Ok(n) => Ok(n),
            Err(ZipError::PastEof) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Read up to `obj_count` objects of `obj_size` bytes each, returning
    /// the number of whole objects read.
    ///
    /// The request is clamped to the bytes remaining in the entry, rounded
    /// down to a whole number of objects.
    ///
    /// # Errors
    ///
    /// [`ZipError::PastEof`] when a nonzero request clamps to zero whole
    /// objects; the handle stays usable.
    pub async fn read_objects(
        &mut self,
        buf: &mut [u8],
        obj_size: usize,
        obj_count: usize,
    ) -> Result<usize, ZipError> {
        let max_read = obj_size.saturating_mul(obj_count).min(buf.len());
        if max_read == 0 {
            return Ok(0);
        }

        let avail = (self.uncompressed_size as u64).saturating_sub(self.uncompressed_position);
        let mut want = (max_read as u64).min(avail) as usize;
        want -= want % obj_size;
        if want == 0 {
            return Err(ZipError::PastEof);
        }

        let got = match self.method {
            CompressionMethod::Stored => {
                self.reader
                    .read_exact_at(
                        self.data_offset + self.uncompressed_position,
                        &mut buf[..want],
                    )
                    .await?;
                want
            }
            CompressionMethod::Deflate => self.inflate_into_limit(buf, want).await?,
            CompressionMethod::Unknown(_) => {
                return Err(ZipError::Unsupported("compression method"));
            }
        };

        self.uncompressed_position += got as u64;
        Ok(got / obj_size)
    }

    /// Reposition the stream.
    ///
    /// Stored entries reposition directly. DEFLATE entries decompress and
    /// discard up to the target, restarting the inflater from the
    /// beginning of the entry when the target lies behind the current
    /// position.
    ///
    /// # Errors
    ///
    /// [`ZipError::PastEof`] when the target exceeds the entry length.
    pub async fn seek(&mut self, target: u64) -> Result<(), ZipError> {
        if target > self.uncompressed_size as u64 {
            return Err(ZipError::PastEof);
        }

        match self.method {
            CompressionMethod::Stored => {
                self.uncompressed_position = target;
                Ok(())
            }
            CompressionMethod::Deflate => {
                if target < self.uncompressed_position {
                    let inflater = self
                        .inflater
                        .as_mut()
                        .ok_or(ZipError::Corrupted("inflater state missing"))?;
                    inflater.stream.reset(false);
                    inflater.buf_pos = 0;
                    inflater.buf_len = 0;
                    self.uncompressed_position = 0;
                    self.compressed_position = 0;
                }

                let mut scratch = [0u8; SEEK_SCRATCH_SIZE];
                while self.uncompressed_position < target {
                    let step = (target - self.uncompressed_position).min(SEEK_SCRATCH_SIZE as u64);
                    let got = self.read(&mut scratch[..step as usize]).await?;
                    if got == 0 {
                        return Err(ZipError::Corrupted("stream ended before seek target"));
                    }
                }
                Ok(())
            }
            CompressionMethod::Unknown(_) => Err(ZipError::Unsupported("compression method")),
        }
    }

    /// Decompress into `buf[..limit]`, refilling the compressed-input
    /// buffer from the source as the inflater drains it.
    async fn inflate_into_limit(
        &mut self,
        buf: &mut [u8],
        limit: usize,
    ) -> Result<usize, ZipError> {
        let inflater = self
            .inflater
            .as_mut()
            .ok_or(ZipError::Corrupted("inflater state missing"))?;

        let mut produced = 0;
        while produced < limit {
            if inflater.buf_pos == inflater.buf_len {
                let remaining =
                    (self.compressed_size as u64).saturating_sub(self.compressed_position);
                let take = remaining.min(READ_BUFFER_SIZE as u64) as usize;
                if take > 0 {
                    self.reader
                        .read_exact_at(
                            self.data_offset + self.compressed_position,
                            &mut inflater.buffer[..take],
                        )
                        .await?;
                    self.compressed_position += take as u64;
                    inflater.buf_pos = 0;
                    inflater.buf_len = take;
                }
            }

            let before_in = inflater.stream.total_in();
            let before_out = inflater.stream.total_out();
            let status = inflater.stream.decompress(
                &inflater.buffer[inflater.buf_pos..inflater.buf_len],
                &mut buf[produced..limit],
                FlushDecompress::Sync,
            )?;
            inflater.buf_pos += (inflater.stream.total_in() - before_in) as usize;
            let step = (inflater.stream.total_out() - before_out) as usize;
            produced += step;

            match status {
                Status::StreamEnd | Status::BufError => break,
                Status::Ok => {
                    // No progress with nothing left to feed means the
                    // compressed stream was shorter than advertised.
                    if step == 0
                        && inflater.buf_pos == inflater.buf_len
                        && self.compressed_position >= self.compressed_size as u64
                    {
                        break;
                    }
                }
            }
        }

        Ok(produced)
    }
}
