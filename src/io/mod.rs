mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use anyhow::{Result, bail};
use async_trait::async_trait;

/// Trait for random access reading from an archive byte source.
///
/// Implementations are positionless: every read names its own offset, so
/// any number of open file handles can share one source without contending
/// on a seek position.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read, which may be short near the end
    /// of the source. A read at or past the end returns 0.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source.
    fn size(&self) -> u64;

    /// Read until the buffer is full, failing if the source ends first.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0;
        while pos < buf.len() {
            let n = self.read_at(offset + pos as u64, &mut buf[pos..]).await?;
            if n == 0 {
                bail!("unexpected end of archive source");
            }
            pos += n;
        }
        Ok(())
    }
}

/// In-memory byte source, convenient for archives already loaded or built
/// in memory.
#[async_trait]
impl ReadAt for Vec<u8> {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = (offset as usize).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}
