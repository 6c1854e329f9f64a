//! Error taxonomy for archive access.
//!
//! Every fallible library operation returns [`ZipError`]. The variants are
//! deliberately coarse: callers dispatch on the kind (missing entry,
//! corrupted archive, unsupported feature) rather than on message text.

use thiserror::Error;

/// Errors produced by archive parsing, resolution, and file access.
#[derive(Debug, Error)]
pub enum ZipError {
    /// No end-of-central-directory record was found within the search bound.
    #[error("not a ZIP archive")]
    NotAnArchive,

    /// A structure inside the archive failed validation.
    #[error("corrupted archive: {0}")]
    Corrupted(&'static str),

    /// The archive uses a feature this reader does not implement, such as
    /// multi-disk spanning or a compression method other than STORE and
    /// DEFLATE.
    #[error("unsupported archive: {0}")]
    Unsupported(&'static str),

    /// The named entry does not exist in the archive index.
    #[error("no such file")]
    NoSuchFile,

    /// The named entry exists but is not a directory.
    #[error("not a directory")]
    NotADirectory,

    /// A read or seek was requested beyond the end of the entry.
    #[error("past end of file")]
    PastEof,

    /// Following symbolic links revisited an entry already being resolved.
    #[error("infinite symbolic link loop")]
    SymlinkLoop,

    /// The archive is mounted read-only; no write operation is available.
    #[error("archive is read-only")]
    ReadOnly,

    /// The DEFLATE stream could not be decoded.
    #[error("streaming decode failed: {0}")]
    Decode(#[from] flate2::DecompressError),

    /// The underlying byte source failed.
    #[error("archive source error: {0}")]
    Source(anyhow::Error),
}

impl From<anyhow::Error> for ZipError {
    fn from(err: anyhow::Error) -> Self {
        ZipError::Source(err)
    }
}

// Header parsing reads from in-memory buffers through `std::io::Cursor`;
// the only failure mode there is running off the end of the record.
impl From<std::io::Error> for ZipError {
    fn from(_: std::io::Error) -> Self {
        ZipError::Corrupted("truncated record")
    }
}
