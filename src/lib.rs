//! # zipvfs
//!
//! A read-only virtual filesystem over ZIP archives.
//!
//! This library presents the contents of a ZIP file as a hierarchical,
//! read-only filesystem: existence tests, directory enumeration,
//! modification-time stat, transparent resolution of UNIX-style symbolic
//! links stored inside the archive, and streaming sequential or
//! random-access reads with on-the-fly DEFLATE decompression.
//!
//! Archives are indexed from the central directory alone; nothing seeks
//! across the archive body until an entry is first opened, which keeps
//! opening cheap even on slow media. Byte sources are pluggable through
//! the [`ReadAt`] trait, with implementations for local files, in-memory
//! buffers, and remote files over HTTP Range requests.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use zipvfs::{LocalFileReader, ZipArchive};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new(Path::new("assets.zip"))?);
//!     let mut archive = ZipArchive::open(reader, "assets.zip").await?;
//!
//!     for name in archive.enumerate("", false)? {
//!         println!("{name}");
//!     }
//!
//!     let mut file = archive.open_read("textures/stone.png").await?;
//!     let mut buf = vec![0u8; file.len() as usize];
//!     file.read(&mut buf).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::ZipError;
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use zip::{CompressionMethod, ZipArchive, ZipEntry, ZipFileReader};
