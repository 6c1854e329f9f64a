//! Archive handle: lifecycle, lazy entry resolution, and the directory
//! operations that make the archive behave like a read-only filesystem.
//!
//! Opening an archive parses only the end-of-central-directory record and
//! the central directory, then sorts the entries by name. Nothing seeks
//! across the archive body until an entry is first used: at that point its
//! local file header is validated, its offset is fixed up to the start of
//! file data, and if it is a symbolic link the target path is read,
//! normalized, and chased to a terminal non-symlink entry. Resolution
//! outcomes (including failures) are cached on the entry.

use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::{Decompress, FlushDecompress};
use std::io::Cursor;

use crate::error::ZipError;
use crate::io::ReadAt;

use super::entry::{Resolution, ZipEntry, expand_link_path, find_entry, find_start_of_dir};
use super::file::ZipFileReader;
use super::parser;
use super::structures::{CompressionMethod, LOCAL_FILE_HEADER_SIZE, LOCAL_FILE_SIG, host_type};

/// An open ZIP archive, presented as a read-only virtual filesystem.
///
/// Operations that can trigger entry resolution take `&mut self`, since
/// resolution caches its outcome on the entry; pure index queries take
/// `&self`. Open file handles share the underlying byte source and stay
/// independent of the archive value itself.
#[derive(Debug)]
pub struct ZipArchive<R: ReadAt> {
    reader: Arc<R>,
    name: String,
    entries: Vec<ZipEntry>,
}

impl<R: ReadAt> ZipArchive<R> {
    /// Test whether the source looks like a ZIP archive, either by its
    /// leading local-header signature or by finding an end-of-central-
    /// directory record (which also admits self-extracting archives).
    pub async fn is_archive(reader: &R) -> bool {
        parser::is_archive(reader).await
    }

    /// Open an archive: locate and validate the end-of-central-directory
    /// record, load the central directory, and build the sorted entry
    /// index. Local file headers are not read here.
    ///
    /// # Errors
    ///
    /// [`ZipError::NotAnArchive`] when no end record exists,
    /// [`ZipError::Unsupported`] for multi-disk or otherwise out-of-scope
    /// archives, [`ZipError::Corrupted`] for malformed directory records.
    pub async fn open(reader: Arc<R>, name: impl Into<String>) -> Result<Self, ZipError> {
        let entries = parser::load_directory(reader.as_ref()).await?;
        Ok(ZipArchive {
            reader,
            name: name.into(),
            entries,
        })
    }

    /// Display name the archive was opened under (path or URL).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries in the archive.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// All entries, sorted ascending by name.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Look up one entry by exact name.
    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        find_entry(&self.entries, name).map(|i| &self.entries[i])
    }

    /// Whether an entry with this exact name exists.
    pub fn exists(&self, name: &str) -> bool {
        find_entry(&self.entries, name).is_some()
    }

    /// Whether the name refers to a symbolic link entry.
    ///
    /// # Errors
    ///
    /// [`ZipError::NoSuchFile`] when the name does not exist.
    pub fn is_symlink(&self, name: &str) -> Result<bool, ZipError> {
        let index = find_entry(&self.entries, name).ok_or(ZipError::NoSuchFile)?;
        Ok(self.entries[index].is_symlink())
    }

    /// Modification time of the named entry, in seconds since the Unix
    /// epoch.
    ///
    /// # Errors
    ///
    /// [`ZipError::NoSuchFile`] when the name does not exist.
    pub fn last_mod_time(&self, name: &str) -> Result<i64, ZipError> {
        let index = find_entry(&self.entries, name).ok_or(ZipError::NoSuchFile)?;
        Ok(self.entries[index].last_mod_time)
    }

    /// Whether the name refers to a directory.
    ///
    /// Any entry living under `name/` makes it a directory. Otherwise the
    /// name must be a symbolic link whose terminal target is a directory;
    /// that can force resolution, which is why this takes `&mut self`.
    ///
    /// # Errors
    ///
    /// [`ZipError::NoSuchFile`] when the name does not exist at all;
    /// resolution errors when a symbolic link entry turns out broken.
    pub async fn is_directory(&mut self, name: &str) -> Result<bool, ZipError> {
        if find_start_of_dir(&self.entries, name, true).is_some() {
            return Ok(true);
        }

        let index = find_entry(&self.entries, name).ok_or(ZipError::NoSuchFile)?;
        if self.entries[index].resolved == Resolution::UnresolvedSymlink {
            self.resolve(index).await?;
        }

        match self.entries[index].resolved {
            Resolution::Resolved { link: Some(target) } => Ok(find_start_of_dir(
                &self.entries,
                &self.entries[target].name,
                true,
            )
            .is_some()),
            Resolution::BrokenFile | Resolution::BrokenSymlink => {
                Err(ZipError::Corrupted("entry failed to resolve previously"))
            }
            _ => Ok(false),
        }
    }

    /// List the direct children of a directory.
    ///
    /// Returns one name per child: plain entries by their final component,
    /// and each immediate subdirectory once. Symbolic links are skipped
    /// when `omit_symlinks` is set, and the directory's own entry is never
    /// reported. The empty string enumerates the archive root.
    ///
    /// # Errors
    ///
    /// [`ZipError::NotADirectory`] when the name exists but nothing lies
    /// under it, [`ZipError::NoSuchFile`] when it does not exist at all.
    pub fn enumerate(&self, dirname: &str, omit_symlinks: bool) -> Result<Vec<String>, ZipError> {
        let mut dir = dirname.as_bytes();
        if let Some((&b'/', head)) = dir.split_last() {
            dir = head;
        }
        let dlen = dir.len();
        let head = if dlen > 0 { dlen + 1 } else { 0 };

        let start = match find_start_of_dir(&self.entries, dirname, false) {
            Some(start) => start,
            None if self.exists(dirname) => return Err(ZipError::NotADirectory),
            None => return Err(ZipError::NoSuchFile),
        };

        let mut names = Vec::new();
        let mut i = start;
        while i < self.entries.len() {
            let entry = &self.entries[i];
            let name = entry.name.as_bytes();
            if dlen > 0 && (name.len() < head || &name[..dlen] != dir || name[dlen] != b'/') {
                break; // past this directory's entries
            }

            let tail = &name[head..];
            if tail.is_empty() || (omit_symlinks && entry.is_symlink()) {
                i += 1;
                continue;
            }

            match tail.iter().position(|&c| c == b'/') {
                None => {
                    names.push(String::from_utf8_lossy(tail).into_owned());
                    i += 1;
                }
                Some(slash) => {
                    // A deeper path: report the subdirectory once, then
                    // skip everything sharing it.
                    names.push(String::from_utf8_lossy(&tail[..slash]).into_owned());
                    let sub = &self.entries[i].name.as_bytes()[..head + slash + 1];
                    let mut j = i + 1;
                    while j < self.entries.len()
                        && self.entries[j].name.as_bytes().starts_with(sub)
                    {
                        j += 1;
                    }
                    i = j;
                }
            }
        }

        Ok(names)
    }

    /// Open an entry for reading. Symbolic links are followed to their
    /// terminal target.
    ///
    /// # Errors
    ///
    /// [`ZipError::NoSuchFile`] for an unknown name; resolution errors
    /// ([`ZipError::Corrupted`], [`ZipError::SymlinkLoop`]) when the entry
    /// or its link chain fails validation; [`ZipError::Unsupported`] for
    /// compression methods other than STORE and DEFLATE.
    pub async fn open_read(&mut self, name: &str) -> Result<ZipFileReader<R>, ZipError> {
        let index = find_entry(&self.entries, name).ok_or(ZipError::NoSuchFile)?;
        let index = self.resolve(index).await?;

        let entry = &self.entries[index];
        if let CompressionMethod::Unknown(_) = entry.method {
            return Err(ZipError::Unsupported("compression method"));
        }

        Ok(ZipFileReader::new(Arc::clone(&self.reader), entry))
    }

    /// ZIP archives are mounted read-only; opening for write always fails.
    pub fn open_write(&self, _name: &str) -> Result<ZipFileReader<R>, ZipError> {
        Err(ZipError::ReadOnly)
    }

    /// ZIP archives are mounted read-only; removal always fails.
    pub fn remove(&self, _name: &str) -> Result<(), ZipError> {
        Err(ZipError::ReadOnly)
    }

    /// ZIP archives are mounted read-only; directory creation always fails.
    pub fn mkdir(&self, _name: &str) -> Result<(), ZipError> {
        Err(ZipError::ReadOnly)
    }

    /// Resolve the entry at `index`, following symbolic links, and return
    /// the index of the terminal non-symlink entry.
    ///
    /// The local file header is parsed and checked against the central
    /// directory on the first resolution of each entry, and the entry
    /// offset is moved to the first byte of file data. Outcomes are
    /// cached: a previously broken entry fails immediately without I/O,
    /// and an entry found mid-resolution proves a link cycle, which marks
    /// the whole in-flight chain broken.
    async fn resolve(&mut self, index: usize) -> Result<usize, ZipError> {
        let mut chain: Vec<usize> = Vec::new();
        let mut current = index;

        let outcome = loop {
            match self.entries[current].resolved {
                Resolution::Resolved { link } => break Ok(link.unwrap_or(current)),
                Resolution::BrokenFile | Resolution::BrokenSymlink => {
                    break Err(ZipError::Corrupted("entry failed to resolve previously"));
                }
                Resolution::Resolving => break Err(ZipError::SymlinkLoop),
                Resolution::UnresolvedFile => match self.parse_local_header(current).await {
                    Ok(()) => {
                        self.entries[current].resolved = Resolution::Resolved { link: None };
                        break Ok(current);
                    }
                    Err(e) => {
                        self.entries[current].resolved = Resolution::BrokenFile;
                        break Err(e);
                    }
                },
                Resolution::UnresolvedSymlink => {
                    self.entries[current].resolved = Resolution::Resolving;
                    chain.push(current);

                    let step = self.follow_symlink(current).await;
                    match step {
                        Ok(next) => current = next,
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        match outcome {
            Ok(terminal) => {
                for i in chain {
                    self.entries[i].resolved = Resolution::Resolved {
                        link: Some(terminal),
                    };
                }
                Ok(terminal)
            }
            Err(e) => {
                for i in chain {
                    log::warn!("broken symlink entry: {}", self.entries[i].name);
                    self.entries[i].resolved = Resolution::BrokenSymlink;
                }
                Err(e)
            }
        }
    }

    /// One hop of symlink resolution: validate the local header, read the
    /// target path out of the entry data, normalize it, and look it up.
    async fn follow_symlink(&mut self, index: usize) -> Result<usize, ZipError> {
        self.parse_local_header(index).await?;
        let target = self.read_link_target(index).await?;
        let target = expand_link_path(target);
        find_entry(&self.entries, &target).ok_or(ZipError::NoSuchFile)
    }

    /// Parse and validate the local file header of an entry, then move the
    /// entry offset past the header to the first byte of file data.
    ///
    /// The local header repeats most of the central directory record; any
    /// disagreement means the archive is corrupted.
    async fn parse_local_header(&mut self, index: usize) -> Result<(), ZipError> {
        let offset = self.entries[index].offset;
        let mut header = [0u8; LOCAL_FILE_HEADER_SIZE as usize];
        self.reader.read_exact_at(offset, &mut header).await?;

        let entry = &self.entries[index];
        let mut cursor = Cursor::new(&header[..]);
        if cursor.read_u32::<LittleEndian>()? != LOCAL_FILE_SIG {
            return Err(ZipError::Corrupted("bad local file header signature"));
        }
        if cursor.read_u16::<LittleEndian>()? != entry.version_needed {
            return Err(ZipError::Corrupted("local header version mismatch"));
        }
        let _flags = cursor.read_u16::<LittleEndian>()?;
        if cursor.read_u16::<LittleEndian>()? != entry.method.as_u16() {
            return Err(ZipError::Corrupted("local header method mismatch"));
        }
        let _dos_stamp = cursor.read_u32::<LittleEndian>()?;
        if cursor.read_u32::<LittleEndian>()? != entry.crc32 {
            return Err(ZipError::Corrupted("local header CRC mismatch"));
        }
        if cursor.read_u32::<LittleEndian>()? != entry.compressed_size {
            return Err(ZipError::Corrupted("local header compressed size mismatch"));
        }
        if cursor.read_u32::<LittleEndian>()? != entry.uncompressed_size {
            return Err(ZipError::Corrupted(
                "local header uncompressed size mismatch",
            ));
        }
        let name_len = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_len = cursor.read_u16::<LittleEndian>()? as u64;

        self.entries[index].offset += LOCAL_FILE_HEADER_SIZE + name_len + extra_len;
        Ok(())
    }

    /// Read the target path stored as a symlink entry's file data. The
    /// entry offset must already point at the data.
    async fn read_link_target(&self, index: usize) -> Result<String, ZipError> {
        let entry = &self.entries[index];
        let mut target = vec![0u8; entry.uncompressed_size as usize];

        match entry.method {
            CompressionMethod::Stored => {
                self.reader.read_exact_at(entry.offset, &mut target).await?;
            }
            CompressionMethod::Deflate => {
                let mut compressed = vec![0u8; entry.compressed_size as usize];
                self.reader
                    .read_exact_at(entry.offset, &mut compressed)
                    .await?;

                // A finished stream and a stream that merely ran out of
                // input are both acceptable here; anything the inflater
                // rejects is not.
                let mut stream = Decompress::new(false);
                stream.decompress(&compressed, &mut target, FlushDecompress::Finish)?;
                let produced = stream.total_out() as usize;
                target.truncate(produced);
            }
            CompressionMethod::Unknown(_) => {
                return Err(ZipError::Unsupported("compression method"));
            }
        }

        let mut path = String::from_utf8_lossy(&target).into_owned();
        if host_type(entry.version_made_by) == 0 {
            path = path.replace('\\', "/");
        }
        Ok(path)
    }
}
