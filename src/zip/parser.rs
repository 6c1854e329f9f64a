//! End-of-central-directory discovery and central directory parsing.
//!
//! ZIP files are read from the end: the end-of-central-directory record is
//! found by scanning backward from EOF (its variable-length comment means
//! its position is not fixed), the central directory it points at is
//! fetched in one read, and one entry record is parsed per member. Local
//! file headers are deliberately not touched here; they are validated
//! lazily when an entry is first opened.
//!
//! Archives with arbitrary data prepended (self-extracting stubs) are
//! handled by measuring how far the central directory sits from where its
//! stated offset says it should be; the difference shifts every local
//! header offset in the file.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::ZipError;
use crate::io::ReadAt;

use super::entry::{Resolution, ZipEntry};
use super::structures::*;

/// How far back from EOF the end-of-central-directory signature can be:
/// the maximum comment length plus the fixed record size.
const MAX_EOCD_SEARCH: u64 = 65_535 + EndOfCentralDirectory::SIZE as u64;

/// Locate the end-of-central-directory signature.
///
/// Returns the absolute offset of the signature byte nearest EOF.
///
/// # Errors
///
/// [`ZipError::NotAnArchive`] when no signature exists within the search
/// bound.
pub(crate) async fn find_end_of_central_dir<R: ReadAt>(reader: &R) -> Result<u64, ZipError> {
    let len = reader.size();
    let sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();

    // Common case first: no archive comment, so the record sits exactly at
    // the end of the file.
    if len >= EndOfCentralDirectory::SIZE as u64 {
        let offset = len - EndOfCentralDirectory::SIZE as u64;
        let mut buf = [0u8; EndOfCentralDirectory::SIZE];
        reader.read_exact_at(offset, &mut buf).await?;
        if buf[0..4] == sig && buf[20..22] == [0, 0] {
            return Ok(offset);
        }
    }

    // Otherwise scan the file tail backward. The comment length field is
    // 16 bits, so the signature cannot sit further back than this.
    let search = MAX_EOCD_SEARCH.min(len);
    let start = len - search;
    let mut buf = vec![0u8; search as usize];
    reader.read_exact_at(start, &mut buf).await?;

    buf.windows(4)
        .rposition(|window| window == sig)
        .map(|pos| start + pos as u64)
        .ok_or(ZipError::NotAnArchive)
}

/// Quick test for whether a byte source looks like a ZIP archive.
///
/// A file beginning with a local file header signature is one; otherwise
/// the end-of-central-directory search decides, which also admits archives
/// behind a self-extracting stub.
pub(crate) async fn is_archive<R: ReadAt>(reader: &R) -> bool {
    let mut head = [0u8; 4];
    if reader.read_exact_at(0, &mut head).await.is_err() {
        return false;
    }
    if u32::from_le_bytes(head) == LOCAL_FILE_SIG {
        return true;
    }
    find_end_of_central_dir(reader).await.is_ok()
}

/// Read and validate the end-of-central-directory record, parse every
/// central directory entry, and return the entries sorted by name.
///
/// # Errors
///
/// [`ZipError::Unsupported`] for multi-disk archives, disagreeing entry
/// counts, or a comment that does not reach EOF;
/// [`ZipError::Corrupted`] for truncated or malformed records.
pub(crate) async fn load_directory<R: ReadAt>(reader: &R) -> Result<Vec<ZipEntry>, ZipError> {
    let len = reader.size();
    let eocd_pos = find_end_of_central_dir(reader).await?;

    let mut buf = [0u8; EndOfCentralDirectory::SIZE];
    reader.read_exact_at(eocd_pos, &mut buf).await?;
    let eocd = EndOfCentralDirectory::parse(&buf)?;

    if eocd.disk_number != 0 || eocd.disk_with_cd != 0 {
        return Err(ZipError::Unsupported("multi-disk archive"));
    }
    if eocd.disk_entries != eocd.total_entries {
        return Err(ZipError::Unsupported("entry count disagrees across disks"));
    }

    let cd_size = eocd.cd_size as u64;
    let cd_stated_offset = eocd.cd_offset as u64;

    // Self-extracting archives carry data before the first ZIP structure.
    // The central directory must end where the end record begins, so any
    // shortfall measures the prepended data; every stored offset in the
    // file is shifted by that much.
    let prefix = eocd_pos
        .checked_sub(cd_stated_offset + cd_size)
        .ok_or(ZipError::Unsupported(
            "central directory overlaps its end record",
        ))?;

    if eocd_pos + EndOfCentralDirectory::SIZE as u64 + eocd.comment_len as u64 != len {
        return Err(ZipError::Unsupported(
            "archive comment does not reach end of file",
        ));
    }

    let mut directory = vec![0u8; cd_size as usize];
    reader
        .read_exact_at(cd_stated_offset + prefix, &mut directory)
        .await?;

    let mut cursor = Cursor::new(&directory[..]);
    let mut entries = Vec::with_capacity(eocd.total_entries as usize);
    for _ in 0..eocd.total_entries {
        entries.push(parse_central_record(&mut cursor, prefix)?);
    }

    entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    log::debug!(
        "loaded {} entries ({} prefix bytes)",
        entries.len(),
        prefix
    );

    Ok(entries)
}

/// Parse one central directory record from the directory buffer.
fn parse_central_record(cursor: &mut Cursor<&[u8]>, prefix: u64) -> Result<ZipEntry, ZipError> {
    let sig = cursor.read_u32::<LittleEndian>()?;
    if sig != CENTRAL_DIR_SIG {
        return Err(ZipError::Corrupted("bad central directory signature"));
    }

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let dos_stamp = cursor.read_u32::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let name_len = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let offset = cursor.read_u32::<LittleEndian>()? as u64 + prefix;

    let mut name_bytes = vec![0u8; name_len as usize];
    cursor.read_exact(&mut name_bytes)?;
    let mut name = String::from_utf8_lossy(&name_bytes).into_owned();

    // Old DOS zippers wrote backslash separators.
    if host_type(version_made_by) == 0 {
        name = name.replace('\\', "/");
    }

    cursor.set_position(cursor.position() + extra_len as u64 + comment_len as u64);

    // Entries written on UNIX-like hosts carry st_mode in the high half of
    // the external attributes; symlink candidates are flagged here and
    // confirmed (target read and chased) on first use.
    let unix_mode = (external_attrs >> 16) as u16;
    let resolved = if host_does_symlinks(host_type(version_made_by))
        && uncompressed_size > 0
        && unix_mode & UNIX_FILETYPE_MASK == UNIX_FILETYPE_SYMLINK
    {
        Resolution::UnresolvedSymlink
    } else {
        Resolution::UnresolvedFile
    };

    Ok(ZipEntry {
        name,
        resolved,
        offset,
        version_made_by,
        version_needed,
        method: CompressionMethod::from_u16(method),
        crc32,
        compressed_size,
        uncompressed_size,
        last_mod_time: dos_time_to_unix(dos_stamp),
    })
}
