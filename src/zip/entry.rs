//! Archive entries and the sorted entry index.
//!
//! Entries are loaded once from the central directory, sorted by name, and
//! looked up by binary search. Each entry carries its resolution state:
//! local file headers are validated lazily on first use, and symbolic link
//! entries are chased to their terminal target at that point.

use std::cmp::Ordering;

use super::structures::CompressionMethod;

/// Resolution state of an entry.
///
/// `Resolving` only ever appears while a resolve call is in flight;
/// observing it from inside that call proves a symlink cycle. Failures are
/// terminal so a later open of the same entry fails without touching the
/// archive again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    UnresolvedFile,
    UnresolvedSymlink,
    Resolving,
    /// Validated. `link` holds the index of the terminal non-symlink entry
    /// when this entry is a symbolic link.
    Resolved { link: Option<usize> },
    BrokenFile,
    BrokenSymlink,
}

/// One entry of the archive, as described by its central directory record.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub(crate) name: String,
    pub(crate) resolved: Resolution,
    /// Offset of the local file header; once resolved, offset of the first
    /// byte of file data.
    pub(crate) offset: u64,
    pub(crate) version_made_by: u16,
    pub(crate) version_needed: u16,
    pub(crate) method: CompressionMethod,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u32,
    pub(crate) uncompressed_size: u32,
    pub(crate) last_mod_time: i64,
}

impl ZipEntry {
    /// Entry name with `/` separators, as stored in the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.method
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size as u64
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size as u64
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Modification time in seconds since the Unix epoch, or -1 when the
    /// recorded stamp does not name a valid time.
    pub fn last_mod_time(&self) -> i64 {
        self.last_mod_time
    }

    /// Whether this entry is a symbolic link, known without any I/O: the
    /// central directory attributes flag candidate links up front, and
    /// resolution only refines that into resolved or broken.
    pub fn is_symlink(&self) -> bool {
        matches!(
            self.resolved,
            Resolution::UnresolvedSymlink
                | Resolution::BrokenSymlink
                | Resolution::Resolved { link: Some(_) }
        )
    }
}

/// Exact lookup by name over the sorted index.
pub(crate) fn find_entry(entries: &[ZipEntry], path: &str) -> Option<usize> {
    entries
        .binary_search_by(|e| e.name.as_bytes().cmp(path.as_bytes()))
        .ok()
}

/// Find the first entry inside the directory named by `path`.
///
/// `path` is a directory prefix; one trailing `/` is ignored and the empty
/// path means the archive root. With `stop_on_first_find` any entry inside
/// the directory is returned as soon as the search lands on one; otherwise
/// the search narrows to the leftmost such entry. Returns `None` when no
/// entry lies inside the directory.
pub(crate) fn find_start_of_dir(
    entries: &[ZipEntry],
    path: &str,
    stop_on_first_find: bool,
) -> Option<usize> {
    let mut path = path.as_bytes();
    if let Some((&b'/', head)) = path.split_last() {
        path = head;
    }
    if path.is_empty() {
        return Some(0); // root
    }

    let dlen = path.len();
    let mut lo: isize = 0;
    let mut hi: isize = entries.len() as isize - 1;
    let mut found = None;

    while lo <= hi {
        let middle = (lo + (hi - lo) / 2) as usize;
        let name = entries[middle].name.as_bytes();

        // Order the candidate against the directory prefix. A name that
        // matches the prefix is classified by its byte at the prefix
        // length: anything below '/' still sorts before the directory's
        // children, anything above sorts after, and '/' is a child.
        let ord = if name.len() < dlen {
            match name.cmp(&path[..name.len()]) {
                Ordering::Equal => Ordering::Less,
                ord => ord,
            }
        } else {
            match name[..dlen].cmp(path) {
                Ordering::Equal if name.len() == dlen => Ordering::Less,
                Ordering::Equal => match name[dlen].cmp(&b'/') {
                    Ordering::Equal => {
                        // The directory's own entry ("dir/") settles the
                        // question immediately, as does any hit when the
                        // caller only needs existence.
                        if name.len() == dlen + 1 || stop_on_first_find {
                            return Some(middle);
                        }
                        found = Some(middle);
                        Ordering::Greater // keep narrowing left
                    }
                    ord => ord,
                },
                ord => ord,
            }
        };

        if ord == Ordering::Less {
            lo = middle as isize + 1;
        } else {
            hi = middle as isize - 1;
        }
    }

    found
}

/// Collapse `.` and `..` components of a symlink target path.
///
/// Rewrites in place with `/` as the separator: `/./` is dropped, a
/// trailing `/.` is dropped, `component/../` removes both, and a trailing
/// `/..` removes the preceding component. Collapsing never crosses the
/// start of the string, and a `..` whose preceding slash has already been
/// scanned past stays put. The result is used verbatim as an index key.
pub(crate) fn expand_link_path(path: String) -> String {
    let mut b = path.into_bytes();
    let mut i = 0; // scan position
    let mut prev = 0; // start of the current component

    loop {
        if i >= b.len() {
            break;
        }
        let Some(slash) = b[i..].iter().position(|&c| c == b'/').map(|p| p + i) else {
            break;
        };
        i = slash;

        if b.get(i + 1) == Some(&b'.') {
            if b.get(i + 2) == Some(&b'/') {
                // current dir in middle of string: ditch it
                b.drain(i..i + 2);
            } else if i + 2 == b.len() {
                // current dir at end of string: ditch it
                b.truncate(i);
            } else if b.get(i + 2) == Some(&b'.') {
                if b.get(i + 3) == Some(&b'/') {
                    // parent dir in middle: back up one component
                    b.drain(prev..i + 4);
                    i = prev;
                    while prev > 0 {
                        if b[prev - 1] == b'/' {
                            break;
                        }
                        prev -= 1;
                    }
                }
                if i + 3 == b.len() {
                    // parent dir at end: drop the preceding component
                    b.truncate(prev);
                }
            } else {
                // dot-file, not a navigation component
                prev = i + 1;
                i += 1;
            }
        } else {
            prev = i + 1;
            i += 1;
        }
    }

    String::from_utf8_lossy(&b).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(s: &str) -> String {
        expand_link_path(s.to_string())
    }

    #[test]
    fn expand_current_dir_components() {
        assert_eq!(expand("a/./b"), "a/b");
        assert_eq!(expand("a/././b"), "a/b");
        assert_eq!(expand("a/."), "a");
        assert_eq!(expand("a/./"), "a/");
    }

    #[test]
    fn expand_parent_dir_components() {
        assert_eq!(expand("a/b/../c"), "a/c");
        assert_eq!(expand("x/../y"), "y");
        assert_eq!(expand("a/.."), "");
        assert_eq!(expand("a/b/.."), "a/");
    }

    #[test]
    fn expand_leaves_plain_paths_alone() {
        assert_eq!(expand("plain"), "plain");
        assert_eq!(expand("a/b/c"), "a/b/c");
        assert_eq!(expand("a/.hidden"), "a/.hidden");
        assert_eq!(expand("../escape"), "../escape");
    }

    fn index(names: &[&str]) -> Vec<ZipEntry> {
        let mut entries: Vec<ZipEntry> = names
            .iter()
            .map(|n| ZipEntry {
                name: n.to_string(),
                resolved: Resolution::UnresolvedFile,
                offset: 0,
                version_made_by: 0,
                version_needed: 20,
                method: CompressionMethod::Stored,
                crc32: 0,
                compressed_size: 0,
                uncompressed_size: 0,
                last_mod_time: 0,
            })
            .collect();
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        entries
    }

    #[test]
    fn exact_lookup() {
        let entries = index(&["a", "b/c", "b/d", "z"]);
        assert_eq!(find_entry(&entries, "b/c"), Some(1));
        assert_eq!(find_entry(&entries, "b"), None);
        assert_eq!(find_entry(&entries, "nope"), None);
    }

    #[test]
    fn dir_start_finds_leftmost_child() {
        let entries = index(&["a", "d/f1", "d/f2", "d/sub/g", "e"]);
        let start = find_start_of_dir(&entries, "d", false).unwrap();
        assert_eq!(entries[start].name, "d/f1");
        // Trailing slash is equivalent.
        assert_eq!(find_start_of_dir(&entries, "d/", false), Some(start));
    }

    #[test]
    fn dir_start_ignores_sibling_prefixes() {
        // "d0" and "d" share a prefix but only "d/..." is inside "d".
        let entries = index(&["d0/x", "d/x", "d!"]);
        let start = find_start_of_dir(&entries, "d", false).unwrap();
        assert_eq!(entries[start].name, "d/x");
        assert!(find_start_of_dir(&entries, "d0", true).is_some());
        assert_eq!(find_start_of_dir(&entries, "d!", true), None);
    }

    #[test]
    fn dir_start_accepts_self_entry() {
        let entries = index(&["d/", "d/x"]);
        assert!(find_start_of_dir(&entries, "d", true).is_some());
    }

    #[test]
    fn dir_start_root_is_index_zero() {
        let entries = index(&["a", "b"]);
        assert_eq!(find_start_of_dir(&entries, "", false), Some(0));
        assert_eq!(find_start_of_dir(&entries, "", true), Some(0));
    }

    #[test]
    fn dir_start_missing_dir() {
        let entries = index(&["a", "b/c"]);
        assert_eq!(find_start_of_dir(&entries, "q", false), None);
        assert_eq!(find_start_of_dir(&entries, "a", false), None);
    }
}
