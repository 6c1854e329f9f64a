//! End-to-end tests over in-memory archives.
//!
//! Archives are built byte by byte (local headers, central directory, end
//! record) so each test controls exactly what is on the wire, including
//! symlink attributes, self-extracting prefixes, and deliberate damage.

use std::io::Write;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::DeflateEncoder;

use zipvfs::{CompressionMethod, ZipArchive, ZipError};

const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// Fixed modification stamp used by every built entry: 2024-05-15 12:34:56.
const DOS_TIME: u16 = (12 << 11) | (34 << 5) | (56 / 2);
const DOS_DATE: u16 = ((2024 - 1980) << 9) | (5 << 5) | 15;

struct TestEntry {
    name: &'static str,
    payload: Vec<u8>,
    method: u16,
    symlink: bool,
}

fn store(name: &'static str, payload: &[u8]) -> TestEntry {
    TestEntry {
        name,
        payload: payload.to_vec(),
        method: METHOD_STORE,
        symlink: false,
    }
}

fn deflate(name: &'static str, payload: &[u8]) -> TestEntry {
    TestEntry {
        name,
        payload: payload.to_vec(),
        method: METHOD_DEFLATE,
        symlink: false,
    }
}

fn symlink(name: &'static str, target: &'static str) -> TestEntry {
    TestEntry {
        name,
        payload: target.as_bytes().to_vec(),
        method: METHOD_STORE,
        symlink: true,
    }
}

fn deflate_symlink(name: &'static str, target: &'static str) -> TestEntry {
    TestEntry {
        name,
        payload: target.as_bytes().to_vec(),
        method: METHOD_DEFLATE,
        symlink: true,
    }
}

/// Build archive bytes: `prefix` arbitrary bytes, then local records, the
/// central directory, and the end record with `comment` appended.
fn build_archive(entries: &[TestEntry], prefix: usize, comment: &[u8]) -> Vec<u8> {
    let mut out = vec![0xEEu8; prefix];
    let mut central = Vec::new();

    for entry in entries {
        let data = match entry.method {
            METHOD_DEFLATE => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&entry.payload).unwrap();
                encoder.finish().unwrap()
            }
            _ => entry.payload.clone(),
        };

        let mut crc = flate2::Crc::new();
        crc.update(&entry.payload);
        let crc = crc.sum();

        // Offsets are relative to the start of the ZIP data, not the file;
        // that is what makes prepended stubs detectable.
        let local_offset = (out.len() - prefix) as u32;

        out.extend_from_slice(&0x04034b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&entry.method.to_le_bytes());
        out.extend_from_slice(&DOS_TIME.to_le_bytes());
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&data);

        let unix_mode: u32 = if entry.symlink { 0o120777 } else { 0o100644 };

        central.extend_from_slice(&0x02014b50u32.to_le_bytes());
        central.extend_from_slice(&((3u16 << 8) | 20).to_le_bytes()); // made by UNIX
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&entry.method.to_le_bytes());
        central.extend_from_slice(&DOS_TIME.to_le_bytes());
        central.extend_from_slice(&DOS_DATE.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(entry.payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra len
        central.extend_from_slice(&0u16.to_le_bytes()); // comment len
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&(unix_mode << 16).to_le_bytes());
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(entry.name.as_bytes());
    }

    let cd_offset = (out.len() - prefix) as u32;
    out.extend_from_slice(&central);

    out.extend_from_slice(&0x06054b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // this disk
    out.extend_from_slice(&0u16.to_le_bytes()); // cd start disk
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
    out.extend_from_slice(comment);

    out
}

async fn open(bytes: Vec<u8>) -> ZipArchive<Vec<u8>> {
    ZipArchive::open(Arc::new(bytes), "test.zip").await.unwrap()
}

async fn read_all<R: zipvfs::ReadAt>(archive: &mut ZipArchive<R>, name: &str) -> Vec<u8> {
    let mut file = archive.open_read(name).await.unwrap();
    let mut out = vec![0u8; file.len() as usize];
    let mut pos = 0;
    while pos < out.len() {
        let n = file.read(&mut out[pos..]).await.unwrap();
        assert!(n > 0, "stream ended early at {pos}");
        pos += n;
    }
    out
}

#[tokio::test]
async fn store_entry_round_trip() {
    let bytes = build_archive(&[store("hello.txt", b"hi\n")], 0, b"");
    let mut archive = open(bytes).await;

    assert!(archive.exists("hello.txt"));
    assert!(!archive.exists("absent.txt"));

    let mut file = archive.open_read("hello.txt").await.unwrap();
    assert_eq!(file.len(), 3);
    assert!(!file.eof());

    let mut buf = [0u8; 3];
    assert_eq!(file.read(&mut buf).await.unwrap(), 3);
    assert_eq!(&buf, b"hi\n");
    assert_eq!(file.tell(), 3);

    let mut one = [0u8; 1];
    assert_eq!(file.read(&mut one).await.unwrap(), 0);
    assert!(file.eof());
}

#[tokio::test]
async fn deflate_random_access() {
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let bytes = build_archive(&[deflate("big.bin", &data)], 0, b"");
    let mut archive = open(bytes).await;

    let mut file = archive.open_read("big.bin").await.unwrap();
    assert_eq!(file.len(), 100_000);

    file.seek(50_000).await.unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(file.read(&mut buf).await.unwrap(), 10);
    let expected: Vec<u8> = (50_000..50_010u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(buf.as_slice(), expected.as_slice());

    // Backward seek forces a restart from the beginning of the stream.
    file.seek(10).await.unwrap();
    assert_eq!(file.tell(), 10);
    let mut buf = [0u8; 5];
    assert_eq!(file.read(&mut buf).await.unwrap(), 5);
    assert_eq!(buf.as_slice(), &[10, 11, 12, 13, 14]);
}

#[tokio::test]
async fn deflate_streams_across_input_buffer_refills() {
    // Incompressible payload, so the compressed stream far exceeds the
    // 16 KiB input buffer and must be refilled many times.
    let mut x: u64 = 0x2545F4914F6CDD1D;
    let data: Vec<u8> = (0..200_000)
        .map(|_| {
            x = x
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (x >> 56) as u8
        })
        .collect();

    let bytes = build_archive(&[deflate("noise.bin", &data)], 0, b"");
    let mut archive = open(bytes).await;

    let mut file = archive.open_read("noise.bin").await.unwrap();
    let mut out = Vec::new();
    let mut chunk = vec![0u8; 7_000];
    loop {
        let n = file.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(out, data);

    // Reads after a mid-stream backward seek match a fresh decompression.
    file.seek(123_456).await.unwrap();
    let mut buf = [0u8; 100];
    assert_eq!(file.read(&mut buf).await.unwrap(), 100);
    assert_eq!(buf.as_slice(), &data[123_456..123_556]);
}

#[tokio::test]
async fn self_extracting_prefix_is_transparent() {
    let entries = || {
        vec![
            store("hello.txt", b"hi\n"),
            deflate("d/big.bin", b"some compressed payload, repeated payload"),
        ]
    };
    let plain = build_archive(&entries(), 0, b"");
    let stubbed = build_archive(&entries(), 1024, b"");

    assert!(ZipArchive::is_archive(&plain).await);
    assert!(ZipArchive::is_archive(&stubbed).await);

    let mut a = open(plain).await;
    let mut b = open(stubbed).await;

    assert_eq!(a.enumerate("", false).unwrap(), b.enumerate("", false).unwrap());
    assert_eq!(read_all(&mut a, "hello.txt").await, read_all(&mut b, "hello.txt").await);
    assert_eq!(
        read_all(&mut a, "d/big.bin").await,
        read_all(&mut b, "d/big.bin").await
    );
}

#[tokio::test]
async fn archive_comment_is_tolerated() {
    let bytes = build_archive(&[store("a", b"1")], 0, b"built by a test, with a comment");
    let mut archive = open(bytes).await;
    assert_eq!(read_all(&mut archive, "a").await, b"1");
}

#[tokio::test]
async fn symlink_chain_resolves_to_terminal_file() {
    let bytes = build_archive(
        &[symlink("a", "b"), symlink("b", "c"), store("c", b"x")],
        0,
        b"",
    );
    let mut archive = open(bytes).await;

    assert!(archive.is_symlink("a").unwrap());
    assert!(archive.is_symlink("b").unwrap());
    assert!(!archive.is_symlink("c").unwrap());

    assert_eq!(read_all(&mut archive, "a").await, b"x");
    assert_eq!(read_all(&mut archive, "b").await, b"x");
    assert!(!archive.is_directory("a").await.unwrap());
}

#[tokio::test]
async fn deflated_symlink_target_is_inflated() {
    let bytes = build_archive(&[deflate_symlink("link", "c"), store("c", b"x")], 0, b"");
    let mut archive = open(bytes).await;
    assert_eq!(read_all(&mut archive, "link").await, b"x");
}

#[tokio::test]
async fn symlink_target_paths_are_normalized() {
    let bytes = build_archive(
        &[symlink("link", "sub/../c"), store("c", b"x"), store("sub/f", b"y")],
        0,
        b"",
    );
    let mut archive = open(bytes).await;
    assert_eq!(read_all(&mut archive, "link").await, b"x");
}

#[tokio::test]
async fn symlink_loop_breaks_both_entries() {
    let bytes = build_archive(&[symlink("a", "b"), symlink("b", "a")], 0, b"");
    let mut archive = open(bytes).await;

    let first = archive.open_read("a").await.unwrap_err();
    assert!(matches!(first, ZipError::SymlinkLoop), "got {first:?}");

    // Both entries are now terminally broken; later opens fail from the
    // cache without re-reading any headers.
    let second = archive.open_read("a").await.unwrap_err();
    assert!(matches!(second, ZipError::Corrupted(_)), "got {second:?}");
    let other = archive.open_read("b").await.unwrap_err();
    assert!(matches!(other, ZipError::Corrupted(_)), "got {other:?}");

    assert!(archive.is_symlink("a").unwrap());
}

#[tokio::test]
async fn dangling_symlink_is_broken() {
    let bytes = build_archive(&[symlink("link", "missing")], 0, b"");
    let mut archive = open(bytes).await;

    let err = archive.open_read("link").await.unwrap_err();
    assert!(matches!(err, ZipError::NoSuchFile), "got {err:?}");
    let again = archive.open_read("link").await.unwrap_err();
    assert!(matches!(again, ZipError::Corrupted(_)), "got {again:?}");
}

#[tokio::test]
async fn enumerate_groups_subdirectories() {
    let bytes = build_archive(
        &[
            store("d/f1", b"1"),
            store("d/f2", b"2"),
            store("d/sub/g", b"3"),
            store("d/sub/h", b"4"),
        ],
        0,
        b"",
    );
    let mut archive = open(bytes).await;

    assert_eq!(archive.enumerate("d", false).unwrap(), ["f1", "f2", "sub"]);
    assert_eq!(archive.enumerate("d/", false).unwrap(), ["f1", "f2", "sub"]);
    assert_eq!(archive.enumerate("d/sub", false).unwrap(), ["g", "h"]);
    assert_eq!(archive.enumerate("", false).unwrap(), ["d"]);

    assert!(archive.is_directory("d").await.unwrap());
    assert!(archive.is_directory("d/sub").await.unwrap());
    assert!(!archive.is_directory("d/f1").await.unwrap());

    let err = archive.enumerate("nope", false).unwrap_err();
    assert!(matches!(err, ZipError::NoSuchFile), "got {err:?}");
    let err = archive.enumerate("d/f1", false).unwrap_err();
    assert!(matches!(err, ZipError::NotADirectory), "got {err:?}");
}

#[tokio::test]
async fn enumerate_skips_directory_self_entry() {
    let bytes = build_archive(
        &[store("d/", b""), store("d/f", b"1")],
        0,
        b"",
    );
    let archive = open(bytes).await;
    assert_eq!(archive.enumerate("d", false).unwrap(), ["f"]);
}

#[tokio::test]
async fn enumerate_can_omit_symlinks() {
    let bytes = build_archive(&[store("file", b"1"), symlink("link", "file")], 0, b"");
    let archive = open(bytes).await;
    assert_eq!(archive.enumerate("", false).unwrap(), ["file", "link"]);
    assert_eq!(archive.enumerate("", true).unwrap(), ["file"]);
}

#[tokio::test]
async fn entries_are_sorted_and_distinct() {
    let bytes = build_archive(
        &[
            store("z", b"1"),
            store("a", b"2"),
            store("m/q", b"3"),
            store("m/p", b"4"),
        ],
        0,
        b"",
    );
    let archive = open(bytes).await;

    let names: Vec<&str> = archive.entries().iter().map(|e| e.name()).collect();
    assert_eq!(names, ["a", "m/p", "m/q", "z"]);
    for pair in names.windows(2) {
        assert!(pair[0].as_bytes() < pair[1].as_bytes());
    }
}

#[tokio::test]
async fn mod_time_reflects_dos_stamp() {
    use chrono::TimeZone;

    let bytes = build_archive(&[store("stamped", b"1")], 0, b"");
    let archive = open(bytes).await;

    let expected = chrono::Local
        .with_ymd_and_hms(2024, 5, 15, 12, 34, 56)
        .earliest()
        .unwrap()
        .timestamp();
    assert_eq!(archive.last_mod_time("stamped").unwrap(), expected);
    assert!(matches!(
        archive.last_mod_time("absent"),
        Err(ZipError::NoSuchFile)
    ));
}

#[tokio::test]
async fn seek_past_end_is_rejected() {
    let bytes = build_archive(&[store("s", b"abcdef"), deflate("d", b"abcdef")], 0, b"");
    let mut archive = open(bytes).await;

    for name in ["s", "d"] {
        let mut file = archive.open_read(name).await.unwrap();
        assert!(matches!(file.seek(7).await, Err(ZipError::PastEof)));
        // The handle survives; a valid seek and read still work.
        file.seek(4).await.unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(file.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"ef");
    }
}

#[tokio::test]
async fn object_reads_clamp_to_whole_objects() {
    let bytes = build_archive(&[store("ten", b"0123456789")], 0, b"");
    let mut archive = open(bytes).await;
    let mut file = archive.open_read("ten").await.unwrap();

    let mut buf = [0u8; 12];
    assert_eq!(file.read_objects(&mut buf, 4, 3).await.unwrap(), 2);
    assert_eq!(file.tell(), 8);

    // Two bytes remain, not enough for one whole object.
    let err = file.read_objects(&mut buf, 4, 1).await.unwrap_err();
    assert!(matches!(err, ZipError::PastEof), "got {err:?}");

    let mut rest = [0u8; 2];
    assert_eq!(file.read(&mut rest).await.unwrap(), 2);
    assert_eq!(&rest, b"89");
}

#[tokio::test]
async fn multi_disk_archives_are_rejected() {
    let mut bytes = build_archive(&[store("a", b"1")], 0, b"");
    let eocd = bytes.len() - 22;
    bytes[eocd + 4] = 1; // this-disk number

    let err = ZipArchive::open(Arc::new(bytes), "bad.zip").await.unwrap_err();
    assert!(matches!(err, ZipError::Unsupported(_)), "got {err:?}");
}

#[tokio::test]
async fn trailing_garbage_after_end_record_is_rejected() {
    let mut bytes = build_archive(&[store("a", b"1")], 0, b"");
    bytes.push(0x00);

    let err = ZipArchive::open(Arc::new(bytes), "bad.zip").await.unwrap_err();
    assert!(matches!(err, ZipError::Unsupported(_)), "got {err:?}");
}

#[tokio::test]
async fn damaged_local_header_breaks_entry_permanently() {
    let mut bytes = build_archive(&[store("a", b"1")], 0, b"");
    bytes[0] ^= 0xFF; // first local header signature byte

    let mut archive = open(bytes).await;
    assert!(archive.exists("a"));

    let first = archive.open_read("a").await.unwrap_err();
    assert!(matches!(first, ZipError::Corrupted(_)), "got {first:?}");
    let second = archive.open_read("a").await.unwrap_err();
    assert!(matches!(second, ZipError::Corrupted(_)), "got {second:?}");
}

#[tokio::test]
async fn unknown_method_rejected_at_open_not_at_mount() {
    let mut entry = store("odd", b"payload");
    entry.method = 99;
    let bytes = build_archive(&[entry], 0, b"");

    let mut archive = open(bytes).await; // mounting succeeds
    assert!(archive.exists("odd"));
    assert_eq!(
        archive.entry("odd").unwrap().compression_method(),
        CompressionMethod::Unknown(99)
    );

    let err = archive.open_read("odd").await.unwrap_err();
    assert!(matches!(err, ZipError::Unsupported(_)), "got {err:?}");
}

#[tokio::test]
async fn probe_matches_open_outcome() {
    let good = build_archive(&[store("a", b"1")], 0, b"");
    assert!(ZipArchive::is_archive(&good).await);
    assert!(ZipArchive::open(Arc::new(good), "ok.zip").await.is_ok());

    let garbage = vec![0x41u8; 512];
    assert!(!ZipArchive::is_archive(&garbage).await);
    let err = ZipArchive::open(Arc::new(garbage), "no.zip").await.unwrap_err();
    assert!(matches!(err, ZipError::NotAnArchive), "got {err:?}");
}

#[tokio::test]
async fn write_operations_are_refused() {
    let bytes = build_archive(&[store("a", b"1")], 0, b"");
    let archive = open(bytes).await;

    assert!(matches!(archive.open_write("new"), Err(ZipError::ReadOnly)));
    assert!(matches!(archive.remove("a"), Err(ZipError::ReadOnly)));
    assert!(matches!(archive.mkdir("d"), Err(ZipError::ReadOnly)));
}
