//! Command-line browser for ZIP archives.
//!
//! Mounts an archive (local file or HTTP URL) through the virtual
//! filesystem layer and lists its tree or streams entries to stdout.

use anyhow::Result;
use chrono::TimeZone;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use zipvfs::{Cli, CompressionMethod, HttpRangeReader, LocalFileReader, ReadAt, ZipArchive};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.is_http_url() {
        let reader = HttpRangeReader::new(cli.file.clone()).await?;
        let transferred_before = reader.transferred_bytes();
        let reader = Arc::new(reader);

        browse(reader.clone(), &cli).await?;

        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        browse(reader, &cli).await?;
    }

    Ok(())
}

async fn browse<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let mut archive = ZipArchive::open(reader, cli.file.clone()).await?;

    if !cli.print.is_empty() {
        for name in &cli.print {
            print_entry(&mut archive, name, cli.start_offset.unwrap_or(0)).await?;
        }
        return Ok(());
    }

    list_tree(&mut archive, cli).await
}

/// Walk the archive tree through the directory operations and print every
/// path, depth first.
async fn list_tree<R: ReadAt>(archive: &mut ZipArchive<R>, cli: &Cli) -> Result<()> {
    let mut pending = vec![String::new()];

    while let Some(dir) = pending.pop() {
        let mut children = match archive.enumerate(&dir, cli.skip_symlinks) {
            Ok(children) => children,
            Err(e) => {
                log::warn!("{dir}: {e}");
                continue;
            }
        };
        children.sort();

        // Depth first: push in reverse so the first child prints first.
        for child in children.into_iter().rev() {
            let path = if dir.is_empty() {
                child
            } else {
                format!("{dir}/{child}")
            };

            let is_dir = match archive.is_directory(&path).await {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("{path}: {e}");
                    false
                }
            };
            let is_link = archive.is_symlink(&path).unwrap_or(false);

            if cli.verbose {
                print_verbose_line(archive, &path, is_dir);
            } else if is_dir {
                println!("{path}/");
            } else {
                println!("{path}");
            }

            // Entries only live under their literal paths, so a symlink to
            // a directory has nothing to descend into here.
            if is_dir && !is_link {
                pending.push(path);
            }
        }
    }

    Ok(())
}

fn print_verbose_line<R: ReadAt>(archive: &ZipArchive<R>, path: &str, is_dir: bool) {
    // Directories often exist only as a prefix of their children, with no
    // entry of their own.
    let Some(entry) = archive.entry(path) else {
        println!("{:>10}  {:>6}  {:>16}  {path}/", "-", "-", "-");
        return;
    };

    let method = match entry.compression_method() {
        CompressionMethod::Stored => "store",
        CompressionMethod::Deflate => "defl",
        CompressionMethod::Unknown(_) => "?",
    };

    let stamp = match chrono::Local.timestamp_opt(entry.last_mod_time(), 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    };

    let marker = if entry.is_symlink() {
        "@"
    } else if is_dir {
        "/"
    } else {
        ""
    };

    println!(
        "{:>10}  {:>6}  {:>16}  {path}{marker}",
        entry.uncompressed_size(),
        method,
        stamp
    );
}

/// Stream one entry to stdout through the open-file engine.
async fn print_entry<R: ReadAt>(
    archive: &mut ZipArchive<R>,
    name: &str,
    offset: u64,
) -> Result<()> {
    let mut file = archive.open_read(name).await?;
    if offset > 0 {
        file.seek(offset).await?;
    }

    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n]).await?;
    }
    stdout.flush().await?;

    Ok(())
}

/// Format a byte count with a unit suited to its magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
