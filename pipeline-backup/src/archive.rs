//! Zip archives of a staging tree.
//!
//! Entries are stored relative to the tree root with `/` separators. Within
//! each directory, files come before subdirectories, so `namespaces.json` is
//! always the first entry of a backup archive.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::utils::errors::{BackupError, Result};

/// Compress `src` into the zip file `dest`, returning the number of files
/// written.
pub fn compress_dir(src: &Path, dest: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(BackupError::Storage(format!(
            "Folder '{}' does not exist",
            src.display()
        )));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(File::create(dest)?);
    let mut files = 0usize;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .sort_by(files_first)
        .into_iter();

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut zip)?;
            files += 1;
        }
    }

    zip.finish()?;
    info!("Compressed folder saved at: {} ({} files)", dest.display(), files);
    Ok(files)
}

/// Extract the zip file at `archive` into `dest`.
pub fn extract_file(archive: &Path, dest: &Path) -> Result<usize> {
    let reader = BufReader::new(File::open(archive)?);
    let files = extract(reader, dest)?;
    info!("Unzipped '{}' to '{}'", archive.display(), dest.display());
    Ok(files)
}

/// Extract an in-memory zip into `dest`.
pub fn extract_bytes(bytes: &[u8], dest: &Path) -> Result<usize> {
    extract(Cursor::new(bytes), dest)
}

fn extract<R: Read + Seek>(reader: R, dest: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(reader)?;
    fs::create_dir_all(dest)?;
    let mut files = 0usize;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        // entries that would land outside `dest` are dropped
        let outpath: PathBuf = match file.enclosed_name() {
            Some(path) => dest.join(path),
            None => continue,
        };

        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut file, &mut outfile)?;
            files += 1;
        }
    }

    Ok(files)
}

fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
