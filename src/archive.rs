// src/archive.rs

//! Package archive reading
//!
//! A package archive is a compressed tarball carrying its metadata in
//! `info/index.json` (the same fields as an index record) and its payload
//! files relative to the environment prefix.

use crate::error::{Error, Result};
use crate::index::PackageRecord;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

/// Metadata entry inside every package archive
pub const INDEX_JSON: &str = "info/index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompressionFormat {
    Gzip,
    Xz,
    Zstd,
}

fn detect_compression(path: &Path) -> Option<CompressionFormat> {
    let name = path.file_name()?.to_string_lossy().to_string();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(CompressionFormat::Gzip)
    } else if name.ends_with(".tar.xz") {
        Some(CompressionFormat::Xz)
    } else if name.ends_with(".tar.zst") {
        Some(CompressionFormat::Zstd)
    } else {
        None
    }
}

/// Whether a command-line argument names a package archive
pub fn is_package_archive(arg: &str) -> bool {
    detect_compression(Path::new(arg)).is_some()
}

/// Whether a command-line argument names a plain `.tar` bundle of archives
pub fn is_bundle(arg: &str) -> bool {
    arg.ends_with(".tar")
}

fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let compression = detect_compression(path).ok_or_else(|| {
        Error::Archive(format!(
            "Unsupported package archive: {}. Expected .tar.gz, .tgz, .tar.xz or .tar.zst",
            path.display()
        ))
    })?;

    let file = File::open(path)
        .map_err(|e| Error::Archive(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader: Box<dyn Read> = match compression {
        CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
        CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(file)
                .map_err(|e| Error::Archive(format!("Failed to create zstd decoder: {}", e)))?;
            Box::new(decoder)
        }
    };

    Ok(Archive::new(reader))
}

/// Read the package metadata embedded in an archive
pub fn read_index_json(path: &Path) -> Result<PackageRecord> {
    let mut archive = open_archive(path)?;

    for entry in archive
        .entries()
        .map_err(|e| Error::Archive(format!("Failed to read {}: {}", path.display(), e)))?
    {
        let mut entry =
            entry.map_err(|e| Error::Archive(format!("Failed to read entry: {}", e)))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::Archive(format!("Failed to get entry path: {}", e)))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();

        if entry_path != INDEX_JSON {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| Error::Archive(format!("Failed to read {}: {}", INDEX_JSON, e)))?;
        let mut record: PackageRecord = serde_json::from_str(&content)?;
        record.source = Some(path.to_path_buf());
        return Ok(record);
    }

    Err(Error::Archive(format!(
        "{} has no {}",
        path.display(),
        INDEX_JSON
    )))
}

/// Unpack an archive into `dest`, returning the payload files it contains
/// (everything outside `info/`), relative to `dest`
pub fn extract(path: &Path, dest: &Path) -> Result<Vec<String>> {
    debug!("Extracting {} into {}", path.display(), dest.display());
    std::fs::create_dir_all(dest)?;

    let mut archive = open_archive(path)?;
    let mut files = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| Error::Archive(format!("Failed to read {}: {}", path.display(), e)))?
    {
        let mut entry =
            entry.map_err(|e| Error::Archive(format!("Failed to read entry: {}", e)))?;
        let rel = entry
            .path()
            .map_err(|e| Error::Archive(format!("Failed to get entry path: {}", e)))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();

        if !entry.unpack_in(dest).map_err(|e| {
            Error::Archive(format!("Failed to unpack {} from {}: {}", rel, path.display(), e))
        })? {
            return Err(Error::Archive(format!("Refusing to unpack unsafe path: {}", rel)));
        }

        if !entry.header().entry_type().is_dir() && !rel.starts_with("info/") {
            files.push(rel);
        }
    }

    files.sort();
    Ok(files)
}

/// Unpack a `.tar` bundle into a temporary directory and list the package
/// archives it contains
pub fn unpack_bundle(path: &Path) -> Result<(tempfile::TempDir, Vec<PathBuf>)> {
    if !path.exists() {
        return Err(Error::InvalidArgument(format!(
            "File does not exist: {}",
            path.display()
        )));
    }
    let temp_dir = tempfile::tempdir()?;
    let file = File::open(path)
        .map_err(|e| Error::Archive(format!("Failed to open {}: {}", path.display(), e)))?;
    Archive::new(file)
        .unpack(temp_dir.path())
        .map_err(|e| Error::Archive(format!("Failed to unpack {}: {}", path.display(), e)))?;

    let mut archives = Vec::new();
    let mut stack = vec![temp_dir.path().to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let p = entry?.path();
            if p.is_dir() {
                stack.push(p);
            } else if detect_compression(&p).is_some() {
                archives.push(p);
            }
        }
    }
    archives.sort();
    Ok((temp_dir, archives))
}
