//! Single-entry ZIP archives around dump artifacts
//!
//! - Deflate at maximum level, one entry named after the dump file
//! - Archives are written to a `.partial` sibling and only renamed into
//!   place once the writer is finished and synced to disk
//! - Extraction refuses entries that would escape the output directory

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{Result, VaultError};

/// Extensions recognised as dump artifacts inside an archive.
pub const DUMP_EXTENSIONS: &[&str] = &["sql", "dump", "archive"];

pub const COMPRESSION_LEVEL: i64 = 9;

const PARTIAL_SUFFIX: &str = "partial";

#[derive(Debug, Clone, Copy, Default)]
pub struct Archiver;

impl Archiver {
    pub fn new() -> Self {
        Self
    }

    /// Compresses `source` into a single-entry archive at `output`.
    ///
    /// Returns only after the archive is finalized and on disk. On failure
    /// nothing is left at `output`.
    #[instrument(skip(self))]
    pub fn compress(&self, source: &Path, output: &Path) -> Result<()> {
        if !source.is_file() {
            return Err(VaultError::ArchiveFailed(format!(
                "source file {} does not exist",
                source.display()
            )));
        }
        let entry_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                VaultError::ArchiveFailed(format!("invalid source name {}", source.display()))
            })?
            .to_string();

        let partial = partial_path(output);
        match write_archive(source, &partial, &entry_name) {
            Ok(()) => {
                fs::rename(&partial, output).map_err(|e| {
                    remove_quietly(&partial);
                    VaultError::ArchiveFailed(format!("failed to finalize archive: {}", e))
                })?;
                info!("Archived {} into {:?}", entry_name, output);
                Ok(())
            }
            Err(e) => {
                remove_quietly(&partial);
                Err(e)
            }
        }
    }

    /// Inflates `archive` into `output_dir` and returns the dump file inside.
    #[instrument(skip(self))]
    pub fn extract(&self, archive: &Path, output_dir: &Path) -> Result<PathBuf> {
        let file = File::open(archive)
            .map_err(|e| VaultError::ExtractFailed(format!("{}: {}", archive.display(), e)))?;
        let mut zip = ZipArchive::new(BufReader::new(file))
            .map_err(|e| VaultError::ExtractFailed(e.to_string()))?;
        fs::create_dir_all(output_dir).map_err(|e| extract_failed(output_dir, e))?;

        let mut dump = None;
        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|e| VaultError::ExtractFailed(e.to_string()))?;
            let relative = entry.enclosed_name().map(|p| p.to_path_buf()).ok_or_else(|| {
                VaultError::ExtractFailed(format!("unsafe entry path {:?}", entry.name()))
            })?;
            let target = output_dir.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| extract_failed(&target, e))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| extract_failed(parent, e))?;
            }
            let file = File::create(&target).map_err(|e| extract_failed(&target, e))?;
            let mut writer = BufWriter::new(file);
            io::copy(&mut entry, &mut writer)
                .map_err(|e| VaultError::ExtractFailed(format!("{}: {}", relative.display(), e)))?;
            io::Write::flush(&mut writer).map_err(|e| extract_failed(&target, e))?;
            debug!("Extracted {:?}", target);

            if dump.is_none() && is_dump_file(&target) {
                dump = Some(target);
            }
        }

        dump.ok_or_else(|| VaultError::NoDumpFileFound(archive.to_path_buf()))
    }
}

/// Whether `path` carries one of the recognised dump extensions.
pub fn is_dump_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DUMP_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn write_archive(source: &Path, target: &Path, entry_name: &str) -> Result<()> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .large_file(true);

    let file = File::create(target).map_err(|e| archive_failed(target, e))?;
    let mut zip = ZipWriter::new(file);
    zip.start_file(entry_name, options)
        .map_err(|e| VaultError::ArchiveFailed(format!("failed to start entry: {}", e)))?;
    let source_file = File::open(source).map_err(|e| archive_failed(source, e))?;
    let mut reader = BufReader::new(source_file);
    io::copy(&mut reader, &mut zip)
        .map_err(|e| VaultError::ArchiveFailed(format!("stream error: {}", e)))?;

    let file = zip
        .finish()
        .map_err(|e| VaultError::ArchiveFailed(format!("failed to finish archive: {}", e)))?;
    file.sync_all().map_err(|e| archive_failed(target, e))?;
    Ok(())
}

fn archive_failed(path: &Path, e: io::Error) -> VaultError {
    VaultError::ArchiveFailed(format!("{}: {}", path.display(), e))
}

fn extract_failed(path: &Path, e: io::Error) -> VaultError {
    VaultError::ExtractFailed(format!("{}: {}", path.display(), e))
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    output.with_file_name(name)
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}
