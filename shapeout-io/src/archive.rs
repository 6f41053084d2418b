//! Zip bundling of session directories.

use crate::{Error, Result};
use log::debug;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Zips the files below `src` into `dest`, storing paths relative to `src`
/// with forward slashes.
///
/// # Errors
/// Returns an error if a file cannot be read or the archive written.
pub fn zip_dir(src: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries: Vec<_> = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Io(e.into()))?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            io::copy(&mut input, &mut zip)?;
        }
    }
    zip.finish()?.flush()?;
    debug!("wrote archive {}", dest.display());
    Ok(())
}

/// Extracts the archive `src` into the directory `dest`.
///
/// # Errors
/// Returns an error if the archive cannot be read or contains unsafe paths.
pub fn unzip(src: &Path, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(src)?)?;
    archive.extract(dest)?;
    debug!("extracted {} entries from {}", archive.len(), src.display());
    Ok(())
}
