//! I/O error types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A measurement referenced by a session that could not be located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDataFile {
    /// Per-session key of the manifest entry.
    pub key: String,
    /// File name.
    pub name: String,
    /// Absolute directory recorded at save time.
    pub fdir: PathBuf,
    /// Directory relative to the session file recorded at save time.
    pub rdir: PathBuf,
}

impl fmt::Display for MissingDataFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.fdir.display())
    }
}

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] shapeout_core::Error),

    /// Zip archive error.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Batch output error.
    #[error("TSV output error: {0}")]
    Csv(#[from] csv::Error),

    /// Metadata side-files or tags are missing.
    #[error("cannot read metadata of {path}: {reason}")]
    UnreadableMetadata { path: PathBuf, reason: String },

    /// In-memory datasets cannot be stored in a session.
    #[error("dataset {identifier} of class '{format}' cannot be saved in a session")]
    UnsupportedDataClassSaveError { identifier: String, format: String },

    /// A pre-0.7.6 session with more than one unresolvable hierarchy child.
    #[error("cannot reconstruct {0} hierarchy children of a pre-0.7.6 session")]
    DeepHierarchyUnsupported(usize),

    /// Session data files that could not be located.
    #[error("{} data file(s) missing: {}", .0.len(), display_list(.0))]
    MissingDataFiles(Vec<MissingDataFile>),

    /// HDF5 error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

fn display_list(files: &[MissingDataFile]) -> String {
    files
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
