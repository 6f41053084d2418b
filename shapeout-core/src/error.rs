//! Error types for shapeout-core.

use thiserror::Error;

/// Result type alias for shapeout operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for shapeout operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A feature was requested that no dataset provides.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// Statistics column headings differ between datasets.
    #[error("statistics headings differ: {expected:?} vs {found:?} ({identifier})")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
        identifier: String,
    },

    /// A stored or configured value could not be parsed as the requested type.
    #[error("bad value for '{key}': {value:?}")]
    BadValue { key: String, value: String },

    /// Referenced polygon filter is not registered.
    #[error("unknown polygon filter id: {0}")]
    UnknownPolygon(u32),

    /// Polygon definition or polygon file is malformed.
    #[error("invalid polygon filter: {0}")]
    InvalidPolygon(String),

    /// Hierarchy child references a missing parent or forms a cycle.
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// The same dataset handle was added twice.
    #[error("dataset already part of the analysis: {0}")]
    DuplicateMeasurement(String),

    /// Configuration text could not be parsed.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// Dataset could not be opened by the loader.
    #[error("cannot open dataset {path}: {reason}")]
    Open { path: String, reason: String },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
