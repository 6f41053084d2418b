//! Regression error types.

use thiserror::Error;

/// Result type for regression operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Regression error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer than three datasets remain after dropping excluded ones.
    #[error("need at least 3 datasets with treatment and repetition, got {0}")]
    TooFewGroups(usize),

    /// Treatment label outside the fixed vocabulary.
    #[error("unknown treatment label '{0}'")]
    UnknownTreatmentLabel(String),

    /// Bootstrapping needs one channel and one reservoir dataset per
    /// repetition and treatment.
    #[error("repetition {timeunit} ({treatment}): {reason}")]
    UnpairedReservoir {
        timeunit: u32,
        treatment: String,
        reason: String,
    },

    /// `Rscript` or `lme4` is not installed.
    #[error("mixed-model engine unavailable: {0}")]
    ExternalEngineUnavailable(String),

    /// Input lists of different length.
    #[error("got {xs} data vectors, {treatments} treatments and {timeunits} repetitions")]
    LengthMismatch {
        xs: usize,
        treatments: usize,
        timeunits: usize,
    },

    /// The engine ran but its output could not be used.
    #[error("mixed-model engine failed: {0}")]
    EngineFailure(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Table export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] shapeout_core::Error),
}
