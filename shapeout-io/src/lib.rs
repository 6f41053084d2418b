//! shapeout-io: Persistence and file-system access for Shape-Out.
//!
//! This crate provides session archives (`.zmso`) with migration of older
//! sessions, the settings and cache stores, the metadata probe used by the
//! measurement browser and the batch statistics summariser. With the `hdf5`
//! feature it also opens `.rtdc` measurements.
//!

pub mod archive;
pub mod batch;
mod error;
pub mod index;
pub mod migrate;
pub mod npy;
pub mod probe;
#[cfg(feature = "hdf5")]
pub mod rtdc;
pub mod session;
pub mod settings;

pub use batch::{flow_rate_choices, summarize, BatchOptions, ChipRegion};
pub use error::{Error, MissingDataFile, Result};
pub use index::{IndexEntry, Manifest, Version};
pub use probe::{find_measurements, Metadata, Probe, SampleGroup};
#[cfg(feature = "hdf5")]
pub use rtdc::RtdcLoader;
pub use session::{
    load_session, save, save_session, HashComparisonWarning, LoadOptions, LoadedSession,
};
pub use settings::{CacheStore, SettingsStore};
