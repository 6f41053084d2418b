//! shapeout-core: Data model and analysis engine for RT-DC measurements.
//!
//! This crate provides datasets with sectioned configuration, range and
//! polygon filters, hierarchy children, basic statistics and the
//! [`Analysis`] collection tying them together.
//!

pub mod analysis;
pub mod config;
pub mod dataset;
pub mod error;
pub mod feature;
pub mod filter;
pub mod palette;
pub mod polygon;
pub mod statistics;
pub mod task;

pub use analysis::{Analysis, Scale, PER_DATASET_KEYS};
pub use config::{Config, ConfigSection, ConfigValue, SECTIONS, SHARED_SECTIONS};
pub use dataset::{Dataset, DatasetFormat, DatasetLoader, EventData, EventTable, MemoryLoader};
pub use error::{Error, Result};
pub use filter::{FilterSettings, RangeFilter};
pub use palette::Color;
pub use polygon::{PolygonFilter, PolygonRegistry, SharedRegistry};
pub use statistics::get_statistics;
pub use task::{CancelFlag, TaskRunner};
