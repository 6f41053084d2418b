//! `.rtdc` (HDF5) measurements.
//!
//! Per-event scalar features are one-dimensional datasets in the `events`
//! group; metadata are root attributes named `section:key`.

use crate::probe::Metadata;
use crate::{Error, Result};
use hdf5::types::{TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Attribute, File, Group, Location};
use log::debug;
use ndarray::Array1;
use shapeout_core::{feature, Config, ConfigValue, Dataset, DatasetFormat, DatasetLoader, EventTable};
use std::path::Path;
use std::sync::Arc;

const EVENTS_GROUP: &str = "events";

/// Opens `.rtdc` files with HDF5.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtdcLoader;

impl RtdcLoader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DatasetLoader for RtdcLoader {
    fn open(&self, path: &Path) -> shapeout_core::Result<Dataset> {
        open_rtdc(path).map_err(|e| open_error(path, &e))
    }

    fn event_count(&self, path: &Path) -> shapeout_core::Result<usize> {
        count_events(path).map_err(|e| open_error(path, &e))
    }
}

fn open_error(path: &Path, error: &Error) -> shapeout_core::Error {
    shapeout_core::Error::Open {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

fn check_extension(path: &Path) -> Result<()> {
    if DatasetFormat::from_path(path) == DatasetFormat::Hdf5 {
        Ok(())
    } else {
        Err(Error::InvalidFormat(format!(
            "{} is not an .rtdc file",
            path.display()
        )))
    }
}

fn open_rtdc(path: &Path) -> Result<Dataset> {
    check_extension(path)?;
    let file = File::open(path)?;
    let events = file.group(EVENTS_GROUP)?;
    let mut table = EventTable::new();
    for name in events.member_names()? {
        if !feature::is_scalar(&name) {
            continue;
        }
        let dataset = events.dataset(&name)?;
        if dataset.ndim() != 1 {
            debug!("{}: skipping {name} with {} dimensions", path.display(), dataset.ndim());
            continue;
        }
        let column: Array1<f64> = dataset.read_1d()?;
        table.insert(&name, column.to_vec())?;
    }
    let config = read_config(&file)?;
    let hash = table.content_hash();
    Ok(Dataset::new(
        path.to_path_buf(),
        DatasetFormat::Hdf5,
        Arc::new(table),
        config,
        hash,
    ))
}

fn count_events(path: &Path) -> Result<usize> {
    check_extension(path)?;
    let file = File::open(path)?;
    if let Some(count) = read_attr_opt::<i64>(&file, "experiment:event count")? {
        return Ok(usize::try_from(count).unwrap_or_default());
    }
    events_len(&file.group(EVENTS_GROUP)?)
}

fn events_len(events: &Group) -> Result<usize> {
    let first = events
        .member_names()?
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidFormat("empty events group".to_string()))?;
    let shape = events.dataset(&first)?.shape();
    Ok(shape.first().copied().unwrap_or_default())
}

/// Root attributes `section:key` as configuration.
fn read_config(location: &Location) -> Result<Config> {
    let mut config = Config::new();
    for name in location.attr_names()? {
        let Some((section, key)) = name.split_once(':') else {
            continue;
        };
        let attr = location.attr(&name)?;
        match read_attr_value(&attr) {
            Ok(Some(value)) => config.set(section, key, value),
            Ok(None) => debug!("skipping attribute {name} of unsupported type"),
            Err(e) => debug!("skipping attribute {name}: {e}"),
        }
    }
    Ok(config)
}

fn read_attr_value(attr: &Attribute) -> Result<Option<ConfigValue>> {
    let value = match attr.dtype()?.to_descriptor()? {
        TypeDescriptor::Float(_) => ConfigValue::Float(attr.read_scalar::<f64>()?),
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            ConfigValue::Int(attr.read_scalar::<i64>()?)
        }
        TypeDescriptor::Boolean => ConfigValue::Bool(attr.read_scalar::<bool>()?),
        TypeDescriptor::VarLenUnicode | TypeDescriptor::FixedUnicode(_) => {
            ConfigValue::Str(attr.read_scalar::<VarLenUnicode>()?.to_string())
        }
        TypeDescriptor::VarLenAscii | TypeDescriptor::FixedAscii(_) => {
            ConfigValue::Str(attr.read_scalar::<VarLenAscii>()?.to_string())
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn read_attr_opt<T: hdf5::H5Type + Clone>(location: &Location, name: &str) -> Result<Option<T>> {
    match location.attr(name) {
        Ok(attr) => Ok(Some(attr.read_scalar::<T>()?)),
        Err(_) => Ok(None),
    }
}

/// Reads browser metadata from the root attributes.
///
/// # Errors
/// Returns `UnreadableMetadata` if the flow rate is missing.
pub fn read_metadata(path: &Path) -> Result<Metadata> {
    check_extension(path)?;
    let file = File::open(path)?;
    let config = read_config(&file)?;
    let event_count = match config.get_i64("experiment", "event count") {
        Some(count) => usize::try_from(count).unwrap_or_default(),
        None => events_len(&file.group(EVENTS_GROUP)?)?,
    };
    let flow_rate = config
        .get_f64("setup", "flow rate")
        .ok_or_else(|| Error::UnreadableMetadata {
            path: path.to_path_buf(),
            reason: "no setup:flow rate attribute".to_string(),
        })?;
    Ok(Metadata {
        path: path.to_path_buf(),
        chip_region: config
            .get_str("setup", "chip region")
            .unwrap_or("channel")
            .to_lowercase(),
        event_count,
        flow_rate,
        run_index: config
            .get_i64("experiment", "run index")
            .and_then(|i| u32::try_from(i).ok())
            .unwrap_or(0),
        sample_name: config
            .get_str("experiment", "sample")
            .unwrap_or_default()
            .to_string(),
    })
}
