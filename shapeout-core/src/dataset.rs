//! Dataset handles.
//!
//! A [`Dataset`] is one RT-DC measurement as seen by the analysis: event
//! data supplied by a [`DatasetLoader`], an editable configuration and the
//! current filter state. Hierarchy children share the event data of their
//! root and address it through root indices.

use crate::config::Config;
use crate::filter::{self, FilterSettings};
use crate::polygon::PolygonRegistry;
use crate::{Error, Result};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Storage class of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetFormat {
    Tdms,
    Hdf5,
    Hierarchy,
    /// In-memory data without a file on disk.
    Dict,
}

impl DatasetFormat {
    /// Guesses the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("tdms") => Self::Tdms,
            Some("rtdc") => Self::Hdf5,
            _ => Self::Dict,
        }
    }
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetFormat::Tdms => write!(f, "tdms"),
            DatasetFormat::Hdf5 => write!(f, "hdf5"),
            DatasetFormat::Hierarchy => write!(f, "hierarchy"),
            DatasetFormat::Dict => write!(f, "dict"),
        }
    }
}

impl FromStr for DatasetFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tdms" => Ok(Self::Tdms),
            "hdf5" => Ok(Self::Hdf5),
            "hierarchy" => Ok(Self::Hierarchy),
            "dict" => Ok(Self::Dict),
            other => Err(Error::BadValue {
                key: "format".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Per-event scalar data of a measurement.
pub trait EventData: Send + Sync + fmt::Debug {
    /// Number of events.
    fn len(&self) -> usize;

    /// Whether there are no events.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the scalar features available.
    fn features(&self) -> Vec<String>;

    /// Values of a scalar feature, one per event.
    fn scalar(&self, feature: &str) -> Option<&[f64]>;
}

/// In-memory column store implementing [`EventData`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    len: usize,
    columns: BTreeMap<String, Vec<f64>>,
}

impl EventTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the column length differs from the others.
    pub fn insert(&mut self, feature: &str, values: Vec<f64>) -> Result<()> {
        if !self.columns.is_empty() && values.len() != self.len {
            return Err(Error::InvalidConfig(format!(
                "feature {feature} has {} events, expected {}",
                values.len(),
                self.len
            )));
        }
        self.len = values.len();
        self.columns.insert(feature.to_string(), values);
        Ok(())
    }

    /// Builder variant of [`EventTable::insert`].
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the column length differs from the others.
    pub fn with_column(mut self, feature: &str, values: Vec<f64>) -> Result<Self> {
        self.insert(feature, values)?;
        Ok(self)
    }

    /// Content hash over all columns.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, values) in &self.columns {
            hasher.update(name.as_bytes());
            for v in values {
                hasher.update(v.to_le_bytes());
            }
        }
        hex_digest(&hasher.finalize())
    }
}

impl EventData for EventTable {
    fn len(&self) -> usize {
        self.len
    }

    fn features(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    fn scalar(&self, feature: &str) -> Option<&[f64]> {
        self.columns.get(feature).map(Vec::as_slice)
    }
}

/// Opens measurements from disk.
pub trait DatasetLoader: Send + Sync {
    /// Opens the measurement at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    fn open(&self, path: &Path) -> Result<Dataset>;

    /// Number of events in the measurement, without keeping it open.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    fn event_count(&self, path: &Path) -> Result<usize> {
        Ok(self.open(path)?.len())
    }
}

/// Loader serving registered tables by file name, for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    entries: HashMap<String, (Arc<EventTable>, Config)>,
}

impl MemoryLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `table` under a file name such as `"M1_data.rtdc"`.
    pub fn insert(&mut self, file_name: &str, table: EventTable, config: Config) {
        self.entries
            .insert(file_name.to_string(), (Arc::new(table), config));
    }
}

impl DatasetLoader for MemoryLoader {
    fn open(&self, path: &Path) -> Result<Dataset> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let (table, config) = self.entries.get(name).ok_or_else(|| Error::Open {
            path: path.display().to_string(),
            reason: "not registered".to_string(),
        })?;
        let hash = table.content_hash();
        let data: Arc<dyn EventData> = table.clone();
        Ok(Dataset::new(
            path.to_path_buf(),
            DatasetFormat::from_path(path),
            data,
            config.clone(),
            hash,
        ))
    }
}

/// Hex encoding of the first 16 bytes of a digest.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

/// Hash of a hierarchy child, derived from its parent's hash.
#[must_use]
pub fn hierarchy_hash(parent_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"hierarchy child of ");
    hasher.update(parent_hash.as_bytes());
    hex_digest(&hasher.finalize())
}

fn new_identifier(format: DatasetFormat) -> String {
    format!("mm-{format}_{:016x}", rand::random::<u64>())
}

/// One measurement in an analysis.
#[derive(Debug, Clone)]
pub struct Dataset {
    identifier: String,
    hash: String,
    /// Human-editable title.
    pub title: String,
    path: PathBuf,
    format: DatasetFormat,
    /// Editable configuration.
    pub config: Config,
    data: Arc<dyn EventData>,
    parent: Option<String>,
    /// `None` for roots; indices into the root's events for children.
    root_indices: Option<Vec<usize>>,
    manual: Vec<bool>,
    filter: Vec<bool>,
}

impl Dataset {
    /// Creates a root dataset with a fresh identifier.
    #[must_use]
    pub fn new(
        path: PathBuf,
        format: DatasetFormat,
        data: Arc<dyn EventData>,
        config: Config,
        hash: String,
    ) -> Self {
        let len = data.len();
        let title = default_title(&config, &path);
        let mut dataset = Self {
            identifier: new_identifier(format),
            hash,
            title,
            path,
            format,
            config,
            data,
            parent: None,
            root_indices: None,
            manual: vec![true; len],
            filter: vec![true; len],
        };
        dataset.fill_filtering_defaults();
        dataset
    }

    /// Creates an in-memory dataset from a table.
    #[must_use]
    pub fn from_table(table: EventTable, config: Config) -> Self {
        let hash = table.content_hash();
        Self::new(PathBuf::new(), DatasetFormat::Dict, Arc::new(table), config, hash)
    }

    /// Creates a hierarchy child over the currently filtered events of `parent`.
    #[must_use]
    pub fn hierarchy_child(parent: &Dataset) -> Self {
        let root_indices = parent.filtered_root_indices();
        let len = root_indices.len();
        let mut config = parent.config.clone();
        let filtering = config.section_mut("filtering");
        filtering.retain(|_, _| false);
        for (key, value) in filter::default_filtering() {
            filtering.set(key, value);
        }
        filtering.set("hierarchy parent", parent.identifier.as_str());
        Self {
            identifier: new_identifier(DatasetFormat::Hierarchy),
            hash: hierarchy_hash(&parent.hash),
            title: format!("{}_child", parent.title),
            path: PathBuf::new(),
            format: DatasetFormat::Hierarchy,
            config,
            data: Arc::clone(&parent.data),
            parent: Some(parent.identifier.clone()),
            root_indices: Some(root_indices),
            manual: vec![true; len],
            filter: vec![true; len],
        }
    }

    /// Replaces the identifier (used when restoring a session).
    #[must_use]
    pub fn with_identifier(mut self, identifier: &str) -> Self {
        self.identifier = identifier.to_string();
        self
    }

    fn fill_filtering_defaults(&mut self) {
        let filtering = self.config.section_mut("filtering");
        for (key, value) in filter::default_filtering() {
            if !filtering.contains(key) {
                filtering.set(key, value);
            }
        }
    }

    /// Stable identifier, independent of content.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Content hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Path of the measurement file (empty for children).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Storage class.
    #[must_use]
    pub fn format(&self) -> DatasetFormat {
        self.format
    }

    /// Identifier of the parent for hierarchy children.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Points a hierarchy child at a (re-created) parent.
    pub fn set_parent(&mut self, identifier: &str) {
        self.parent = Some(identifier.to_string());
        self.config
            .set("filtering", "hierarchy parent", identifier);
    }

    /// Whether this dataset is a hierarchy child.
    #[must_use]
    pub fn is_hierarchy_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root_indices.as_ref().map_or(self.data.len(), Vec::len)
    }

    /// Whether there are no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scalar features available.
    #[must_use]
    pub fn features(&self) -> Vec<String> {
        self.data.features()
    }

    /// Whether `feature` is available.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.data.scalar(feature).is_some()
    }

    /// Values of a scalar feature, one per event.
    ///
    /// # Errors
    /// Returns `UnknownFeature` if the feature is not available.
    pub fn scalar(&self, feature: &str) -> Result<Cow<'_, [f64]>> {
        let values = self
            .data
            .scalar(feature)
            .ok_or_else(|| Error::UnknownFeature(feature.to_string()))?;
        Ok(match &self.root_indices {
            None => Cow::Borrowed(values),
            Some(indices) => Cow::Owned(indices.iter().map(|&i| values[i]).collect()),
        })
    }

    /// Values of a scalar feature for events passing the filter.
    ///
    /// # Errors
    /// Returns `UnknownFeature` if the feature is not available.
    pub fn filtered(&self, feature: &str) -> Result<Vec<f64>> {
        let values = self.scalar(feature)?;
        Ok(values
            .iter()
            .zip(&self.filter)
            .filter_map(|(v, keep)| keep.then_some(*v))
            .collect())
    }

    /// Combined filter (true = event kept).
    #[must_use]
    pub fn filter(&self) -> &[bool] {
        &self.filter
    }

    /// Number of events passing the filter.
    #[must_use]
    pub fn filtered_len(&self) -> usize {
        self.filter.iter().filter(|k| **k).count()
    }

    /// Manual exclusion vector (true = event kept).
    #[must_use]
    pub fn manual(&self) -> &[bool] {
        &self.manual
    }

    /// Replaces the manual exclusion vector.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the length differs from the event count.
    pub fn set_manual(&mut self, manual: Vec<bool>) -> Result<()> {
        if manual.len() != self.len() {
            return Err(Error::InvalidConfig(format!(
                "manual filter has {} entries, dataset {} has {} events",
                manual.len(),
                self.identifier,
                self.len()
            )));
        }
        self.manual = manual;
        Ok(())
    }

    /// Manually excludes events by index.
    pub fn exclude_events(&mut self, indices: &[usize]) {
        for &i in indices {
            if let Some(keep) = self.manual.get_mut(i) {
                *keep = false;
            }
        }
    }

    /// Indices of this dataset's events in the root dataset.
    #[must_use]
    pub fn root_indices(&self) -> Cow<'_, [usize]> {
        match &self.root_indices {
            Some(indices) => Cow::Borrowed(indices),
            None => Cow::Owned((0..self.data.len()).collect()),
        }
    }

    /// Root indices of events passing the filter.
    #[must_use]
    pub fn filtered_root_indices(&self) -> Vec<usize> {
        self.root_indices()
            .iter()
            .zip(&self.filter)
            .filter_map(|(i, keep)| keep.then_some(*i))
            .collect()
    }

    /// Root indices of manually excluded events.
    #[must_use]
    pub fn manual_excluded_root_indices(&self) -> Vec<usize> {
        self.root_indices()
            .iter()
            .zip(&self.manual)
            .filter_map(|(i, keep)| (!keep).then_some(*i))
            .collect()
    }

    /// Sets the manual filter from root indices: events whose root index is
    /// listed are excluded, all others kept.
    pub fn set_manual_from_root_indices(&mut self, excluded: &[usize]) {
        let excluded: HashSet<usize> = excluded.iter().copied().collect();
        self.manual = self
            .root_indices()
            .iter()
            .map(|i| !excluded.contains(i))
            .collect();
    }

    /// Re-derives a child's events from its parent's filtered root indices,
    /// keeping manual exclusions attached to the same root events.
    pub(crate) fn rederive(&mut self, root_indices: Vec<usize>) {
        let excluded = self.manual_excluded_root_indices();
        self.root_indices = Some(root_indices);
        self.set_manual_from_root_indices(&excluded);
        self.filter = vec![true; self.len()];
    }

    /// Recomputes the filter from the configuration and manual exclusions.
    ///
    /// Hierarchy children must be re-derived from their parent first, which
    /// [`crate::Analysis::apply_filter`] does. Polygon ids unknown to the
    /// registry are dropped from the configuration.
    pub fn apply_filter(&mut self, registry: &PolygonRegistry) {
        let features = self.features();
        let settings = FilterSettings::from_config(&self.config, &features);
        let len = self.len();

        if !settings.enabled {
            self.filter = vec![true; len];
            return;
        }

        let mut mask = self.manual.clone();
        mask.resize(len, true);

        for range in &settings.ranges {
            if let Ok(values) = self.scalar(&range.feature) {
                filter::apply_range(&mut mask, &values, range);
            }
        }

        if settings.remove_invalid {
            for feature in &features {
                if let Ok(values) = self.scalar(feature) {
                    filter::apply_finite(&mut mask, &values);
                }
            }
        }

        let mut kept_ids = Vec::with_capacity(settings.polygon_ids.len());
        for id in &settings.polygon_ids {
            let Some(polygon) = registry.get(*id) else {
                warn!(
                    "dataset {}: dropping unknown polygon filter {id}",
                    self.identifier
                );
                continue;
            };
            kept_ids.push(*id);
            if !polygon.applies_to(&features) {
                debug!(
                    "dataset {}: polygon {id} axes {:?} not available",
                    self.identifier, polygon.axes
                );
                continue;
            }
            if let (Ok(x), Ok(y)) = (self.scalar(&polygon.axes.0), self.scalar(&polygon.axes.1)) {
                for (keep, pass) in mask.iter_mut().zip(polygon.filter(&x, &y)) {
                    *keep &= pass;
                }
            }
        }
        if kept_ids.len() != settings.polygon_ids.len() {
            filter::set_polygon_ids(&mut self.config, &kept_ids);
        }

        filter::downsample(&mut mask, settings.limit_events);
        self.filter = mask;
    }
}

fn default_title(config: &Config, path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    match (
        config.get_str("experiment", "sample"),
        config.get_i64("experiment", "run index"),
    ) {
        (Some(sample), Some(run)) => format!("{sample} - M{run}"),
        (Some(sample), None) => sample.to_string(),
        _ => stem.to_string(),
    }
}
