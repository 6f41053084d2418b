//! Analysis: an ordered collection of datasets with shared configuration.
//!
//! Mutating operations update the per-dataset configuration and finish by
//! re-applying filters. Hierarchy children are always filtered after their
//! parent within the same pass.

use crate::config::{Config, ConfigSection, ConfigValue, SHARED_SECTIONS};
use crate::dataset::Dataset;
use crate::feature;
use crate::filter;
use crate::palette;
use crate::polygon::SharedRegistry;
use crate::statistics::{self, DATASET_METHODS, FEATURE_METHODS};
use crate::{Error, Result};
use log::debug;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, PoisonError};

/// Keys that belong to a single dataset and are never propagated.
pub const PER_DATASET_KEYS: [&str; 4] = [
    "contour color",
    "hierarchy parent",
    "regression repetition",
    "regression treatment",
];

/// Axis scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    #[default]
    Linear,
    Log,
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scale::Linear => write!(f, "linear"),
            Scale::Log => write!(f, "log"),
        }
    }
}

impl FromStr for Scale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "log" => Ok(Self::Log),
            other => Err(Error::BadValue {
                key: "scale".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// An ordered collection of datasets.
pub struct Analysis {
    measurements: Vec<Dataset>,
    registry: SharedRegistry,
}

impl Analysis {
    /// Creates an analysis from opened datasets.
    ///
    /// `config` (shared sections only) is applied before the first filter
    /// pass; missing defaults are filled in by [`Analysis::complete_config`].
    ///
    /// # Errors
    /// Returns `DuplicateMeasurement` if a dataset appears twice and
    /// `InvalidHierarchy` if a child's parent is missing.
    pub fn new(data: Vec<Dataset>, config: Option<&Config>, registry: SharedRegistry) -> Result<Self> {
        let mut analysis = Self {
            measurements: Vec::with_capacity(data.len()),
            registry,
        };
        for dataset in data {
            analysis.check_unique(&dataset)?;
            analysis.measurements.push(dataset);
        }
        if let Some(config) = config {
            let shared = shared_part(config);
            for dataset in &mut analysis.measurements {
                merge_shared(&mut dataset.config, &shared);
            }
        }
        analysis.complete_config();
        analysis.apply_filter()?;
        Ok(analysis)
    }

    fn check_unique(&self, dataset: &Dataset) -> Result<()> {
        if self.position(dataset.identifier()).is_some() {
            return Err(Error::DuplicateMeasurement(dataset.identifier().to_string()));
        }
        Ok(())
    }

    fn position(&self, identifier: &str) -> Option<usize> {
        self.measurements
            .iter()
            .position(|d| d.identifier() == identifier)
    }

    /// The polygon registry used for filtering.
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Replaces the contents of `target` with the polygons of this
    /// analysis' registry and filters against `target` from then on.
    ///
    /// Ids are kept, so dataset configurations stay valid.
    pub fn move_registry_into(&mut self, target: SharedRegistry) {
        if Arc::ptr_eq(&self.registry, &target) {
            return;
        }
        let polygons = std::mem::take(
            &mut *self.registry.write().unwrap_or_else(PoisonError::into_inner),
        );
        *target.write().unwrap_or_else(PoisonError::into_inner) = polygons;
        self.registry = target;
    }

    /// Datasets in order.
    #[must_use]
    pub fn measurements(&self) -> &[Dataset] {
        &self.measurements
    }

    /// Mutable access to the datasets. Call [`Analysis::apply_filter`] after
    /// changing filter-related state.
    pub fn measurements_mut(&mut self) -> &mut [Dataset] {
        &mut self.measurements
    }

    /// Consumes the analysis, returning its datasets.
    #[must_use]
    pub fn into_measurements(self) -> Vec<Dataset> {
        self.measurements
    }

    /// Returns a dataset by identifier.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&Dataset> {
        self.measurements.iter().find(|d| d.identifier() == identifier)
    }

    /// Returns a mutable dataset by identifier.
    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut Dataset> {
        self.measurements
            .iter_mut()
            .find(|d| d.identifier() == identifier)
    }

    /// Number of datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Whether the analysis holds no dataset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Adds a dataset, e.g. a freshly created hierarchy child.
    ///
    /// Shared settings missing from the new dataset are taken from the first
    /// dataset, then filters are re-applied.
    ///
    /// # Errors
    /// Returns `DuplicateMeasurement` for a dataset already present and
    /// `InvalidHierarchy` if a child's parent is not part of the analysis.
    pub fn append(&mut self, mut dataset: Dataset) -> Result<()> {
        self.check_unique(&dataset)?;
        if let Some(parent) = dataset.parent() {
            if self.position(parent).is_none() {
                return Err(Error::InvalidHierarchy(format!(
                    "parent {parent} of {} is not part of the analysis",
                    dataset.identifier()
                )));
            }
        }
        if let Some(first) = self.measurements.first() {
            for name in SHARED_SECTIONS {
                let Some(template) = first.config.section(name) else {
                    continue;
                };
                let target = dataset.config.section_mut(name);
                for (key, value) in template.iter() {
                    if !target.contains(key) && !PER_DATASET_KEYS.contains(&key.as_str()) {
                        target.set(key, value.clone());
                    }
                }
            }
        }
        self.measurements.push(dataset);
        self.complete_config();
        self.apply_filter()
    }

    /// Creates a hierarchy child of `parent` and appends it.
    ///
    /// Returns the identifier of the child.
    ///
    /// # Errors
    /// Returns `InvalidHierarchy` if `parent` is not part of the analysis.
    pub fn add_hierarchy_child(&mut self, parent: &str) -> Result<String> {
        let parent = self
            .get(parent)
            .ok_or_else(|| Error::InvalidHierarchy(format!("unknown parent {parent}")))?;
        let child = Dataset::hierarchy_child(parent);
        let identifier = child.identifier().to_string();
        self.append(child)?;
        Ok(identifier)
    }

    /// Removes a dataset together with all its hierarchy descendants.
    ///
    /// Returns the removed datasets in their former order.
    pub fn remove(&mut self, identifier: &str) -> Vec<Dataset> {
        let mut doomed = vec![identifier.to_string()];
        loop {
            let before = doomed.len();
            for dataset in &self.measurements {
                if let Some(parent) = dataset.parent() {
                    if doomed.iter().any(|d| d == parent)
                        && !doomed.iter().any(|d| d == dataset.identifier())
                    {
                        doomed.push(dataset.identifier().to_string());
                    }
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        let (removed, kept) = std::mem::take(&mut self.measurements)
            .into_iter()
            .partition(|d| doomed.iter().any(|id| id == d.identifier()));
        self.measurements = kept;
        removed
    }

    /// Re-applies filters on every dataset, parents before children.
    ///
    /// # Errors
    /// Returns `InvalidHierarchy` if a child's parent is missing or the
    /// hierarchy contains a cycle.
    pub fn apply_filter(&mut self) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let registry = registry.read().unwrap_or_else(PoisonError::into_inner);
        let n = self.measurements.len();
        let mut done = vec![false; n];
        let mut remaining = n;
        while remaining > 0 {
            let mut progressed = false;
            for i in 0..n {
                if done[i] {
                    continue;
                }
                if let Some(parent) = self.measurements[i].parent() {
                    let p = self.position(parent).ok_or_else(|| {
                        Error::InvalidHierarchy(format!(
                            "parent {parent} of {} is missing",
                            self.measurements[i].identifier()
                        ))
                    })?;
                    if !done[p] {
                        continue;
                    }
                    let indices = self.measurements[p].filtered_root_indices();
                    self.measurements[i].rederive(indices);
                }
                self.measurements[i].apply_filter(&registry);
                done[i] = true;
                remaining -= 1;
                progressed = true;
            }
            if !progressed {
                return Err(Error::InvalidHierarchy(
                    "hierarchy contains a cycle".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Deep-merges the shared sections of `new_cfg` into every dataset and
    /// re-applies filters.
    ///
    /// Per-dataset keys are not propagated. Contour plotting is switched off
    /// for datasets plotted on a logarithmic scale.
    ///
    /// # Errors
    /// See [`Analysis::apply_filter`].
    pub fn set_parameters(&mut self, new_cfg: &Config) -> Result<()> {
        let shared = shared_part(new_cfg);
        for dataset in &mut self.measurements {
            merge_shared(&mut dataset.config, &shared);
            let log_scale = ["scale x", "scale y"]
                .iter()
                .any(|key| dataset.config.get_str("plotting", key) == Some("log"));
            if log_scale {
                debug!("{}: log scale, disabling contour plot", dataset.identifier());
                dataset.config.set("plotting", "contour plot", false);
            }
        }
        self.apply_filter()
    }

    /// Limits every dataset to the smallest filtered event count.
    ///
    /// Returns the chosen size. Calling it again yields the same size.
    ///
    /// # Errors
    /// See [`Analysis::apply_filter`].
    pub fn force_same_data_size(&mut self) -> Result<usize> {
        for dataset in &mut self.measurements {
            dataset.config.set("filtering", "limit events", 0_i64);
        }
        self.apply_filter()?;
        let size = self
            .measurements
            .iter()
            .map(Dataset::filtered_len)
            .min()
            .unwrap_or(0);
        for dataset in &mut self.measurements {
            dataset.config.set("filtering", "limit events", size);
        }
        self.apply_filter()?;
        Ok(size)
    }

    /// Drops all contour and KDE accuracies and recomputes them.
    pub fn reset_plot_accuracies(&mut self) {
        for dataset in &mut self.measurements {
            dataset.config.section_mut("plotting").retain(|key, _| {
                !key.starts_with("contour accuracy") && !key.starts_with("kde accuracy")
            });
        }
        self.complete_config();
    }

    /// Removes polygon `id` from every dataset's filter configuration.
    ///
    /// # Errors
    /// See [`Analysis::apply_filter`].
    pub fn polygon_filter_remove(&mut self, id: u32) -> Result<()> {
        for dataset in &mut self.measurements {
            let ids: Vec<u32> = filter::polygon_ids(&dataset.config)
                .into_iter()
                .filter(|i| *i != id)
                .collect();
            filter::set_polygon_ids(&mut dataset.config, &ids);
        }
        self.apply_filter()
    }

    /// Assigns contour colours. Without explicit colours, several datasets get
    /// samples of a qualitative palette and a single dataset gets the default.
    pub fn set_contour_colors(&mut self, colors: Option<&[String]>) {
        let colors: Vec<String> = match colors {
            Some(colors) => colors.to_vec(),
            None if self.measurements.len() > 1 => palette::qualitative(self.measurements.len())
                .into_iter()
                .map(palette::Color::to_hex)
                .collect(),
            None => vec![palette::DEFAULT_COLOR.to_hex()],
        };
        for (dataset, color) in self.measurements.iter_mut().zip(colors) {
            dataset.config.set("plotting", "contour color", color);
        }
    }

    /// Fills in missing configuration defaults on every dataset.
    ///
    /// Plot ranges default to 0 (automatic); contour and KDE accuracies are a
    /// tenth of the data extent across all datasets.
    pub fn complete_config(&mut self) {
        let usable = self.get_usable_axes();
        let accuracies: Vec<(String, f64)> = usable
            .iter()
            .map(|name| (name.clone(), self.default_accuracy(name)))
            .collect();
        let axis_x = pick_axis(&usable, "area_um", 0);
        let axis_y = pick_axis(&usable, "deform", 1);

        for dataset in &mut self.measurements {
            let plotting = dataset.config.section_mut("plotting");
            let defaults: [(&str, ConfigValue); 10] = [
                ("axis x", axis_x.clone().into()),
                ("axis y", axis_y.clone().into()),
                ("contour level 1", ConfigValue::Float(0.5)),
                ("contour level 2", ConfigValue::Float(0.95)),
                ("contour plot", true.into()),
                ("downsample events", 5000_i64.into()),
                ("downsampling", true.into()),
                ("kde", "histogram".into()),
                ("scale x", "linear".into()),
                ("scale y", "linear".into()),
            ];
            set_missing(plotting, defaults);
            set_missing(plotting, [("scatter plot", true.into()), ("legend", true.into())]);
            for (name, accuracy) in &accuracies {
                set_missing(
                    plotting,
                    [
                        (format!("{name} min").as_str(), ConfigValue::Float(0.0)),
                        (format!("{name} max").as_str(), ConfigValue::Float(0.0)),
                        (format!("contour accuracy {name}").as_str(), (*accuracy).into()),
                        (format!("kde accuracy {name}").as_str(), (*accuracy).into()),
                    ],
                );
            }

            let filtering = dataset.config.section_mut("filtering");
            set_missing(filtering, filter::default_filtering());

            set_missing(
                dataset.config.section_mut("calculation"),
                [
                    ("emodulus medium", "CellCarrier".into()),
                    ("emodulus model", "elastic sphere".into()),
                    ("emodulus temperature", ConfigValue::Float(23.0)),
                    ("emodulus viscosity", ConfigValue::Float(15.0)),
                ],
            );
            set_missing(
                dataset.config.section_mut("analysis"),
                [("regression model", "lmm".into())],
            );
        }

        let has_colors = self
            .measurements
            .iter()
            .all(|d| d.config.contains("plotting", "contour color"));
        if !has_colors {
            self.set_contour_colors(None);
        }
    }

    fn default_accuracy(&self, name: &str) -> f64 {
        let (lo, hi) = self
            .measurements
            .iter()
            .filter_map(|d| d.scalar(name).ok())
            .flat_map(|values| values.iter().copied().collect::<Vec<_>>())
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        let extent = hi - lo;
        if extent.is_finite() && extent > 0.0 {
            significant(extent / 10.0)
        } else {
            1.0
        }
    }

    /// One section of the dataset at `at`, without keys for features that
    /// are not usable axes.
    #[must_use]
    pub fn get_parameters(&self, section: &str, at: usize) -> Option<ConfigSection> {
        let usable = self.get_usable_axes();
        let mut section = self.measurements.get(at)?.config.section(section)?.clone();
        section.retain(|key, _| match feature::feature_of_key(key) {
            Some(name) if feature::is_scalar(name) => usable.iter().any(|u| u == name),
            _ => true,
        });
        Some(section)
    }

    /// Keys of `section` that have the same value in every dataset.
    #[must_use]
    pub fn get_common_parameters(&self, section: &str) -> ConfigSection {
        let mut common = ConfigSection::new();
        let Some(first) = self.measurements.first() else {
            return common;
        };
        let Some(reference) = first.config.section(section) else {
            return common;
        };
        for (key, value) in reference.iter() {
            let shared = self.measurements[1..]
                .iter()
                .all(|d| d.config.get(section, key) == Some(value));
            if shared {
                common.set(key, value.clone());
            }
        }
        common
    }

    /// Per dataset, the keys of `section` not common to all datasets.
    #[must_use]
    pub fn get_uncommon_parameters(&self, section: &str) -> Vec<ConfigSection> {
        let common = self.get_common_parameters(section);
        self.measurements
            .iter()
            .map(|d| {
                let mut own = d.config.section(section).cloned().unwrap_or_default();
                own.retain(|key, _| !common.contains(key));
                own
            })
            .collect()
    }

    /// Scalar features present in every dataset, minus ignored axes.
    #[must_use]
    pub fn get_usable_axes(&self) -> Vec<String> {
        let Some(first) = self.measurements.first() else {
            return Vec::new();
        };
        let mut axes: Vec<String> = first
            .features()
            .into_iter()
            .filter(|f| feature::is_scalar(f) && !feature::IGNORED_AXES.contains(&f.as_str()))
            .filter(|f| self.measurements[1..].iter().all(|d| d.has_feature(f)))
            .collect();
        axes.sort();
        axes
    }

    /// `(axis x, axis y)` of the dataset at `at`.
    #[must_use]
    pub fn get_plot_axes(&self, at: usize) -> (String, String) {
        let config = self.measurements.get(at).map(|d| &d.config);
        let axis = |key: &str, default: &str| {
            config
                .and_then(|c| c.get_str("plotting", key))
                .unwrap_or(default)
                .to_string()
        };
        (axis("axis x", "area_um"), axis("axis y", "deform"))
    }

    /// Basic statistics of every dataset for the current plot axes.
    ///
    /// Returns the common headings and one row per dataset.
    ///
    /// # Errors
    /// Returns `SchemaMismatch` if the headings differ between datasets and
    /// `UnknownFeature` if a dataset lacks a plot axis.
    pub fn get_statistics_basic(&self) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
        let (x, y) = self.get_plot_axes(0);
        let methods: Vec<&str> = DATASET_METHODS.iter().chain(&FEATURE_METHODS).copied().collect();
        let features = [x.as_str(), y.as_str()];
        let mut headings = Vec::new();
        let mut rows = Vec::with_capacity(self.measurements.len());
        for (i, dataset) in self.measurements.iter().enumerate() {
            let (heads, values) = statistics::get_statistics(dataset, &methods, &features)?;
            if i == 0 {
                headings = heads;
            } else if heads != headings {
                return Err(Error::SchemaMismatch {
                    expected: headings,
                    found: heads,
                    identifier: dataset.identifier().to_string(),
                });
            }
            rows.push(values);
        }
        Ok((headings, rows))
    }

    /// Data range of `feature` over the filtered events of all datasets.
    ///
    /// For `Log`, non-positive values are ignored and the lower bound is at
    /// least 5 % of the maximum.
    ///
    /// # Errors
    /// Returns `UnknownFeature` if no dataset provides `feature`.
    pub fn get_feat_range(&self, feature: &str, scale: Scale) -> Result<(f64, f64)> {
        let mut found = false;
        let mut values = Vec::new();
        for dataset in &self.measurements {
            if let Ok(data) = dataset.filtered(feature) {
                found = true;
                values.extend(data.into_iter().filter(|v| v.is_finite()));
            }
        }
        if !found {
            return Err(Error::UnknownFeature(feature.to_string()));
        }
        if scale == Scale::Log {
            values.retain(|v| *v > 0.0);
        }
        if values.is_empty() {
            return Ok(match scale {
                Scale::Linear => (0.0, 0.0),
                Scale::Log => (0.1, 1.0),
            });
        }
        let (lo, hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        Ok(match scale {
            Scale::Linear => (lo, hi),
            Scale::Log => (lo.max(0.05 * hi), hi),
        })
    }

    /// Plot range for `feature` with a safety band for the common features
    /// (`area_um`, `deform`, `fl*_max`).
    ///
    /// Without `scale`, the scale configured for the matching plot axis is
    /// used (linear otherwise).
    ///
    /// # Errors
    /// Returns `UnknownFeature` if no dataset provides `feature`.
    pub fn get_feat_range_opt(&self, feature: &str, scale: Option<Scale>) -> Result<(f64, f64)> {
        let scale = match scale {
            Some(scale) => scale,
            None => self.configured_scale(feature),
        };
        let (lo, hi) = self.get_feat_range(feature, scale)?;
        if !feature::has_safety_band(feature) {
            return Ok((lo, hi));
        }
        Ok(match scale {
            Scale::Log => (lo / 1.1, hi * 1.1),
            Scale::Linear => {
                let span = hi - lo;
                let pad = if span > 0.0 { 0.05 * span } else { 0.1 * hi.abs().max(1e-3) };
                let lower = if lo >= 0.0 { (lo - pad).max(0.0) } else { lo - pad };
                (lower, hi + pad)
            }
        })
    }

    fn configured_scale(&self, feature: &str) -> Scale {
        let (x, y) = self.get_plot_axes(0);
        let key = if feature == x {
            "scale x"
        } else if feature == y {
            "scale y"
        } else {
            return Scale::Linear;
        };
        self.measurements
            .first()
            .and_then(|d| d.config.get_str("plotting", key))
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// Contour colour of every dataset.
    #[must_use]
    pub fn get_contour_colors(&self) -> Vec<String> {
        self.measurements
            .iter()
            .map(|d| {
                d.config
                    .get_str("plotting", "contour color")
                    .map_or_else(|| palette::DEFAULT_COLOR.to_hex(), str::to_string)
            })
            .collect()
    }

    /// Title of every dataset.
    #[must_use]
    pub fn get_titles(&self) -> Vec<String> {
        self.measurements.iter().map(|d| d.title.clone()).collect()
    }

    /// File path of every dataset (empty for hierarchy children).
    #[must_use]
    pub fn get_filenames(&self) -> Vec<PathBuf> {
        self.measurements
            .iter()
            .map(|d| d.path().to_path_buf())
            .collect()
    }
}

fn shared_part(config: &Config) -> Config {
    let mut shared = Config::new();
    for name in SHARED_SECTIONS {
        if let Some(section) = config.section(name) {
            let target = shared.section_mut(name);
            for (key, value) in section.iter() {
                if !PER_DATASET_KEYS.contains(&key.as_str()) {
                    target.set(key, value.clone());
                }
            }
        }
    }
    shared
}

fn merge_shared(target: &mut Config, shared: &Config) {
    for (name, section) in shared.sections() {
        target.section_mut(name).update(section);
    }
}

fn set_missing<'a>(
    section: &mut ConfigSection,
    defaults: impl IntoIterator<Item = (&'a str, ConfigValue)>,
) {
    for (key, value) in defaults {
        if !section.contains(key) {
            section.set(key, value);
        }
    }
}

fn pick_axis(usable: &[String], preferred: &str, fallback: usize) -> String {
    if usable.iter().any(|u| u == preferred) {
        return preferred.to_string();
    }
    usable
        .get(fallback)
        .or_else(|| usable.first())
        .cloned()
        .unwrap_or_else(|| preferred.to_string())
}

/// Rounds to two significant digits.
fn significant(value: f64) -> f64 {
    format!("{value:.1e}").parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::EventTable;
    use crate::polygon::PolygonRegistry;
    use approx::assert_relative_eq;

    #[allow(clippy::cast_precision_loss)]
    fn dataset(n: usize, offset: f64) -> Dataset {
        let deform: Vec<f64> = (0..n).map(|i| offset + i as f64 * 0.01).collect();
        let area: Vec<f64> = (0..n).map(|i| 20.0 + i as f64).collect();
        let table = EventTable::new()
            .with_column("deform", deform)
            .unwrap()
            .with_column("area_um", area)
            .unwrap()
            .with_column("time", vec![0.0; n])
            .unwrap();
        Dataset::from_table(table, Config::new())
    }

    fn analysis(sizes: &[usize]) -> Analysis {
        let data = sizes.iter().map(|n| dataset(*n, 0.0)).collect();
        Analysis::new(data, None, PolygonRegistry::shared()).unwrap()
    }

    #[test]
    fn test_duplicate_dataset_rejected() {
        let ds = dataset(5, 0.0);
        let copy = ds.clone();
        let result = Analysis::new(vec![ds, copy], None, PolygonRegistry::shared());
        assert!(matches!(result, Err(Error::DuplicateMeasurement(_))));
    }

    #[test]
    fn test_complete_config_defaults() {
        let a = analysis(&[11]);
        let plotting = a.get_parameters("plotting", 0).unwrap();
        assert_eq!(plotting.get("deform min"), Some(&ConfigValue::Float(0.0)));
        assert_eq!(plotting.get("axis x"), Some(&ConfigValue::Str("area_um".into())));
        // area extent 10 -> accuracy 1.0, deform extent 0.1 -> 0.01
        assert_relative_eq!(plotting.get("kde accuracy area_um").unwrap().as_f64().unwrap(), 1.0);
        assert_relative_eq!(
            plotting.get("contour accuracy deform").unwrap().as_f64().unwrap(),
            0.01
        );
        assert!(!plotting.contains("kde accuracy time"));
        assert_eq!(a.get_contour_colors(), vec!["#000000".to_string()]);
    }

    #[test]
    fn test_set_parameters_skips_per_dataset_keys() {
        let mut a = analysis(&[10, 10]);
        let colors = a.get_contour_colors();
        assert_ne!(colors[0], colors[1]);

        let mut cfg = Config::new();
        cfg.set("plotting", "contour color", "#ffffff");
        cfg.set("analysis", "regression treatment", "Control");
        cfg.set("filtering", "deform max", 0.045);
        a.set_parameters(&cfg).unwrap();

        assert_eq!(a.get_contour_colors(), colors);
        for ds in a.measurements() {
            assert!(!ds.config.contains("analysis", "regression treatment"));
            assert_eq!(ds.filtered_len(), 5);
        }
    }

    #[test]
    fn test_log_scale_disables_contour() {
        let mut a = analysis(&[10]);
        let mut cfg = Config::new();
        cfg.set("plotting", "scale y", "log");
        a.set_parameters(&cfg).unwrap();
        assert_eq!(a.measurements()[0].config.get_bool("plotting", "contour plot"), Some(false));
    }

    #[test]
    fn test_force_same_data_size_is_fixed_point() {
        let mut a = analysis(&[30, 12, 20]);
        let size = a.force_same_data_size().unwrap();
        assert_eq!(size, 12);
        for ds in a.measurements() {
            assert_eq!(ds.filtered_len(), 12);
        }
        assert_eq!(a.force_same_data_size().unwrap(), 12);
    }

    #[test]
    fn test_reset_plot_accuracies() {
        let mut a = analysis(&[11]);
        a.measurements_mut()[0].config.set("plotting", "kde accuracy deform", 5.0);
        a.reset_plot_accuracies();
        assert_relative_eq!(
            a.measurements()[0].config.get_f64("plotting", "kde accuracy deform").unwrap(),
            0.01
        );
    }

    #[test]
    fn test_polygon_filter_remove() {
        let registry = PolygonRegistry::shared();
        let id = registry
            .write()
            .unwrap()
            .create(
                vec![(0.0, 0.0), (22.5, 0.0), (22.5, 1.0), (0.0, 1.0)],
                ("area_um", "deform"),
                None,
                false,
            )
            .unwrap();
        let mut a = Analysis::new(vec![dataset(10, 0.0)], None, registry).unwrap();
        let mut cfg = Config::new();
        cfg.set("filtering", "polygon filters", vec![ConfigValue::Int(i64::from(id))]);
        a.set_parameters(&cfg).unwrap();
        assert_eq!(a.measurements()[0].filtered_len(), 3);
        a.polygon_filter_remove(id).unwrap();
        assert_eq!(a.measurements()[0].filtered_len(), 10);
        assert!(filter::polygon_ids(&a.measurements()[0].config).is_empty());
    }

    #[test]
    fn test_move_registry_into_replaces_target() {
        let staged = PolygonRegistry::shared();
        let id = staged
            .write()
            .unwrap()
            .create(
                vec![(0.0, 0.0), (22.5, 0.0), (22.5, 1.0), (0.0, 1.0)],
                ("area_um", "deform"),
                Some("staged"),
                false,
            )
            .unwrap();
        let mut a = Analysis::new(vec![dataset(10, 0.0)], None, staged.clone()).unwrap();
        let mut cfg = Config::new();
        cfg.set("filtering", "polygon filters", vec![ConfigValue::Int(i64::from(id))]);
        a.set_parameters(&cfg).unwrap();

        let live = PolygonRegistry::shared();
        live.write()
            .unwrap()
            .create(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], ("area_um", "deform"), Some("old"), false)
            .unwrap();
        a.move_registry_into(live.clone());

        assert!(Arc::ptr_eq(a.registry(), &live));
        assert!(staged.read().unwrap().is_empty());
        let names: Vec<String> = live.read().unwrap().all().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["staged"]);
        a.apply_filter().unwrap();
        assert_eq!(a.measurements()[0].filtered_len(), 3);
    }

    #[test]
    fn test_common_and_uncommon_parameters() {
        let mut a = analysis(&[10, 10]);
        a.measurements_mut()[1].config.set("filtering", "deform max", 0.5);
        let common = a.get_common_parameters("filtering");
        assert!(common.contains("enable filters"));
        assert!(!common.contains("deform max"));
        let uncommon = a.get_uncommon_parameters("filtering");
        assert!(uncommon[0].is_empty());
        assert!(uncommon[1].contains("deform max"));
    }

    #[test]
    fn test_usable_axes_intersection() {
        let table = EventTable::new()
            .with_column("deform", vec![0.1])
            .unwrap()
            .with_column("fl1_max", vec![1.0])
            .unwrap();
        let other = Dataset::from_table(table, Config::new());
        let a = Analysis::new(vec![dataset(3, 0.0), other], None, PolygonRegistry::shared()).unwrap();
        assert_eq!(a.get_usable_axes(), vec!["deform".to_string()]);
    }

    #[test]
    fn test_feature_ranges() {
        let a = Analysis::new(
            vec![dataset(5, -0.02), dataset(3, 0.1)],
            None,
            PolygonRegistry::shared(),
        )
        .unwrap();
        let (lo, hi) = a.get_feat_range("deform", Scale::Linear).unwrap();
        assert_relative_eq!(lo, -0.02, epsilon = 1e-12);
        assert_relative_eq!(hi, 0.12, epsilon = 1e-12);

        let (lo, hi) = a.get_feat_range("deform", Scale::Log).unwrap();
        assert!(lo > 0.0);
        assert_relative_eq!(lo, 0.01, epsilon = 1e-12);
        assert_relative_eq!(hi, 0.12, epsilon = 1e-12);

        let (lo, hi) = a.get_feat_range_opt("deform", Some(Scale::Log)).unwrap();
        assert!(lo > 0.0 && hi > 0.12);

        let (lo, hi) = a.get_feat_range_opt("area_um", None).unwrap();
        assert!(lo >= 0.0 && lo < 20.0 && hi > 24.0);
        assert!(matches!(
            a.get_feat_range("fl3_max", Scale::Linear),
            Err(Error::UnknownFeature(_))
        ));
    }

    #[test]
    fn test_statistics_basic() {
        let a = analysis(&[10, 4]);
        let (headings, rows) = a.get_statistics_basic().unwrap();
        assert_eq!(headings[0], "Events");
        assert!(headings.contains(&"Mean Deformation".to_string()));
        assert_relative_eq!(rows[1][0], 4.0);
    }

    #[test]
    fn test_statistics_missing_axis() {
        let mut a = analysis(&[5]);
        let table = EventTable::new().with_column("deform", vec![0.1, 0.2]).unwrap();
        a.append(Dataset::from_table(table, Config::new())).unwrap();
        assert!(matches!(a.get_statistics_basic(), Err(Error::UnknownFeature(_))));
    }

    #[test]
    fn test_hierarchy_follows_parent_filter() {
        let mut a = analysis(&[20]);
        let parent = a.measurements()[0].identifier().to_string();
        let child = a.add_hierarchy_child(&parent).unwrap();
        let grandchild = a.add_hierarchy_child(&child).unwrap();

        let mut cfg = Config::new();
        cfg.set("filtering", "deform max", 0.095);
        a.set_parameters(&cfg).unwrap();

        let p = a.get(&parent).unwrap().filtered_len();
        assert_eq!(p, 10);
        assert_eq!(a.get(&child).unwrap().len(), p);
        assert_eq!(a.get(&grandchild).unwrap().len(), a.get(&child).unwrap().filtered_len());

        let removed = a.remove(&child);
        assert_eq!(removed.len(), 2);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_append_child_with_missing_parent() {
        let mut a = analysis(&[5]);
        let other = dataset(5, 0.0);
        let orphan = Dataset::hierarchy_child(&other);
        assert!(matches!(a.append(orphan), Err(Error::InvalidHierarchy(_))));
    }
}
