//! Event filter evaluation.
//!
//! The `filtering` section of a dataset configuration describes which events
//! survive: box ranges per feature (`<feature> min` / `<feature> max`),
//! polygon filters by id, removal of non-finite events and an optional
//! event limit. Manual exclusions are combined with all of these.

use crate::config::{Config, ConfigValue};
use crate::feature;

/// Default `filtering` entries every dataset carries.
#[must_use]
pub fn default_filtering() -> Vec<(&'static str, ConfigValue)> {
    vec![
        ("enable filters", ConfigValue::Bool(true)),
        ("hierarchy parent", ConfigValue::Str("none".to_string())),
        ("limit events", ConfigValue::Int(0)),
        ("polygon filters", ConfigValue::List(Vec::new())),
        ("remove invalid events", ConfigValue::Bool(false)),
    ]
}

/// A box range on one feature. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub feature: String,
    pub min: f64,
    pub max: f64,
}

impl RangeFilter {
    /// Whether `value` lies within the range. NaN never does.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Filter settings extracted from a dataset configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSettings {
    pub enabled: bool,
    pub limit_events: usize,
    pub remove_invalid: bool,
    pub polygon_ids: Vec<u32>,
    pub ranges: Vec<RangeFilter>,
}

impl FilterSettings {
    /// Reads the `filtering` section for a dataset offering `features`.
    ///
    /// A range is active when at least one bound is set and the bounds differ.
    /// Inverted bounds are kept as they are; they simply remove every event.
    #[must_use]
    pub fn from_config(config: &Config, features: &[String]) -> Self {
        let enabled = config.get_bool("filtering", "enable filters").unwrap_or(true);
        let limit_events = config
            .get_i64("filtering", "limit events")
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(0);
        let remove_invalid = config
            .get_bool("filtering", "remove invalid events")
            .unwrap_or(false);
        let polygon_ids = polygon_ids(config);

        let mut ranges = Vec::new();
        for name in features {
            let min = config.get_f64("filtering", &format!("{name} min"));
            let max = config.get_f64("filtering", &format!("{name} max"));
            let range = match (min, max) {
                (None, None) => continue,
                #[allow(clippy::float_cmp)]
                (Some(lo), Some(hi)) if lo == hi => continue,
                (lo, hi) => RangeFilter {
                    feature: name.clone(),
                    min: lo.unwrap_or(f64::NEG_INFINITY),
                    max: hi.unwrap_or(f64::INFINITY),
                },
            };
            ranges.push(range);
        }

        Self {
            enabled,
            limit_events,
            remove_invalid,
            polygon_ids,
            ranges,
        }
    }
}

/// Polygon ids referenced by `filtering.polygon filters`.
#[must_use]
pub fn polygon_ids(config: &Config) -> Vec<u32> {
    match config.get("filtering", "polygon filters") {
        Some(ConfigValue::List(items)) => items
            .iter()
            .filter_map(ConfigValue::as_i64)
            .filter_map(|v| u32::try_from(v).ok())
            .collect(),
        Some(value) => value
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .into_iter()
            .collect(),
        None => Vec::new(),
    }
}

/// Stores `ids` as `filtering.polygon filters`.
pub fn set_polygon_ids(config: &mut Config, ids: &[u32]) {
    let list = ids.iter().map(|id| ConfigValue::Int(i64::from(*id))).collect();
    config.set("filtering", "polygon filters", ConfigValue::List(list));
}

/// Clears `mask` where `values` fall outside `range`.
pub fn apply_range(mask: &mut [bool], values: &[f64], range: &RangeFilter) {
    for (keep, value) in mask.iter_mut().zip(values) {
        *keep &= range.contains(*value);
    }
}

/// Clears `mask` where `values` are not finite.
pub fn apply_finite(mask: &mut [bool], values: &[f64]) {
    for (keep, value) in mask.iter_mut().zip(values) {
        *keep &= value.is_finite();
    }
}

/// Reduces the passing events in `mask` to at most `limit`, picking evenly
/// spaced events so the result does not depend on randomness.
pub fn downsample(mask: &mut [bool], limit: usize) {
    let passing: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(i, keep)| keep.then_some(i))
        .collect();
    let count = passing.len();
    if limit == 0 || count <= limit {
        return;
    }
    for i in &passing {
        mask[*i] = false;
    }
    for k in 0..limit {
        mask[passing[k * count / limit]] = true;
    }
}

/// Whether a `filtering` key refers to a scalar feature range.
#[must_use]
pub fn is_range_key(key: &str) -> bool {
    (key.ends_with(" min") || key.ends_with(" max"))
        && feature::feature_of_key(key).is_some_and(feature::is_scalar)
}
