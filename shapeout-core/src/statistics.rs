//! Basic statistics over filtered events.

use crate::dataset::Dataset;
use crate::feature;
use crate::{Error, Result};

/// Statistics methods that do not depend on a feature.
pub const DATASET_METHODS: [&str; 3] = ["Events", "%-gated", "Flow rate"];

/// Statistics methods computed per feature.
pub const FEATURE_METHODS: [&str; 4] = ["Mean", "Median", "Mode", "SD"];

/// Computes statistics for one dataset.
///
/// Headings are the method name for dataset methods and
/// `"<Method> <Feature label>"` for feature methods, in the order the
/// methods and features are given.
///
/// # Errors
/// Returns `BadValue` for unknown methods and `UnknownFeature` for features
/// the dataset lacks.
pub fn get_statistics(
    dataset: &Dataset,
    methods: &[&str],
    features: &[&str],
) -> Result<(Vec<String>, Vec<f64>)> {
    let mut headings = Vec::new();
    let mut values = Vec::new();
    for method in methods {
        if DATASET_METHODS.contains(method) {
            headings.push((*method).to_string());
            values.push(dataset_statistic(dataset, method));
        } else if FEATURE_METHODS.contains(method) {
            for name in features {
                let data: Vec<f64> = dataset
                    .filtered(name)?
                    .into_iter()
                    .filter(|v| v.is_finite())
                    .collect();
                headings.push(format!("{method} {}", feature::short_label(name)));
                values.push(feature_statistic(method, &data));
            }
        } else {
            return Err(Error::BadValue {
                key: "statistics method".to_string(),
                value: (*method).to_string(),
            });
        }
    }
    Ok((headings, values))
}

#[allow(clippy::cast_precision_loss)]
fn dataset_statistic(dataset: &Dataset, method: &str) -> f64 {
    match method {
        "Events" => dataset.filtered_len() as f64,
        "%-gated" => {
            if dataset.is_empty() {
                f64::NAN
            } else {
                100.0 * dataset.filtered_len() as f64 / dataset.len() as f64
            }
        }
        _ => dataset
            .config
            .get_f64("setup", "flow rate")
            .unwrap_or(f64::NAN),
    }
}

fn feature_statistic(method: &str, data: &[f64]) -> f64 {
    match method {
        "Mean" => mean(data),
        "Median" => median(data),
        "Mode" => mode(data),
        _ => std_dev(data),
    }
}

/// Arithmetic mean; NaN for empty input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Median (average of the two central values for even lengths).
#[must_use]
pub fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let m = mean(data);
    (data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Centre of the most populated bin of a histogram with `sqrt(n)` bins.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn mode(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let (lo, hi) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if hi <= lo {
        return lo;
    }
    let bins = ((data.len() as f64).sqrt() as usize).max(1);
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in data {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    let best = counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map_or(0, |(i, _)| i);
    lo + (best as f64 + 0.5) * width
}
