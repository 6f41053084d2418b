//! Batch statistics over a directory tree.
//!
//! Every measurement below a root directory is opened, filtered with one
//! shared filter configuration and summarised as a row of a tab-separated
//! table:
//!
//! ```text
//! # data file	Title	Events	Mean Deformation
//! /data/M1_data.rtdc	blood - M1	4.4000000000e1	1.3096000000e-1
//! ```

use crate::probe::{find_measurements, Metadata};
use crate::{Error, Result};
use csv::{Terminator, WriterBuilder};
use log::{info, warn};
use shapeout_core::{filter, get_statistics, CancelFlag, Config, DatasetLoader, PolygonRegistry};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Chip region selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipRegion {
    #[default]
    Channel,
    Reservoir,
    Both,
}

impl ChipRegion {
    /// Whether a measurement recorded in `region` is selected.
    #[must_use]
    pub fn matches(self, region: &str) -> bool {
        match self {
            ChipRegion::Both => true,
            ChipRegion::Channel => region.eq_ignore_ascii_case("channel"),
            ChipRegion::Reservoir => region.eq_ignore_ascii_case("reservoir"),
        }
    }
}

impl fmt::Display for ChipRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipRegion::Channel => write!(f, "channel"),
            ChipRegion::Reservoir => write!(f, "reservoir"),
            ChipRegion::Both => write!(f, "both"),
        }
    }
}

impl FromStr for ChipRegion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "channel" => Ok(Self::Channel),
            "reservoir" => Ok(Self::Reservoir),
            "both" => Ok(Self::Both),
            other => Err(shapeout_core::Error::BadValue {
                key: "chip region".to_string(),
                value: other.to_string(),
            }
            .into()),
        }
    }
}

/// What to compute and which measurements to include.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub features: Vec<String>,
    pub methods: Vec<String>,
    /// Only measurements recorded at this flow rate; all if `None`.
    pub flow_rate: Option<f64>,
    pub chip_region: ChipRegion,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            features: vec!["deform".to_string()],
            methods: vec!["Events".to_string(), "Mean".to_string()],
            flow_rate: None,
            chip_region: ChipRegion::Both,
        }
    }
}

/// Distinct flow rates of `rows`, ascending.
#[must_use]
pub fn flow_rate_choices(rows: &[Metadata]) -> Vec<f64> {
    let mut rates: Vec<f64> = rows.iter().map(|r| r.flow_rate).filter(|r| r.is_finite()).collect();
    rates.sort_by(f64::total_cmp);
    rates.dedup_by(|a, b| same_rate(*a, *b));
    rates
}

fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// Summarises every measurement below `root` into the TSV file `output`.
///
/// The `filtering` section of `filter_config` replaces each dataset's own;
/// polygon filters are looked up in `registry`. Measurements that cannot be
/// opened are skipped with a warning. Stops early when `cancel` is set.
/// Returns the number of rows written.
///
/// # Errors
/// Returns `SchemaMismatch` if a measurement yields different statistics
/// columns than the first one, or an I/O error.
pub fn summarize(
    root: &Path,
    filter_config: &Config,
    loader: &dyn DatasetLoader,
    registry: &PolygonRegistry,
    options: &BatchOptions,
    output: &Path,
    cancel: &CancelFlag,
) -> Result<usize> {
    let methods: Vec<&str> = options.methods.iter().map(String::as_str).collect();
    let features: Vec<&str> = options.features.iter().map(String::as_str).collect();
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .terminator(Terminator::Any(b'\n'))
        .from_path(output)?;

    let mut headings: Option<Vec<String>> = None;
    let mut rows = 0;
    for path in find_measurements(root)? {
        if cancel.is_cancelled() {
            info!("batch summary cancelled after {rows} rows");
            break;
        }
        let mut dataset = match loader.open(&path) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        let region = dataset
            .config
            .get_str("setup", "chip region")
            .unwrap_or("channel")
            .to_string();
        if !options.chip_region.matches(&region) {
            continue;
        }
        if let Some(rate) = options.flow_rate {
            let own = dataset.config.get_f64("setup", "flow rate");
            if !own.is_some_and(|own| same_rate(own, rate)) {
                continue;
            }
        }

        if let Some(filtering) = filter_config.section("filtering") {
            let target = dataset.config.section_mut("filtering");
            target.retain(|_, _| false);
            target.update(filtering);
            for (key, value) in filter::default_filtering() {
                if !target.contains(key) {
                    target.set(key, value);
                }
            }
        }
        dataset.apply_filter(registry);

        let (heads, values) = get_statistics(&dataset, &methods, &features)?;
        match &headings {
            None => {
                let mut header = vec!["# data file".to_string(), "Title".to_string()];
                header.extend(heads.iter().cloned());
                writer.write_record(&header)?;
                headings = Some(heads);
            }
            Some(expected) if *expected != heads => {
                return Err(shapeout_core::Error::SchemaMismatch {
                    expected: expected.clone(),
                    found: heads,
                    identifier: path.display().to_string(),
                }
                .into());
            }
            Some(_) => {}
        }

        let mut record = vec![path.display().to_string(), dataset.title.clone()];
        record.extend(values.iter().map(|v| format!("{v:.10e}")));
        writer.write_record(&record)?;
        rows += 1;
    }
    writer.flush()?;
    info!("wrote {rows} rows to {}", output.display());
    Ok(rows)
}
