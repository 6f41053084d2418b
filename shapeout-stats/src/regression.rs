//! Mixed-effects regression of one feature across datasets.
//!
//! Datasets are labelled with a [`Treatment`] and a repetition
//! ("timeunit"). When reservoir recordings are present, each channel
//! dataset is replaced by the bootstrapped differential medians against the
//! reservoir recording of the same repetition. The resulting long table is
//! fitted with and without the treatment effect and the two fits are
//! compared with a likelihood-ratio test.

use crate::bootstrap::{differential_medians, BOOTSTRAP_SAMPLES};
use crate::engine::{Family, LongTable, MixedModelEngine, ModelFit, FULL_FORMULA, NULL_FORMULA};
use crate::treatment::{Model, Treatment};
use crate::{Error, Result};
use log::{debug, info};
use rayon::prelude::*;
use shapeout_core::Analysis;
use std::collections::BTreeMap;

/// Name of the intercept coefficient reported by the engine.
pub const INTERCEPT: &str = "(Intercept)";
/// Name of the treatment coefficient reported by the engine.
pub const TREATMENT_COEF: &str = "treatmentTreatment";

/// Per-dataset inputs of a regression, in parallel lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegressionInputs {
    pub xs: Vec<Vec<f64>>,
    /// Treatment labels, see [`Treatment`].
    pub treatments: Vec<String>,
    /// Repetition per dataset; 0 excludes the dataset.
    pub timeunits: Vec<u32>,
}

impl RegressionInputs {
    /// Collects the filtered values of `feature` together with the
    /// `analysis.regression treatment` and `analysis.regression repetition`
    /// settings of every dataset.
    ///
    /// # Errors
    /// Returns `UnknownFeature` if a dataset lacks `feature`.
    pub fn from_analysis(analysis: &Analysis, feature: &str) -> Result<Self> {
        let mut inputs = Self::default();
        for dataset in analysis.measurements() {
            inputs.xs.push(dataset.filtered(feature)?);
            inputs.treatments.push(
                dataset
                    .config
                    .get_str("analysis", "regression treatment")
                    .unwrap_or("None")
                    .to_string(),
            );
            let repetition = dataset
                .config
                .get_i64("analysis", "regression repetition")
                .unwrap_or(0);
            inputs.timeunits.push(u32::try_from(repetition).unwrap_or(0));
        }
        Ok(inputs)
    }
}

/// Outcome of a regression.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionResult {
    pub estimate: f64,
    pub fixed_effect: f64,
    pub std_err_estimate: f64,
    pub std_err_fixed_effect: f64,
    pub p_value: f64,
    pub full_summary: String,
}

impl RegressionResult {
    /// Labelled values for display.
    #[must_use]
    pub fn rows(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("Estimate", self.estimate),
            ("Fixed Effect", self.fixed_effect),
            ("Std Error (Estimate)", self.std_err_estimate),
            ("Std Error (Fixed Effect)", self.std_err_fixed_effect),
            ("p-Value", self.p_value),
        ]
    }
}

struct Entry<'a> {
    values: &'a [f64],
    treatment: Treatment,
    timeunit: u32,
}

fn validate(inputs: &RegressionInputs) -> Result<Vec<Entry<'_>>> {
    let RegressionInputs {
        xs,
        treatments,
        timeunits,
    } = inputs;
    if xs.len() != treatments.len() || xs.len() != timeunits.len() {
        return Err(Error::LengthMismatch {
            xs: xs.len(),
            treatments: treatments.len(),
            timeunits: timeunits.len(),
        });
    }
    let mut entries = Vec::new();
    for ((values, label), timeunit) in xs.iter().zip(treatments).zip(timeunits) {
        let treatment: Treatment = label.parse()?;
        if treatment == Treatment::None || *timeunit == 0 {
            continue;
        }
        entries.push(Entry {
            values,
            treatment,
            timeunit: *timeunit,
        });
    }
    if entries.len() < 3 {
        return Err(Error::TooFewGroups(entries.len()));
    }
    Ok(entries)
}

/// Replaces channel/reservoir pairs by their differential medians.
fn bootstrap_table(entries: &[Entry<'_>], seed: u64) -> Result<LongTable> {
    let mut pairs: BTreeMap<(u32, Treatment), (Vec<&[f64]>, Vec<&[f64]>)> = BTreeMap::new();
    for entry in entries {
        let Some(group) = entry.treatment.group() else {
            continue;
        };
        let slot = pairs.entry((entry.timeunit, group)).or_default();
        if entry.treatment.is_reservoir() {
            slot.1.push(entry.values);
        } else {
            slot.0.push(entry.values);
        }
    }

    let mut jobs = Vec::new();
    for ((timeunit, group), (channel, reservoir)) in pairs {
        if channel.is_empty() && !reservoir.is_empty() {
            debug!("dropping reservoir without channel data in repetition {timeunit} ({group})");
            continue;
        }
        match (channel.as_slice(), reservoir.as_slice()) {
            ([channel], [reservoir]) => jobs.push((timeunit, group, *channel, *reservoir)),
            _ => {
                return Err(Error::UnpairedReservoir {
                    timeunit,
                    treatment: group.to_string(),
                    reason: format!(
                        "expected one channel and one reservoir dataset, got {} and {}",
                        channel.len(),
                        reservoir.len()
                    ),
                })
            }
        }
    }

    let draws: Vec<(u32, Treatment, Vec<f64>)> = jobs
        .into_par_iter()
        .enumerate()
        .map(|(k, (timeunit, group, channel, reservoir))| {
            let seed = seed.wrapping_add(k as u64);
            let diff = differential_medians(channel, reservoir, BOOTSTRAP_SAMPLES, seed);
            (timeunit, group, diff)
        })
        .collect();

    let mut table = LongTable::default();
    for (timeunit, group, diff) in &draws {
        table.extend(diff, *group, *timeunit);
    }
    Ok(table)
}

/// Survival function of the chi-square distribution with `df` degrees of
/// freedom.
#[must_use]
pub fn chi_square_sf(x: f64, df: f64) -> f64 {
    upper_gamma_regularized(df / 2.0, x / 2.0)
}

/// Regularized upper incomplete gamma function `Q(a, x)`.
fn upper_gamma_regularized(a: f64, x: f64) -> f64 {
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-300;
    const MAX_ITER: u32 = 1000;

    if x <= 0.0 {
        return 1.0;
    }
    let prefactor = (-x + a * x.ln() - libm::lgamma(a)).exp();
    if x < a + 1.0 {
        // series for P(a, x)
        let mut ap = a;
        let mut term = 1.0 / a;
        let mut sum = term;
        for _ in 0..MAX_ITER {
            ap += 1.0;
            term *= x / ap;
            sum += term;
            if term.abs() < sum.abs() * EPS {
                break;
            }
        }
        (1.0 - sum * prefactor).clamp(0.0, 1.0)
    } else {
        // continued fraction (modified Lentz)
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / TINY;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITER {
            let i = f64::from(i);
            let an = -i * (i - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < TINY {
                d = TINY;
            }
            c = b + an / c;
            if c.abs() < TINY {
                c = TINY;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < EPS {
                break;
            }
        }
        (prefactor * h).clamp(0.0, 1.0)
    }
}

fn coefficient(fit: &ModelFit, name: &str) -> Result<(f64, f64)> {
    match (fit.coefficients.get(name), fit.std_errors.get(name)) {
        (Some(value), Some(err)) => Ok((*value, *err)),
        _ => Err(Error::EngineFailure(format!("no coefficient '{name}' in model fit"))),
    }
}

/// Runs the regression.
///
/// `seed` makes the reservoir bootstrap reproducible.
///
/// # Errors
/// Returns `LengthMismatch`, `UnknownTreatmentLabel`, `TooFewGroups` or
/// `UnpairedReservoir` for bad inputs and `ExternalEngineUnavailable` or
/// `EngineFailure` from the engine.
pub fn run(
    inputs: &RegressionInputs,
    model: Model,
    engine: &dyn MixedModelEngine,
    seed: u64,
) -> Result<RegressionResult> {
    let entries = validate(inputs)?;

    let table = if entries.iter().any(|e| e.treatment.is_reservoir()) {
        info!("bootstrapping differential medians ({BOOTSTRAP_SAMPLES} draws)");
        bootstrap_table(&entries, seed)?
    } else {
        let mut table = LongTable::default();
        for entry in &entries {
            table.extend(entry.values, entry.treatment, entry.timeunit);
        }
        table
    };

    if !engine.is_available() {
        return Err(Error::ExternalEngineUnavailable(
            "install R with the lme4 package to run regressions".to_string(),
        ));
    }
    let family = match model {
        Model::Lmm => Family::Gaussian,
        Model::Glmm => Family::GammaLog,
    };
    let full = engine.fit(&table, FULL_FORMULA, family)?;
    let null = engine.fit(&table, NULL_FORMULA, family)?;

    let statistic = (2.0 * (full.log_likelihood - null.log_likelihood)).max(0.0);
    let df = full.n_params.saturating_sub(null.n_params).max(1);
    let p_value = chi_square_sf(statistic, f64::from(df));
    debug!("likelihood ratio {statistic} with {df} degrees of freedom");

    let (intercept, se_intercept) = coefficient(&full, INTERCEPT)?;
    let (effect, se_effect) = coefficient(&full, TREATMENT_COEF)?;
    let (estimate, fixed_effect) = match model {
        Model::Lmm => (intercept, effect),
        Model::Glmm => (intercept.exp(), (intercept + effect).exp() - intercept.exp()),
    };

    Ok(RegressionResult {
        estimate,
        fixed_effect,
        std_err_estimate: se_intercept,
        std_err_fixed_effect: se_effect,
        p_value,
        full_summary: full.summary,
    })
}
