//! shapeout-stats: Mixed-effects regression across RT-DC datasets.
//!
//! Datasets are labelled with a treatment and a repetition, either by hand
//! or with [`classify_analysis`]. [`regression::run`] optionally bootstraps
//! channel-versus-reservoir differential medians and fits a linear or
//! generalized linear mixed model through a [`MixedModelEngine`].
//!

pub mod bootstrap;
pub mod classify;
pub mod engine;
mod error;
pub mod regression;
pub mod treatment;

pub use bootstrap::{differential_medians, BOOTSTRAP_SAMPLES};
pub use classify::{classify, classify_analysis, Assignment, ClassifyIds};
pub use engine::{Family, LongTable, MixedModelEngine, ModelFit, RscriptEngine};
pub use error::{Error, Result};
pub use regression::{RegressionInputs, RegressionResult};
pub use treatment::{Model, Treatment};
