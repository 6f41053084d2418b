//! Treatment labels and model kinds.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Role of a dataset in a regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Treatment {
    Control,
    Treatment,
    ReservoirControl,
    ReservoirTreatment,
    /// Excluded from the regression.
    None,
}

impl Treatment {
    /// Labels in the order offered to users.
    pub const ALL: [Treatment; 5] = [
        Treatment::None,
        Treatment::Control,
        Treatment::Treatment,
        Treatment::ReservoirControl,
        Treatment::ReservoirTreatment,
    ];

    #[must_use]
    pub fn is_reservoir(self) -> bool {
        matches!(self, Treatment::ReservoirControl | Treatment::ReservoirTreatment)
    }

    /// The two-level group after reservoir differencing.
    #[must_use]
    pub fn group(self) -> Option<Treatment> {
        match self {
            Treatment::Control | Treatment::ReservoirControl => Some(Treatment::Control),
            Treatment::Treatment | Treatment::ReservoirTreatment => Some(Treatment::Treatment),
            Treatment::None => None,
        }
    }
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Treatment::Control => "Control",
            Treatment::Treatment => "Treatment",
            Treatment::ReservoirControl => "Reservoir Control",
            Treatment::ReservoirTreatment => "Reservoir Treatment",
            Treatment::None => "None",
        };
        f.write_str(label)
    }
}

impl FromStr for Treatment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Treatment::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownTreatmentLabel(s.to_string()))
    }
}

/// Mixed model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Model {
    /// Linear mixed model.
    #[default]
    Lmm,
    /// Generalized linear mixed model, Gamma family with log link.
    Glmm,
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Lmm => f.write_str("lmm"),
            Model::Glmm => f.write_str("glmm"),
        }
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lmm" => Ok(Model::Lmm),
            "glmm" => Ok(Model::Glmm),
            other => Err(shapeout_core::Error::BadValue {
                key: "regression model".to_string(),
                value: other.to_string(),
            }
            .into()),
        }
    }
}
