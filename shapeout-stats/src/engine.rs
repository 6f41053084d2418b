//! Mixed-model engines.
//!
//! The regression driver hands a long-format table to a
//! [`MixedModelEngine`]. [`RscriptEngine`] fits the model with `lme4`
//! through `Rscript`.

use crate::treatment::Treatment;
use crate::{Error, Result};
use csv::Writer;
use log::{debug, info};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Command;

/// Full model: fixed treatment effect with random intercept and slope per
/// repetition.
pub const FULL_FORMULA: &str = "x ~ treatment + (1 + treatment | timeunit)";
/// Null model without the fixed treatment effect.
pub const NULL_FORMULA: &str = "x ~ (1 + treatment | timeunit)";

/// Distribution family of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Gaussian,
    /// Gamma with log link.
    GammaLog,
}

/// Long-format regression table: one row per event or bootstrap draw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LongTable {
    pub x: Vec<f64>,
    pub treatment: Vec<Treatment>,
    pub timeunit: Vec<u32>,
}

impl LongTable {
    /// Appends `values` with one treatment and repetition.
    pub fn extend(&mut self, values: &[f64], treatment: Treatment, timeunit: u32) {
        self.x.extend_from_slice(values);
        self.treatment.extend(std::iter::repeat_n(treatment, values.len()));
        self.timeunit.extend(std::iter::repeat_n(timeunit, values.len()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Writes the table as CSV with columns `x,treatment,timeunit`.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_csv<W: std::io::Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::from_writer(out);
        writer.write_record(["x", "treatment", "timeunit"])?;
        for ((x, treatment), timeunit) in self.x.iter().zip(&self.treatment).zip(&self.timeunit) {
            writer.write_record([x.to_string(), treatment.to_string(), timeunit.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Result of fitting one model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelFit {
    pub log_likelihood: f64,
    /// Degrees of freedom of the log-likelihood.
    pub n_params: u32,
    /// Fixed-effect estimates by name, e.g. `(Intercept)`.
    pub coefficients: BTreeMap<String, f64>,
    pub std_errors: BTreeMap<String, f64>,
    /// Human-readable model summary.
    pub summary: String,
}

/// Fits mixed models.
pub trait MixedModelEngine: Send + Sync {
    /// Whether the engine can be used.
    fn is_available(&self) -> bool;

    /// Fits `formula` on `table`.
    ///
    /// # Errors
    /// Returns `ExternalEngineUnavailable` or `EngineFailure`.
    fn fit(&self, table: &LongTable, formula: &str, family: Family) -> Result<ModelFit>;
}

/// `lme4` through the `Rscript` executable.
#[derive(Debug, Clone)]
pub struct RscriptEngine {
    rscript: PathBuf,
}

impl Default for RscriptEngine {
    fn default() -> Self {
        Self::new("Rscript")
    }
}

impl RscriptEngine {
    /// Uses the given `Rscript` executable.
    #[must_use]
    pub fn new(rscript: impl Into<PathBuf>) -> Self {
        Self {
            rscript: rscript.into(),
        }
    }

    /// Builds the `Rscript` call; `args` reach the script as
    /// `commandArgs(trailingOnly = TRUE)`.
    fn command(&self, code: &str, args: &[&OsStr]) -> Command {
        let mut cmd = Command::new(&self.rscript);
        cmd.arg("--vanilla").arg("-e").arg(code);
        if !args.is_empty() {
            cmd.arg("--args").args(args);
        }
        cmd
    }

    fn run(&self, code: &str, args: &[&OsStr]) -> Result<String> {
        let output = self
            .command(code, args)
            .output()
            .map_err(|e| {
                Error::ExternalEngineUnavailable(format!(
                    "cannot run {}: {e}",
                    self.rscript.display()
                ))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("there is no package called") {
                return Err(Error::ExternalEngineUnavailable(
                    "the R package lme4 is not installed".to_string(),
                ));
            }
            return Err(Error::EngineFailure(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

const SUMMARY_MARKER: &str = "#summary";

/// Fits `formula` on the CSV file passed as the first script argument.
fn r_script(formula: &str, family: Family) -> String {
    let fit = match family {
        Family::Gaussian => format!("m <- lmer({formula}, data = d, REML = FALSE)"),
        Family::GammaLog => {
            format!("m <- glmer({formula}, data = d, family = Gamma(link = 'log'))")
        }
    };
    format!(
        "suppressMessages(library(lme4))\n\
         d <- read.csv(commandArgs(trailingOnly = TRUE)[1])\n\
         d$treatment <- factor(d$treatment, levels = c('Control', 'Treatment'))\n\
         d$timeunit <- factor(d$timeunit)\n\
         {fit}\n\
         ll <- logLik(m)\n\
         cat('loglik', as.numeric(ll), '\\n')\n\
         cat('npar', attr(ll, 'df'), '\\n')\n\
         co <- summary(m)$coefficients\n\
         for (i in seq_len(nrow(co))) cat('coef', rownames(co)[i], co[i, 1], co[i, 2], '\\n')\n\
         cat('{SUMMARY_MARKER}\\n')\n\
         print(summary(m))\n"
    )
}

/// Parses the output of [`r_script`].
fn parse_fit(stdout: &str) -> Result<ModelFit> {
    let mut fit = ModelFit::default();
    let mut lines = stdout.lines();
    let number = |value: Option<&str>, what: &str| -> Result<f64> {
        value
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| Error::EngineFailure(format!("bad {what} in engine output")))
    };
    let mut seen_loglik = false;
    for line in lines.by_ref() {
        if line.trim() == SUMMARY_MARKER {
            break;
        }
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("loglik") => {
                fit.log_likelihood = number(parts.next(), "log-likelihood")?;
                seen_loglik = true;
            }
            Some("npar") => {
                let n = number(parts.next(), "parameter count")?;
                fit.n_params = format!("{n:.0}").parse().unwrap_or_default();
            }
            Some("coef") => {
                let name = parts
                    .next()
                    .ok_or_else(|| Error::EngineFailure("coefficient without name".to_string()))?;
                fit.coefficients
                    .insert(name.to_string(), number(parts.next(), "coefficient")?);
                fit.std_errors
                    .insert(name.to_string(), number(parts.next(), "standard error")?);
            }
            _ => {}
        }
    }
    if !seen_loglik {
        return Err(Error::EngineFailure("no log-likelihood in engine output".to_string()));
    }
    fit.summary = lines.collect::<Vec<_>>().join("\n");
    Ok(fit)
}

impl MixedModelEngine for RscriptEngine {
    fn is_available(&self) -> bool {
        self.run("suppressMessages(library(lme4))", &[]).is_ok()
    }

    fn fit(&self, table: &LongTable, formula: &str, family: Family) -> Result<ModelFit> {
        let dir = tempfile::tempdir()?;
        let csv = dir.path().join("table.csv");
        table.write_csv(std::fs::File::create(&csv)?)?;
        debug!("fitting {formula} on {} rows", table.len());
        let stdout = self.run(&r_script(formula, family), &[csv.as_os_str()])?;
        let fit = parse_fit(&stdout)?;
        info!("fitted {formula}: log-likelihood {}", fit.log_likelihood);
        Ok(fit)
    }
}
