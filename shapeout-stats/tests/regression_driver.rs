use approx::assert_relative_eq;
use shapeout_core::{Analysis, Config, Dataset, EventTable, PolygonRegistry};
use shapeout_stats::engine::{FULL_FORMULA, NULL_FORMULA};
use shapeout_stats::regression::{self, INTERCEPT, TREATMENT_COEF};
use shapeout_stats::{
    classify_analysis, ClassifyIds, Error, Family, LongTable, MixedModelEngine, Model, ModelFit,
    RegressionInputs, Result, Treatment, BOOTSTRAP_SAMPLES,
};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Returns canned fits and records what it was asked to fit.
struct ScriptedEngine {
    available: bool,
    intercept: f64,
    effect: f64,
    calls: Mutex<Vec<(String, LongTable, Family)>>,
}

impl ScriptedEngine {
    fn new(intercept: f64, effect: f64) -> Self {
        Self {
            available: true,
            intercept,
            effect,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MixedModelEngine for ScriptedEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    fn fit(&self, table: &LongTable, formula: &str, family: Family) -> Result<ModelFit> {
        self.calls
            .lock()
            .unwrap()
            .push((formula.to_string(), table.clone(), family));
        let mut coefficients = BTreeMap::from([(INTERCEPT.to_string(), self.intercept)]);
        let mut std_errors = BTreeMap::from([(INTERCEPT.to_string(), 0.01)]);
        let (log_likelihood, n_params) = if formula == FULL_FORMULA {
            coefficients.insert(TREATMENT_COEF.to_string(), self.effect);
            std_errors.insert(TREATMENT_COEF.to_string(), 0.002);
            (-10.0, 6)
        } else {
            (-13.5, 5)
        };
        Ok(ModelFit {
            log_likelihood,
            n_params,
            coefficients,
            std_errors,
            summary: format!("fit of {formula}"),
        })
    }
}

fn values(offset: f64, n: u32) -> Vec<f64> {
    (0..n).map(|i| offset + f64::from(i % 10) * 0.001).collect()
}

#[test]
fn test_plain_regression_expands_events() {
    let inputs = RegressionInputs {
        xs: vec![values(0.01, 20), values(0.02, 30), values(0.011, 25), values(0.5, 5)],
        treatments: vec![
            "Control".to_string(),
            "Treatment".to_string(),
            "Control".to_string(),
            "None".to_string(),
        ],
        timeunits: vec![1, 1, 2, 3],
    };
    let engine = ScriptedEngine::new(0.0105, 0.0095);
    let result = regression::run(&inputs, Model::Lmm, &engine, 0).unwrap();

    assert_relative_eq!(result.estimate, 0.0105);
    assert_relative_eq!(result.fixed_effect, 0.0095);
    assert_relative_eq!(result.std_err_estimate, 0.01);
    assert_relative_eq!(result.std_err_fixed_effect, 0.002);
    // likelihood ratio 7 with one degree of freedom
    assert_relative_eq!(result.p_value, libm::erfc((3.5_f64).sqrt()), epsilon = 1e-10);
    assert_eq!(result.full_summary, format!("fit of {FULL_FORMULA}"));

    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, FULL_FORMULA);
    assert_eq!(calls[1].0, NULL_FORMULA);
    assert_eq!(calls[0].2, Family::Gaussian);
    let table = &calls[0].1;
    assert_eq!(table.len(), 75);
    assert_eq!(table.timeunit.iter().filter(|t| **t == 2).count(), 25);
    assert_eq!(
        table.treatment.iter().filter(|t| **t == Treatment::Treatment).count(),
        30
    );
}

#[test]
fn test_reservoir_bootstrap_is_reproducible() {
    let mut xs = Vec::new();
    let mut treatments = Vec::new();
    let mut timeunits = Vec::new();
    for repetition in 1..=2 {
        for (label, offset) in [
            ("Control", 0.02),
            ("Reservoir Control", 0.01),
            ("Treatment", 0.04),
            ("Reservoir Treatment", 0.01),
        ] {
            xs.push(values(offset, 100));
            treatments.push(label.to_string());
            timeunits.push(repetition);
        }
    }
    let inputs = RegressionInputs {
        xs,
        treatments,
        timeunits,
    };

    let first = ScriptedEngine::new(0.0, 0.0);
    regression::run(&inputs, Model::Lmm, &first, 42).unwrap();
    let second = ScriptedEngine::new(0.0, 0.0);
    regression::run(&inputs, Model::Lmm, &second, 42).unwrap();

    let a = first.calls.lock().unwrap()[0].1.clone();
    let b = second.calls.lock().unwrap()[0].1.clone();
    assert_eq!(a, b);
    assert_eq!(a.len(), 4 * BOOTSTRAP_SAMPLES);
    assert!(a
        .treatment
        .iter()
        .all(|t| matches!(t, Treatment::Control | Treatment::Treatment)));

    let mean_of = |group: Treatment| {
        let picked: Vec<f64> = a
            .x
            .iter()
            .zip(&a.treatment)
            .filter(|(_, t)| **t == group)
            .map(|(x, _)| *x)
            .collect();
        picked.iter().sum::<f64>() / picked.len() as f64
    };
    assert_relative_eq!(mean_of(Treatment::Control), 0.01, epsilon = 0.002);
    assert_relative_eq!(mean_of(Treatment::Treatment), 0.03, epsilon = 0.002);
}

#[test]
fn test_glmm_reports_response_scale() {
    let inputs = RegressionInputs {
        xs: vec![values(1.0, 10), values(2.0, 10), values(1.0, 10)],
        treatments: vec!["Control".into(), "Treatment".into(), "Control".into()],
        timeunits: vec![1, 1, 2],
    };
    let engine = ScriptedEngine::new(0.0, std::f64::consts::LN_2);
    let result = regression::run(&inputs, Model::Glmm, &engine, 0).unwrap();
    assert_relative_eq!(result.estimate, 1.0);
    assert_relative_eq!(result.fixed_effect, 1.0, epsilon = 1e-12);
    assert_eq!(engine.calls.lock().unwrap()[0].2, Family::GammaLog);
}

#[test]
fn test_unavailable_engine() {
    let inputs = RegressionInputs {
        xs: vec![values(1.0, 10); 3],
        treatments: vec!["Control".into(), "Treatment".into(), "Control".into()],
        timeunits: vec![1, 1, 2],
    };
    let mut engine = ScriptedEngine::new(0.0, 0.0);
    engine.available = false;
    assert!(matches!(
        regression::run(&inputs, Model::Lmm, &engine, 0),
        Err(Error::ExternalEngineUnavailable(_))
    ));
    assert!(engine.calls.lock().unwrap().is_empty());
}

#[test]
fn test_inputs_from_classified_analysis() {
    let titles = ["day1 ctl", "day1 trt", "day2 ctl", "day2 trt", "beads"];
    let datasets: Vec<Dataset> = titles
        .iter()
        .enumerate()
        .map(|(k, title)| {
            let deform: Vec<f64> = (0..10).map(|i| f64::from(i) * 0.01).collect();
            let table = EventTable::new().with_column("deform", deform).unwrap();
            let mut config = Config::new();
            config.set("setup", "chip region", "channel");
            config.set("experiment", "run index", i64::try_from(k).unwrap() + 1);
            let mut dataset = Dataset::from_table(table, config);
            dataset.title = (*title).to_string();
            dataset
        })
        .collect();
    let mut analysis = Analysis::new(datasets, None, PolygonRegistry::shared()).unwrap();
    let mut cfg = Config::new();
    cfg.set("filtering", "deform max", 0.045);
    cfg.set("filtering", "enable filters", true);
    analysis.set_parameters(&cfg).unwrap();

    classify_analysis(&mut analysis, &ClassifyIds::default());
    let inputs = RegressionInputs::from_analysis(&analysis, "deform").unwrap();

    assert_eq!(inputs.treatments[..4], ["Control", "Treatment", "Control", "Treatment"]);
    assert_eq!(inputs.treatments[4], "None");
    assert_eq!(inputs.timeunits[0], inputs.timeunits[1]);
    assert_eq!(inputs.timeunits[2], inputs.timeunits[3]);
    assert_ne!(inputs.timeunits[0], inputs.timeunits[2]);
    assert_eq!(inputs.timeunits[4], 0);
    assert!(inputs.xs.iter().all(|x| x.len() == 5));

    let engine = ScriptedEngine::new(0.02, 0.0);
    let result = regression::run(&inputs, Model::Lmm, &engine, 0).unwrap();
    assert!(result.p_value > 0.0 && result.p_value < 1.0);
    assert_eq!(engine.calls.lock().unwrap()[0].1.len(), 20);
}
