//! Treatment assignment from dataset titles.
//!
//! Each dataset gets a role from identifier substrings of its title, with
//! the chip region deciding between channel and reservoir roles. Datasets
//! of different roles are then grouped into repetitions, greedily taking
//! the combination whose titles are most alike.

use crate::treatment::Treatment;
use log::debug;
use shapeout_core::Analysis;

/// Title substrings identifying each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyIds {
    pub control: String,
    pub treatment: String,
    pub reservoir_control: String,
    pub reservoir_treatment: String,
}

impl Default for ClassifyIds {
    fn default() -> Self {
        Self {
            control: "ctl".to_string(),
            treatment: "trt".to_string(),
            reservoir_control: "ctl".to_string(),
            reservoir_treatment: "trt".to_string(),
        }
    }
}

/// Treatment and repetition of one dataset; repetition 0 means excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub treatment: Treatment,
    pub repetition: u32,
}

impl Assignment {
    const EXCLUDED: Assignment = Assignment {
        treatment: Treatment::None,
        repetition: 0,
    };
}

/// Similarity of two strings in `[0, 1]`: twice the length of their longest
/// common subsequence over their total length.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    2.0 * prev[b.len()] as f64 / (a.len() + b.len()) as f64
}

fn role(title: &str, reservoir: bool, ids: &ClassifyIds) -> Treatment {
    let has = |id: &str| !id.is_empty() && title.contains(id);
    if reservoir {
        if has(&ids.reservoir_control) {
            Treatment::ReservoirControl
        } else if has(&ids.reservoir_treatment) {
            Treatment::ReservoirTreatment
        } else {
            Treatment::None
        }
    } else if has(&ids.control) {
        Treatment::Control
    } else if has(&ids.treatment) {
        Treatment::Treatment
    } else {
        Treatment::None
    }
}

/// Assigns treatments and repetitions to datasets given their titles and
/// chip regions (`"channel"` or `"reservoir"`).
///
/// Datasets left over once a role runs out of candidates are excluded.
#[must_use]
pub fn classify(datasets: &[(String, String)], ids: &ClassifyIds) -> Vec<Assignment> {
    let roles: Vec<Treatment> = datasets
        .iter()
        .map(|(title, region)| role(title, region.eq_ignore_ascii_case("reservoir"), ids))
        .collect();
    let groups: Vec<Vec<usize>> = [
        Treatment::Control,
        Treatment::Treatment,
        Treatment::ReservoirControl,
        Treatment::ReservoirTreatment,
    ]
    .iter()
    .map(|t| (0..roles.len()).filter(|i| roles[*i] == *t).collect::<Vec<_>>())
    .filter(|g| !g.is_empty())
    .collect();

    let mut result = vec![Assignment::EXCLUDED; datasets.len()];
    if groups.is_empty() {
        return result;
    }

    let n = datasets.len();
    let mut sim = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s = similarity(&datasets[i].0, &datasets[j].0);
            sim[i * n + j] = s;
            sim[j * n + i] = s;
        }
    }
    let score = |combo: &[usize]| -> f64 {
        let mut total = 0.0;
        for (k, &a) in combo.iter().enumerate() {
            for &b in &combo[k + 1..] {
                total += sim[a * n + b];
            }
        }
        total
    };

    let mut used = vec![false; n];
    let mut repetition = 0;
    loop {
        let mut best: Option<(f64, Vec<usize>)> = None;
        let mut odometer = vec![0usize; groups.len()];
        'combos: loop {
            let combo: Vec<usize> = odometer.iter().zip(&groups).map(|(k, g)| g[*k]).collect();
            if combo.iter().all(|i| !used[*i]) {
                let s = score(&combo);
                let better = match &best {
                    Some((b, _)) => s > *b,
                    None => true,
                };
                if better {
                    best = Some((s, combo));
                }
            }
            for (digit, group) in odometer.iter_mut().zip(&groups).rev() {
                *digit += 1;
                if *digit < group.len() {
                    continue 'combos;
                }
                *digit = 0;
            }
            break;
        }
        let Some((s, combo)) = best else {
            break;
        };
        repetition += 1;
        debug!("repetition {repetition}: datasets {combo:?} (similarity {s:.3})");
        for i in combo {
            used[i] = true;
            result[i] = Assignment {
                treatment: roles[i],
                repetition,
            };
        }
    }
    result
}

/// Classifies the datasets of `analysis` by title and stores the result as
/// `analysis.regression treatment` and `analysis.regression repetition`.
pub fn classify_analysis(analysis: &mut Analysis, ids: &ClassifyIds) -> Vec<Assignment> {
    let datasets: Vec<(String, String)> = analysis
        .measurements()
        .iter()
        .map(|d| {
            let region = d
                .config
                .get_str("setup", "chip region")
                .unwrap_or("channel")
                .to_string();
            (d.title.clone(), region)
        })
        .collect();
    let assignments = classify(&datasets, ids);
    for (dataset, assignment) in analysis.measurements_mut().iter_mut().zip(&assignments) {
        let section = dataset.config.section_mut("analysis");
        section.set("regression treatment", assignment.treatment.to_string());
        section.set("regression repetition", i64::from(assignment.repetition));
    }
    assignments
}
