//! Session migration.
//!
//! Rewrites an extracted session directory (manifest, `config.txt` files and
//! `PolygonFilters.poly`) from the schema of the version that wrote it to the
//! current schema. Each step is applied when the source version is older than
//! the step's version; the last step is applied unconditionally.

use crate::index::{IndexEntry, Manifest, Version};
use crate::session::{locate_data_file, missing_file, POLYGON_FILE};
use crate::{Error, Result};
use log::{debug, info, warn};
use shapeout_core::dataset::hierarchy_hash;
use shapeout_core::{feature, Config, DatasetLoader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Feature names renamed in 0.7.6.
pub const FEATURE_RENAMES_0_7_6: [(&str, &str); 24] = [
    ("area", "area_um"),
    ("arearatio", "area_ratio"),
    ("brightness", "bright_avg"),
    ("brightnesssd", "bright_sd"),
    ("defo", "deform"),
    ("fl-1area", "fl1_area"),
    ("fl-1max", "fl1_max"),
    ("fl-1npeaks", "fl1_npeaks"),
    ("fl-1pos", "fl1_pos"),
    ("fl-1width", "fl1_width"),
    ("fl-2area", "fl2_area"),
    ("fl-2max", "fl2_max"),
    ("fl-2npeaks", "fl2_npeaks"),
    ("fl-2pos", "fl2_pos"),
    ("fl-2width", "fl2_width"),
    ("fl-3area", "fl3_area"),
    ("fl-3max", "fl3_max"),
    ("fl-3npeaks", "fl3_npeaks"),
    ("fl-3pos", "fl3_pos"),
    ("fl-3width", "fl3_width"),
    ("inertiaratio", "inert_ratio"),
    ("inertiaratioraw", "inert_ratio_raw"),
    ("pos lat", "pos_y"),
    ("pos x", "pos_x"),
];

/// Content hashes recorded per dataset before 0.7.6.
pub const LEGACY_HASH_FIELDS: [&str; 3] = ["tdms hash", "camera.ini hash", "para.ini hash"];

const OBSOLETE_0_8_4: [(&str, &str); 4] = [
    ("imaging", "exposure time"),
    ("imaging", "flash current"),
    ("setup", "temperature"),
    ("setup", "viscosity"),
];

const EMODULUS_KEYS: [&str; 4] = [
    "emodulus medium",
    "emodulus model",
    "emodulus temperature",
    "emodulus viscosity",
];

/// What migration needs to re-open data files of old sessions.
pub struct MigrationContext<'a> {
    pub loader: &'a dyn DatasetLoader,
    /// Directory of the session file, for `rdir` lookups.
    pub session_dir: Option<&'a Path>,
    /// Extra directories searched by file name.
    pub search_dirs: &'a [PathBuf],
}

/// Migrates the extracted session in `dir` to the current schema.
///
/// Returns the version that wrote the session.
///
/// # Errors
/// Returns `MissingDataFiles` if pre-0.7.6 data files cannot be found for
/// re-hashing, `DeepHierarchyUnsupported` if their hierarchy cannot be
/// reconstructed, or an I/O error.
pub fn migrate(dir: &Path, ctx: &MigrationContext<'_>) -> Result<Version> {
    let mut manifest = Manifest::read(dir)?;
    let source = manifest.version;
    if source < Version::current() {
        info!("migrating session from version {source}");
    }

    if source < Version(0, 5, 7) {
        for entry in &mut manifest.entries {
            if entry.get("title").is_none() {
                entry.set("title", "no title");
            }
        }
    }
    if source < Version(0, 7, 1) {
        for_each_config(dir, &manifest, |_, config| {
            for (_, section) in config.sections_mut() {
                let keys: Vec<String> = section
                    .keys()
                    .filter(|k| k.starts_with("kde multivariate "))
                    .cloned()
                    .collect();
                for key in keys {
                    let renamed = key.replacen("kde multivariate ", "kde accuracy ", 1);
                    section.rename(&key, &renamed);
                }
            }
        })?;
    }
    if source < Version(0, 7, 4) {
        for entry in &mut manifest.entries {
            if let Some(path) = entry.get("config") {
                let path = path.replace('\\', "/");
                entry.set("config", path);
            }
        }
    }
    if source < Version(0, 7, 5) {
        for_each_config(dir, &manifest, |_, config| {
            if !config.contains("plotting", "kde accuracy emodulus") {
                for (_, section) in config.sections_mut() {
                    section.retain(|key, _| !EMODULUS_KEYS.contains(&key));
                }
            }
        })?;
    }
    if source < Version(0, 7, 6) {
        for_each_config(dir, &manifest, |_, config| {
            rename_features(config, &FEATURE_RENAMES_0_7_6, None);
        })?;
        rename_polygon_axes(dir, &FEATURE_RENAMES_0_7_6)?;
        rehash(dir, &mut manifest, ctx)?;
        for entry in manifest.entries.iter().filter(|e| e.is_hierarchy_child()) {
            let ghost = dir.join(&entry.key).join("_filter_manual.npy");
            if ghost.exists() {
                debug!("removing stale manual filter of {}", entry.key);
                std::fs::remove_file(ghost)?;
            }
        }
    }
    if source < Version(0, 7, 8) {
        for entry in &mut manifest.entries {
            let identifier = entry.key_suffix().to_string();
            entry.set("identifier", identifier);
            if let Some(parent) = entry.remove("parent id") {
                entry.set("parent key", parent);
            }
        }
    }
    if source < Version(0, 8, 4) {
        for_each_config(dir, &manifest, |_, config| {
            rename_features(config, &[("ncells", "nevents")], None);
            for (section, key) in OBSOLETE_0_8_4 {
                config.remove(section, key);
            }
        })?;
    }
    for_each_config(dir, &manifest, |_, config| {
        rename_features(config, &[("inert_ratio", "inert_ratio_cvx")], Some("filtering"));
    })?;

    manifest.version = Version::current();
    manifest.write(dir)?;
    Ok(source)
}

/// Location of an entry's `config.txt` inside the session directory.
pub(crate) fn config_path(dir: &Path, entry: &IndexEntry) -> PathBuf {
    match entry.get("config") {
        Some(relative) => relative
            .split(['/', '\\'])
            .filter(|part| !part.is_empty())
            .fold(dir.to_path_buf(), |path, part| path.join(part)),
        None => dir.join(&entry.key).join("config.txt"),
    }
}

fn for_each_config(
    dir: &Path,
    manifest: &Manifest,
    mut apply: impl FnMut(&IndexEntry, &mut Config),
) -> Result<()> {
    for entry in &manifest.entries {
        let path = config_path(dir, entry);
        if !path.exists() {
            warn!("{}: no config file", entry.key);
            continue;
        }
        let mut config = Config::read(&path)?;
        apply(entry, &mut config);
        config.write(&path)?;
    }
    Ok(())
}

fn lookup<'a>(table: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    table.iter().find(|(old, _)| *old == name).map(|(_, new)| *new)
}

/// Renames features in filter limits, plot ranges, accuracy keys and plot
/// axes, optionally restricted to one section.
fn rename_features(config: &mut Config, table: &[(&str, &str)], only: Option<&str>) {
    for (name, section) in config.sections_mut() {
        if only.is_some_and(|o| o != name.as_str()) {
            continue;
        }
        let renames: Vec<(String, String)> = section
            .keys()
            .filter_map(|key| {
                let old = feature::feature_of_key(key)?;
                let new = lookup(table, old)?;
                let renamed = match key.strip_prefix(old) {
                    Some(rest) => format!("{new}{rest}"),
                    None => format!("{}{new}", &key[..key.len() - old.len()]),
                };
                Some((key.clone(), renamed))
            })
            .collect();
        for (from, to) in renames {
            section.rename(&from, &to);
        }
        for axis in ["axis x", "axis y"] {
            let new = section
                .get(axis)
                .and_then(|v| v.as_str())
                .and_then(|old| lookup(table, old));
            if let Some(new) = new {
                section.set(axis, new);
            }
        }
    }
}

fn rename_polygon_axes(dir: &Path, table: &[(&str, &str)]) -> Result<()> {
    let path = dir.join(POLYGON_FILE);
    if !path.exists() {
        return Ok(());
    }
    let text = std::fs::read_to_string(&path)?;
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let renamed = line.split_once('=').and_then(|(key, value)| {
            let key = key.trim();
            let is_axis = key.eq_ignore_ascii_case("x axis") || key.eq_ignore_ascii_case("y axis");
            let new = lookup(table, value.trim()).filter(|_| is_axis)?;
            Some(format!("{key} = {new}"))
        });
        out.push_str(renamed.as_deref().unwrap_or(line));
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Identifiers under which an old session may refer to an entry.
fn old_references(entry: &IndexEntry) -> Vec<String> {
    let mut refs = vec![entry.key_suffix().to_string()];
    for field in ["hash", "identifier", "tdms hash"] {
        if let Some(value) = entry.get(field) {
            refs.push(value.to_string());
        }
    }
    refs
}

/// Replaces pre-0.7.6 hashes with content hashes and re-chains hierarchy
/// children onto their parents' new hashes.
fn rehash(dir: &Path, manifest: &mut Manifest, ctx: &MigrationContext<'_>) -> Result<()> {
    let mut parents_ref: Vec<Option<String>> = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let path = config_path(dir, entry);
        let parent = if path.exists() {
            Config::read(&path)?
                .get_str("filtering", "hierarchy parent")
                .filter(|p| !p.eq_ignore_ascii_case("none"))
                .map(str::to_string)
        } else {
            None
        };
        parents_ref.push(parent);
    }

    // (key, new hash) by old reference
    let mut resolved: HashMap<String, (String, String)> = HashMap::new();
    let mut done = vec![false; manifest.entries.len()];
    let mut missing = Vec::new();
    for (i, entry) in manifest.entries.iter_mut().enumerate() {
        if entry.is_hierarchy_child() || parents_ref[i].is_some() {
            continue;
        }
        let Some(path) = locate_data_file(entry, ctx.session_dir, ctx.search_dirs) else {
            missing.push(missing_file(entry));
            continue;
        };
        let hash = ctx.loader.open(&path)?.hash().to_string();
        for reference in old_references(entry) {
            resolved.insert(reference, (entry.key.clone(), hash.clone()));
        }
        for field in LEGACY_HASH_FIELDS {
            entry.remove(field);
        }
        entry.set("hash", hash);
        done[i] = true;
    }
    if !missing.is_empty() {
        return Err(Error::MissingDataFiles(missing));
    }

    loop {
        let mut progressed = false;
        for i in 0..manifest.entries.len() {
            if done[i] {
                continue;
            }
            let parent = parents_ref[i]
                .as_ref()
                .and_then(|r| resolved.get(r))
                .cloned();
            if let Some((parent_key, parent_hash)) = parent {
                link_child(&mut manifest.entries[i], &parent_key, &parent_hash, &mut resolved);
                done[i] = true;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    let unresolved: Vec<usize> = (0..done.len()).filter(|i| !done[*i]).collect();
    match unresolved.as_slice() {
        [] => Ok(()),
        [i] => {
            // a single broken link is the old single-chain layout: attach to
            // the closest preceding child, else the closest preceding root
            let number = manifest.entries[*i].number();
            let preceding = |child: bool| {
                (0..manifest.entries.len())
                    .filter(|j| done[*j] && manifest.entries[*j].number() < number)
                    .filter(|j| manifest.entries[*j].is_hierarchy_child() == child)
                    .max_by_key(|j| manifest.entries[*j].number())
            };
            let Some(p) = preceding(true).or_else(|| preceding(false)) else {
                return Err(Error::DeepHierarchyUnsupported(1));
            };
            let parent_key = manifest.entries[p].key.clone();
            let parent_hash = manifest.entries[p].get("hash").unwrap_or_default().to_string();
            warn!(
                "{}: parent not found, attaching to {parent_key}",
                manifest.entries[*i].key
            );
            link_child(&mut manifest.entries[*i], &parent_key, &parent_hash, &mut resolved);
            Ok(())
        }
        many => Err(Error::DeepHierarchyUnsupported(many.len())),
    }
}

fn link_child(
    entry: &mut IndexEntry,
    parent_key: &str,
    parent_hash: &str,
    resolved: &mut HashMap<String, (String, String)>,
) {
    let hash = hierarchy_hash(parent_hash);
    for reference in old_references(entry) {
        resolved.insert(reference, (entry.key.clone(), hash.clone()));
    }
    for field in LEGACY_HASH_FIELDS {
        entry.remove(field);
    }
    entry.set("hash", hash);
    entry.set("parent hash", parent_hash);
    entry.set("parent id", parent_key);
    entry.set("special type", "hierarchy child");
}
