//! Session save and load.
//!
//! A session archive (`.zmso`) is a zip of a directory holding the manifest
//! `index.txt`, one `N_<identifier>/` directory per dataset with its
//! `config.txt` and manual filter, and the polygon filters of the analysis.

use crate::error::MissingDataFile;
use crate::index::{IndexEntry, Manifest, Version};
use crate::migrate::{config_path, migrate, MigrationContext};
use crate::{archive, npy, Error, Result};
use log::{debug, info, warn};
use shapeout_core::dataset::hierarchy_hash;
use shapeout_core::{
    filter, Analysis, Config, Dataset, DatasetFormat, DatasetLoader, PolygonRegistry,
    SharedRegistry,
};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

pub const POLYGON_FILE: &str = "PolygonFilters.poly";
pub const MANUAL_FILTER_FILE: &str = "_filter_manual.npy";
pub const MANUAL_ROOT_FILTER_FILE: &str = "_filter_manual_root.npy";

/// A dataset whose content hash differs from the one recorded at save time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashComparisonWarning {
    pub key: String,
    pub path: PathBuf,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for HashComparisonWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hash of {} changed: expected {}, found {}",
            self.path.display(),
            self.expected,
            self.found
        )
    }
}

/// Options for [`load_session`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Directories searched by file name when a data file is neither at its
    /// recorded absolute nor relative location.
    pub search_dirs: Vec<PathBuf>,
}

/// A loaded session.
pub struct LoadedSession {
    pub analysis: Analysis,
    /// Version of the software that wrote the session.
    pub version: Version,
    /// Datasets whose content changed since the session was saved.
    pub hash_warnings: Vec<HashComparisonWarning>,
}

/// Saves `analysis` to `path`.
///
/// # Errors
/// See [`save`].
pub fn save_session(path: &Path, analysis: &Analysis) -> Result<()> {
    let registry = analysis.registry().read().unwrap_or_else(PoisonError::into_inner);
    save(path, analysis.measurements(), &registry)
}

/// Saves `measurements` and the polygon filters of `registry` to `path`.
///
/// # Errors
/// Returns `UnsupportedDataClassSaveError` for in-memory datasets and
/// `InvalidHierarchy` if a child's parent is not saved before it.
pub fn save(path: &Path, measurements: &[Dataset], registry: &PolygonRegistry) -> Result<()> {
    if let Some(ds) = measurements.iter().find(|d| d.format() == DatasetFormat::Dict) {
        return Err(Error::UnsupportedDataClassSaveError {
            identifier: ds.identifier().to_string(),
            format: ds.format().to_string(),
        });
    }

    let session_dir = absolute(path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let tmp = tempfile::tempdir()?;
    let mut keys: HashMap<&str, String> = HashMap::new();
    let mut manifest = Manifest::new();

    for (i, ds) in measurements.iter().enumerate() {
        let key = format!("{}_{}", i + 1, ds.identifier());
        let ds_dir = tmp.path().join(&key);
        std::fs::create_dir_all(&ds_dir)?;
        ds.config.write(ds_dir.join("config.txt"))?;

        let mut entry = IndexEntry::new(&key);
        entry.set("identifier", ds.identifier());
        entry.set("hash", ds.hash());
        entry.set("title", ds.title.as_str());
        entry.set("config", format!("{key}/config.txt"));

        match ds.parent() {
            None => {
                npy::write_bool(&ds_dir.join(MANUAL_FILTER_FILE), ds.manual())?;
                let file = absolute(ds.path());
                let fdir = file.parent().map(Path::to_path_buf).unwrap_or_default();
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let rdir = relative_path(&session_dir, &fdir).unwrap_or_else(|| PathBuf::from("."));
                entry.set("name", name);
                entry.set("fdir", fdir.display().to_string());
                entry.set("rdir", to_forward_slashes(&rdir));
            }
            Some(parent) => {
                let parent_key = keys.get(parent).ok_or_else(|| {
                    shapeout_core::Error::InvalidHierarchy(format!(
                        "parent {parent} of {} is not saved before it",
                        ds.identifier()
                    ))
                })?;
                let parent_hash = measurements
                    .iter()
                    .find(|d| d.identifier() == parent)
                    .map(|d| d.hash().to_string())
                    .unwrap_or_default();
                npy::write_indices(
                    &ds_dir.join(MANUAL_ROOT_FILTER_FILE),
                    &ds.manual_excluded_root_indices(),
                )?;
                entry.set("special type", "hierarchy child");
                entry.set("parent hash", parent_hash);
                entry.set("parent key", parent_key.as_str());
            }
        }
        keys.insert(ds.identifier(), key);
        manifest.entries.push(entry);
    }

    manifest.write(tmp.path())?;
    if !registry.is_empty() {
        registry.export(tmp.path().join(POLYGON_FILE), None)?;
    }
    archive::zip_dir(tmp.path(), path)?;
    info!("saved {} datasets to {}", measurements.len(), path.display());
    Ok(())
}

/// Loads the session at `path`.
///
/// On success the contents of `registry` are replaced by the session's
/// polygons; on any error `registry` is left untouched. Nothing is
/// constructed if data files are missing: the error lists all of them so
/// the caller can retry with [`LoadOptions::search_dirs`].
///
/// # Errors
/// Returns `MissingDataFiles`, `DeepHierarchyUnsupported`, archive and
/// format errors, or errors from opening datasets.
pub fn load_session(
    path: &Path,
    loader: &dyn DatasetLoader,
    registry: SharedRegistry,
    options: &LoadOptions,
) -> Result<LoadedSession> {
    let tmp = tempfile::tempdir()?;
    archive::unzip(path, tmp.path())?;
    let session_dir = absolute(path).parent().map(Path::to_path_buf);

    let ctx = MigrationContext {
        loader,
        session_dir: session_dir.as_deref(),
        search_dirs: &options.search_dirs,
    };
    let version = migrate(tmp.path(), &ctx)?;
    let manifest = Manifest::read(tmp.path())?;

    // resolve every data file before touching any state
    let mut files: HashMap<&str, PathBuf> = HashMap::new();
    let mut missing = Vec::new();
    for entry in manifest.entries.iter().filter(|e| !e.is_hierarchy_child()) {
        match locate_data_file(entry, ctx.session_dir, ctx.search_dirs) {
            Some(file) => {
                files.insert(entry.key.as_str(), file);
            }
            None => missing.push(missing_file(entry)),
        }
    }
    if !missing.is_empty() {
        for file in &missing {
            warn!("missing data file {file}");
        }
        return Err(Error::MissingDataFiles(missing));
    }

    // polygons are staged and only replace the caller's after a full load
    let mut staged = PolygonRegistry::new();
    let poly = tmp.path().join(POLYGON_FILE);
    let polygon_ids: HashMap<u32, u32> = if poly.exists() {
        staged.import(&poly)?.into_iter().collect()
    } else {
        HashMap::new()
    };

    let mut hash_warnings = Vec::new();
    let mut datasets: Vec<Dataset> = Vec::with_capacity(manifest.entries.len());
    let mut by_key: HashMap<&str, usize> = HashMap::new();
    let mut pending: Vec<&IndexEntry> = manifest.entries.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();
        for entry in pending {
            let ds_dir = tmp.path().join(&entry.key);
            let dataset = if entry.is_hierarchy_child() {
                let parent_key = entry.get("parent key").unwrap_or_default();
                let Some(&p) = by_key.get(parent_key) else {
                    deferred.push(entry);
                    continue;
                };
                let parent = &datasets[p];
                let child = Dataset::hierarchy_child(parent);
                if let Some(expected) = entry.get("hash") {
                    let found = hierarchy_hash(parent.hash());
                    if expected != found {
                        debug!("{}: child hash {expected} recomputed as {found}", entry.key);
                    }
                }
                let mut child = restore(child, entry, tmp.path(), &polygon_ids)?;
                let excluded_file = ds_dir.join(MANUAL_ROOT_FILTER_FILE);
                if excluded_file.exists() {
                    child.set_manual_from_root_indices(&npy::read_indices(&excluded_file)?);
                }
                child
            } else {
                let file = files
                    .get(entry.key.as_str())
                    .ok_or_else(|| Error::InvalidFormat(format!("no data file for {}", entry.key)))?;
                let dataset = loader.open(file)?;
                if let Some(expected) = entry.get("hash") {
                    if expected != dataset.hash() {
                        let warning = HashComparisonWarning {
                            key: entry.key.clone(),
                            path: file.clone(),
                            expected: expected.to_string(),
                            found: dataset.hash().to_string(),
                        };
                        warn!("{warning}");
                        hash_warnings.push(warning);
                    }
                }
                let mut dataset = restore(dataset, entry, tmp.path(), &polygon_ids)?;
                let manual_file = ds_dir.join(MANUAL_FILTER_FILE);
                if manual_file.exists() {
                    let manual = npy::read_bool(&manual_file)?;
                    if let Err(e) = dataset.set_manual(manual) {
                        warn!("{}: ignoring manual filter: {e}", entry.key);
                    }
                }
                dataset
            };
            by_key.insert(entry.key.as_str(), datasets.len());
            datasets.push(dataset);
        }
        if deferred.len() == before {
            let keys: Vec<&str> = deferred.iter().map(|e| e.key.as_str()).collect();
            return Err(shapeout_core::Error::InvalidHierarchy(format!(
                "parents of {keys:?} are not part of the session"
            ))
            .into());
        }
        pending = deferred;
    }

    let mut analysis = Analysis::new(datasets, None, Arc::new(RwLock::new(staged)))?;
    analysis.move_registry_into(registry);
    info!(
        "loaded {} datasets from {} (version {version})",
        analysis.len(),
        path.display()
    );
    Ok(LoadedSession {
        analysis,
        version,
        hash_warnings,
    })
}

/// Applies the saved identifier, title and configuration to a dataset.
fn restore(
    mut dataset: Dataset,
    entry: &IndexEntry,
    dir: &Path,
    polygon_ids: &HashMap<u32, u32>,
) -> Result<Dataset> {
    if let Some(identifier) = entry.get("identifier") {
        dataset = dataset.with_identifier(identifier);
    }
    if let Some(title) = entry.get("title") {
        dataset.title = title.to_string();
    }
    let path = config_path(dir, entry);
    if path.exists() {
        let saved = Config::read(&path)?;
        let parent = dataset.parent().map(str::to_string);
        dataset.config.update(&saved);
        if let Some(parent) = parent {
            dataset.set_parent(&parent);
        }
    }
    // polygon ids are renumbered on import
    let ids: Vec<u32> = filter::polygon_ids(&dataset.config)
        .into_iter()
        .filter_map(|id| polygon_ids.get(&id).copied())
        .collect();
    filter::set_polygon_ids(&mut dataset.config, &ids);
    Ok(dataset)
}

/// Finds the data file of a root entry: the absolute `fdir`, then `rdir`
/// relative to the session, then each search directory.
pub(crate) fn locate_data_file(
    entry: &IndexEntry,
    session_dir: Option<&Path>,
    search_dirs: &[PathBuf],
) -> Option<PathBuf> {
    let name = entry.get("name")?;
    let mut candidates = Vec::new();
    if let Some(fdir) = entry.get("fdir") {
        candidates.push(PathBuf::from(fdir).join(name));
    }
    if let (Some(session_dir), Some(rdir)) = (session_dir, entry.get("rdir")) {
        let relative = rdir
            .split(['/', '\\'])
            .filter(|p| !p.is_empty())
            .fold(session_dir.to_path_buf(), |path, part| path.join(part));
        candidates.push(relative.join(name));
    }
    candidates.extend(search_dirs.iter().map(|d| d.join(name)));
    candidates.into_iter().find(|c| c.is_file())
}

pub(crate) fn missing_file(entry: &IndexEntry) -> MissingDataFile {
    MissingDataFile {
        key: entry.key.clone(),
        name: entry.get("name").unwrap_or_default().to_string(),
        fdir: PathBuf::from(entry.get("fdir").unwrap_or_default()),
        rdir: PathBuf::from(entry.get("rdir").unwrap_or_default()),
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Path of `to` relative to `from`; `None` if they share no root
/// (e.g. different drives).
fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    if from.first() != to.first() {
        return None;
    }
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to[common..] {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Some(rel)
}

fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
