//! Metadata probe for the measurement browser.
//!
//! Reads sample name, event count, flow rate and chip region of `.rtdc` and
//! `.tdms` measurements without loading per-event data, and collects whole
//! directory trees grouped by sample.

use crate::settings::{fingerprint, CacheStore};
use crate::{Error, Result};
use log::{debug, warn};
use memmap2::Mmap;
use rayon::prelude::*;
use shapeout_core::{CancelFlag, DatasetLoader};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use walkdir::WalkDir;

/// Metadata of one measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub path: PathBuf,
    /// `channel` or `reservoir`.
    pub chip_region: String,
    pub event_count: usize,
    /// Flow rate in µL/s.
    pub flow_rate: f64,
    pub run_index: u32,
    pub sample_name: String,
}

/// Browser tree node: one sample and its measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGroup {
    pub title: String,
    pub rows: Vec<Metadata>,
}

/// Reads measurement metadata.
#[derive(Default)]
pub struct Probe {
    loader: Option<Arc<dyn DatasetLoader>>,
    cache: Option<Mutex<CacheStore>>,
}

impl Probe {
    /// Creates a probe without loader fallback or cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `loader` when side-files do not provide an event count and, without
    /// HDF5 support, for `.rtdc` files.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn DatasetLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Caches expensive event counts.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(Mutex::new(cache));
        self
    }

    /// Probes a single measurement file.
    ///
    /// # Errors
    /// Returns `UnreadableMetadata` if side-files or tags are missing.
    pub fn probe(&self, path: &Path) -> Result<Metadata> {
        match extension(path).as_deref() {
            Some("tdms") => self.probe_tdms(path),
            Some("rtdc") => self.probe_rtdc(path),
            _ => Err(unreadable(path, "not an .rtdc or .tdms file")),
        }
    }

    fn probe_tdms(&self, path: &Path) -> Result<Metadata> {
        let (dir, prefix) = tdms_prefix(path)?;
        let para_path = dir.join(format!("{prefix}_para.ini"));
        let para = std::fs::read_to_string(&para_path)
            .map_err(|_| unreadable(path, &format!("missing {}", para_path.display())))?;
        let para = parse_ini_flat(&para);

        let flow_rate = para
            .iter()
            .find(|(key, _)| key.starts_with("flow rate"))
            .and_then(|(_, value)| value.parse::<f64>().ok())
            .ok_or_else(|| unreadable(path, "no flow rate in para.ini"))?;
        let chip_region = para
            .get("region")
            .map_or_else(|| "channel".to_string(), |r| r.to_lowercase());
        let sample_name = para
            .get("sample name")
            .cloned()
            .or_else(|| {
                dir.file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let run_index = prefix
            .trim_start_matches(|c| c == 'M' || c == 'm')
            .parse()
            .unwrap_or(0);

        let event_count = match read_log_events(&dir.join(format!("{prefix}_log.ini"))) {
            Some(count) => count,
            None => self.cached_count(path, &dir.join(format!("{prefix}_imaq.avi")))?,
        };

        Ok(Metadata {
            path: path.to_path_buf(),
            chip_region,
            event_count,
            flow_rate,
            run_index,
            sample_name,
        })
    }

    /// Event count from the video frame count or, failing that, the loader.
    fn cached_count(&self, tdms: &Path, avi: &Path) -> Result<usize> {
        let source = if avi.exists() { avi } else { tdms };
        let key = fingerprint(source)?;
        if let Some(cache) = &self.cache {
            let cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = cache.get(&key).and_then(|c| usize::try_from(c).ok()) {
                return Ok(count);
            }
        }

        let count = match avi_frame_count(avi) {
            Some(count) => count,
            None => match &self.loader {
                Some(loader) => loader.event_count(tdms)?,
                None => return Err(unreadable(tdms, "cannot determine event count")),
            },
        };
        debug!("{}: {count} events", tdms.display());

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.set(&key, i64::try_from(count).unwrap_or(i64::MAX))?;
        }
        Ok(count)
    }

    #[cfg(feature = "hdf5")]
    fn probe_rtdc(&self, path: &Path) -> Result<Metadata> {
        crate::rtdc::read_metadata(path)
    }

    #[cfg(not(feature = "hdf5"))]
    fn probe_rtdc(&self, path: &Path) -> Result<Metadata> {
        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| unreadable(path, "HDF5 support not enabled"))?;
        let dataset = loader.open(path)?;
        let config = &dataset.config;
        Ok(Metadata {
            path: path.to_path_buf(),
            chip_region: config
                .get_str("setup", "chip region")
                .unwrap_or("channel")
                .to_lowercase(),
            event_count: dataset.len(),
            flow_rate: config
                .get_f64("setup", "flow rate")
                .ok_or_else(|| unreadable(path, "no setup:flow rate"))?,
            run_index: config
                .get_i64("experiment", "run index")
                .and_then(|i| u32::try_from(i).ok())
                .unwrap_or(0),
            sample_name: config
                .get_str("experiment", "sample")
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Probes every measurement below `root` and groups them by sample name.
    ///
    /// Unreadable measurements are logged and omitted. The walk stops early
    /// when `cancel` is set.
    ///
    /// # Errors
    /// Returns an error if `root` cannot be read.
    pub fn collect_directory(&self, root: &Path, cancel: &CancelFlag) -> Result<Vec<SampleGroup>> {
        let files = find_measurements(root)?;
        let rows: Vec<Metadata> = files
            .par_iter()
            .filter_map(|path| {
                if cancel.is_cancelled() {
                    return None;
                }
                match self.probe(path) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        warn!("skipping {}: {e}", path.display());
                        None
                    }
                }
            })
            .collect();

        let mut groups: BTreeMap<String, Vec<Metadata>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.sample_name.clone()).or_default().push(row);
        }
        Ok(groups
            .into_iter()
            .map(|(title, mut rows)| {
                rows.sort_by(|a, b| a.run_index.cmp(&b.run_index).then(a.path.cmp(&b.path)));
                SampleGroup { title, rows }
            })
            .collect())
    }
}

/// Recursively finds `.rtdc` and `.tdms` files, sorted by path.
///
/// # Errors
/// Returns an error if `root` cannot be read.
pub fn find_measurements(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if entry.file_type().is_file()
            && matches!(extension(entry.path()).as_deref(), Some("rtdc" | "tdms"))
        {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

fn unreadable(path: &Path, reason: &str) -> Error {
    Error::UnreadableMetadata {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// `M1_data.tdms` -> (directory, `M1`).
fn tdms_prefix(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| unreadable(path, "invalid file name"))?;
    let prefix = name.split('_').next().unwrap_or(name);
    let prefix = prefix.strip_suffix(".tdms").unwrap_or(prefix);
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((dir, prefix.to_string()))
}

/// Keys of all sections, lower-cased; the first occurrence wins.
fn parse_ini_flat(text: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values
                .entry(key.trim().to_lowercase())
                .or_insert_with(|| value.trim().to_string());
        }
    }
    values
}

/// Event count from an `Events: N` line.
fn read_log_events(path: &Path) -> Option<usize> {
    let text = std::fs::read_to_string(path).ok()?;
    text.lines().find_map(|line| {
        let (_, rest) = line.split_once("Events:")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Total frames from the `avih` main header of an AVI file.
fn avi_frame_count(path: &Path) -> Option<usize> {
    let file = File::open(path).ok()?;
    // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
    #[allow(unsafe_code)]
    let mmap = unsafe { Mmap::map(&file).ok()? };
    avih_total_frames(&mmap)
}

fn avih_total_frames(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"AVI " {
        return None;
    }
    let pos = bytes.windows(4).position(|w| w == b"avih")?;
    // chunk id, chunk size, then four u32 fields before dwTotalFrames
    let offset = pos + 8 + 16;
    let field = bytes.get(offset..offset + 4)?;
    let frames = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
    usize::try_from(frames).ok()
}
