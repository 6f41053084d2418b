//! User settings and the event-count cache.
//!
//! Both are plain `key = value` files rewritten as a whole on every change.
//! Settings live in `<user-config>/shapeout.cfg`; the cache maps file
//! fingerprints to event counts under `<user-cache>/shapeout/`.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Bytes of a file that enter its cache fingerprint.
pub const FINGERPRINT_BYTES: u64 = 100 * 1024;

pub const AUTOSAVE_SESSION: &str = "autosave session";
pub const CHECK_UPDATE: &str = "check update";
pub const EXPERT_MODE: &str = "expert mode";

/// `key = value` file with typed accessors.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl SettingsStore {
    /// Opens `shapeout.cfg` in the user configuration directory.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::open(dir.join("shapeout.cfg"))
    }

    /// Opens a settings file; a missing file yields an empty store.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => parse_lines(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw value of `key`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Boolean value of `key`, or `default` if unset.
    ///
    /// # Errors
    /// Returns `BadValue` if the stored text is not a boolean.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get_str(key) {
            None => Ok(default),
            Some(text) => match text.to_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(bad_value(key, text)),
            },
        }
    }

    /// Integer value of `key`, or `default` if unset.
    ///
    /// # Errors
    /// Returns `BadValue` if the stored text is not an integer.
    pub fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        match self.get_str(key) {
            None => Ok(default),
            Some(text) => text.parse().map_err(|_| bad_value(key, text)),
        }
    }

    /// Last used directory for `label`, `./` if unset.
    #[must_use]
    pub fn get_path(&self, label: &str) -> PathBuf {
        self.get_str(&format!("path {label}"))
            .map_or_else(|| PathBuf::from("./"), PathBuf::from)
    }

    /// Stores `value` under `key` and rewrites the file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_lowercase(), value.to_string());
        self.save()
    }

    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.set(key, if value { "True" } else { "False" })
    }

    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set_int(&mut self, key: &str, value: i64) -> Result<()> {
        self.set(key, &value.to_string())
    }

    /// Remembers the directory used for `label`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set_path(&mut self, label: &str, path: &Path) -> Result<()> {
        self.set(&format!("path {label}"), &path.display().to_string())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text: String = self
            .values
            .iter()
            .map(|(key, value)| format!("{key} = {value}\n"))
            .collect();
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

fn parse_lines(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
        .collect()
}

fn bad_value(key: &str, value: &str) -> Error {
    Error::Core(shapeout_core::Error::BadValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Event counts cached by file fingerprint.
#[derive(Debug, Clone)]
pub struct CacheStore {
    store: SettingsStore,
}

impl CacheStore {
    /// Opens the cache in the user cache directory.
    ///
    /// # Errors
    /// Returns an error if an existing cache file cannot be read.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shapeout");
        Self::open(dir.join("event_counts.cfg"))
    }

    /// Opens a cache file.
    ///
    /// # Errors
    /// Returns an error if an existing cache file cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            store: SettingsStore::open(path)?,
        })
    }

    /// Cached value for `key`. Unparseable entries count as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<i64> {
        self.store.get_str(key).and_then(|v| v.parse().ok())
    }

    /// Caches `value` under `key`.
    ///
    /// # Errors
    /// Returns an error if the cache file cannot be written.
    pub fn set(&mut self, key: &str, value: i64) -> Result<()> {
        self.store.set_int(key, value)
    }
}

/// SHA-256 over the path and the first [`FINGERPRINT_BYTES`] of the file.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(path.display().to_string().as_bytes());
    let mut head = Vec::new();
    File::open(path)?
        .take(FINGERPRINT_BYTES)
        .read_to_end(&mut head)?;
    hasher.update(&head);
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}
