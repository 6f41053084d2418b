//! Session manifest (`index.txt`).
//!
//! ```text
//! # Shape-Out measurement index
//! # Software version 0.9.0
//!
//! [1_mm-hdf5_0123456789abcdef]
//! config = 1_mm-hdf5_0123456789abcdef/config.txt
//! ...
//! ```

use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const INDEX_FILE: &str = "index.txt";
pub const INDEX_HEADER: &str = "# Shape-Out measurement index";
const VERSION_PREFIX: &str = "# Software version";

/// `X.Y.Z` software version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u32, pub u32, pub u32);

impl Version {
    /// Version assumed for manifests without a version line.
    pub const UNKNOWN: Version = Version(0, 0, 1);

    /// Version of this build.
    #[must_use]
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION").parse().unwrap_or(Self::UNKNOWN)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Parses `X.Y.Z`; suffixes such as `0.7.6.dev3` or `0.8.0b1` are ignored.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.').map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u32>().ok()
        });
        let mut next = || parts.next().flatten();
        match (next(), next(), next()) {
            (Some(major), Some(minor), patch) => Ok(Self(major, minor, patch.unwrap_or(0))),
            _ => Err(Error::InvalidFormat(format!("bad version {s:?}"))),
        }
    }
}

/// One `[N_identifier]` section of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Per-session key, e.g. `2_mm-tdms_00ff...`.
    pub key: String,
    /// Raw `key = value` fields.
    pub fields: BTreeMap<String, String>,
}

impl IndexEntry {
    /// Creates an entry without fields.
    #[must_use]
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.fields.remove(field)
    }

    /// Render position from the integer prefix of the key.
    #[must_use]
    pub fn number(&self) -> usize {
        key_number(&self.key)
    }

    /// Key without the `N_` prefix.
    #[must_use]
    pub fn key_suffix(&self) -> &str {
        self.key
            .split_once('_')
            .filter(|(n, _)| n.parse::<usize>().is_ok())
            .map_or(self.key.as_str(), |(_, rest)| rest)
    }

    /// Whether this entry describes a hierarchy child.
    #[must_use]
    pub fn is_hierarchy_child(&self) -> bool {
        self.get("special type") == Some("hierarchy child")
    }
}

fn key_number(key: &str) -> usize {
    key.split('_')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Parsed `index.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version: Version,
    /// Entries in render order.
    pub entries: Vec<IndexEntry>,
}

impl Manifest {
    /// Empty manifest for the current version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: Version::current(),
            entries: Vec::new(),
        }
    }

    /// Parses manifest text. Entries are ordered by the integer prefix of
    /// their key; a missing version line means [`Version::UNKNOWN`].
    ///
    /// # Errors
    /// Returns `InvalidFormat` for fields outside a section, lines without
    /// `=` or an unparseable version.
    pub fn parse(text: &str) -> Result<Self> {
        let mut version = Version::UNKNOWN;
        let mut entries: Vec<IndexEntry> = Vec::new();
        for line in text.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix(VERSION_PREFIX) {
                version = rest.parse()?;
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(key) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                entries.push(IndexEntry::new(key.trim()));
                continue;
            }
            let (field, value) = line
                .split_once('=')
                .ok_or_else(|| Error::InvalidFormat(format!("index line {line:?}")))?;
            let entry = entries
                .last_mut()
                .ok_or_else(|| Error::InvalidFormat(format!("field outside section: {line:?}")))?;
            entry.set(&field.trim().to_lowercase(), value.trim());
        }
        entries.sort_by(|a, b| match a.number().cmp(&b.number()) {
            Ordering::Equal => a.key.cmp(&b.key),
            other => other,
        });
        Ok(Self { version, entries })
    }

    /// Reads `index.txt` from a session directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(dir: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(dir.join(INDEX_FILE))?)
    }

    /// Writes `index.txt` into a session directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(INDEX_FILE), self.to_string())?;
        Ok(())
    }

    /// Entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{INDEX_HEADER}")?;
        writeln!(f, "{VERSION_PREFIX} {}", self.version)?;
        for entry in &self.entries {
            writeln!(f)?;
            writeln!(f, "[{}]", entry.key)?;
            for (field, value) in &entry.fields {
                writeln!(f, "{field} = {value}")?;
            }
        }
        Ok(())
    }
}
