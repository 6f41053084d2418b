//! Case-insensitive, sectioned dataset configuration.
//!
//! A [`Config`] mirrors the `config.txt` files stored in session archives:
//! `[section]` headers followed by `key = value` lines. Section names and keys
//! are normalised to lower case. Values keep a light type tag so that
//! booleans, numbers and lists render the same way they were read.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sections every dataset configuration is grouped into.
pub const SECTIONS: [&str; 9] = [
    "experiment",
    "imaging",
    "setup",
    "online_filter",
    "fluorescence",
    "filtering",
    "plotting",
    "analysis",
    "calculation",
];

/// Sections shared across an analysis by [`crate::Analysis::set_parameters`].
pub const SHARED_SECTIONS: [&str; 4] = ["filtering", "plotting", "analysis", "calculation"];

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    /// Parses the textual representation written by [`fmt::Display`].
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if text.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(value) = text.parse::<i64>() {
            return Self::Int(value);
        }
        if let Some(value) = parse_float(text) {
            return Self::Float(value);
        }
        if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            let items = inner
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Self::parse(item.trim_matches(|c| c == '\'' || c == '"')))
                .collect();
            return Self::List(items);
        }
        Self::Str(text.to_string())
    }

    /// Returns the value as a boolean (numbers are truthy when non-zero).
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    /// Returns the value as a float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the value as an integer (floats must be integral).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) if value.fract() == 0.0 && value.is_finite() => Some(*value as i64),
            _ => None,
        }
    }

    /// Returns the value as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the value as a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => f.write_str(&format_float(*value)),
            Self::Str(value) => f.write_str(value),
            Self::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match value {
                        Self::Str(s) => write!(f, "'{s}'")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for ConfigValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for ConfigValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(values: Vec<ConfigValue>) -> Self {
        Self::List(values)
    }
}

fn parse_float(text: &str) -> Option<f64> {
    // `str::parse` accepts "infinity" and friends; only take what we write.
    match text {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => None,
        _ => text.parse::<f64>().ok(),
    }
}

/// Formats a float the way the configuration files have always stored them:
/// shortest round-trip digits, a trailing `.0` for integral values and
/// exponent notation outside `[1e-4, 1e16)`.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{value:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    let formatted = format!("{value}");
    if formatted.contains('.') {
        formatted
    } else {
        format!("{formatted}.0")
    }
}

/// One `[section]` of a configuration.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfigSection {
    values: BTreeMap<String, ConfigValue>,
}

impl ConfigSection {
    /// Creates an empty section.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key` (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(&key.to_lowercase())
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    /// Removes `key` and returns its value.
    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.values.remove(&key.to_lowercase())
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&key.to_lowercase())
    }

    /// Iterates over `(key, value)` pairs in alphabetical key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.values.iter()
    }

    /// Iterates over keys in alphabetical order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the section has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keeps only the keys for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &ConfigValue) -> bool) {
        self.values.retain(|key, value| keep(key, value));
    }

    /// Overwrites keys with the ones found in `other`.
    pub fn update(&mut self, other: &ConfigSection) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Renames `from` to `to`, keeping the value. Returns whether a key moved.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.values.remove(&from.to_lowercase()) {
            Some(value) => {
                self.values.insert(to.to_lowercase(), value);
                true
            }
            None => false,
        }
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for ConfigSection {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into().to_lowercase(), v.into()))
                .collect(),
        }
    }
}

/// A two-level configuration: sections of keyed values.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    sections: BTreeMap<String, ConfigSection>,
}

impl Config {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a section if present.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&ConfigSection> {
        self.sections.get(&name.to_lowercase())
    }

    /// Returns a mutable section, creating it when missing.
    pub fn section_mut(&mut self, name: &str) -> &mut ConfigSection {
        self.sections.entry(name.to_lowercase()).or_default()
    }

    /// Iterates over `(name, section)` pairs in alphabetical order.
    pub fn sections(&self) -> impl Iterator<Item = (&String, &ConfigSection)> {
        self.sections.iter()
    }

    /// Iterates mutably over all sections.
    pub fn sections_mut(&mut self) -> impl Iterator<Item = (&String, &mut ConfigSection)> {
        self.sections.iter_mut()
    }

    /// Returns a single value.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&ConfigValue> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// Sets a single value.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<ConfigValue>) {
        self.section_mut(section).set(key, value);
    }

    /// Removes a single value.
    pub fn remove(&mut self, section: &str, key: &str) -> Option<ConfigValue> {
        self.sections
            .get_mut(&section.to_lowercase())
            .and_then(|s| s.remove(key))
    }

    /// Whether a value is present.
    #[must_use]
    pub fn contains(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    /// Returns a boolean value if present and boolean-like.
    #[must_use]
    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        self.get(section, key).and_then(ConfigValue::as_bool)
    }

    /// Returns a numeric value if present.
    #[must_use]
    pub fn get_f64(&self, section: &str, key: &str) -> Option<f64> {
        self.get(section, key).and_then(ConfigValue::as_f64)
    }

    /// Returns an integer value if present.
    #[must_use]
    pub fn get_i64(&self, section: &str, key: &str) -> Option<i64> {
        self.get(section, key).and_then(ConfigValue::as_i64)
    }

    /// Returns a string value if present.
    #[must_use]
    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).and_then(ConfigValue::as_str)
    }

    /// Returns a numeric value, failing with [`Error::BadValue`] if the key
    /// holds something that is not a number.
    ///
    /// # Errors
    /// Returns `BadValue` when the stored value is not numeric.
    pub fn try_f64(&self, section: &str, key: &str) -> Result<Option<f64>> {
        match self.get(section, key) {
            None => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| Error::BadValue {
                key: format!("{section}.{key}"),
                value: value.to_string(),
            }),
        }
    }

    /// Deep-merges `other` into `self`, section by section.
    pub fn update(&mut self, other: &Config) {
        for (name, section) in &other.sections {
            self.section_mut(name).update(section);
        }
    }

    /// Parses `config.txt` text.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for key lines outside of a section or lines
    /// without `=`.
    pub fn from_ini_str(text: &str) -> Result<Self> {
        let mut config = Self::new();
        let mut current: Option<String> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_lowercase();
                config.section_mut(&name);
                current = Some(name);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::InvalidConfig(format!(
                    "line {}: expected 'key = value', got {line:?}",
                    lineno + 1
                )));
            };
            let Some(section) = &current else {
                return Err(Error::InvalidConfig(format!(
                    "line {}: key {:?} outside of a section",
                    lineno + 1,
                    key.trim()
                )));
            };
            config
                .section_mut(section)
                .set(key.trim(), ConfigValue::parse(value));
        }
        Ok(config)
    }

    /// Renders the configuration as `config.txt` text, sections and keys
    /// sorted alphabetically.
    #[must_use]
    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        for (name, section) in &self.sections {
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for (key, value) in section.iter() {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&value.to_string());
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    /// Reads a `config.txt` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ini_str(&text)
    }

    /// Writes a `config.txt` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_ini_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_types() {
        assert_eq!(ConfigValue::parse("True"), ConfigValue::Bool(true));
        assert_eq!(ConfigValue::parse(" false "), ConfigValue::Bool(false));
        assert_eq!(ConfigValue::parse("12"), ConfigValue::Int(12));
        assert_eq!(ConfigValue::parse("0.05"), ConfigValue::Float(0.05));
        assert_eq!(ConfigValue::parse("1e-05"), ConfigValue::Float(1e-5));
        assert_eq!(ConfigValue::parse("deform"), ConfigValue::Str("deform".into()));
        assert_eq!(ConfigValue::parse("emodulus"), ConfigValue::Str("emodulus".into()));
        assert_eq!(
            ConfigValue::parse("[0, 3]"),
            ConfigValue::List(vec![ConfigValue::Int(0), ConfigValue::Int(3)])
        );
        assert_eq!(ConfigValue::parse("[]"), ConfigValue::List(vec![]));
    }

    #[test]
    fn test_format_float_matches_stored_repr() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.05), "0.05");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut config = Config::new();
        config.set("Filtering", "Deform Max", 0.05);
        assert_eq!(config.get_f64("filtering", "deform max"), Some(0.05));
        assert!(config.contains("FILTERING", "DEFORM MAX"));
    }

    #[test]
    fn test_ini_text_sorted_and_parsed_back() {
        let mut config = Config::new();
        config.set("plotting", "axis y", "deform");
        config.set("plotting", "axis x", "area_um");
        config.set("filtering", "enable filters", true);
        config.set("filtering", "polygon filters", vec![ConfigValue::Int(1)]);

        let text = config.to_ini_string();
        let expected = "[filtering]\nenable filters = True\npolygon filters = [1]\n\n\
                        [plotting]\naxis x = area_um\naxis y = deform\n\n";
        assert_eq!(text, expected);
        assert_eq!(Config::from_ini_str(&text).unwrap(), config);
    }

    #[test]
    fn test_key_outside_section_is_rejected() {
        assert!(Config::from_ini_str("a = 1\n").is_err());
        assert!(Config::from_ini_str("[s]\nnot a pair\n").is_err());
    }

    #[test]
    fn test_update_merges_sections() {
        let mut a = Config::new();
        a.set("filtering", "deform min", 0.0);
        a.set("filtering", "deform max", 0.1);
        let mut b = Config::new();
        b.set("filtering", "deform max", 0.05);
        b.set("plotting", "scale x", "log");
        a.update(&b);
        assert_eq!(a.get_f64("filtering", "deform min"), Some(0.0));
        assert_eq!(a.get_f64("filtering", "deform max"), Some(0.05));
        assert_eq!(a.get_str("plotting", "scale x"), Some("log"));
    }

    #[test]
    fn test_try_f64_reports_bad_value() {
        let mut config = Config::new();
        config.set("setup", "flow rate", "fast");
        assert!(matches!(
            config.try_f64("setup", "flow rate"),
            Err(Error::BadValue { .. })
        ));
        assert_eq!(config.try_f64("setup", "missing").unwrap(), None);
    }
}
