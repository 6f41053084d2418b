//! Polygon filters and the process-wide polygon registry.
//!
//! A polygon filter is a closed polygon in the plane of two scalar features.
//! Dataset configurations refer to polygons by their `unique_id`
//! (`filtering.polygon filters`), so ids are never reused within a registry.

use crate::config::format_float;
use crate::{Error, Result};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, LazyLock, RwLock};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Registry handle shared between an analysis and the session I/O stack.
pub type SharedRegistry = Arc<RwLock<PolygonRegistry>>;

static GLOBAL_REGISTRY: LazyLock<SharedRegistry> = LazyLock::new(PolygonRegistry::shared);

/// A closed polygon in the plane of two features.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolygonFilter {
    pub unique_id: u32,
    pub name: String,
    /// `(x feature, y feature)`.
    pub axes: (String, String),
    pub points: Vec<(f64, f64)>,
    pub inverted: bool,
}

impl PolygonFilter {
    /// Whether `(x, y)` passes the filter: even-odd inside test XOR `inverted`.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        point_in_polygon(x, y, &self.points) != self.inverted
    }

    /// Evaluates the filter for paired event coordinates.
    ///
    /// Non-finite coordinates never pass.
    #[must_use]
    pub fn filter(&self, x: &[f64], y: &[f64]) -> Vec<bool> {
        x.iter()
            .zip(y)
            .map(|(&xi, &yi)| xi.is_finite() && yi.is_finite() && self.contains(xi, yi))
            .collect()
    }

    /// Whether this polygon applies to a dataset offering `features`.
    #[must_use]
    pub fn applies_to(&self, features: &[String]) -> bool {
        features.iter().any(|f| *f == self.axes.0) && features.iter().any(|f| *f == self.axes.1)
    }
}

fn point_in_polygon(x: f64, y: f64, vertices: &[(f64, f64)]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        // (yi > y) != (yj > y) guarantees yi != yj
        let intersects = ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi);
        if intersects {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Ordered collection of polygon filters indexed by `unique_id`.
#[derive(Debug, Default)]
pub struct PolygonRegistry {
    filters: Vec<PolygonFilter>,
    next_id: u32,
}

impl PolygonRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry behind a shareable lock.
    #[must_use]
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> SharedRegistry {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Creates a polygon filter and returns its fresh id.
    ///
    /// # Errors
    /// Returns `InvalidPolygon` for fewer than three points or non-finite
    /// coordinates.
    pub fn create(
        &mut self,
        points: Vec<(f64, f64)>,
        axes: (&str, &str),
        name: Option<&str>,
        inverted: bool,
    ) -> Result<u32> {
        if points.len() < 3 {
            return Err(Error::InvalidPolygon(format!(
                "need at least 3 points, got {}",
                points.len()
            )));
        }
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(Error::InvalidPolygon("non-finite point".to_string()));
        }
        let unique_id = self.next_id;
        self.next_id += 1;
        self.filters.push(PolygonFilter {
            unique_id,
            name: name.map_or_else(|| format!("Polygon {unique_id}"), str::to_string),
            axes: (axes.0.to_string(), axes.1.to_string()),
            points,
            inverted,
        });
        Ok(unique_id)
    }

    /// Removes a filter. Other filters keep their ids.
    ///
    /// # Errors
    /// Returns `UnknownPolygon` if `id` is not registered.
    pub fn remove(&mut self, id: u32) -> Result<PolygonFilter> {
        let pos = self
            .filters
            .iter()
            .position(|f| f.unique_id == id)
            .ok_or(Error::UnknownPolygon(id))?;
        Ok(self.filters.remove(pos))
    }

    /// Returns a filter by id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&PolygonFilter> {
        self.filters.iter().find(|f| f.unique_id == id)
    }

    /// Returns a mutable filter by id.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut PolygonFilter> {
        self.filters.iter_mut().find(|f| f.unique_id == id)
    }

    /// All filters in creation order.
    #[must_use]
    pub fn all(&self) -> &[PolygonFilter] {
        &self.filters
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether no filter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Removes every filter and restarts id assignment.
    pub fn clear_all(&mut self) {
        self.filters.clear();
        self.next_id = 0;
    }

    /// Imports all polygons from a `.poly` file.
    ///
    /// Returns `(id in file, new id)` pairs in file order.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a block is malformed.
    pub fn import<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<(u32, u32)>> {
        let text = std::fs::read_to_string(path)?;
        self.import_str(&text)
    }

    /// Imports polygons from `.poly` text. See [`PolygonRegistry::import`].
    ///
    /// # Errors
    /// Returns `InvalidPolygon` for malformed blocks.
    pub fn import_str(&mut self, text: &str) -> Result<Vec<(u32, u32)>> {
        let blocks = parse_poly_text(text)?;
        let mut mapping = Vec::with_capacity(blocks.len());
        for block in blocks {
            let new_id = self.create(
                block.points,
                (block.x_axis.as_str(), block.y_axis.as_str()),
                Some(block.name.as_str()),
                block.inverted,
            )?;
            mapping.push((block.file_id, new_id));
        }
        Ok(mapping)
    }

    /// Exports `ids` (or every filter when `None`) to a `.poly` file.
    ///
    /// # Errors
    /// Returns `UnknownPolygon` for ids not registered, or an I/O error.
    pub fn export<P: AsRef<Path>>(&self, path: P, ids: Option<&[u32]>) -> Result<()> {
        let text = self.export_string(ids)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Renders `ids` (or every filter) as `.poly` text.
    ///
    /// # Errors
    /// Returns `UnknownPolygon` for ids not registered.
    pub fn export_string(&self, ids: Option<&[u32]>) -> Result<String> {
        let selected: Vec<&PolygonFilter> = match ids {
            None => self.filters.iter().collect(),
            Some(ids) => ids
                .iter()
                .map(|id| self.get(*id).ok_or(Error::UnknownPolygon(*id)))
                .collect::<Result<_>>()?,
        };
        let mut out = String::new();
        for filter in selected {
            let _ = writeln!(out, "[Polygon {:04}]", filter.unique_id);
            let _ = writeln!(out, "X Axis = {}", filter.axes.0);
            let _ = writeln!(out, "Y Axis = {}", filter.axes.1);
            let _ = writeln!(out, "Name = {}", filter.name);
            let _ = writeln!(out, "Inverted = {}", u8::from(filter.inverted));
            for (i, (x, y)) in filter.points.iter().enumerate() {
                let _ = writeln!(out, "point{i:05} = {} {}", format_float(*x), format_float(*y));
            }
            out.push('\n');
        }
        Ok(out)
    }
}

struct PolyBlock {
    file_id: u32,
    x_axis: String,
    y_axis: String,
    name: String,
    inverted: bool,
    points: Vec<(f64, f64)>,
}

fn parse_poly_text(text: &str) -> Result<Vec<PolyBlock>> {
    let mut blocks: Vec<(u32, Vec<(String, String)>)> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let number = header
                .trim()
                .strip_prefix("Polygon")
                .map(str::trim)
                .and_then(|n| n.parse::<u32>().ok())
                .ok_or_else(|| Error::InvalidPolygon(format!("bad header {line:?}")))?;
            blocks.push((number, Vec::new()));
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::InvalidPolygon(format!("bad line {line:?}")))?;
        let (_, entries) = blocks
            .last_mut()
            .ok_or_else(|| Error::InvalidPolygon(format!("line outside block: {line:?}")))?;
        entries.push((key.trim().to_lowercase(), value.trim().to_string()));
    }

    blocks
        .into_iter()
        .map(|(file_id, entries)| {
            let mut block = PolyBlock {
                file_id,
                x_axis: String::new(),
                y_axis: String::new(),
                name: format!("Polygon {file_id}"),
                inverted: false,
                points: Vec::new(),
            };
            let mut points: Vec<(usize, (f64, f64))> = Vec::new();
            for (key, value) in entries {
                match key.as_str() {
                    "x axis" => block.x_axis = value,
                    "y axis" => block.y_axis = value,
                    "name" => block.name = value,
                    "inverted" => block.inverted = matches!(value.as_str(), "1" | "True" | "true"),
                    _ => {
                        if let Some(index) = key.strip_prefix("point") {
                            let index = index.parse::<usize>().map_err(|_| {
                                Error::InvalidPolygon(format!("bad point key {key:?}"))
                            })?;
                            points.push((index, parse_point(&value)?));
                        }
                    }
                }
            }
            if block.x_axis.is_empty() || block.y_axis.is_empty() {
                return Err(Error::InvalidPolygon(format!(
                    "polygon {file_id} lacks an axis"
                )));
            }
            points.sort_by_key(|(index, _)| *index);
            block.points = points.into_iter().map(|(_, p)| p).collect();
            Ok(block)
        })
        .collect()
}

fn parse_point(value: &str) -> Result<(f64, f64)> {
    let mut parts = value.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Ok((x, y)),
        _ => Err(Error::InvalidPolygon(format!("bad point {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
    }

    #[test]
    fn test_even_odd_contains() {
        let mut registry = PolygonRegistry::new();
        let id = registry.create(square(), ("area_um", "deform"), None, false).unwrap();
        let poly = registry.get(id).unwrap();
        assert!(poly.contains(0.5, 0.5));
        assert!(!poly.contains(1.5, 0.5));
        assert_eq!(poly.name, "Polygon 0");
    }

    #[test]
    fn test_inverted_flips_result() {
        let mut registry = PolygonRegistry::new();
        let id = registry.create(square(), ("area_um", "deform"), None, true).unwrap();
        let poly = registry.get(id).unwrap();
        assert!(!poly.contains(0.5, 0.5));
        assert!(poly.contains(1.5, 0.5));
        assert_eq!(poly.filter(&[0.5, 2.0, f64::NAN], &[0.5, 2.0, 0.5]), vec![false, true, false]);
    }

    #[test]
    fn test_ids_are_not_reused_after_remove() {
        let mut registry = PolygonRegistry::new();
        let a = registry.create(square(), ("area_um", "deform"), None, false).unwrap();
        let b = registry.create(square(), ("area_um", "deform"), None, false).unwrap();
        registry.remove(a).unwrap();
        let c = registry.create(square(), ("area_um", "deform"), None, false).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert!(registry.get(b).is_some());
        assert!(matches!(registry.remove(a), Err(Error::UnknownPolygon(0))));
    }

    #[test]
    fn test_too_few_points() {
        let mut registry = PolygonRegistry::new();
        let result = registry.create(vec![(0.0, 0.0), (1.0, 1.0)], ("a", "b"), None, false);
        assert!(matches!(result, Err(Error::InvalidPolygon(_))));
    }

    #[test]
    fn test_export_clear_import_preserves_polygons() {
        let mut registry = PolygonRegistry::new();
        registry.create(square(), ("area_um", "deform"), Some("cells"), false).unwrap();
        registry
            .create(vec![(1.0, 2.0), (3.5, 2.0), (2.0, 1e-5)], ("fl1_max", "fl2_max"), None, true)
            .unwrap();
        let text = registry.export_string(None).unwrap();
        assert!(text.starts_with("[Polygon 0000]\nX Axis = area_um\nY Axis = deform\nName = cells\nInverted = 0\npoint00000 = 0.0 0.0\n"));

        let before: Vec<PolygonFilter> = registry.all().to_vec();
        registry.clear_all();
        let mapping = registry.import_str(&text).unwrap();
        assert_eq!(mapping, vec![(0, 0), (1, 1)]);
        for (old, new) in before.iter().zip(registry.all()) {
            assert_eq!(old.name, new.name);
            assert_eq!(old.axes, new.axes);
            assert_eq!(old.points, new.points);
            assert_eq!(old.inverted, new.inverted);
        }
    }

    #[test]
    fn test_import_assigns_fresh_ids() {
        let text = "[Polygon 0007]\nX Axis = area_um\nY Axis = deform\nName = p\nInverted = 1\n\
                    point00001 = 1 1\npoint00000 = 0 0\npoint00002 = 1 0\n";
        let mut registry = PolygonRegistry::new();
        registry.create(square(), ("area_um", "deform"), None, false).unwrap();
        let mapping = registry.import_str(text).unwrap();
        assert_eq!(mapping, vec![(7, 1)]);
        let poly = registry.get(1).unwrap();
        assert!(poly.inverted);
        assert_eq!(poly.points, vec![(0.0, 0.0), (1.0, 1.0), (1.0, 0.0)]);
    }

    #[test]
    fn test_export_unknown_id_fails() {
        let registry = PolygonRegistry::new();
        assert!(registry.export_string(Some(&[3])).is_err());
    }
}
