use shapeout_core::{
    filter, Analysis, Config, Dataset, DatasetLoader, EventTable, MemoryLoader, PolygonRegistry,
    SharedRegistry,
};
use shapeout_io::{load_session, save_session, Error, LoadOptions, Version};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[allow(clippy::cast_precision_loss)]
fn events(n: usize, offset: f64) -> EventTable {
    let deform: Vec<f64> = (0..n).map(|i| i as f64 / n as f64 * 0.1).collect();
    let area: Vec<f64> = (0..n).map(|i| offset + i as f64).collect();
    let inert: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 * 0.01).collect();
    EventTable::new()
        .with_column("deform", deform)
        .unwrap()
        .with_column("area_um", area)
        .unwrap()
        .with_column("inert_ratio_cvx", inert)
        .unwrap()
}

struct Fixture {
    _dir: tempfile::TempDir,
    raw: PathBuf,
    zmso: PathBuf,
    loader: MemoryLoader,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    std::fs::create_dir_all(&raw).unwrap();
    let mut loader = MemoryLoader::new();
    for (name, offset) in [("M1_data.rtdc", 10.0), ("M2_data.rtdc", 12.0)] {
        std::fs::write(raw.join(name), b"").unwrap();
        let mut config = Config::new();
        config.set("setup", "flow rate", 0.04);
        loader.insert(name, events(44, offset), config);
    }
    let zmso = dir.path().join("sessions").join("analysis.zmso");
    std::fs::create_dir_all(zmso.parent().unwrap()).unwrap();
    Fixture {
        _dir: dir,
        raw,
        zmso,
        loader,
    }
}

fn open(loader: &MemoryLoader, path: &Path) -> Dataset {
    loader.open(path).unwrap()
}

#[test]
fn test_session_roundtrip_preserves_filters() {
    let fx = fixture();
    let registry = PolygonRegistry::shared();
    let polygon = registry
        .write()
        .unwrap()
        .create(
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 0.08), (0.0, 0.08)],
            ("area_um", "deform"),
            Some("cells"),
            false,
        )
        .unwrap();

    let data = vec![
        open(&fx.loader, &fx.raw.join("M1_data.rtdc")),
        open(&fx.loader, &fx.raw.join("M2_data.rtdc")),
    ];
    let mut analysis = Analysis::new(data, None, registry.clone()).unwrap();
    let mut cfg = Config::new();
    cfg.set("filtering", "deform max", 0.05);
    cfg.set("filtering", "inert_ratio_cvx max", 1.3);
    analysis.set_parameters(&cfg).unwrap();
    for dataset in analysis.measurements_mut() {
        filter::set_polygon_ids(&mut dataset.config, &[polygon]);
    }
    analysis.measurements_mut()[0].exclude_events(&[0, 3]);
    let root_id = analysis.measurements()[0].identifier().to_string();
    let child_id = analysis.add_hierarchy_child(&root_id).unwrap();
    analysis.get_mut(&child_id).unwrap().exclude_events(&[1]);
    analysis.apply_filter().unwrap();

    save_session(&fx.zmso, &analysis).unwrap();

    let loaded_registry = PolygonRegistry::shared();
    let loaded = load_session(
        &fx.zmso,
        &fx.loader,
        loaded_registry.clone(),
        &LoadOptions::default(),
    )
    .unwrap();
    assert_eq!(loaded.version, Version::current());
    assert!(loaded.hash_warnings.is_empty());
    assert_eq!(loaded_registry.read().unwrap().len(), 1);

    let restored = &loaded.analysis;
    assert_eq!(restored.len(), 3);
    for (before, after) in analysis.measurements().iter().zip(restored.measurements()) {
        assert_eq!(before.identifier(), after.identifier());
        assert_eq!(before.title, after.title);
        assert_eq!(before.len(), after.len());
        assert_eq!(before.filtered_len(), after.filtered_len());
        assert_eq!(before.filter(), after.filter());
        assert_eq!(
            before.config.get_f64("filtering", "inert_ratio_cvx max"),
            after.config.get_f64("filtering", "inert_ratio_cvx max")
        );
        assert_eq!(filter::polygon_ids(&after.config).len(), 1);
    }
    let child = restored.get(&child_id).unwrap();
    assert_eq!(child.parent(), Some(root_id.as_str()));
    assert_eq!(
        child.manual_excluded_root_indices(),
        analysis.get(&child_id).unwrap().manual_excluded_root_indices()
    );
    assert_eq!(
        restored.measurements()[0].manual_excluded_root_indices(),
        vec![0, 3]
    );
}

#[test]
fn test_missing_files_are_reported_and_resolved_by_search_dirs() {
    let fx = fixture();
    let data = vec![
        open(&fx.loader, &fx.raw.join("M1_data.rtdc")),
        open(&fx.loader, &fx.raw.join("M2_data.rtdc")),
    ];
    let analysis = Analysis::new(data, None, PolygonRegistry::shared()).unwrap();
    save_session(&fx.zmso, &analysis).unwrap();

    let moved = fx.raw.parent().unwrap().join("moved");
    std::fs::create_dir_all(&moved).unwrap();
    for name in ["M1_data.rtdc", "M2_data.rtdc"] {
        std::fs::rename(fx.raw.join(name), moved.join(name)).unwrap();
    }

    let registry = PolygonRegistry::shared();
    registry
        .write()
        .unwrap()
        .create(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], ("area_um", "deform"), None, false)
        .unwrap();
    let result = load_session(&fx.zmso, &fx.loader, registry.clone(), &LoadOptions::default());
    match result {
        Err(Error::MissingDataFiles(missing)) => {
            let names: Vec<&str> = missing.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, vec!["M1_data.rtdc", "M2_data.rtdc"]);
        }
        other => panic!("expected MissingDataFiles, got {:?}", other.err()),
    }
    // nothing was touched
    assert_eq!(registry.read().unwrap().len(), 1);

    let options = LoadOptions {
        search_dirs: vec![moved.clone()],
    };
    let loaded = load_session(&fx.zmso, &fx.loader, registry, &options).unwrap();
    assert_eq!(loaded.analysis.len(), 2);
    assert_eq!(
        loaded.analysis.get_filenames(),
        vec![moved.join("M1_data.rtdc"), moved.join("M2_data.rtdc")]
    );
}

#[test]
fn test_changed_data_yields_hash_warning() {
    let mut fx = fixture();
    let data = vec![open(&fx.loader, &fx.raw.join("M1_data.rtdc"))];
    let analysis = Analysis::new(data, None, PolygonRegistry::shared()).unwrap();
    save_session(&fx.zmso, &analysis).unwrap();

    fx.loader.insert("M1_data.rtdc", events(44, 50.0), Config::new());
    let loaded = load_session(
        &fx.zmso,
        &fx.loader,
        PolygonRegistry::shared(),
        &LoadOptions::default(),
    )
    .unwrap();
    assert_eq!(loaded.hash_warnings.len(), 1);
    assert_eq!(loaded.hash_warnings[0].expected, analysis.measurements()[0].hash());
    assert_eq!(loaded.analysis.len(), 1);
}

fn polygon_names(registry: &SharedRegistry) -> Vec<String> {
    registry
        .read()
        .unwrap()
        .all()
        .iter()
        .map(|p| p.name.clone())
        .collect()
}

fn session_with_polygon(fx: &Fixture) {
    let registry = PolygonRegistry::shared();
    let polygon = registry
        .write()
        .unwrap()
        .create(
            vec![(0.0, -0.01), (30.5, -0.01), (30.5, 0.08), (0.0, 0.08)],
            ("area_um", "deform"),
            Some("session"),
            false,
        )
        .unwrap();
    let data = vec![open(&fx.loader, &fx.raw.join("M1_data.rtdc"))];
    let mut analysis = Analysis::new(data, None, registry).unwrap();
    filter::set_polygon_ids(&mut analysis.measurements_mut()[0].config, &[polygon]);
    analysis.apply_filter().unwrap();
    save_session(&fx.zmso, &analysis).unwrap();
}

#[test]
fn test_failed_load_leaves_registry_untouched() {
    let fx = fixture();
    session_with_polygon(&fx);

    let registry = PolygonRegistry::shared();
    for name in ["a", "b"] {
        registry
            .write()
            .unwrap()
            .create(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], ("area_um", "deform"), Some(name), false)
            .unwrap();
    }
    // data file exists on disk but the loader cannot open it
    let result = load_session(
        &fx.zmso,
        &MemoryLoader::new(),
        registry.clone(),
        &LoadOptions::default(),
    );
    assert!(result.is_err());
    assert_eq!(polygon_names(&registry), vec!["a", "b"]);
}

#[test]
fn test_load_replaces_conflicting_polygons() {
    let fx = fixture();
    session_with_polygon(&fx);

    let registry = PolygonRegistry::shared();
    let existing = registry
        .write()
        .unwrap()
        .create(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], ("area_um", "deform"), Some("existing"), false)
        .unwrap();

    let loaded = load_session(&fx.zmso, &fx.loader, registry.clone(), &LoadOptions::default())
        .unwrap();
    assert_eq!(polygon_names(&registry), vec!["session"]);
    let imported = registry.read().unwrap().all()[0].clone();
    assert_eq!(imported.unique_id, existing);
    assert_eq!(imported.points[1], (30.5, -0.01));
    assert!(Arc::ptr_eq(loaded.analysis.registry(), &registry));

    let dataset = &loaded.analysis.measurements()[0];
    assert_eq!(filter::polygon_ids(&dataset.config), vec![imported.unique_id]);
    // area_um 10..=30 inside
    assert_eq!(dataset.filtered_len(), 21);
}
