use shapeout_core::{
    filter, Analysis, Config, ConfigValue, Dataset, DatasetLoader, EventTable, MemoryLoader,
    PolygonRegistry,
};
use std::path::Path;

fn events(n: usize) -> EventTable {
    #[allow(clippy::cast_precision_loss)]
    let deform: Vec<f64> = (0..n).map(|i| i as f64 / n as f64 * 0.1).collect();
    #[allow(clippy::cast_precision_loss)]
    let area: Vec<f64> = (0..n).map(|i| 10.0 + i as f64).collect();
    EventTable::new()
        .with_column("deform", deform)
        .unwrap()
        .with_column("area_um", area)
        .unwrap()
}

#[test]
fn test_polygon_export_import_filters_identically() {
    let registry = PolygonRegistry::shared();
    let id = registry
        .write()
        .unwrap()
        .create(
            vec![(10.0, 0.0), (40.0, 0.0), (40.0, 0.05), (10.0, 0.05)],
            ("area_um", "deform"),
            Some("cells"),
            false,
        )
        .unwrap();

    let mut analysis = Analysis::new(
        vec![Dataset::from_table(events(100), Config::new())],
        None,
        registry.clone(),
    )
    .unwrap();
    let mut cfg = Config::new();
    cfg.set("filtering", "polygon filters", vec![ConfigValue::Int(i64::from(id))]);
    analysis.set_parameters(&cfg).unwrap();
    let before = analysis.measurements()[0].filter().to_vec();
    assert!(before.iter().filter(|k| **k).count() > 0);

    let dir = tempfile::tempdir().unwrap();
    let poly = dir.path().join("cells.poly");
    registry.read().unwrap().export(&poly, None).unwrap();
    registry.write().unwrap().clear_all();

    let mapping = registry.write().unwrap().import(&poly).unwrap();
    assert_eq!(mapping.len(), 1);
    let (old, new) = mapping[0];
    assert_eq!(old, id);

    let ids: Vec<u32> = filter::polygon_ids(&analysis.measurements()[0].config)
        .into_iter()
        .map(|i| if i == old { new } else { i })
        .collect();
    filter::set_polygon_ids(&mut analysis.measurements_mut()[0].config, &ids);
    analysis.apply_filter().unwrap();
    assert_eq!(analysis.measurements()[0].filter(), before.as_slice());
}

#[test]
fn test_hierarchy_children_follow_parent_through_loader() {
    let mut loader = MemoryLoader::new();
    loader.insert("M1_data.rtdc", events(50), Config::new());
    let root = loader.open(Path::new("M1_data.rtdc")).unwrap();
    let root_id = root.identifier().to_string();

    let mut analysis = Analysis::new(vec![root], None, PolygonRegistry::shared()).unwrap();
    let child_id = analysis.add_hierarchy_child(&root_id).unwrap();
    assert_eq!(analysis.get(&child_id).unwrap().len(), 50);

    // area_um 10..59, keep 20..29 in the root
    analysis.get_mut(&root_id).unwrap().config.set("filtering", "area_um min", 20.0);
    analysis.get_mut(&root_id).unwrap().config.set("filtering", "area_um max", 29.0);
    analysis.apply_filter().unwrap();

    let child = analysis.get(&child_id).unwrap();
    assert_eq!(child.len(), 10);
    assert_eq!(child.scalar("area_um").unwrap()[0], 20.0);
    assert_eq!(child.config.get_str("filtering", "hierarchy parent"), Some(root_id.as_str()));
}

#[test]
fn test_limit_events_downsamples_deterministically() {
    let mut analysis = Analysis::new(
        vec![Dataset::from_table(events(100), Config::new())],
        None,
        PolygonRegistry::shared(),
    )
    .unwrap();
    let mut cfg = Config::new();
    cfg.set("filtering", "limit events", 10_i64);
    analysis.set_parameters(&cfg).unwrap();
    let first = analysis.measurements()[0].filter().to_vec();
    analysis.apply_filter().unwrap();
    assert_eq!(analysis.measurements()[0].filtered_len(), 10);
    assert_eq!(analysis.measurements()[0].filter(), first.as_slice());
}

#[test]
fn test_global_registry_is_shared() {
    let a = PolygonRegistry::global();
    let b = PolygonRegistry::global();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}
