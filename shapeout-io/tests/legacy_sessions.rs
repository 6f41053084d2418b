use shapeout_core::{Config, EventTable, MemoryLoader, PolygonRegistry};
use shapeout_io::archive::{unzip, zip_dir};
use shapeout_io::{
    load_session, save_session, Error, LoadOptions, LoadedSession, Manifest, Version,
};
use std::path::{Path, PathBuf};

/// 100 events, `area_um` 10..109 and `deform` 0..0.099.
fn events() -> EventTable {
    let area: Vec<f64> = (0..100).map(|i| 10.0 + f64::from(i)).collect();
    let deform: Vec<f64> = (0..100).map(|i| f64::from(i) / 1000.0).collect();
    EventTable::new()
        .with_column("area_um", area)
        .unwrap()
        .with_column("deform", deform)
        .unwrap()
        .with_column("inert_ratio_cvx", vec![1.2; 100])
        .unwrap()
}

struct Legacy {
    dir: tempfile::TempDir,
    raw: PathBuf,
    loader: MemoryLoader,
}

impl Legacy {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("M1_data.tdms"), b"").unwrap();
        let mut loader = MemoryLoader::new();
        loader.insert("M1_data.tdms", events(), Config::new());
        Self { dir, raw, loader }
    }

    /// Zips a session made of `index` and per-key `config.txt` files.
    fn archive(&self, index: &str, configs: &[(&str, &str)], poly: Option<&str>) -> PathBuf {
        let src = self.dir.path().join("extracted");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("index.txt"), index).unwrap();
        for (key, text) in configs {
            std::fs::create_dir_all(src.join(key)).unwrap();
            std::fs::write(src.join(key).join("config.txt"), text).unwrap();
        }
        if let Some(poly) = poly {
            std::fs::write(src.join("PolygonFilters.poly"), poly).unwrap();
        }
        let zmso = self.dir.path().join("legacy.zmso");
        zip_dir(&src, &zmso).unwrap();
        zmso
    }

    fn root_fields(&self) -> String {
        format!(
            "fdir = {}\nname = M1_data.tdms\nrdir = raw\n",
            self.raw.display()
        )
    }

    fn load(&self, zmso: &Path) -> shapeout_io::Result<LoadedSession> {
        load_session(
            zmso,
            &self.loader,
            PolygonRegistry::shared(),
            &LoadOptions::default(),
        )
    }

    /// Saves `loaded` again and returns the version recorded in its index.
    fn resaved_version(&self, loaded: &LoadedSession) -> Version {
        let zmso = self.dir.path().join("resaved.zmso");
        save_session(&zmso, &loaded.analysis).unwrap();
        let out = self.dir.path().join("resaved");
        unzip(&zmso, &out).unwrap();
        Manifest::read(&out).unwrap().version
    }
}

#[test]
fn test_0_7_0_hierarchy_and_renames() {
    let legacy = Legacy::new();
    let index = format!(
        "# Shape-Out measurement index\n# Software version 0.7.0\n\n\
         [1_aaaa]\nconfig = 1_aaaa\\config.txt\n{}tdms hash = aaaa\ntitle = root\n\n\
         [2_bbbb]\nconfig = 2_bbbb\\config.txt\n{}title = child\n",
        legacy.root_fields(),
        legacy.root_fields()
    );
    let zmso = legacy.archive(
        &index,
        &[
            (
                "1_aaaa",
                "[filtering]\narea min = 19.5\narea max = 69.5\n\
                 [plotting]\naxis x = area\naxis y = defo\nkde multivariate area = 10.0\n",
            ),
            (
                "2_bbbb",
                "[filtering]\nhierarchy parent = aaaa\ndefo max = 0.0505\n",
            ),
        ],
        None,
    );

    let loaded = legacy.load(&zmso).unwrap();
    assert_eq!(loaded.version, Version(0, 7, 0));
    let analysis = &loaded.analysis;
    assert_eq!(analysis.len(), 2);

    let root = analysis.get("aaaa").unwrap();
    assert_eq!(root.title, "root");
    assert_eq!(root.config.get_f64("filtering", "area_um min"), Some(19.5));
    assert!(!root.config.contains("filtering", "area min"));
    assert_eq!(root.config.get_str("plotting", "axis x"), Some("area_um"));
    assert_eq!(root.config.get_str("plotting", "axis y"), Some("deform"));
    assert_eq!(root.config.get_f64("plotting", "kde accuracy area_um"), Some(10.0));
    // area_um 20..69
    assert_eq!(root.filtered_len(), 50);

    let child = analysis.get("bbbb").unwrap();
    assert_eq!(child.parent(), Some("aaaa"));
    assert_eq!(child.len(), 50);
    // deform 0.010..0.050
    assert_eq!(child.filtered_len(), 41);
    assert_eq!(child.config.get_f64("filtering", "deform max"), Some(0.0505));

    assert_eq!(legacy.resaved_version(&loaded), Version::current());
}

#[test]
fn test_0_7_5_chained_children() {
    let legacy = Legacy::new();
    let index = format!(
        "# Shape-Out measurement index\n# Software version 0.7.5\n\n\
         [1_aaaa]\nconfig = 1_aaaa/config.txt\n{}title = root\n\n\
         [2_bbbb]\nconfig = 2_bbbb/config.txt\ntitle = child\n\n\
         [3_cccc]\nconfig = 3_cccc/config.txt\ntitle = grandchild\n",
        legacy.root_fields()
    );
    let zmso = legacy.archive(
        &index,
        &[
            ("1_aaaa", "[filtering]\narea min = 19.5\narea max = 69.5\n"),
            ("2_bbbb", "[filtering]\nhierarchy parent = aaaa\ndefo max = 0.0505\n"),
            ("3_cccc", "[filtering]\nhierarchy parent = bbbb\narea max = 29.5\n"),
        ],
        None,
    );

    let loaded = legacy.load(&zmso).unwrap();
    let analysis = &loaded.analysis;
    assert_eq!(analysis.len(), 3);
    let grandchild = analysis.get("cccc").unwrap();
    assert_eq!(grandchild.parent(), Some("bbbb"));
    assert_eq!(grandchild.len(), 41);
    // area_um 20..29
    assert_eq!(grandchild.filtered_len(), 10);

    assert_eq!(legacy.resaved_version(&loaded), Version::current());
}

#[test]
fn test_single_orphan_attaches_to_preceding_child() {
    let legacy = Legacy::new();
    let index = format!(
        "# Shape-Out measurement index\n# Software version 0.7.2\n\n\
         [1_aaaa]\nconfig = 1_aaaa/config.txt\n{}title = root\n\n\
         [2_bbbb]\nconfig = 2_bbbb/config.txt\ntitle = child\n\n\
         [3_cccc]\nconfig = 3_cccc/config.txt\ntitle = orphan\n",
        legacy.root_fields()
    );
    let zmso = legacy.archive(
        &index,
        &[
            ("1_aaaa", "[filtering]\n"),
            ("2_bbbb", "[filtering]\nhierarchy parent = aaaa\n"),
            ("3_cccc", "[filtering]\nhierarchy parent = 0123abcd\n"),
        ],
        None,
    );
    let loaded = legacy.load(&zmso).unwrap();
    assert_eq!(loaded.analysis.get("cccc").unwrap().parent(), Some("bbbb"));
}

#[test]
fn test_several_orphans_are_unsupported() {
    let legacy = Legacy::new();
    let index = format!(
        "# Shape-Out measurement index\n# Software version 0.7.2\n\n\
         [1_aaaa]\nconfig = 1_aaaa/config.txt\n{}title = root\n\n\
         [2_bbbb]\nconfig = 2_bbbb/config.txt\ntitle = a\n\n\
         [3_cccc]\nconfig = 3_cccc/config.txt\ntitle = b\n",
        legacy.root_fields()
    );
    let zmso = legacy.archive(
        &index,
        &[
            ("1_aaaa", "[filtering]\n"),
            ("2_bbbb", "[filtering]\nhierarchy parent = zzzz\n"),
            ("3_cccc", "[filtering]\nhierarchy parent = yyyy\n"),
        ],
        None,
    );
    assert!(matches!(
        legacy.load(&zmso),
        Err(Error::DeepHierarchyUnsupported(2))
    ));
}

#[test]
fn test_0_7_3_polygon_axes_and_inert_ratio() {
    let legacy = Legacy::new();
    let index = format!(
        "# Shape-Out measurement index\n# Software version 0.7.3\n\n\
         [1_aaaa]\nconfig = 1_aaaa/config.txt\n{}title = root\n",
        legacy.root_fields()
    );
    let zmso = legacy.archive(
        &index,
        &[(
            "1_aaaa",
            "[filtering]\npolygon filters = [0]\ninertiaratio max = 2.0\n",
        )],
        Some(
            "[Polygon 00000000]\nX Axis = area\nY Axis = defo\nName = cells\nInverted = 0\n\
             point00000 = 0 -0.01\npoint00001 = 39.5 -0.01\npoint00002 = 39.5 0.1\npoint00003 = 0 0.1\n",
        ),
    );
    let registry = PolygonRegistry::shared();
    let loaded = load_session(&zmso, &legacy.loader, registry.clone(), &LoadOptions::default())
        .unwrap();

    let registry = registry.read().unwrap();
    assert_eq!(registry.len(), 1);
    let polygon = &registry.all()[0];
    assert_eq!(polygon.axes, ("area_um".to_string(), "deform".to_string()));

    let root = loaded.analysis.get("aaaa").unwrap();
    // inertiaratio -> inert_ratio (0.7.6) -> inert_ratio_cvx
    assert_eq!(root.config.get_f64("filtering", "inert_ratio_cvx max"), Some(2.0));
    // area_um 10..39 inside the polygon
    assert_eq!(root.filtered_len(), 30);
}
