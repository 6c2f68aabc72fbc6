//! End-to-end tests for the network LOS façade.
//!
//! Each test writes a small data directory (matrix files + zone CSVs),
//! builds settings pointing at it and walks the full load sequence.

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use travelsim::pipeline::{MemoryStore, ModelRegistry, Pipeline, RunContext, StepContext};
use travelsim::skim::{MatrixData, MatrixFile, MatrixFileStore};
use travelsim::{Error, LosStage, NetworkLos, Settings, SkimKey, Table};

// ============================================================================
// Helpers
// ============================================================================

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

/// Three TAZs, DIST and TIME by AM/PM, zone ids 1..=3.
fn write_skims(dir: &Path) {
    write_skims_from(dir, 0.0);
}

fn write_skims_from(dir: &Path, base: f32) {
    let cells = |offset: f32| MatrixData::Float32((0..9).map(|i| base + offset + i as f32).collect());
    MatrixFile::new("skims.omx", (3, 3))
        .with_matrix("DIST", cells(0.0))
        .unwrap()
        .with_matrix("TIME__AM", cells(10.0))
        .unwrap()
        .with_matrix("TIME__PM", cells(20.0))
        .unwrap()
        .with_mapping("zone_number", vec![1, 2, 3])
        .save(dir.join("skims.omx"))
        .unwrap();
}

fn write_two_zone_tables(dir: &Path) {
    write(dir, "maz_to_taz.csv", "MAZ,TAZ\n0,1\n1,1\n2,3\n");
    write(
        dir,
        "maz_to_maz_walk.csv",
        "OMAZ,DMAZ,DISTWALK\n0,1,0.5\n1,2,0.75\n2,0,1.25\n",
    );
    write(dir, "maz_to_maz_bike.csv", "OMAZ,DMAZ,DISTBIKE\n1,2,0.7\n2,2,0.1\n");
}

fn two_zone_settings(dir: &Path) -> serde_json::Value {
    json!({
        "network_los": {
            "zone_system": 2,
            "skims": { "taz": "skims.omx" },
            "tables": {
                "maz_to_taz": "maz_to_taz.csv",
                "maz_to_maz": ["maz_to_maz_walk.csv", "maz_to_maz_bike.csv"]
            }
        },
        "skim_time_periods": { "labels": ["AM", "PM"] },
        "data_dir": dir.to_str().unwrap(),
        "output_dir": dir.join("output").to_str().unwrap()
    })
}

fn build(settings: serde_json::Value) -> NetworkLos {
    let settings = Arc::new(Settings::from_json_value(settings).unwrap());
    let sources = MatrixFileStore::new(Arc::clone(&settings));
    NetworkLos::new(settings, Box::new(sources))
}

fn ready(settings: serde_json::Value) -> NetworkLos {
    let mut los = build(settings);
    los.read_los_settings().unwrap();
    los.load_skim_info().unwrap();
    los.load_all_tables().unwrap();
    los.load_all_skims().unwrap();
    los
}

fn two_zone_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_skims(dir.path());
    write_two_zone_tables(dir.path());
    dir
}

// ============================================================================
// 1. TWO_ZONE load and queries
// ============================================================================

#[test]
fn test_two_zone_full_load() {
    let dir = two_zone_dir();
    let los = ready(two_zone_settings(dir.path()));
    assert_eq!(los.stage(), LosStage::Ready);
    assert_eq!(los.skim_time_period_labels().unwrap(), &["AM".to_string(), "PM".to_string()]);

    // the file mapping translates zone ids 1..=3
    let time = los
        .skim_lookup("taz", &[1, 3], &[2, 3], &SkimKey::period("TIME", "PM"))
        .unwrap();
    assert_eq!(time, vec![21.0, 28.0]);
}

#[test]
fn test_mazpairs_synthetic_index() {
    let dir = two_zone_dir();
    let los = ready(two_zone_settings(dir.path()));

    let m2m = los.maz_to_maz().unwrap();
    assert_eq!(m2m.cardinality(), 3);
    // OMAZ=1, DMAZ=2 sits at 1*3 + 2
    let pos = m2m.position(5).unwrap();
    assert_eq!(los.get_mazpairs(&[1], &[2], "DISTWALK").unwrap(), vec![m2m.value_at(pos, "DISTWALK").unwrap()]);
    assert_eq!(los.get_mazpairs(&[1], &[2], "DISTWALK").unwrap(), vec![0.75]);
}

#[test]
fn test_mazpairs_matches_direct_lookup() {
    let dir = two_zone_dir();
    let los = ready(two_zone_settings(dir.path()));
    let m2m = los.maz_to_maz().unwrap();

    let pairs = [(0, 1), (1, 2), (2, 0), (2, 2)];
    let (o, d): (Vec<i64>, Vec<i64>) = pairs.iter().copied().unzip();
    for attr in ["DISTWALK", "DISTBIKE"] {
        let values = los.get_mazpairs(&o, &d, attr).unwrap();
        for ((oi, di), v) in pairs.iter().zip(&values) {
            let expected = m2m.value_at(m2m.position(oi * 3 + di).unwrap(), attr).unwrap();
            assert!(
                (v.is_nan() && expected.is_nan()) || *v == expected,
                "{attr} ({oi},{di}): {v} != {expected}"
            );
        }
    }

    // joined files: walk has no (2,2), bike has no (0,1)
    let bike = los.get_mazpairs(&[0, 2], &[1, 2], "DISTBIKE").unwrap();
    assert!(bike[0].is_nan());
    assert_eq!(bike[1], 0.1);
    // pair in neither file
    assert!(los.get_mazpairs(&[0], &[0], "DISTWALK").unwrap()[0].is_nan());
}

#[test]
fn test_mazpairs_outside_zone_range_are_nan() {
    let dir = two_zone_dir();
    let los = ready(two_zone_settings(dir.path()));
    // (0, 5) and (1, 3) share synthetic indexes with (1, 2) and (2, 0)
    let v = los.get_mazpairs(&[0, 1, -1, i64::MAX], &[5, 3, 2, 0], "DISTWALK").unwrap();
    assert!(v.iter().all(|x| x.is_nan()), "{v:?}");
}

#[test]
fn test_taz_for_maz() {
    let dir = two_zone_dir();
    let los = ready(two_zone_settings(dir.path()));
    assert_eq!(los.get_taz_for_maz(&[2, 0, 1]).unwrap(), vec![3, 1, 1]);
    assert!(matches!(los.get_taz_for_maz(&[9]), Err(Error::NotFound(_))));
}

#[test]
fn test_unknown_attribute() {
    let dir = two_zone_dir();
    let los = ready(two_zone_settings(dir.path()));
    assert!(matches!(los.get_mazpairs(&[1], &[2], "DISTDRIVE"), Err(Error::NotFound(_))));
}

// ============================================================================
// 2. Configuration failures
// ============================================================================

#[test]
fn test_missing_source_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_two_zone_tables(dir.path());
    let mut los = build(two_zone_settings(dir.path()));
    los.read_los_settings().unwrap();
    assert!(matches!(los.load_skim_info(), Err(Error::NotFound(_))));
}

#[test]
fn test_duplicate_maz_pair_is_fatal() {
    let dir = two_zone_dir();
    write(dir.path(), "maz_to_maz_walk.csv", "OMAZ,DMAZ,DISTWALK\n1,2,0.5\n1,2,0.6\n");
    let mut los = build(two_zone_settings(dir.path()));
    los.read_los_settings().unwrap();
    los.load_skim_info().unwrap();
    assert!(matches!(los.load_all_tables(), Err(Error::Table(_))));
}

// ============================================================================
// 3. Skim cache across runs
// ============================================================================

#[test]
fn test_write_then_read_skim_cache() {
    let dir = two_zone_dir();
    let cache_dir = dir.path().join("cache");

    let mut writer = two_zone_settings(dir.path());
    writer["write_skim_cache"] = json!(true);
    writer["skim_cache_dir"] = json!(cache_dir.to_str().unwrap());
    let first = ready(writer);
    assert!(cache_dir.join("cached_taz.mmap").exists());

    // same names and shape, different values: a cached run must not see them
    write_skims_from(dir.path(), 500.0);
    let mut reader = two_zone_settings(dir.path());
    reader["read_skim_cache"] = json!(true);
    reader["skim_cache_dir"] = json!(cache_dir.to_str().unwrap());
    let second = ready(reader);

    let key = SkimKey::scalar("DIST");
    let cached = second.skim_lookup("taz", &[1, 2, 3], &[3, 2, 1], &key).unwrap();
    assert_eq!(cached, first.skim_lookup("taz", &[1, 2, 3], &[3, 2, 1], &key).unwrap());
    assert_eq!(cached, vec![2.0, 4.0, 6.0]);

    let fresh = ready(two_zone_settings(dir.path()));
    assert_eq!(fresh.skim_lookup("taz", &[1], &[3], &key).unwrap(), vec![502.0]);
}

// ============================================================================
// 4. THREE_ZONE
// ============================================================================

#[test]
fn test_three_zone_maz_to_tap() {
    let dir = two_zone_dir();
    write(dir.path(), "maz_to_tap_walk.csv", "MAZ,TAP,walk_time\n0,10,2.0\n1,10,3.5\n2,11,1.5\n");
    let mut settings = two_zone_settings(dir.path());
    settings["network_los"]["zone_system"] = json!(3);
    settings["network_los"]["tables"]["maz_to_tap"] = json!("maz_to_tap_walk.csv");

    let los = ready(settings);
    let m2t = los.maz_to_tap().unwrap();
    assert_eq!(m2t.cardinality(), 12);
    assert_eq!(los.get_maztappairs(&[1, 2], &[10, 11], "walk_time").unwrap(), vec![3.5, 1.5]);
    assert!(los.get_maztappairs(&[2], &[10], "walk_time").unwrap()[0].is_nan());
}

#[test]
fn test_two_zone_has_no_tap_pairs() {
    let dir = two_zone_dir();
    let los = ready(two_zone_settings(dir.path()));
    assert!(matches!(los.get_maztappairs(&[1], &[10], "walk_time"), Err(Error::State(_))));
}

// ============================================================================
// 5. Shared buffers: one loader, many workers
// ============================================================================

#[test]
fn test_workers_attach_to_shared_buffers() {
    let dir = two_zone_dir();

    let mut loader = build(two_zone_settings(dir.path()));
    loader.read_los_settings().unwrap();
    loader.load_skim_info().unwrap();
    let mut shared = loader.allocate_shared_skim_buffers().unwrap();
    loader.load_shared_data(&mut shared).unwrap();

    let values: Vec<Vec<f64>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let settings = two_zone_settings(dir.path());
                s.spawn(move || {
                    let mut worker = build(settings);
                    worker.read_los_settings().unwrap();
                    worker.load_skim_info().unwrap();
                    worker.load_all_tables().unwrap();
                    worker.attach_shared_buffers(&shared).unwrap();
                    worker
                        .skim_lookup("taz", &[1, 2], &[1, 3], &SkimKey::period("TIME", "AM"))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for v in &values {
        assert_eq!(v, &vec![10.0, 15.0]);
    }
}

#[test]
fn test_attach_requires_loaded_tables() {
    let dir = two_zone_dir();
    let mut los = build(two_zone_settings(dir.path()));
    los.read_los_settings().unwrap();
    los.load_skim_info().unwrap();
    let shared = los.allocate_shared_skim_buffers().unwrap();
    assert!(matches!(los.attach_shared_buffers(&shared), Err(Error::State(_))));
}

// ============================================================================
// 6. Model steps reading the LOS through the run context
// ============================================================================

#[test]
fn test_step_reads_skims_from_context() {
    let dir = two_zone_dir();
    let settings = two_zone_settings(dir.path());
    let los = Arc::new(ready(settings.clone()));
    let context = RunContext::new(Arc::new(Settings::from_json_value(settings).unwrap())).with_los(los);

    let registry = ModelRegistry::new()
        .with_step("workplace_distance", |ctx: &mut StepContext<'_>| {
            let persons = Table::new("PERID", vec![1, 2])?
                .with_column("home_maz", vec![0i64, 2])?
                .with_column("work_maz", vec![1i64, 0])?;
            let home = persons.column("home_maz")?.as_int().unwrap_or_default().to_vec();
            let work = persons.column("work_maz")?.as_int().unwrap_or_default().to_vec();
            let los = ctx.los()?;
            let home_taz = los.get_taz_for_maz(&home)?;
            let work_taz = los.get_taz_for_maz(&work)?;
            let dist = los.skim_lookup("taz", &home_taz, &work_taz, &SkimKey::scalar("DIST"))?;
            let walk = los.get_mazpairs(&home, &work, "DISTWALK")?;
            let persons = persons
                .with_column("work_dist", dist)?
                .with_column("walk_dist", walk)?;
            ctx.add_table("persons", persons)
        })
        .unwrap();

    let mut pipeline = Pipeline::new(MemoryStore::new(), registry, context);
    pipeline.run(&["workplace_distance"], None).unwrap();
    let persons = pipeline.get_table("persons", None).unwrap();
    // MAZ 0 → TAZ 1, MAZ 1 → TAZ 1; MAZ 2 → TAZ 3, MAZ 0 → TAZ 1
    assert_eq!(persons.column("work_dist").unwrap().as_float().unwrap(), &[0.0, 6.0]);
    assert_eq!(persons.column("walk_dist").unwrap().as_float().unwrap(), &[0.5, 1.25]);
}
