//! End-to-end tests: source files on disk → loader → nested and flat outputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dl_core::{ColumnData, JaggedColumn};
use dl_loader::{
    CacheManager, Config, EVENT_INDEX_COLUMN, Error, FileOpener, HIT_COUNT, LoadOptions, Loaded,
    Loader, SourceOpener, TreeSource, get_awkward_arrays,
};
use dl_tree::MemoryTree;

const CONFIG: &str = r#"{
    "tree_name": "Events",
    "branches": {
        "event": ["EventID", "TotalEdep"],
        "crystal_hits": ["CrystalID", "CrystalEdep"],
        "primary_particles": ["PrimaryPDG", "PrimaryEnergy"]
    },
    "column_mapping": {
        "hits": {"CrystalID": "crystal_id", "CrystalEdep": "edep"},
        "primaries": {"PrimaryPDG": "pdg", "PrimaryEnergy": "energy"}
    },
    "particle_names": {"22": "gamma", "11": "e-", "-11": "e+"}
}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("dl_loader_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn config() -> Config {
    Config::from_json_str(CONFIG).unwrap()
}

/// Events with the given hit counts; every event has one primary.
fn tree_with_hits(counts: &[usize]) -> MemoryTree {
    let n = counts.len();
    let ids: Vec<Vec<i64>> =
        counts.iter().map(|&c| (0..c as i64).map(|i| 100 + i).collect()).collect();
    let edep: Vec<Vec<f64>> =
        counts.iter().map(|&c| (0..c).map(|i| 0.25 * (i + 1) as f64).collect()).collect();
    let pdg: Vec<Vec<i64>> = (0..n).map(|i| vec![[22, 11, -11][i % 3]]).collect();
    let energy: Vec<Vec<f64>> = (0..n).map(|i| vec![1.0 + i as f64]).collect();
    MemoryTree::new("Events", n)
        .with_scalar("EventID", ColumnData::Int((0..n as i64).collect()))
        .with_scalar(
            "TotalEdep",
            ColumnData::Float(edep.iter().map(|e| e.iter().sum()).collect()),
        )
        .with_jagged("CrystalID", JaggedColumn::from_i64_lists(&ids))
        .with_jagged("CrystalEdep", JaggedColumn::from_f64_lists(&edep))
        .with_jagged("PrimaryPDG", JaggedColumn::from_i64_lists(&pdg))
        .with_jagged("PrimaryEnergy", JaggedColumn::from_f64_lists(&energy))
}

fn write_source(dir: &Path, counts: &[usize]) -> PathBuf {
    let path = dir.join("res.parquet");
    tree_with_hits(counts).write_parquet(&path).unwrap();
    path
}

#[derive(Clone, Default)]
struct CountingOpener {
    opens: Arc<AtomicUsize>,
}

impl CountingOpener {
    fn count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SourceOpener for CountingOpener {
    fn open(&self, path: &Path) -> dl_loader::Result<Box<dyn TreeSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        FileOpener.open(path)
    }
}

#[test]
fn three_events_nested_and_flat() {
    init_tracing();
    let dir = tmp_dir("three");
    let path = write_source(&dir, &[2, 0, 3]);
    let loader = Loader::new(config()).unwrap();

    let nested = loader.load_awkward_only(&path).unwrap();
    assert_eq!(nested.n_events, 3);
    assert_eq!(nested.events.hit_counts(), &[2, 0, 3]);
    assert_eq!(nested.particle_names.resolve(22), "gamma");

    let (events, hits, primaries) = get_awkward_arrays(&nested.events).unwrap();
    assert_eq!(events.field_names(), vec!["EventID", "TotalEdep", HIT_COUNT, "PrimaryCount"]);
    assert_eq!(hits.total(), 5);
    assert_eq!(primaries.total(), 3);

    let loaded = loader.load_and_process_data(&path, LoadOptions::default()).unwrap();
    let Loaded::Full(full) = loaded else { panic!("expected the nested structure") };
    assert_eq!(full.n_events, 3);
    assert!(Arc::ptr_eq(&full.events, &nested.events));
    assert_eq!(full.hits.num_rows(), 5);
    assert_eq!(full.hits.event_index(), &[0, 0, 2, 2, 2]);
    assert_eq!(full.hits.column_names(), vec![EVENT_INDEX_COLUMN, "crystal_id", "edep"]);
    assert_eq!(full.primaries.column_names(), vec![EVENT_INDEX_COLUMN, "pdg", "energy"]);
    assert_eq!(full.primaries.event_index(), &[0, 1, 2]);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn tables_only_mode() {
    let dir = tmp_dir("tables");
    let path = write_source(&dir, &[1, 4, 0, 2]);
    let loader = Loader::new(config()).unwrap();

    let loaded = loader.load_and_process_data(&path, LoadOptions::tables_only()).unwrap();
    assert!(loaded.events().is_none());
    let Loaded::Tables(tables) = loaded else { panic!("expected tables only") };
    assert_eq!(tables.n_events, 4);
    assert_eq!(tables.hits.num_rows(), 7);
    assert_eq!(tables.hits.group_lengths(4), vec![1, 4, 0, 2]);
    assert_eq!(tables.primaries.num_rows(), 4);

    let again = loader.load_tables(&path).unwrap();
    assert_eq!(again.hits, tables.hits);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn cache_hit_skips_decoding() {
    let dir = tmp_dir("hit");
    let path = write_source(&dir, &[2, 0, 3]);
    let opener = CountingOpener::default();
    let loader = Loader::new(config()).unwrap().with_opener(opener.clone());

    let first = loader.load_awkward_only(&path).unwrap();
    let second = loader.load_awkward_only(&path).unwrap();
    assert!(Arc::ptr_eq(&first.events, &second.events));
    assert_eq!(opener.count(), 1);

    loader.load_and_process_data(&path, LoadOptions::default()).unwrap();
    assert_eq!(opener.count(), 1);

    loader.load_and_process_data(&path, LoadOptions::default().force_reload(true)).unwrap();
    assert_eq!(opener.count(), 2);

    loader.load_and_process_data(&path, LoadOptions::default().use_cache(false)).unwrap();
    assert_eq!(opener.count(), 3);

    let uncached = loader.clone().without_cache();
    uncached.load_awkward_only(&path).unwrap();
    uncached.load_awkward_only(&path).unwrap();
    assert_eq!(opener.count(), 5);

    let stats = loader.cache().unwrap().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.builds, 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn different_config_builds_separately() {
    let dir = tmp_dir("configs");
    let path = write_source(&dir, &[1, 1]);
    let cache = Arc::new(CacheManager::new());
    let opener = CountingOpener::default();

    let a = Loader::new(config()).unwrap().with_cache(cache.clone()).with_opener(opener.clone());
    let mut other = config();
    other.branches.event = vec!["TotalEdep".into()];
    let b = Loader::new(other).unwrap().with_cache(cache.clone()).with_opener(opener.clone());
    assert_ne!(a.fingerprint(), b.fingerprint());

    a.load_awkward_only(&path).unwrap();
    b.load_awkward_only(&path).unwrap();
    a.load_awkward_only(&path).unwrap();
    assert_eq!(opener.count(), 2);
    assert_eq!(cache.len(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn durable_store_survives_new_manager() {
    init_tracing();
    let dir = tmp_dir("durable");
    let path = write_source(&dir, &[2, 0, 3]);
    let store_dir = dir.join("cache");

    let first = CountingOpener::default();
    let cache = Arc::new(CacheManager::with_store(&store_dir).unwrap());
    let loader = Loader::new(config()).unwrap().with_cache(cache).with_opener(first.clone());
    let built = loader.load_awkward_only(&path).unwrap();
    assert_eq!(first.count(), 1);

    let second = CountingOpener::default();
    let cache = Arc::new(CacheManager::with_store(&store_dir).unwrap());
    let loader =
        Loader::new(config()).unwrap().with_cache(cache.clone()).with_opener(second.clone());
    let restored = loader.load_awkward_only(&path).unwrap();
    assert_eq!(second.count(), 0);
    assert_eq!(*restored.events, *built.events);
    assert_eq!(cache.stats().store_hits, 1);

    // A rewritten source no longer matches the stored stamp.
    write_source(&dir, &[1, 1, 1, 1]);
    let third = CountingOpener::default();
    let cache = Arc::new(CacheManager::with_store(&store_dir).unwrap());
    let loader = Loader::new(config()).unwrap().with_cache(cache).with_opener(third.clone());
    let rebuilt = loader.load_awkward_only(&path).unwrap();
    assert_eq!(third.count(), 1);
    assert_eq!(rebuilt.n_events, 4);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn concurrent_loads_decode_once() {
    let dir = tmp_dir("concurrent");
    let path = write_source(&dir, &[3, 1, 2]);
    let opener = CountingOpener::default();
    let loader = Loader::new(config()).unwrap().with_opener(opener.clone());

    let (loader, path) = (&loader, &path);
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> =
            (0..6).map(|_| s.spawn(move || loader.load_awkward_only(path).unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(opener.count(), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(&r.events, &results[0].events)));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn failed_build_leaves_cache_empty() {
    let dir = tmp_dir("failed");
    let path = dir.join("res.parquet");
    tree_with_hits(&[1, 2]).write_parquet(&path).unwrap();
    let mut cfg = config();
    cfg.branches.event.push("RunNumber".into());
    let loader = Loader::new(cfg).unwrap();

    let err = loader.load_awkward_only(&path).unwrap_err();
    assert!(matches!(err, Error::Schema(ref m) if m.contains("RunNumber")), "{err:?}");
    assert!(loader.cache().unwrap().is_empty());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn wrong_tree_name_is_schema_error() {
    let dir = tmp_dir("tree_name");
    let path = write_source(&dir, &[1]);
    let mut cfg = config();
    cfg.tree_name = "Hits".into();
    let err = Loader::new(cfg).unwrap().load_awkward_only(&path).unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "{err:?}");

    std::fs::remove_dir_all(&dir).ok();
}

/// Serves an already-decoded tree for any path, standing in for a ROOT reader.
struct DecodedTreeOpener(MemoryTree);

impl SourceOpener for DecodedTreeOpener {
    fn open(&self, _path: &Path) -> dl_loader::Result<Box<dyn TreeSource>> {
        Ok(Box::new(self.0.clone()))
    }
}

#[test]
fn root_input_needs_a_custom_opener() {
    let dir = tmp_dir("root");
    let path = dir.join("res.root");
    std::fs::write(&path, b"root").unwrap();

    let err = Loader::new(config()).unwrap().load_awkward_only(&path).unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "{err:?}");

    let loaded = Loader::new(config())
        .unwrap()
        .with_opener(DecodedTreeOpener(tree_with_hits(&[2, 0, 1])))
        .load_and_process_data(&path, LoadOptions::default())
        .unwrap();
    assert_eq!(loaded.n_events(), 3);
    assert_eq!(loaded.hits().event_index(), &[0, 0, 2]);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn arrow_ipc_source() {
    let dir = tmp_dir("ipc");
    let path = dir.join("res.arrow");
    tree_with_hits(&[0, 2]).write_ipc(&path).unwrap();

    let loaded = Loader::new(config())
        .unwrap()
        .load_and_process_data(&path, LoadOptions::default())
        .unwrap();
    assert_eq!(loaded.n_events(), 2);
    assert_eq!(loaded.hits().event_index(), &[1, 1]);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn config_file_round_trip() {
    let dir = tmp_dir("config_file");
    let config_path = dir.join("data_config.json");
    std::fs::write(&config_path, CONFIG).unwrap();
    let path = write_source(&dir, &[2]);

    let loader = Loader::from_config_path(Some(config_path.as_path())).unwrap();
    assert_eq!(loader.config(), &config());
    assert_eq!(loader.load_awkward_only(&path).unwrap().n_events, 1);

    let err = Loader::from_config_path(Some(dir.join("missing.json").as_path())).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn exported_tables_read_back() {
    let dir = tmp_dir("export");
    let path = write_source(&dir, &[2, 0, 3]);
    let loaded = Loader::new(config()).unwrap().load_tables(&path).unwrap();

    let named = loaded.primaries.with_particle_names("pdg", &loaded.particle_names).unwrap();
    let out = dir.join("primaries.parquet");
    named.write_parquet(&out).unwrap();

    let tree = dl_tree::BatchTree::open_parquet(&out).unwrap();
    assert_eq!(tree.batch().num_rows(), 3);
    assert_eq!(
        tree.batch().schema().fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>(),
        vec![EVENT_INDEX_COLUMN, "pdg", "energy", "particle_name"]
    );

    std::fs::remove_dir_all(&dir).ok();
}
