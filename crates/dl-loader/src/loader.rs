//! Loader facade: config → cache → reader → builder → flattener.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use dl_core::{Error, Result};
use dl_tree::{TreeSource, open_source, read_branches};

use crate::cache::{CacheKey, CacheManager};
use crate::config::{Config, load_config};
use crate::event_tree::{EventTree, build};
use crate::flatten::{FlatTable, TableKind, flatten};
use crate::particles::ParticleNameMap;

/// Opens a source file as a [`TreeSource`].
///
/// Implement this to plug in another decoder (a native ROOT reader, a test
/// double counting opens, ...).
pub trait SourceOpener: Send + Sync {
    /// Open `path`.
    fn open(&self, path: &Path) -> Result<Box<dyn TreeSource>>;
}

/// Default opener: Parquet or Arrow IPC chosen by file extension.
///
/// ROOT files are not decoded here: a `.root` path fails with
/// [`Error::Decode`]. To load ROOT input directly, install a
/// [`SourceOpener`] with [`Loader::with_opener`] that wraps a ROOT branch
/// reader (for instance one built on `ns-root`'s `RootFile::branch_reader`)
/// and exposes its branches as a [`TreeSource`], or convert the file to
/// Parquet beforehand.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener;

impl SourceOpener for FileOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn TreeSource>> {
        open_source(path)
    }
}

/// Options for [`Loader::load_and_process_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Serve and store the nested structure through the cache.
    pub use_cache: bool,
    /// Rebuild even if a cache entry exists.
    pub force_reload: bool,
    /// Include the nested structure in the result.
    pub return_awkward: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { use_cache: true, force_reload: false, return_awkward: true }
    }
}

impl LoadOptions {
    /// Flat tables only (`return_awkward = false`).
    pub fn tables_only() -> Self {
        Self { return_awkward: false, ..Self::default() }
    }

    /// Set `use_cache`.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Set `force_reload`.
    pub fn force_reload(mut self, force_reload: bool) -> Self {
        self.force_reload = force_reload;
        self
    }
}

/// Nested structure, both flat tables, and the particle names.
#[derive(Debug, Clone)]
pub struct FullLoad {
    /// Nested event structure.
    pub events: Arc<EventTree>,
    /// One row per hit.
    pub hits: FlatTable,
    /// One row per primary.
    pub primaries: FlatTable,
    /// PDG code → display name.
    pub particle_names: Arc<ParticleNameMap>,
    /// Number of events.
    pub n_events: usize,
}

/// Both flat tables and the particle names.
#[derive(Debug, Clone)]
pub struct TableLoad {
    /// One row per hit.
    pub hits: FlatTable,
    /// One row per primary.
    pub primaries: FlatTable,
    /// PDG code → display name.
    pub particle_names: Arc<ParticleNameMap>,
    /// Number of events.
    pub n_events: usize,
}

/// Nested structure only.
#[derive(Debug, Clone)]
pub struct NestedLoad {
    /// Nested event structure.
    pub events: Arc<EventTree>,
    /// PDG code → display name.
    pub particle_names: Arc<ParticleNameMap>,
    /// Number of events.
    pub n_events: usize,
}

/// Result of [`Loader::load_and_process_data`]; the variant follows `return_awkward`.
#[derive(Debug, Clone)]
pub enum Loaded {
    /// `return_awkward = true`.
    Full(FullLoad),
    /// `return_awkward = false`.
    Tables(TableLoad),
}

impl Loaded {
    /// Number of events.
    pub fn n_events(&self) -> usize {
        match self {
            Loaded::Full(l) => l.n_events,
            Loaded::Tables(l) => l.n_events,
        }
    }

    /// Hit table.
    pub fn hits(&self) -> &FlatTable {
        match self {
            Loaded::Full(l) => &l.hits,
            Loaded::Tables(l) => &l.hits,
        }
    }

    /// Primary table.
    pub fn primaries(&self) -> &FlatTable {
        match self {
            Loaded::Full(l) => &l.primaries,
            Loaded::Tables(l) => &l.primaries,
        }
    }

    /// Nested structure, when it was requested.
    pub fn events(&self) -> Option<&Arc<EventTree>> {
        match self {
            Loaded::Full(l) => Some(&l.events),
            Loaded::Tables(_) => None,
        }
    }

    /// Particle names.
    pub fn particle_names(&self) -> &ParticleNameMap {
        match self {
            Loaded::Full(l) => &l.particle_names,
            Loaded::Tables(l) => &l.particle_names,
        }
    }
}

/// Entry point tying configuration, cache and source decoding together.
///
/// Cheap to clone; clones share the configuration and the cache.
#[derive(Clone)]
pub struct Loader {
    config: Arc<Config>,
    particle_names: Arc<ParticleNameMap>,
    fingerprint: String,
    cache: Option<Arc<CacheManager>>,
    opener: Arc<dyn SourceOpener>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("tree_name", &self.config.tree_name)
            .field("fingerprint", &self.fingerprint)
            .field("cache", &self.cache.as_ref().map(|c| c.stats()))
            .finish_non_exhaustive()
    }
}

impl Loader {
    /// Loader for `config` with a private in-memory cache.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let particle_names = Arc::new(ParticleNameMap::from_config(&config)?);
        let fingerprint = config.fingerprint()?;
        Ok(Self {
            config: Arc::new(config),
            particle_names,
            fingerprint,
            cache: Some(Arc::new(CacheManager::new())),
            opener: Arc::new(FileOpener),
        })
    }

    /// Loader for the configuration file at `path` (default `data_config.json`).
    pub fn from_config_path(path: Option<&Path>) -> Result<Self> {
        Self::new(load_config(path)?)
    }

    /// Use `cache`, possibly shared with other loaders.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Disable caching; every load decodes the source.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Open sources through `opener`.
    pub fn with_opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configuration fingerprint used in cache keys.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Particle names parsed from the configuration.
    pub fn particle_names(&self) -> &Arc<ParticleNameMap> {
        &self.particle_names
    }

    /// Cache in use, if any.
    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    /// Full pipeline: nested structure plus flat hit and primary tables.
    pub fn load_and_process_data(&self, path: impl AsRef<Path>, options: LoadOptions) -> Result<Loaded> {
        let path = path.as_ref();
        let events = self.event_tree(path, options.use_cache, options.force_reload)?;
        let hits = flatten(&events, &self.config.column_mapping.hits, TableKind::Hits)?;
        let primaries =
            flatten(&events, &self.config.column_mapping.primaries, TableKind::Primaries)?;
        let n_events = events.n_events();
        let particle_names = Arc::clone(&self.particle_names);

        tracing::info!(
            path = %path.display(),
            n_events,
            hits = hits.num_rows(),
            primaries = primaries.num_rows(),
            return_awkward = options.return_awkward,
            "data processed"
        );
        Ok(if options.return_awkward {
            Loaded::Full(FullLoad { events, hits, primaries, particle_names, n_events })
        } else {
            Loaded::Tables(TableLoad { hits, primaries, particle_names, n_events })
        })
    }

    /// Flat tables only (the `return_awkward = false` mode with default cache options).
    pub fn load_tables(&self, path: impl AsRef<Path>) -> Result<TableLoad> {
        match self.load_and_process_data(path, LoadOptions::tables_only())? {
            Loaded::Tables(tables) => Ok(tables),
            Loaded::Full(full) => Ok(TableLoad {
                hits: full.hits,
                primaries: full.primaries,
                particle_names: full.particle_names,
                n_events: full.n_events,
            }),
        }
    }

    /// Nested structure only; never flattens.
    pub fn load_awkward_only(&self, path: impl AsRef<Path>) -> Result<NestedLoad> {
        let events = self.event_tree(path.as_ref(), true, false)?;
        Ok(NestedLoad {
            n_events: events.n_events(),
            events,
            particle_names: Arc::clone(&self.particle_names),
        })
    }

    /// Nested structure for `path`, from the cache when allowed.
    pub fn event_tree(&self, path: &Path, use_cache: bool, force_reload: bool) -> Result<Arc<EventTree>> {
        match (&self.cache, use_cache) {
            (Some(cache), true) => {
                let key = CacheKey::new(path, self.fingerprint.as_str())?;
                cache.get_or_build(&key, force_reload, || self.build_tree(path))
            }
            _ => {
                if !path.exists() {
                    return Err(Error::SourceNotFound(path.to_path_buf()));
                }
                self.build_tree(path).map(Arc::new)
            }
        }
    }

    fn build_tree(&self, path: &Path) -> Result<EventTree> {
        let start = Instant::now();
        let source = self.opener.open(path)?;
        let tree_name = self.config.tree_name.as_str();
        let branches = &self.config.branches;

        let raw_event = read_branches(source.as_ref(), tree_name, &branches.event)?;
        let raw_hits = read_branches(source.as_ref(), tree_name, &branches.crystal_hits)?;
        let raw_primaries = read_branches(source.as_ref(), tree_name, &branches.primary_particles)?;
        let tree = build(raw_event, raw_hits, raw_primaries, &self.config)?;

        tracing::info!(
            path = %path.display(),
            tree = tree_name,
            n_events = tree.n_events(),
            hits = tree.hits().len(),
            primaries = tree.primaries().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "event tree built"
        );
        Ok(tree)
    }
}
