//! Loader configuration: tree name, branch groups, column renames, particle names.
//!
//! ```json
//! {
//!   "tree_name": "Events",
//!   "branches": {
//!     "event": ["EventID", "TotalEdep"],
//!     "crystal_hits": ["CrystalID", "CrystalEdep"],
//!     "primary_particles": ["PrimaryPDG", "PrimaryEnergy"]
//!   },
//!   "column_mapping": {
//!     "hits": {"CrystalID": "crystal_id", "CrystalEdep": "edep"},
//!     "primaries": {"PrimaryPDG": "pdg", "PrimaryEnergy": "energy"}
//!   },
//!   "particle_names": {"22": "gamma", "11": "e-", "-11": "e+"}
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use dl_core::{Error, Result};

use crate::event_tree::{HIT_COUNT, PRIMARY_COUNT};

/// Primary branch holding the particle code when `particle_code_branch` is not set.
pub const DEFAULT_PARTICLE_CODE_BRANCH: &str = "PrimaryPDG";

/// Mixed into every fingerprint; bump when the built structure changes shape.
const FINGERPRINT_SALT: &str = "dl-event-tree-v1";

/// Branch groups read from the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchGroups {
    /// Per-event scalar branches.
    #[serde(default)]
    pub event: Vec<String>,
    /// Per-hit branches (one list per event).
    pub crystal_hits: Vec<String>,
    /// Per-primary branches (one list per event).
    pub primary_particles: Vec<String>,
}

/// Raw branch name → output column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(BTreeMap<String, String>);

impl ColumnMapping {
    /// Build from `(raw, output)` pairs.
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Renamed output name, if `raw` is mapped.
    pub fn get(&self, raw: &str) -> Option<&str> {
        self.0.get(raw).map(String::as_str)
    }

    /// Output name for `raw`: the mapped name, or `raw` itself.
    pub fn output_name<'a>(&'a self, raw: &'a str) -> &'a str {
        self.get(raw).unwrap_or(raw)
    }

    /// Iterate `(raw, output)` pairs in raw-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of renames.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no renames are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Renames for each flattened table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMappings {
    /// Hit table renames.
    pub hits: ColumnMapping,
    /// Primary table renames.
    pub primaries: ColumnMapping,
}

/// Validated loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the tree holding one entry per event.
    pub tree_name: String,
    /// Branch groups.
    pub branches: BranchGroups,
    /// Column renames applied when flattening.
    pub column_mapping: ColumnMappings,
    /// PDG code (as a decimal string) → display name.
    pub particle_names: BTreeMap<String, String>,
    /// Primary branch holding the PDG code (default: `PrimaryPDG` if configured).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub particle_code_branch: Option<String>,
}

/// Load and validate a configuration file; `None` reads [`Config::DEFAULT_PATH`].
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::from_path(path.unwrap_or_else(|| Path::new(Config::DEFAULT_PATH)))
}

impl Config {
    /// Configuration file read when no path is given.
    pub const DEFAULT_PATH: &'static str = "data_config.json";

    /// Read and validate a JSON (default) or YAML (`.yaml` / `.yml`) file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let config: Config = if is_yaml {
            serde_yaml_ng::from_slice(&bytes)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        };
        config.validate()?;
        tracing::debug!(path = %path.display(), tree = %config.tree_name, "config loaded");
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Deserialize and validate an in-memory JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Config = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every structural requirement; the first violation is returned.
    pub fn validate(&self) -> Result<()> {
        if self.tree_name.trim().is_empty() {
            return Err(Error::Config("tree_name must be non-empty".into()));
        }
        if self.branches.crystal_hits.is_empty() {
            return Err(Error::Config("branches.crystal_hits must list at least one branch".into()));
        }
        if self.branches.primary_particles.is_empty() {
            return Err(Error::Config(
                "branches.primary_particles must list at least one branch".into(),
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (group, names) in self.groups() {
            for name in names {
                if name.trim().is_empty() {
                    return Err(Error::Config(format!("branches.{group} contains an empty name")));
                }
                if !seen.insert(name) {
                    return Err(Error::Config(format!(
                        "branch '{name}' is listed more than once (in branches.{group})"
                    )));
                }
                if group != "event" && (name == HIT_COUNT || name == PRIMARY_COUNT) {
                    return Err(Error::Config(format!(
                        "'{name}' is a derived event field and cannot be a branches.{group} entry"
                    )));
                }
            }
        }

        for (kind, mapping) in
            [("hits", &self.column_mapping.hits), ("primaries", &self.column_mapping.primaries)]
        {
            let mut targets: HashSet<&str> = HashSet::new();
            for (raw, out) in mapping.iter() {
                if out.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "column_mapping.{kind}: '{raw}' maps to an empty name"
                    )));
                }
                if !targets.insert(out) {
                    return Err(Error::Config(format!(
                        "column_mapping.{kind}: target '{out}' is used more than once"
                    )));
                }
            }
        }

        let mut codes = HashSet::new();
        for code in self.particle_names.keys() {
            let Ok(parsed) = code.trim().parse::<i64>() else {
                return Err(Error::Config(format!(
                    "particle_names key '{code}' is not an integer PDG code"
                )));
            };
            if !codes.insert(parsed) {
                return Err(Error::Config(format!(
                    "particle_names lists PDG code {parsed} more than once (key '{code}')"
                )));
            }
        }

        if let Some(branch) = &self.particle_code_branch {
            if !self.branches.primary_particles.contains(branch) {
                return Err(Error::Config(format!(
                    "particle_code_branch '{branch}' is not listed in branches.primary_particles"
                )));
            }
        }
        Ok(())
    }

    /// `(group name, branches)` for every group, event group first.
    pub fn groups(&self) -> [(&'static str, &[String]); 3] {
        [
            ("event", self.branches.event.as_slice()),
            ("crystal_hits", self.branches.crystal_hits.as_slice()),
            ("primary_particles", self.branches.primary_particles.as_slice()),
        ]
    }

    /// Primary branch carrying particle codes, if any.
    pub fn particle_code_branch(&self) -> Option<&str> {
        match &self.particle_code_branch {
            Some(branch) => Some(branch.as_str()),
            None => self
                .branches
                .primary_particles
                .iter()
                .find(|b| *b == DEFAULT_PARTICLE_CODE_BRANCH)
                .map(String::as_str),
        }
    }

    /// SHA-256 hex digest of the canonical JSON form of this configuration.
    ///
    /// Maps serialize in key order, so equal configurations always produce
    /// equal fingerprints regardless of the source document's key order.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)
            .map_err(|e| Error::Config(format!("cannot serialize config: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_SALT.as_bytes());
        hasher.update(&canonical);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "tree_name": "Events",
        "branches": {
            "event": ["TotalEdep"],
            "crystal_hits": ["CrystalID", "CrystalEdep"],
            "primary_particles": ["PrimaryPDG", "PrimaryEnergy"]
        },
        "column_mapping": {
            "hits": {"CrystalID": "crystal_id", "CrystalEdep": "edep"},
            "primaries": {"PrimaryPDG": "pdg", "PrimaryEnergy": "energy"}
        },
        "particle_names": {"22": "gamma", "11": "e-", "-11": "e+"}
    }"#;

    pub(crate) fn sample() -> Config {
        Config::from_json_str(SAMPLE).unwrap()
    }

    fn with(edit: impl FnOnce(&mut serde_json::Value)) -> Result<Config> {
        let mut v: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        edit(&mut v);
        Config::from_value(v)
    }

    #[test]
    fn parses_sample() {
        let c = sample();
        assert_eq!(c.tree_name, "Events");
        assert_eq!(c.branches.crystal_hits, vec!["CrystalID", "CrystalEdep"]);
        assert_eq!(c.column_mapping.hits.output_name("CrystalEdep"), "edep");
        assert_eq!(c.column_mapping.hits.output_name("Unmapped"), "Unmapped");
        assert_eq!(c.particle_code_branch(), Some("PrimaryPDG"));
    }

    #[test]
    fn event_group_is_optional() {
        let c = with(|v| {
            v["branches"].as_object_mut().unwrap().remove("event");
        })
        .unwrap();
        assert!(c.branches.event.is_empty());
    }

    #[test]
    fn missing_required_key_is_config_error() {
        for key in ["tree_name", "branches", "column_mapping", "particle_names"] {
            let err = with(|v| {
                v.as_object_mut().unwrap().remove(key);
            })
            .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{key}: {err:?}");
        }
        let err = with(|v| {
            v["column_mapping"].as_object_mut().unwrap().remove("primaries");
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_empty_groups_and_tree_name() {
        assert!(with(|v| v["tree_name"] = "  ".into()).is_err());
        assert!(with(|v| v["branches"]["crystal_hits"] = serde_json::json!([])).is_err());
        assert!(with(|v| v["branches"]["primary_particles"] = serde_json::json!([])).is_err());
    }

    #[test]
    fn rejects_duplicate_branches_and_targets() {
        let err = with(|v| v["branches"]["event"] = serde_json::json!(["CrystalID"])).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("CrystalID")), "{err:?}");

        let err = with(|v| v["column_mapping"]["hits"]["CrystalID"] = "edep".into()).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("edep")), "{err:?}");
    }

    #[test]
    fn rejects_derived_names_in_collections() {
        let err = with(|v| v["branches"]["crystal_hits"] = serde_json::json!(["HitCount"]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(with(|v| v["branches"]["event"] = serde_json::json!(["HitCount"])).is_ok());
    }

    #[test]
    fn rejects_non_integer_pdg_key() {
        let err = with(|v| v["particle_names"]["photon"] = "gamma".into()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_pdg_keys_equal_after_trimming() {
        let err = with(|v| v["particle_names"][" 22"] = "photon".into()).unwrap_err();
        assert!(matches!(&err, Error::Config(m) if m.contains("22")), "{err:?}");
        let err = with(|v| v["particle_names"]["+11"] = "electron".into()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn particle_code_branch_must_be_primary() {
        assert!(with(|v| v["particle_code_branch"] = "CrystalID".into()).is_err());
        let c = with(|v| v["particle_code_branch"] = "PrimaryEnergy".into()).unwrap();
        assert_eq!(c.particle_code_branch(), Some("PrimaryEnergy"));
    }

    #[test]
    fn fingerprint_ignores_key_order_but_tracks_content() {
        let a = sample();
        let reordered = r#"{
            "particle_names": {"-11": "e+", "22": "gamma", "11": "e-"},
            "column_mapping": {
                "primaries": {"PrimaryEnergy": "energy", "PrimaryPDG": "pdg"},
                "hits": {"CrystalEdep": "edep", "CrystalID": "crystal_id"}
            },
            "branches": {
                "primary_particles": ["PrimaryPDG", "PrimaryEnergy"],
                "crystal_hits": ["CrystalID", "CrystalEdep"],
                "event": ["TotalEdep"]
            },
            "tree_name": "Events"
        }"#;
        let b = Config::from_json_str(reordered).unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let c = with(|v| v["column_mapping"]["hits"]["CrystalEdep"] = "energy".into()).unwrap();
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn loads_yaml_and_missing_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("dl_config_{}.yaml", std::process::id()));
        let yaml = "tree_name: Events\n\
                    branches:\n  crystal_hits: [CrystalEdep]\n  primary_particles: [PrimaryPDG]\n\
                    column_mapping:\n  hits: {CrystalEdep: edep}\n  primaries: {}\n\
                    particle_names: {\"22\": gamma}\n";
        std::fs::write(&path, yaml).unwrap();
        let c = load_config(Some(path.as_path())).unwrap();
        assert_eq!(c.branches.crystal_hits, vec!["CrystalEdep"]);
        assert_eq!(c.particle_names.get("22").map(String::as_str), Some("gamma"));
        std::fs::remove_file(&path).ok();

        let err = load_config(Some(Path::new("/no/such/data_config.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
