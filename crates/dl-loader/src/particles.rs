//! PDG particle code → display name lookup.

use std::borrow::Cow;
use std::collections::BTreeMap;

use dl_core::{Error, Result};

use crate::config::Config;

/// Read-only lookup from integer particle code to display name.
///
/// Codes missing from the map resolve to their decimal representation, so
/// presentation code never fails on an unexpected particle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticleNameMap {
    names: BTreeMap<i64, String>,
}

impl ParticleNameMap {
    /// Parse the string-keyed `particle_names` table of a configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_string_keys(config.particle_names.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Parse `(decimal code, name)` pairs.
    pub fn from_string_keys<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut names = BTreeMap::new();
        for (code, name) in pairs {
            let parsed = code.trim().parse::<i64>().map_err(|_| {
                Error::Config(format!("particle_names key '{code}' is not an integer PDG code"))
            })?;
            if names.insert(parsed, name.to_string()).is_some() {
                return Err(Error::Config(format!(
                    "particle_names lists PDG code {parsed} more than once (key '{code}')"
                )));
            }
        }
        Ok(Self { names })
    }

    /// Configured name for `code`.
    pub fn get(&self, code: i64) -> Option<&str> {
        self.names.get(&code).map(String::as_str)
    }

    /// Name for `code`, or the code itself as a decimal string.
    pub fn resolve(&self, code: i64) -> Cow<'_, str> {
        match self.names.get(&code) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(code.to_string()),
        }
    }

    /// Iterate `(code, name)` in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.names.iter().map(|(&k, v)| (k, v.as_str()))
    }

    /// Number of known codes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no codes are known.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_and_unknown_codes() {
        let map = ParticleNameMap::from_string_keys([("22", "gamma"), ("-11", "e+"), (" 2212", "proton")])
            .unwrap();
        assert_eq!(map.get(22), Some("gamma"));
        assert_eq!(map.resolve(-11), "e+");
        assert_eq!(map.resolve(2212), "proton");
        assert_eq!(map.resolve(1000020040), "1000020040");
        assert!(matches!(map.resolve(13), Cow::Owned(_)));
        assert_eq!(map.iter().map(|(c, _)| c).collect::<Vec<_>>(), vec![-11, 22, 2212]);
    }

    #[test]
    fn rejects_non_numeric_code() {
        assert!(matches!(
            ParticleNameMap::from_string_keys([("gamma", "22")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_codes_that_collide_after_trimming() {
        let err = ParticleNameMap::from_string_keys([("22", "gamma"), (" 22", "photon")]).unwrap_err();
        assert!(matches!(&err, Error::Config(m) if m.contains("22")), "{err:?}");
    }
}
