//! Flake registries.
//!
//! A registry maps flake references to flake references; keys are typically
//! aliases and values their redirection targets. Four registries are
//! consulted per evaluation, in lookup priority:
//! - Global registry: `<dataDir>/nix/flake-registry.json`
//! - User registry: `~/.config/nix/registry.json`
//! - Local (machine) registry: `/etc/nix/registry.json`
//! - Flag registry: `--override-flake` pairs, never persisted
//!
//! On disk a registry is `{"version":1,"flakes":{<ref>:{"uri":<ref>}}}`.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonjson;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flake_ref::FlakeRef;

/// An in-memory registry. Lookup is by structural equality of the key
/// reference; insertion order is irrelevant.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: HashMap<FlakeRef, FlakeRef>,
}

/// On-disk shape.
#[derive(Serialize, Deserialize)]
struct RegistryFile {
    version: u64,
    #[serde(default)]
    flakes: BTreeMap<String, RegistryTarget>,
}

#[derive(Serialize, Deserialize)]
struct RegistryTarget {
    uri: FlakeRef,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Read a registry file. A missing file yields an empty registry; a
    /// version other than 1 is an error naming the path.
    pub fn read(path: &Path) -> Result<Registry> {
        if !path.exists() {
            debug!(path = %path.display(), "no registry file, treating as empty");
            return Ok(Registry::new());
        }

        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let file: RegistryFile =
            serde_json::from_str(&content).map_err(|e| Error::json(path, e))?;

        if file.version != 1 {
            return Err(Error::VersionMismatch {
                path: path.to_path_buf(),
                version: file.version,
            });
        }

        let mut registry = Registry::new();
        for (key, target) in file.flakes {
            let from: FlakeRef = key.parse()?;
            registry.entries.insert(from, target.uri);
        }

        debug!(path = %path.display(), entries = registry.entries.len(), "loaded registry");
        Ok(registry)
    }

    /// Write the registry, creating parent directories. Keys are sorted so
    /// the output is byte-stable.
    pub fn write(&self, path: &Path) -> Result<()> {
        let flakes: BTreeMap<String, RegistryTarget> = self
            .entries
            .iter()
            .map(|(from, to)| (from.to_string(), RegistryTarget { uri: to.clone() }))
            .collect();

        let file = RegistryFile { version: 1, flakes };
        let contents = canonjson::to_canonical_string(&file).map_err(|e| Error::json(path, e))?;
        canonjson::write_atomic(path, &contents)
    }

    pub fn get(&self, key: &FlakeRef) -> Option<&FlakeRef> {
        self.entries.get(key)
    }

    pub fn set(&mut self, from: FlakeRef, to: FlakeRef) {
        self.entries.insert(from, to);
    }

    /// Returns true if the entry existed.
    pub fn remove(&mut self, key: &FlakeRef) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlakeRef, &FlakeRef)> {
        self.entries.iter()
    }
}

/// Path of the user registry: `$XDG_CONFIG_HOME/nix/registry.json`, falling
/// back to `~/.config`.
pub fn user_registry_path() -> PathBuf {
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(".config")
        });
    config_home.join("nix").join("registry.json")
}

/// Path of the global registry shipped under the data directory.
pub fn global_registry_path(config: &Config) -> PathBuf {
    config.data_dir.join("nix").join("flake-registry.json")
}

/// Path of the machine-local registry.
pub fn local_registry_path() -> PathBuf {
    PathBuf::from("/etc/nix/registry.json")
}

/// The registry stack assembled for one evaluation. Lookup priority is
/// global, user, local, flag; the first registry containing a key wins.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub global: Registry,
    pub user: Registry,
    pub local: Registry,
    pub flag: Registry,
}

impl Registries {
    /// Load the stack from disk. In pure mode the global, user and local
    /// registries are replaced by empty ones so that lookups can only
    /// resolve through explicit flags.
    pub fn load(config: &Config, pure: bool, flag: Registry) -> Result<Registries> {
        if pure {
            debug!("pure mode: ambient registries dropped");
            return Ok(Registries {
                flag,
                ..Registries::default()
            });
        }

        Ok(Registries {
            global: Registry::read(&global_registry_path(config))?,
            user: Registry::read(&user_registry_path())?,
            local: Registry::read(&local_registry_path())?,
            flag,
        })
    }

    /// Registries in lookup order.
    pub fn stack(&self) -> [&Registry; 4] {
        [&self.global, &self.user, &self.local, &self.flag]
    }
}
