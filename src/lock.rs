//! Lock-file reading and writing.
//!
//! A lock file pins the resolved dependency closure of one flake:
//!
//! ```json
//! {
//!     "version": 1,
//!     "nonFlakeRequires": { "<alias>": { "uri": "<ref>" } },
//!     "requires": {
//!         "<id>": {
//!             "uri": "<ref>",
//!             "nonFlakeRequires": { ... },
//!             "requires": { ... }
//!         }
//!     }
//! }
//! ```
//!
//! Every `uri` must be immutable; a lock file carrying a mutable reference
//! is rejected on read. Output is 4-space indented with sorted keys, so
//! re-serialization is byte-stable, and the file is replaced atomically.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::canonjson;
use crate::error::{Error, Result};
use crate::flake::{Dependencies, Resolver};
use crate::flake_ref::FlakeRef;

/// The pinned closure below one flake.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LockFile {
    pub flake_entries: BTreeMap<String, FlakeEntry>,
    pub non_flake_entries: BTreeMap<String, FlakeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlakeEntry {
    pub flake_ref: FlakeRef,
    pub flake_entries: BTreeMap<String, FlakeEntry>,
    pub non_flake_entries: BTreeMap<String, FlakeRef>,
}

/// On-disk shapes. `uri` strings are kept verbatim here; immutability is
/// checked when converting to the in-memory form.
#[derive(Serialize, Deserialize)]
struct LockFileJson {
    version: u64,
    #[serde(rename = "nonFlakeRequires", default)]
    non_flake_requires: BTreeMap<String, UriJson>,
    #[serde(default)]
    requires: BTreeMap<String, EntryJson>,
}

#[derive(Serialize, Deserialize)]
struct UriJson {
    uri: FlakeRef,
}

#[derive(Serialize, Deserialize)]
struct EntryJson {
    uri: FlakeRef,
    #[serde(rename = "nonFlakeRequires", default)]
    non_flake_requires: BTreeMap<String, UriJson>,
    #[serde(default)]
    requires: BTreeMap<String, EntryJson>,
}

fn require_immutable(path: &Path, reference: &FlakeRef) -> Result<()> {
    if reference.is_immutable() {
        Ok(())
    } else {
        Err(Error::MutableLockEntry {
            path: path.to_path_buf(),
            reference: reference.to_string(),
        })
    }
}

fn entry_from_json(path: &Path, json: EntryJson) -> Result<FlakeEntry> {
    require_immutable(path, &json.uri)?;

    let mut non_flake_entries = BTreeMap::new();
    for (alias, target) in json.non_flake_requires {
        require_immutable(path, &target.uri)?;
        non_flake_entries.insert(alias, target.uri);
    }

    let mut flake_entries = BTreeMap::new();
    for (id, sub) in json.requires {
        flake_entries.insert(id, entry_from_json(path, sub)?);
    }

    Ok(FlakeEntry {
        flake_ref: json.uri,
        flake_entries,
        non_flake_entries,
    })
}

fn entry_to_json(entry: &FlakeEntry) -> EntryJson {
    EntryJson {
        uri: entry.flake_ref.clone(),
        non_flake_requires: entry
            .non_flake_entries
            .iter()
            .map(|(alias, target)| (alias.clone(), UriJson { uri: target.clone() }))
            .collect(),
        requires: entry
            .flake_entries
            .iter()
            .map(|(id, sub)| (id.clone(), entry_to_json(sub)))
            .collect(),
    }
}

impl LockFile {
    /// Read a lock file. A missing file yields an empty lock; a version
    /// other than 1 or a mutable pin is an error naming the path.
    pub fn read(path: &Path) -> Result<LockFile> {
        if !path.exists() {
            debug!(path = %path.display(), "no lock file, treating as empty");
            return Ok(LockFile::default());
        }

        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let json: LockFileJson =
            serde_json::from_str(&content).map_err(|e| Error::json(path, e))?;

        if json.version != 1 {
            return Err(Error::VersionMismatch {
                path: path.to_path_buf(),
                version: json.version,
            });
        }

        let mut lock = LockFile::default();
        for (alias, target) in json.non_flake_requires {
            require_immutable(path, &target.uri)?;
            lock.non_flake_entries.insert(alias, target.uri);
        }
        for (id, entry) in json.requires {
            lock.flake_entries.insert(id, entry_from_json(path, entry)?);
        }

        debug!(path = %path.display(), entries = lock.flake_entries.len(), "loaded lock file");
        Ok(lock)
    }

    /// Write the lock file atomically, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = LockFileJson {
            version: 1,
            non_flake_requires: self
                .non_flake_entries
                .iter()
                .map(|(alias, target)| (alias.clone(), UriJson { uri: target.clone() }))
                .collect(),
            requires: self
                .flake_entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry_to_json(entry)))
                .collect(),
        };

        let contents = canonjson::to_canonical_string(&json).map_err(|e| Error::json(path, e))?;
        canonjson::write_atomic(path, &contents)?;
        debug!(path = %path.display(), "wrote lock file");
        Ok(())
    }

    /// Build a lock file from a resolved dependency tree, keyed at each
    /// level by the child flake's id or the non-flake's alias.
    pub fn from_dependencies(deps: &Dependencies) -> LockFile {
        let mut lock = LockFile::default();
        for non_flake in &deps.non_flake_deps {
            lock.non_flake_entries
                .insert(non_flake.alias.clone(), non_flake.flake_ref.clone());
        }
        for sub in &deps.flake_deps {
            lock.flake_entries
                .insert(sub.flake.id.clone(), lock_entry(sub));
        }
        lock
    }

    pub fn is_empty(&self) -> bool {
        self.flake_entries.is_empty() && self.non_flake_entries.is_empty()
    }
}

fn lock_entry(deps: &Dependencies) -> FlakeEntry {
    let mut entry = FlakeEntry {
        flake_ref: deps.flake.flake_ref.clone(),
        flake_entries: BTreeMap::new(),
        non_flake_entries: BTreeMap::new(),
    };
    for non_flake in &deps.non_flake_deps {
        entry
            .non_flake_entries
            .insert(non_flake.alias.clone(), non_flake.flake_ref.clone());
    }
    for sub in &deps.flake_deps {
        entry
            .flake_entries
            .insert(sub.flake.id.clone(), lock_entry(sub));
    }
    entry
}

/// Re-resolve a local flake and replace its `flake.lock`.
///
/// Only local roots make sense here: re-locking somebody's GitHub archive or
/// an alias would write the result next to nothing the user controls.
#[instrument(level = "debug", skip(resolver))]
pub fn update_lock_file(resolver: &Resolver<'_>, uri: &str) -> Result<PathBuf> {
    let reference: FlakeRef = uri.parse()?;

    let flake_dir = match &reference {
        FlakeRef::Path { path, .. } => PathBuf::from(path),
        FlakeRef::Git { url, .. } => match url.strip_prefix("file://") {
            Some(path) => PathBuf::from(path),
            None => {
                return Err(Error::Usage(format!(
                    "cannot update the lock file of non-local flake '{}'",
                    reference
                )))
            }
        },
        _ => {
            return Err(Error::Usage(format!(
                "cannot update the lock file of non-local flake '{}'",
                reference
            )))
        }
    };

    let deps = resolver.resolve_flake(&reference, true)?;
    let lock = LockFile::from_dependencies(&deps);

    let lock_path = flake_dir.join("flake.lock");
    lock.write(&lock_path)?;
    Ok(lock_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REV_1: &str = "1111111111111111111111111111111111111111";
    const REV_2: &str = "2222222222222222222222222222222222222222";
    const REV_3: &str = "3333333333333333333333333333333333333333";

    fn r(s: &str) -> FlakeRef {
        s.parse().unwrap()
    }

    /// Root pins B and a non-flake source; B pins C.
    fn sample_lock() -> LockFile {
        let mut lock = LockFile::default();
        lock.non_flake_entries
            .insert("src".into(), r(&format!("github:alice/src/{}", REV_2)));

        let mut b = FlakeEntry {
            flake_ref: r(&format!("github:alice/b/{}", REV_1)),
            flake_entries: BTreeMap::new(),
            non_flake_entries: BTreeMap::new(),
        };
        b.flake_entries.insert(
            "c".into(),
            FlakeEntry {
                flake_ref: r(&format!("git+https://example.com/c?rev={}", REV_3)),
                flake_entries: BTreeMap::new(),
                non_flake_entries: BTreeMap::new(),
            },
        );
        lock.flake_entries.insert("b".into(), b);
        lock
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let lock = LockFile::read(&tmp.path().join("flake.lock")).unwrap();
        assert!(lock.is_empty());
    }

    #[test]
    fn write_read_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("flake.lock");

        let lock = sample_lock();
        lock.write(&path).unwrap();
        let back = LockFile::read(&path).unwrap();

        assert_eq!(back, lock);
    }

    #[test]
    fn wire_format_shape() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("flake.lock");
        sample_lock().write(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(
            value["nonFlakeRequires"]["src"]["uri"],
            format!("github:alice/src/{}", REV_2)
        );
        assert_eq!(
            value["requires"]["b"]["uri"],
            format!("github:alice/b/{}", REV_1)
        );
        assert_eq!(
            value["requires"]["b"]["requires"]["c"]["uri"],
            format!("git+https://example.com/c?rev={}", REV_3)
        );
        // Nested entries carry the full recursive shape.
        assert!(value["requires"]["b"]["requires"]["c"]["requires"]
            .as_object()
            .unwrap()
            .is_empty());
        // 4-space indentation, trailing newline.
        assert!(content.starts_with("{\n    \"version\""));
        assert!(content.ends_with("}\n"));
    }

    #[test]
    fn writes_are_byte_stable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.lock");
        let b = tmp.path().join("b.lock");

        sample_lock().write(&a).unwrap();
        sample_lock().write(&b).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("flake.lock");
        fs::write(&path, r#"{"version": 7, "requires": {}}"#).unwrap();

        assert!(matches!(
            LockFile::read(&path),
            Err(Error::VersionMismatch { version: 7, .. })
        ));
    }

    #[test]
    fn mutable_pins_are_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("flake.lock");
        fs::write(
            &path,
            r#"{
    "version": 1,
    "nonFlakeRequires": {},
    "requires": {
        "b": {
            "uri": "github:alice/b",
            "nonFlakeRequires": {},
            "requires": {}
        }
    }
}"#,
        )
        .unwrap();

        let err = LockFile::read(&path).unwrap_err();
        match err {
            Error::MutableLockEntry { reference, .. } => {
                assert_eq!(reference, "github:alice/b")
            }
            other => panic!("expected MutableLockEntry, got {:?}", other),
        }
    }

    #[test]
    fn mutable_nested_non_flake_pin_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("flake.lock");
        fs::write(
            &path,
            format!(
                r#"{{
    "version": 1,
    "nonFlakeRequires": {{}},
    "requires": {{
        "b": {{
            "uri": "github:alice/b/{rev}",
            "nonFlakeRequires": {{
                "data": {{ "uri": "github:alice/data" }}
            }},
            "requires": {{}}
        }}
    }}
}}"#,
                rev = REV_1
            ),
        )
        .unwrap();

        assert!(matches!(
            LockFile::read(&path),
            Err(Error::MutableLockEntry { .. })
        ));
    }

    #[test]
    fn update_lock_file_rejects_non_local_roots() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = crate::store::Store::open(tmp.path().join("store")).unwrap();

        struct NoDownloader;
        impl crate::download::Downloader for NoDownloader {
            fn download(
                &self,
                _request: &crate::download::DownloadRequest<'_>,
            ) -> Result<crate::download::Download> {
                panic!("no network expected")
            }
        }
        struct NoExporter;
        impl crate::git::GitExporter for NoExporter {
            fn export(
                &self,
                _url: &str,
                _git_ref: &str,
                _rev: Option<&str>,
                _name: &str,
            ) -> Result<crate::git::GitExport> {
                panic!("no export expected")
            }
        }
        struct NoEvaluator;
        impl crate::eval::Evaluator for NoEvaluator {
            fn eval_expr(&self, _expr: &str, _context: &Path) -> Result<serde_json::Value> {
                panic!("no evaluation expected")
            }
        }

        let downloader = NoDownloader;
        let exporter = NoExporter;
        let evaluator = NoEvaluator;
        let resolver = Resolver {
            registries: crate::registry::Registries::default(),
            store: &store,
            fetcher: crate::fetch::Fetcher::new(
                &downloader,
                &exporter,
                std::time::Duration::from_secs(3600),
            ),
            evaluator: &evaluator,
            pure: false,
        };

        for uri in ["github:alice/proj", "nixpkgs", "git+https://example.com/r"] {
            let err = update_lock_file(&resolver, uri).unwrap_err();
            assert!(matches!(err, Error::Usage(_)), "uri {} gave {:?}", uri, err);
        }
    }
}
