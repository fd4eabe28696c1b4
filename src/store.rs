//! Local source store.
//!
//! A directory of immutable source trees named `<digest>-<name>`, standing in
//! for a full content-addressed store. Inserting the same tree twice yields
//! the same path; trees are copied into place under a temporary name and
//! renamed so a partially copied tree is never visible under its final path.
//! The store also keeps the allow-list of paths that pure evaluation may
//! read.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{Error, Result};

pub struct Store {
    root: PathBuf,
    allowed: Mutex<HashSet<PathBuf>>,
}

impl Store {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Store> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Store {
            root,
            allowed: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `source` into the store under a content digest, returning the
    /// store path. A tree already present is reused without copying.
    pub fn insert(&self, name: &str, source: &Path) -> Result<PathBuf> {
        let digest = hash_tree(source)?;
        let dest = self.root.join(format!("{}-{}", digest, name));
        if dest.exists() {
            trace!(path = %dest.display(), "store path already present");
            return Ok(dest);
        }

        let staging = self.root.join(format!(".tmp-{}-{}", digest, name));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
        }
        copy_tree(source, &staging)?;
        fs::rename(&staging, &dest).map_err(|e| Error::io(&dest, e))?;

        debug!(path = %dest.display(), "inserted store path");
        Ok(dest)
    }

    /// Fail unless `path` names an entry of this store.
    pub fn assert_store_path(&self, path: &Path) -> Result<()> {
        if path.parent() == Some(self.root.as_path()) && path.is_dir() {
            Ok(())
        } else {
            Err(Error::NotAStorePath {
                path: path.to_path_buf(),
            })
        }
    }

    /// Record a path that pure evaluation is allowed to read.
    pub fn insert_allowed_path(&self, path: &Path) {
        self.allowed.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn is_allowed_path(&self, path: &Path) -> bool {
        self.allowed.lock().unwrap().contains(path)
    }
}

/// Digest a tree: relative path, kind, permissions and contents of every
/// entry, in sorted order.
fn hash_tree(root: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();

    let mut entries: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::io(root, std::io::Error::other(e)))?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let path = entry.path();
        let rel = path.strip_prefix(root).expect("entry under root");
        hasher.update(rel.to_string_lossy().as_bytes());

        let meta = entry
            .metadata()
            .map_err(|e| Error::io(path, std::io::Error::other(e)))?;
        if meta.is_dir() {
            hasher.update(b"\0dir\0");
        } else if meta.file_type().is_symlink() {
            let target = fs::read_link(path).map_err(|e| Error::io(path, e))?;
            hasher.update(b"\0link\0");
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            let executable = meta.permissions().mode() & 0o100 != 0;
            hasher.update(if executable { &b"\0exe\0"[..] } else { &b"\0file\0"[..] });
            let contents = fs::read(path).map_err(|e| Error::io(path, e))?;
            hasher.update(&contents);
        }
        hasher.update(b"\0");
    }

    Ok(hasher.finalize().to_hex()[..32].to_string())
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| Error::io(source, std::io::Error::other(e)))?;
        let rel = entry.path().strip_prefix(source).expect("entry under source");
        let target = dest.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| Error::io(entry.path(), e))?;
            std::os::unix::fs::symlink(&link, &target).map_err(|e| Error::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| Error::io(&target, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tree(dir: &Path) {
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("flake.nix"), "{ name = \"demo\"; }").unwrap();
        fs::write(dir.join("sub/data.txt"), "payload").unwrap();
    }

    #[test]
    fn insert_copies_and_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("src");
        write_tree(&source);

        let store = Store::open(tmp.path().join("store")).unwrap();
        let first = store.insert("demo", &source).unwrap();
        let second = store.insert("demo", &source).unwrap();

        assert_eq!(first, second);
        assert!(first.join("sub/data.txt").exists());
        assert!(first
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("-demo"));
    }

    #[test]
    fn digest_tracks_contents() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("src");
        write_tree(&source);

        let store = Store::open(tmp.path().join("store")).unwrap();
        let first = store.insert("demo", &source).unwrap();

        fs::write(source.join("sub/data.txt"), "changed").unwrap();
        let second = store.insert("demo", &source).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn assert_store_path_rejects_foreign_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("src");
        write_tree(&source);

        let store = Store::open(tmp.path().join("store")).unwrap();
        let inserted = store.insert("demo", &source).unwrap();

        assert!(store.assert_store_path(&inserted).is_ok());
        assert!(store.assert_store_path(&source).is_err());
        assert!(store.assert_store_path(Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn allow_list_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::open(tmp.path().join("store")).unwrap();

        let path = Path::new("/some/store/path");
        assert!(!store.is_allowed_path(path));
        store.insert_allowed_path(path);
        assert!(store.is_allowed_path(path));
    }
}
