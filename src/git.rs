//! Git exporting via libgit2.
//!
//! The fetcher talks to this through the `GitExporter` trait. The production
//! implementation mirrors remote repositories into the cache directory,
//! resolves a branch, tag or pinned commit, and exports that commit's tree
//! into the store (file modes and symlinks preserved). Local repositories
//! are opened in place and export their current HEAD commit.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{ObjectType, Oid, Repository};
use tracing::{debug, instrument, trace};

use crate::error::{Error, Result};
use crate::store::Store;

pub struct GitExport {
    pub store_path: PathBuf,
    /// The exported commit.
    pub rev: String,
    /// Number of commits reachable from the exported commit.
    pub rev_count: u64,
    /// Unix timestamp of the exported commit.
    pub last_modified: i64,
}

pub trait GitExporter {
    /// Export one commit of `url` into the store.
    ///
    /// `rev` pins an exact commit; otherwise `git_ref` names a branch or
    /// tag. An empty `git_ref` without `rev` exports the current HEAD,
    /// which is only meaningful for local repositories.
    fn export(
        &self,
        url: &str,
        git_ref: &str,
        rev: Option<&str>,
        name: &str,
    ) -> Result<GitExport>;
}

pub struct Git2Exporter {
    store: Arc<Store>,
    cache_dir: PathBuf,
}

impl Git2Exporter {
    pub fn new(store: Arc<Store>, cache_dir: impl Into<PathBuf>) -> Git2Exporter {
        Git2Exporter {
            store,
            cache_dir: cache_dir.into().join("git"),
        }
    }

    /// Open a local repository, or the cache mirror of a remote one,
    /// fetching when the wanted commit is not already present.
    fn open_repo(&self, url: &str, git_ref: &str, rev: Option<&str>) -> Result<Repository> {
        let git_err = |source| Error::Git {
            reference: url.to_string(),
            source,
        };

        let local = url.strip_prefix("file://").or_else(|| {
            (!url.contains("://") && !url.contains('@')).then_some(url)
        });
        if let Some(path) = local {
            return Repository::open(path).map_err(git_err);
        }

        let digest = blake3::hash(url.as_bytes()).to_hex()[..32].to_string();
        let mirror = self.cache_dir.join(digest);
        let repo = match Repository::open_bare(&mirror) {
            Ok(repo) => repo,
            Err(_) => {
                fs::create_dir_all(&mirror).map_err(|e| Error::io(&mirror, e))?;
                Repository::init_bare(&mirror).map_err(git_err)?
            }
        };

        // A pinned commit already in the mirror needs no network round-trip.
        let pinned_present = rev
            .and_then(|r| Oid::from_str(r).ok())
            .map(|oid| repo.find_commit(oid).is_ok())
            .unwrap_or(false);

        if !pinned_present {
            trace!(mirror = %mirror.display(), "fetching into mirror");
            let mut remote = repo.remote_anonymous(url).map_err(git_err)?;
            let refspecs: &[&str] = if git_ref.is_empty() {
                &["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"]
            } else {
                &["+refs/*:refs/*"]
            };
            remote.fetch(refspecs, None, None).map_err(git_err)?;
        }

        Ok(repo)
    }
}

impl GitExporter for Git2Exporter {
    #[instrument(level = "debug", skip(self), fields(url = %url, git_ref = %git_ref))]
    fn export(
        &self,
        url: &str,
        git_ref: &str,
        rev: Option<&str>,
        name: &str,
    ) -> Result<GitExport> {
        let git_err = |source| Error::Git {
            reference: url.to_string(),
            source,
        };

        let repo = self.open_repo(url, git_ref, rev)?;

        let commit = match rev {
            Some(rev) => {
                let oid = Oid::from_str(rev).map_err(git_err)?;
                repo.find_commit(oid).map_err(git_err)?
            }
            None if git_ref.is_empty() => repo
                .head()
                .and_then(|head| head.peel_to_commit())
                .map_err(git_err)?,
            None => {
                let reference = repo
                    .find_reference(&format!("refs/heads/{}", git_ref))
                    .or_else(|_| repo.find_reference(&format!("refs/tags/{}", git_ref)))
                    .map_err(git_err)?;
                reference.peel_to_commit().map_err(git_err)?
            }
        };

        let tree = commit.tree().map_err(git_err)?;

        let staging = tempfile::tempdir_in(
            self.store
                .root()
                .parent()
                .unwrap_or_else(|| Path::new(".")),
        )
        .map_err(|e| Error::io(self.store.root(), e))?;
        export_tree(&repo, &tree, staging.path()).map_err(git_err)?;

        let store_path = self.store.insert(name, staging.path())?;
        let rev = commit.id().to_string();
        let rev_count = count_commits(&repo, commit.id()).map_err(git_err)?;
        let last_modified = commit.time().seconds();

        debug!(rev = %rev, rev_count, path = %store_path.display(), "exported git tree");
        Ok(GitExport {
            store_path,
            rev,
            rev_count,
            last_modified,
        })
    }
}

/// Write a tree's blobs below `dir`, preserving the executable bit and
/// symlinks.
fn export_tree(repo: &Repository, tree: &git2::Tree, dir: &Path) -> std::result::Result<(), git2::Error> {
    use std::os::unix::fs::PermissionsExt;

    for entry in tree.iter() {
        let entry_name = entry.name().ok_or_else(|| {
            git2::Error::from_str("tree entry name is not valid UTF-8")
        })?;
        let target = dir.join(entry_name);

        match entry.kind() {
            Some(ObjectType::Tree) => {
                fs::create_dir_all(&target)
                    .map_err(|e| git2::Error::from_str(&e.to_string()))?;
                let subtree = entry.to_object(repo)?.peel_to_tree()?;
                export_tree(repo, &subtree, &target)?;
            }
            Some(ObjectType::Blob) => {
                let blob = entry.to_object(repo)?.peel_to_blob()?;
                if entry.filemode() == 0o120000 {
                    let link = std::str::from_utf8(blob.content())
                        .map_err(|_| git2::Error::from_str("symlink target is not UTF-8"))?;
                    std::os::unix::fs::symlink(link, &target)
                        .map_err(|e| git2::Error::from_str(&e.to_string()))?;
                } else {
                    fs::write(&target, blob.content())
                        .map_err(|e| git2::Error::from_str(&e.to_string()))?;
                    if entry.filemode() == 0o100755 {
                        fs::set_permissions(&target, fs::Permissions::from_mode(0o755))
                            .map_err(|e| git2::Error::from_str(&e.to_string()))?;
                    }
                }
            }
            _ => {} // submodules and the like are not exported
        }
    }
    Ok(())
}

/// Count the commits reachable from `start`.
fn count_commits(repo: &Repository, start: Oid) -> std::result::Result<u64, git2::Error> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(start)?;
    Ok(revwalk.count() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    /// Build a repository with two commits and return (dir, first, second).
    fn sample_repo() -> (tempfile::TempDir, String, String) {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();

        fs::write(tmp.path().join("flake.nix"), "{ name = \"one\"; }").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("flake.nix")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let first = repo
            .commit(Some("HEAD"), &sig, &sig, "one", &tree, &[])
            .unwrap();

        fs::write(tmp.path().join("flake.nix"), "{ name = \"two\"; }").unwrap();
        fs::write(tmp.path().join("extra.txt"), "data").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("flake.nix")).unwrap();
        index.add_path(Path::new("extra.txt")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let parent = repo.find_commit(first).unwrap();
        let second = repo
            .commit(Some("HEAD"), &sig, &sig, "two", &tree, &[&parent])
            .unwrap();

        (tmp, first.to_string(), second.to_string())
    }

    fn exporter(root: &Path) -> Git2Exporter {
        let store = Arc::new(Store::open(root.join("store")).unwrap());
        Git2Exporter::new(store, root.join("cache"))
    }

    #[test]
    fn export_head_of_local_repo() {
        let (repo_dir, _first, second) = sample_repo();
        let work = tempfile::TempDir::new().unwrap();
        let exporter = exporter(work.path());

        let export = exporter
            .export(repo_dir.path().to_str().unwrap(), "", None, "demo")
            .unwrap();

        assert_eq!(export.rev, second);
        assert_eq!(export.rev_count, 2);
        assert!(export.last_modified > 0);
        assert_eq!(
            fs::read_to_string(export.store_path.join("flake.nix")).unwrap(),
            "{ name = \"two\"; }"
        );
        assert!(export.store_path.join("extra.txt").exists());
    }

    #[test]
    fn export_pinned_commit() {
        let (repo_dir, first, _second) = sample_repo();
        let work = tempfile::TempDir::new().unwrap();
        let exporter = exporter(work.path());

        let export = exporter
            .export(
                repo_dir.path().to_str().unwrap(),
                "",
                Some(&first),
                "demo",
            )
            .unwrap();

        assert_eq!(export.rev, first);
        assert_eq!(export.rev_count, 1);
        assert_eq!(
            fs::read_to_string(export.store_path.join("flake.nix")).unwrap(),
            "{ name = \"one\"; }"
        );
        assert!(!export.store_path.join("extra.txt").exists());
    }

    #[test]
    fn export_unknown_ref_fails() {
        let (repo_dir, _, _) = sample_repo();
        let work = tempfile::TempDir::new().unwrap();
        let exporter = exporter(work.path());

        let result = exporter.export(
            repo_dir.path().to_str().unwrap(),
            "no-such-branch",
            None,
            "demo",
        );
        assert!(matches!(result, Err(Error::Git { .. })));
    }
}
