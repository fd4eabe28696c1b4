//! Flake loading and dependency resolution.
//!
//! `get_flake` materializes one source tree and reads its metadata;
//! `resolve_flake` recurses over declared dependencies and produces the
//! `Dependencies` tree the lock-file codec serializes. Resolution is
//! depth-first and sequential; dependencies are visited in declaration
//! order. Diamond dependencies are not deduplicated, so a flake required
//! twice appears twice in the tree.

use std::path::PathBuf;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::eval::{read_flake_metadata, Evaluator};
use crate::fetch::Fetcher;
use crate::flake_ref::FlakeRef;
use crate::lock::LockFile;
use crate::registry::Registries;
use crate::resolve::lookup_flake;
use crate::store::Store;

/// The unevaluated `provides` function of a flake, identified by the file it
/// lives in. It is applied later by generating an expression over the whole
/// closure (see the `value` module).
#[derive(Debug, Clone, PartialEq)]
pub struct Provides {
    pub flake_nix: PathBuf,
}

/// Metadata of one materialized flake.
#[derive(Debug, Clone)]
pub struct Flake {
    /// Identifier from the `name` attribute.
    pub id: String,
    /// The reference the flake was fetched from, pinned to the resolved
    /// commit.
    pub flake_ref: FlakeRef,
    /// Store path of the fetched source.
    pub path: PathBuf,
    pub description: Option<String>,
    /// Flake dependencies, in declaration order.
    pub requires: Vec<FlakeRef>,
    /// Raw source dependencies: alias to reference.
    pub non_flake_requires: Vec<(String, FlakeRef)>,
    pub provides: Provides,
    /// Commit depth; never known for tarball fetches.
    pub rev_count: Option<u64>,
    /// Commit timestamp, when the transport knows one.
    pub last_modified: Option<i64>,
    /// The `flake.lock` shipped inside the source, if any.
    pub lock_file: LockFile,
}

/// A fetched source without a `flake.nix`.
#[derive(Debug, Clone)]
pub struct NonFlake {
    /// Alias under which the parent flake required this source.
    pub alias: String,
    pub flake_ref: FlakeRef,
    pub path: PathBuf,
}

/// The resolved closure of one top-level flake.
#[derive(Debug, Clone)]
pub struct Dependencies {
    pub flake: Flake,
    pub flake_deps: Vec<Dependencies>,
    pub non_flake_deps: Vec<NonFlake>,
}

/// Everything one resolution needs, assembled by the caller and threaded
/// explicitly: the registry stack, the store, the transports and the purity
/// mode.
pub struct Resolver<'a> {
    pub registries: Registries,
    pub store: &'a Store,
    pub fetcher: Fetcher<'a>,
    pub evaluator: &'a dyn Evaluator,
    pub pure: bool,
}

impl Resolver<'_> {
    /// Rewrite a reference through the registry stack.
    pub fn resolve_ref(&self, reference: &FlakeRef) -> Result<FlakeRef> {
        lookup_flake(reference, &self.registries)
    }

    /// Resolve, fetch and load one flake.
    #[instrument(level = "debug", skip(self), fields(reference = %reference))]
    pub fn get_flake(&self, reference: &FlakeRef, impure_allowed: bool) -> Result<Flake> {
        let resolved = self.resolve_ref(reference)?;
        let info = self.fetcher.fetch(&resolved, self.pure, impure_allowed)?;
        self.store.assert_store_path(&info.store_path)?;
        self.store.insert_allowed_path(&info.store_path);

        let flake_ref = pin_fetched_ref(&resolved, info.rev.as_deref());

        let flake_nix = info.store_path.join("flake.nix");
        assert_plain_file(&flake_nix)?;

        let metadata = read_flake_metadata(self.evaluator, &flake_nix)?;

        let id = metadata.name.ok_or_else(|| Error::MissingFlakeAttribute {
            path: info.store_path.clone(),
            attribute: "name",
        })?;
        if !metadata.has_provides {
            return Err(Error::MissingFlakeAttribute {
                path: info.store_path.clone(),
                attribute: "provides",
            });
        }

        let requires = metadata
            .requires
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<FlakeRef>>>()?;
        let non_flake_requires = metadata
            .non_flake_requires
            .iter()
            .map(|(alias, s)| Ok((alias.clone(), s.parse()?)))
            .collect::<Result<Vec<(String, FlakeRef)>>>()?;

        let lock_path = info.store_path.join("flake.lock");
        let lock_file = if lock_path.exists() {
            assert_plain_file(&lock_path)?;
            LockFile::read(&lock_path)?
        } else {
            LockFile::default()
        };

        debug!(id = %id, flake_ref = %flake_ref, "loaded flake");
        Ok(Flake {
            id,
            flake_ref,
            path: info.store_path,
            description: metadata.description,
            requires,
            non_flake_requires,
            provides: Provides { flake_nix },
            rev_count: info.rev_count,
            last_modified: info.last_modified,
            lock_file,
        })
    }

    /// Resolve and fetch a source that is not itself a flake.
    #[instrument(level = "debug", skip(self), fields(reference = %reference, alias = %alias))]
    pub fn get_non_flake(&self, reference: &FlakeRef, alias: &str) -> Result<NonFlake> {
        let resolved = self.resolve_ref(reference)?;
        let info = self.fetcher.fetch(&resolved, self.pure, false)?;
        self.store.assert_store_path(&info.store_path)?;
        self.store.insert_allowed_path(&info.store_path);

        Ok(NonFlake {
            alias: alias.to_string(),
            flake_ref: pin_fetched_ref(&resolved, info.rev.as_deref()),
            path: info.store_path,
        })
    }

    /// Resolve the full dependency closure of `top`.
    ///
    /// `impure_top` lets the root fetch escape pure mode; recursive fetches
    /// never do, so children cannot be less pure than the root.
    #[instrument(level = "debug", skip(self), fields(reference = %top))]
    pub fn resolve_flake(&self, top: &FlakeRef, impure_top: bool) -> Result<Dependencies> {
        let flake = self.get_flake(top, impure_top)?;
        self.resolve_deps(flake)
    }

    fn resolve_deps(&self, flake: Flake) -> Result<Dependencies> {
        let mut non_flake_deps = Vec::new();
        for (alias, reference) in flake.non_flake_requires.clone() {
            non_flake_deps.push(self.get_non_flake(&reference, &alias)?);
        }

        let mut flake_deps = Vec::new();
        for reference in flake.requires.clone() {
            let sub = self.get_flake(&reference, false)?;
            flake_deps.push(self.resolve_deps(sub)?);
        }

        Ok(Dependencies {
            flake,
            flake_deps,
            non_flake_deps,
        })
    }
}

/// Pin a fetched reference to the commit the transport resolved.
///
/// GitHub refs are rewritten to their base plus the commit, so downstream
/// consumers always see a reproducible reference; git and path refs keep
/// their shape and gain the `rev`.
fn pin_fetched_ref(resolved: &FlakeRef, rev: Option<&str>) -> FlakeRef {
    let Some(rev) = rev else {
        return resolved.clone();
    };
    match resolved {
        FlakeRef::GitHub { .. } => resolved.base_ref().with_rev(rev),
        _ => resolved.with_rev(rev),
    }
}

/// Refuse to read metadata through a symlink.
fn assert_plain_file(path: &std::path::Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
    if meta.file_type().is_symlink() {
        return Err(Error::Eval {
            path: path.to_path_buf(),
            reason: "refusing to follow a symlink".to_string(),
        });
    }
    if !meta.is_file() {
        return Err(Error::Eval {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }
    Ok(())
}
