//! Source fetching.
//!
//! Dispatches a resolved (direct) reference to the matching transport:
//! GitHub tarball download, git clone/export, or local git checkout. The
//! purity gate runs before any transport is touched, so pure evaluation can
//! never leak a network request for a mutable reference.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::download::{DownloadRequest, Downloader};
use crate::error::{Error, Result};
use crate::flake_ref::{is_commit_hash, FlakeRef};
use crate::git::GitExporter;
use crate::progress;

/// What a fetch produced: the materialized tree plus whatever provenance the
/// transport could determine. Tarball fetches cannot know a commit depth, so
/// `rev_count` stays empty for GitHub.
#[derive(Debug, Clone)]
pub struct FlakeSourceInfo {
    pub store_path: PathBuf,
    pub rev: Option<String>,
    pub rev_count: Option<u64>,
    pub last_modified: Option<i64>,
}

pub struct Fetcher<'a> {
    downloader: &'a dyn Downloader,
    exporter: &'a dyn GitExporter,
    tarball_ttl: Duration,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        downloader: &'a dyn Downloader,
        exporter: &'a dyn GitExporter,
        tarball_ttl: Duration,
    ) -> Fetcher<'a> {
        Fetcher {
            downloader,
            exporter,
            tarball_ttl,
        }
    }

    /// Materialize a reference in the store.
    ///
    /// `impure_allowed` marks the one fetch (the impure top-level) that may
    /// chase a mutable reference while pure evaluation is otherwise active.
    #[instrument(level = "debug", skip(self), fields(reference = %reference))]
    pub fn fetch(
        &self,
        reference: &FlakeRef,
        pure: bool,
        impure_allowed: bool,
    ) -> Result<FlakeSourceInfo> {
        if pure && !impure_allowed && !reference.is_immutable() {
            return Err(Error::PurityViolation {
                reference: reference.to_string(),
            });
        }

        let status = progress::fetching(&reference.to_string());
        let info = self.fetch_dispatch(reference);
        status.finish_and_clear();
        info
    }

    fn fetch_dispatch(&self, reference: &FlakeRef) -> Result<FlakeSourceInfo> {
        let name = reference.source_name();
        match reference {
            FlakeRef::Alias { .. } => Err(Error::UnresolvedAlias {
                reference: reference.to_string(),
            }),

            FlakeRef::GitHub {
                owner,
                repo,
                git_ref,
                rev,
            } => {
                let version = rev
                    .as_deref()
                    .or(git_ref.as_deref())
                    .unwrap_or("master");
                let url = format!(
                    "https://api.github.com/repos/{}/{}/tarball/{}",
                    owner, repo, version
                );
                // A pinned archive can never change, so it never goes stale.
                let ttl = if rev.is_some() {
                    Duration::MAX
                } else {
                    self.tarball_ttl
                };

                let download = self.downloader.download(&DownloadRequest {
                    url: &url,
                    name: &name,
                    ttl,
                })?;
                let rev = commit_hash_from_etag(&url, download.etag)?;

                debug!(rev = %rev, "github tarball fetched");
                Ok(FlakeSourceInfo {
                    store_path: download.store_path,
                    rev: Some(rev),
                    rev_count: None,
                    last_modified: None,
                })
            }

            FlakeRef::Git { url, git_ref, rev } => {
                let export = self.exporter.export(
                    url,
                    git_ref.as_deref().unwrap_or("master"),
                    rev.as_deref(),
                    &name,
                )?;
                Ok(FlakeSourceInfo {
                    store_path: export.store_path,
                    rev: Some(export.rev),
                    rev_count: Some(export.rev_count),
                    last_modified: Some(export.last_modified),
                })
            }

            FlakeRef::Path { path, .. } => {
                if !std::path::Path::new(path).join(".git").exists() {
                    return Err(Error::NotAGitRepo {
                        path: PathBuf::from(path),
                    });
                }
                // The working tree's current commit, whatever it is.
                let export = self.exporter.export(path, "", None, &name)?;
                Ok(FlakeSourceInfo {
                    store_path: export.store_path,
                    rev: Some(export.rev),
                    rev_count: Some(export.rev_count),
                    last_modified: Some(export.last_modified),
                })
            }
        }
    }
}

/// GitHub encodes the resolved commit as the archive's ETag: a 40-hex hash
/// wrapped in double quotes, 42 characters in all. Anything else is fatal.
fn commit_hash_from_etag(url: &str, etag: Option<String>) -> Result<String> {
    let malformed = |etag: Option<String>| Error::MalformedETag {
        url: url.to_string(),
        etag,
    };

    let Some(etag) = etag else {
        return Err(malformed(None));
    };
    if etag.len() != 42 || !etag.starts_with('"') || !etag.ends_with('"') {
        return Err(malformed(Some(etag)));
    }
    let inner = &etag[1..41];
    if !is_commit_hash(inner) {
        return Err(malformed(Some(etag)));
    }
    Ok(inner.to_string())
}
