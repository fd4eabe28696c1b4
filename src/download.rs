//! Tarball downloading with ETag-based caching.
//!
//! The fetcher talks to this through the `Downloader` trait so tests can
//! substitute a recording fake. The production implementation performs a
//! blocking GET, unpacks the gzipped tarball (stripping the single
//! `owner-repo-rev/` directory GitHub wraps archives in) and inserts the
//! tree into the store. A sidecar JSON file per URL remembers the ETag and
//! fetch time; within the TTL the cached tree is reused without touching the
//! network, past it a conditional GET revalidates via `If-None-Match`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::store::Store;

pub struct DownloadRequest<'a> {
    pub url: &'a str,
    /// Store name for the unpacked tree.
    pub name: &'a str,
    /// How long a previous download of this URL stays fresh.
    pub ttl: Duration,
}

pub struct Download {
    pub store_path: PathBuf,
    /// Raw ETag response header, quotes included, if the server sent one.
    pub etag: Option<String>,
}

pub trait Downloader {
    /// Fetch `url`, unpack it and return its store path.
    fn download(&self, request: &DownloadRequest<'_>) -> Result<Download>;
}

/// Cached download state, stored next to nothing else in
/// `<cache>/tarballs/<digest>.json`.
#[derive(Serialize, Deserialize)]
struct CacheInfo {
    url: String,
    etag: Option<String>,
    fetched_at: u64,
    store_path: PathBuf,
}

impl CacheInfo {
    fn is_fresh(&self, now: u64, ttl: Duration) -> bool {
        u128::from(now.saturating_sub(self.fetched_at)) <= u128::from(ttl.as_secs())
    }
}

pub struct HttpDownloader {
    store: Arc<Store>,
    cache_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new(store: Arc<Store>, cache_dir: impl Into<PathBuf>) -> HttpDownloader {
        HttpDownloader {
            store,
            cache_dir: cache_dir.into().join("tarballs"),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn info_path(&self, url: &str) -> PathBuf {
        let digest = blake3::hash(url.as_bytes()).to_hex()[..32].to_string();
        self.cache_dir.join(format!("{}.json", digest))
    }

    fn read_info(&self, url: &str) -> Option<CacheInfo> {
        let content = fs::read_to_string(self.info_path(url)).ok()?;
        let info: CacheInfo = serde_json::from_str(&content).ok()?;
        info.store_path.is_dir().then_some(info)
    }

    fn write_info(&self, info: &CacheInfo) -> Result<()> {
        let path = self.info_path(&info.url);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let content =
            serde_json::to_string_pretty(info).map_err(|e| Error::json(&path, e))?;
        fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Downloader for HttpDownloader {
    #[instrument(level = "debug", skip(self, request), fields(url = %request.url))]
    fn download(&self, request: &DownloadRequest<'_>) -> Result<Download> {
        let http_err = |source| Error::Http {
            url: request.url.to_string(),
            source,
        };

        let cached = self.read_info(request.url);
        if let Some(ref info) = cached {
            if info.is_fresh(now_secs(), request.ttl) {
                debug!(path = %info.store_path.display(), "using cached download");
                return Ok(Download {
                    store_path: info.store_path.clone(),
                    etag: info.etag.clone(),
                });
            }
        }

        let mut builder = self
            .client
            .get(request.url)
            .header(reqwest::header::USER_AGENT, "fleck");
        if let Some(CacheInfo {
            etag: Some(ref etag),
            ..
        }) = cached
        {
            builder = builder.header(reqwest::header::IF_NONE_MATCH, etag.clone());
        }

        let response = builder.send().map_err(http_err)?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            let mut info = cached.expect("conditional request implies cached info");
            debug!("server revalidated cached download");
            info.fetched_at = now_secs();
            self.write_info(&info)?;
            return Ok(Download {
                store_path: info.store_path,
                etag: info.etag,
            });
        }

        let response = response.error_for_status().map_err(http_err)?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let cache_root = self
            .cache_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        fs::create_dir_all(&cache_root).map_err(|e| Error::io(&cache_root, e))?;
        let unpack_dir =
            tempfile::tempdir_in(&cache_root).map_err(|e| Error::io(&cache_root, e))?;
        let tree = unpack_tarball(response, unpack_dir.path())?;
        let store_path = self.store.insert(request.name, &tree)?;

        self.write_info(&CacheInfo {
            url: request.url.to_string(),
            etag: etag.clone(),
            fetched_at: now_secs(),
            store_path: store_path.clone(),
        })?;

        debug!(path = %store_path.display(), "downloaded and unpacked");
        Ok(Download { store_path, etag })
    }
}

/// Unpack a gzipped tarball below `dest` and return the root of the source
/// tree. Archives wrapping everything in a single top-level directory (as
/// GitHub's do) have that component stripped.
fn unpack_tarball(reader: impl Read, dest: &Path) -> Result<PathBuf> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    archive.unpack(dest).map_err(|e| Error::io(dest, e))?;

    let entries: Vec<_> = fs::read_dir(dest)
        .map_err(|e| Error::io(dest, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::io(dest, e))?;

    if entries.len() == 1 && entries[0].path().is_dir() {
        Ok(entries[0].path())
    } else {
        Ok(dest.to_path_buf())
    }
}
