//! Runtime configuration.
//!
//! Assembled once from flags and the environment and passed down explicitly;
//! nothing in the resolver reads a process-global. Pure evaluation mode is a
//! separate argument threaded through the call chain, not part of this
//! struct, so tests can flip it per call.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default time-to-live for unpinned GitHub tarball downloads.
pub const DEFAULT_TARBALL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local source store.
    pub store_dir: PathBuf,
    /// Cache for downloads and git mirrors.
    pub cache_dir: PathBuf,
    /// Data directory holding the global flake registry.
    pub data_dir: PathBuf,
    /// How long an unpinned tarball download stays fresh.
    pub tarball_ttl: Duration,
}

impl Config {
    /// Build a configuration from the environment.
    pub fn from_env() -> Config {
        let cache_root = env::var_os("FLECK_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join("fleck")
            });

        let store_dir = env::var_os("FLECK_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_root.join("store"));

        let data_dir = env::var_os("FLECK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/usr/share"));

        let tarball_ttl = env::var("FLECK_TARBALL_TTL")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TARBALL_TTL);

        Config {
            store_dir,
            cache_dir: cache_root,
            data_dir,
            tarball_ttl,
        }
    }

    /// A configuration rooted entirely below `root`, for tests.
    pub fn rooted_at(root: &std::path::Path) -> Config {
        Config {
            store_dir: root.join("store"),
            cache_dir: root.join("cache"),
            data_dir: root.join("share"),
            tarball_ttl: DEFAULT_TARBALL_TTL,
        }
    }
}
