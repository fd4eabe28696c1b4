//! Error types for the resolver core.
//!
//! Every variant carries the reference or path that triggered it, so the
//! message printed at the top level points at something the user typed or a
//! file on disk. CLI layers wrap these in `anyhow` for context chains.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A registry or lock file declares a version other than 1.
    #[error("unsupported version {version} in '{}'", path.display())]
    VersionMismatch { path: PathBuf, version: u64 },

    /// A mutable reference was encountered while pure evaluation forbids it.
    #[error("cannot fetch mutable flake reference '{reference}' in pure evaluation mode")]
    PurityViolation { reference: String },

    /// Registry resolution revisited a target it had already rewritten to.
    #[error("cycle detected in flake registry: {}", trail.join(" -> "))]
    CycleInRegistry { trail: Vec<String> },

    /// No registry in the stack resolved an alias.
    #[error("cannot resolve flake reference '{reference}' in the flake registries")]
    UnresolvedAlias { reference: String },

    /// The GitHub tarball response lacked a usable ETag commit hash.
    #[error("ETag {etag:?} returned by '{url}' is not a quoted 40-character commit hash")]
    MalformedETag { url: String, etag: Option<String> },

    /// `flake.nix` is missing a required attribute.
    #[error("flake at '{}' lacks required attribute '{attribute}'", path.display())]
    MissingFlakeAttribute {
        path: PathBuf,
        attribute: &'static str,
    },

    /// A path reference does not point at a git repository.
    #[error("'{}' is not a git repository (no .git entry)", path.display())]
    NotAGitRepo { path: PathBuf },

    /// An operation was invoked on a reference it cannot apply to.
    #[error("{0}")]
    Usage(String),

    /// A flake reference string could not be parsed.
    #[error("invalid flake reference '{reference}': {reason}")]
    BadFlakeRef { reference: String, reason: String },

    /// A lock file pins a reference that is not immutable.
    #[error("lock file '{}' contains mutable reference '{reference}'", path.display())]
    MutableLockEntry { path: PathBuf, reference: String },

    #[error("error reading '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("git error for '{reference}': {source}")]
    Git {
        reference: String,
        #[source]
        source: git2::Error,
    },

    #[error("download of '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Evaluation of a flake's metadata file failed.
    #[error("evaluation of '{}' failed: {reason}", path.display())]
    Eval { path: PathBuf, reason: String },

    /// A path that should live inside the store does not.
    #[error("'{}' is not a store path", path.display())]
    NotAStorePath { path: PathBuf },
}

impl Error {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a path to a JSON error.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }
}
